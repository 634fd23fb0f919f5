//! Ordering and membership
//!
//! Admission of sellers and buyers while a game is registering, and the
//! transition into bidding.
//!
//! Sellers keep arrival order. Buyers are ranked by contribution metric,
//! highest first, so that prosumers who give more to the grid bid earlier.

use chrono::{DateTime, Utc};
use common::ProsumerId;
use rand::Rng;

use crate::domain::Game;
use crate::error::{Rejection, Result};

/// Check that a prosumer may still join the game at `timestamp`
pub fn check_admission(
    game: &Game,
    prosumer: &ProsumerId,
    timestamp: DateTime<Utc>,
) -> std::result::Result<(), Rejection> {
    if !game.accepts_registrations {
        return Err(Rejection::RegistrationClosed(game.id.clone()));
    }
    if !game.in_registration_window(timestamp) {
        return Err(Rejection::OutsideRegistrationWindow(game.id.clone()));
    }
    if game.is_participant(prosumer) {
        return Err(Rejection::AlreadyParticipant(prosumer.clone()));
    }
    Ok(())
}

/// Append a seller with its offer. Returns the seller index.
pub fn admit_seller(
    game: &mut Game,
    prosumer: &ProsumerId,
    amount: f64,
    price: f64,
    timestamp: DateTime<Utc>,
) -> Result<usize> {
    if !(amount > 0.0 && price > 0.0 && amount.is_finite() && price.is_finite()) {
        return Err(Rejection::NonPositiveOffer { amount, price }.into());
    }
    check_admission(game, prosumer, timestamp)?;
    if game.seller_index(prosumer).is_some() {
        return Err(Rejection::AlreadySeller(prosumer.clone()).into());
    }

    game.participants.push(prosumer.clone());
    game.sellers.push(prosumer.clone());
    game.offers_amounts.push(amount);
    game.offers_prices.push(price);

    game.check_consistency()?;
    Ok(game.nr_sellers() - 1)
}

/// Where a buyer with `metric` goes among buyers already ranked by `ranked`
///
/// Inserted before the first strictly lower metric. On an exact tie the
/// newcomer goes right after the tied buyer, except when that buyer holds the
/// last slot, where scanning simply runs off the end and appends.
pub fn buyer_insertion_index(metric: f64, ranked: &[f64]) -> usize {
    let last = ranked.len().saturating_sub(1);

    for (i, &current) in ranked.iter().enumerate() {
        if metric > current {
            return i;
        }
        if metric == current && i != last {
            return i + 1;
        }
    }

    ranked.len()
}

/// Insert a buyer with its demand. Returns the buyer index.
///
/// `ranked` holds the contribution metric of every buyer in
/// `game.buyers_ordered`, in the same order.
pub fn admit_buyer(
    game: &mut Game,
    prosumer: &ProsumerId,
    metric: f64,
    ranked: &[f64],
    amount: f64,
    timestamp: DateTime<Utc>,
) -> Result<usize> {
    if !(amount > 0.0 && amount.is_finite()) {
        return Err(Rejection::NonPositiveDemand(amount).into());
    }
    check_admission(game, prosumer, timestamp)?;
    if game.buyer_index(prosumer).is_some() {
        return Err(Rejection::AlreadyBuyer(prosumer.clone()).into());
    }
    if ranked.len() != game.nr_buyers() {
        return Err(crate::error::MarketError::Consistency(format!(
            "{} metrics for {} ranked buyers",
            ranked.len(),
            game.nr_buyers()
        )));
    }

    let index = buyer_insertion_index(metric, ranked);
    game.buyers_ordered.insert(index, prosumer.clone());
    game.demands.insert(index, amount);
    game.participants.push(prosumer.clone());

    game.check_consistency()?;
    Ok(index)
}

/// Stop registration and set up the first bidding round
///
/// Every buyer gets its own hop distance to each seller, drawn uniformly from
/// `1..=nr_sellers`.
pub fn open_bidding<R: Rng + ?Sized>(
    game: &mut Game,
    rng: &mut R,
) -> std::result::Result<(), Rejection> {
    if !game.accepts_registrations {
        return Err(Rejection::RegistrationClosed(game.id.clone()));
    }
    let nr_buyers = game.nr_buyers();
    if nr_buyers == 0 {
        return Err(Rejection::NoBuyers(game.id.clone()));
    }

    let nr_sellers = game.nr_sellers();
    let max_hops = u32::try_from(nr_sellers).unwrap_or(u32::MAX);

    game.accepts_registrations = false;
    game.buyers_keep_playing = vec![true; nr_buyers];
    game.buyers_keep_playing_previous = vec![false; nr_buyers];
    game.buyers_played_current_round = vec![false; nr_buyers];
    game.hop_distances = (0..nr_buyers)
        .map(|_| (0..nr_sellers).map(|_| rng.gen_range(1..=max_hops)).collect())
        .collect();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketError;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone};
    use common::GameId;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn game() -> Game {
        Game::new(GameId::new("Game-test"), start(), 60_000)
    }

    fn pid(id: &str) -> ProsumerId {
        ProsumerId::new(id)
    }

    #[test]
    fn test_insertion_before_first_lower() {
        assert_eq!(buyer_insertion_index(0.5, &[]), 0);
        assert_eq!(buyer_insertion_index(0.9, &[0.8, 0.2]), 0);
        assert_eq!(buyer_insertion_index(0.5, &[0.8, 0.2]), 1);
        assert_eq!(buyer_insertion_index(0.1, &[0.8, 0.2]), 2);
    }

    #[test]
    fn test_insertion_tie_rules() {
        // Tie with a non-last buyer lands right after it
        assert_eq!(buyer_insertion_index(0.8, &[0.8, 0.2]), 1);
        // Tie with the last buyer falls through to append
        assert_eq!(buyer_insertion_index(0.2, &[0.8, 0.2]), 2);
        assert_eq!(buyer_insertion_index(0.5, &[0.5]), 1);
        // A run of ties stops after the first tied buyer
        assert_eq!(buyer_insertion_index(0.5, &[0.5, 0.5, 0.5]), 1);
    }

    #[test]
    fn test_admit_buyers_keeps_descending_order() {
        let mut game = game();
        let mut metrics: Vec<f64> = Vec::new();

        for (id, metric) in [("B1", 0.3), ("B2", 0.9), ("B3", 0.1), ("B4", 0.5)] {
            let idx = admit_buyer(&mut game, &pid(id), metric, &metrics, 10.0, start()).unwrap();
            metrics.insert(idx, metric);
        }

        let order: Vec<&str> = game.buyers_ordered.iter().map(|b| b.as_str()).collect();
        assert_eq!(order, vec!["B2", "B4", "B1", "B3"]);
        assert!(metrics.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(game.demands.len(), 4);
        assert_eq!(game.participants.len(), 4);
    }

    #[test]
    fn test_demands_follow_buyer_order() {
        let mut game = game();
        admit_buyer(&mut game, &pid("B1"), 0.2, &[], 20.0, start()).unwrap();
        admit_buyer(&mut game, &pid("B2"), 0.8, &[0.2], 30.0, start()).unwrap();

        assert_eq!(game.buyers_ordered, vec![pid("B2"), pid("B1")]);
        assert_eq!(game.demands, vec![30.0, 20.0]);
    }

    #[test]
    fn test_admit_seller_is_fcfs() {
        let mut game = game();
        assert_eq!(admit_seller(&mut game, &pid("S1"), 50.0, 0.06, start()).unwrap(), 0);
        assert_eq!(admit_seller(&mut game, &pid("S2"), 50.0, 0.07, start()).unwrap(), 1);
        assert_eq!(game.offers_prices, vec![0.06, 0.07]);
    }

    #[test]
    fn test_duplicate_registration_does_not_mutate() {
        let mut game = game();
        admit_seller(&mut game, &pid("S1"), 50.0, 0.06, start()).unwrap();
        let before = game.clone();

        let again = admit_seller(&mut game, &pid("S1"), 10.0, 0.05, start());
        assert_matches!(again, Err(MarketError::Rejected(Rejection::AlreadyParticipant(_))));
        let as_buyer = admit_buyer(&mut game, &pid("S1"), 0.5, &[], 10.0, start());
        assert_matches!(as_buyer, Err(MarketError::Rejected(Rejection::AlreadyParticipant(_))));
        assert_eq!(game, before);
    }

    #[test]
    fn test_non_positive_amounts() {
        let mut game = game();
        assert_matches!(
            admit_seller(&mut game, &pid("S1"), 0.0, 0.06, start()),
            Err(MarketError::Rejected(Rejection::NonPositiveOffer { .. }))
        );
        assert_matches!(
            admit_seller(&mut game, &pid("S1"), 10.0, -1.0, start()),
            Err(MarketError::Rejected(Rejection::NonPositiveOffer { .. }))
        );
        assert_matches!(
            admit_buyer(&mut game, &pid("B1"), 0.5, &[], 0.0, start()),
            Err(MarketError::Rejected(Rejection::NonPositiveDemand(_)))
        );
    }

    #[test]
    fn test_registration_window() {
        let mut game = game();
        let late = start() + Duration::milliseconds(60_000);
        let early = start() - Duration::milliseconds(1);

        assert_matches!(
            admit_seller(&mut game, &pid("S1"), 10.0, 0.1, late),
            Err(MarketError::Rejected(Rejection::OutsideRegistrationWindow(_)))
        );
        assert_matches!(
            admit_buyer(&mut game, &pid("B1"), 0.5, &[], 10.0, early),
            Err(MarketError::Rejected(Rejection::OutsideRegistrationWindow(_)))
        );
        assert!(admit_seller(&mut game, &pid("S1"), 10.0, 0.1, late - Duration::milliseconds(1)).is_ok());
    }

    #[test]
    fn test_open_bidding_requires_buyers() {
        let mut game = game();
        let mut rng = StdRng::seed_from_u64(1);
        admit_seller(&mut game, &pid("S1"), 10.0, 0.1, start()).unwrap();

        assert_matches!(open_bidding(&mut game, &mut rng), Err(Rejection::NoBuyers(_)));
        assert!(game.accepts_registrations);
    }

    #[test]
    fn test_open_bidding_initializes_round() {
        let mut game = game();
        let mut rng = StdRng::seed_from_u64(42);
        for (i, id) in ["S1", "S2", "S3"].iter().enumerate() {
            admit_seller(&mut game, &pid(id), 10.0, 0.1 + i as f64, start()).unwrap();
        }
        admit_buyer(&mut game, &pid("B1"), 0.5, &[], 10.0, start()).unwrap();
        admit_buyer(&mut game, &pid("B2"), 0.4, &[0.5], 10.0, start()).unwrap();

        open_bidding(&mut game, &mut rng).unwrap();

        assert!(!game.accepts_registrations);
        assert_eq!(game.buyers_keep_playing, vec![true, true]);
        assert_eq!(game.buyers_keep_playing_previous, vec![false, false]);
        assert_eq!(game.buyers_played_current_round, vec![false, false]);
        assert_eq!(game.hop_distances.len(), 2);
        for row in &game.hop_distances {
            assert_eq!(row.len(), 3);
            assert!(row.iter().all(|&h| (1..=3).contains(&h)));
        }

        assert_matches!(open_bidding(&mut game, &mut rng), Err(Rejection::RegistrationClosed(_)));
    }

    #[test]
    fn test_open_bidding_without_sellers() {
        let mut game = game();
        let mut rng = StdRng::seed_from_u64(3);
        admit_buyer(&mut game, &pid("B1"), 0.5, &[], 10.0, start()).unwrap();

        open_bidding(&mut game, &mut rng).unwrap();
        assert_eq!(game.hop_distances, vec![Vec::<u32>::new()]);
    }
}
