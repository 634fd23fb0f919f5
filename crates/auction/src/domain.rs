//! Domain types for the energy auction
//!
//! This module defines the records the engine reads from and writes back to
//! the registry. These types are shared across all registry implementations.

use chrono::{DateTime, Duration, Utc};
use common::{GameId, MonitorId, ProsumerId, Role, TransferId};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};

// ============================================================================
// Game Phase
// ============================================================================

/// Lifecycle phase of a game, derived from its flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Offers and demands are accepted
    Registering,
    /// Buyers take turns bidding
    Bidding,
    /// Bidding ended, transfers await metering
    Delivery,
    /// Market closed, grid settlement applied
    Closed,
}

impl std::fmt::Display for GamePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GamePhase::Registering => write!(f, "registering"),
            GamePhase::Bidding => write!(f, "bidding"),
            GamePhase::Delivery => write!(f, "delivery"),
            GamePhase::Closed => write!(f, "closed"),
        }
    }
}

// ============================================================================
// Game
// ============================================================================

/// One auction, covering a single registration period
///
/// Seller-indexed vectors (`offers_*`, each bid and distance vector) follow
/// `sellers`; buyer-indexed vectors follow `buyers_ordered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    /// Game ID
    pub id: GameId,
    /// When registration opened
    pub registration_start: DateTime<Utc>,
    /// Length of the registration window
    pub registration_duration_ms: i64,
    /// False once bidding starts
    pub accepts_registrations: bool,
    /// Every admitted prosumer, sellers and buyers alike
    pub participants: Vec<ProsumerId>,
    /// Sellers in first-come first-served order
    pub sellers: Vec<ProsumerId>,
    /// Offered energy per seller
    pub offers_amounts: Vec<f64>,
    /// Offered unit price per seller
    pub offers_prices: Vec<f64>,
    /// Buyers ranked by contribution metric, descending
    pub buyers_ordered: Vec<ProsumerId>,
    /// Demanded energy per buyer
    pub demands: Vec<f64>,
    /// Hops from each buyer to each seller, assigned when bidding starts
    pub hop_distances: Vec<Vec<u32>>,
    /// Latest bid of each buyer, one amount per seller
    pub buy_bids: Vec<Vec<f64>>,
    /// Whether each buyer wants to keep playing this round
    pub buyers_keep_playing: Vec<bool>,
    /// Whether each buyer has played this round
    pub buyers_played_current_round: Vec<bool>,
    /// `buyers_keep_playing` as it stood at the end of the previous round
    pub buyers_keep_playing_previous: Vec<bool>,
    /// Completed rounds
    pub nr_rounds: u32,
    /// Set when bidding terminated and the monitor was created
    pub bidding_finished: bool,
    /// Set when the market was closed
    pub market_closed: bool,
}

impl Game {
    /// Create an empty game accepting registrations
    pub fn new(id: GameId, registration_start: DateTime<Utc>, registration_duration_ms: i64) -> Self {
        Self {
            id,
            registration_start,
            registration_duration_ms,
            accepts_registrations: true,
            participants: Vec::new(),
            sellers: Vec::new(),
            offers_amounts: Vec::new(),
            offers_prices: Vec::new(),
            buyers_ordered: Vec::new(),
            demands: Vec::new(),
            hop_distances: Vec::new(),
            buy_bids: Vec::new(),
            buyers_keep_playing: Vec::new(),
            buyers_played_current_round: Vec::new(),
            buyers_keep_playing_previous: Vec::new(),
            nr_rounds: 0,
            bidding_finished: false,
            market_closed: false,
        }
    }

    pub fn nr_sellers(&self) -> usize {
        self.sellers.len()
    }

    pub fn nr_buyers(&self) -> usize {
        self.buyers_ordered.len()
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> GamePhase {
        if self.accepts_registrations {
            GamePhase::Registering
        } else if !self.bidding_finished {
            GamePhase::Bidding
        } else if !self.market_closed {
            GamePhase::Delivery
        } else {
            GamePhase::Closed
        }
    }

    /// End of the registration window (exclusive), `None` if it is not representable
    pub fn registration_end(&self) -> Option<DateTime<Utc>> {
        self.registration_start
            .checked_add_signed(Duration::milliseconds(self.registration_duration_ms))
    }

    /// Whether `timestamp` falls in `[start, start + duration)`
    pub fn in_registration_window(&self, timestamp: DateTime<Utc>) -> bool {
        match self.registration_end() {
            Some(end) => timestamp >= self.registration_start && timestamp < end,
            None => false,
        }
    }

    pub fn is_participant(&self, prosumer: &ProsumerId) -> bool {
        self.participants.contains(prosumer)
    }

    pub fn seller_index(&self, prosumer: &ProsumerId) -> Option<usize> {
        self.sellers.iter().position(|s| s == prosumer)
    }

    pub fn buyer_index(&self, prosumer: &ProsumerId) -> Option<usize> {
        self.buyers_ordered.iter().position(|b| b == prosumer)
    }

    /// Role of a prosumer in this game, if admitted
    pub fn role_of(&self, prosumer: &ProsumerId) -> Option<Role> {
        self.seller_index(prosumer)
            .map(Role::Seller)
            .or_else(|| self.buyer_index(prosumer).map(Role::Buyer))
    }

    /// Verify the length invariants between the parallel vectors
    pub fn check_consistency(&self) -> Result<()> {
        let nr_sellers = self.nr_sellers();
        let nr_buyers = self.nr_buyers();

        if self.participants.len() != nr_sellers + nr_buyers {
            return Err(MarketError::Consistency(format!(
                "{} participants for {} sellers and {} buyers",
                self.participants.len(),
                nr_sellers,
                nr_buyers
            )));
        }

        if self.offers_amounts.len() != nr_sellers || self.offers_prices.len() != nr_sellers {
            return Err(MarketError::Consistency(format!(
                "{} offer amounts and {} offer prices for {} sellers",
                self.offers_amounts.len(),
                self.offers_prices.len(),
                nr_sellers
            )));
        }

        if self.demands.len() != nr_buyers {
            return Err(MarketError::Consistency(format!(
                "{} demands for {} buyers",
                self.demands.len(),
                nr_buyers
            )));
        }

        if self.buy_bids.len() > nr_buyers {
            return Err(MarketError::Consistency(format!(
                "{} bid vectors for {} buyers",
                self.buy_bids.len(),
                nr_buyers
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Prosumer
// ============================================================================

/// A market participant able to produce and consume energy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prosumer {
    /// Prosumer ID
    pub id: ProsumerId,
    /// Spendable balance
    pub account_balance: f64,
    /// Balance earmarked against pending transfers
    pub frozen_funds: f64,
    /// total_production / total_consumption, 0 without consumption
    pub contribution_metric: f64,
    /// Metered energy produced, all games
    pub total_production: f64,
    /// Metered energy consumed, all games
    pub total_consumption: f64,
}

impl Prosumer {
    /// Create a prosumer with an opening balance and seeded contribution metric
    pub fn new(id: ProsumerId, account_balance: f64, contribution_metric: f64) -> Self {
        Self {
            id,
            account_balance,
            frozen_funds: 0.0,
            contribution_metric,
            total_production: 0.0,
            total_consumption: 0.0,
        }
    }

    /// Accumulate a meter reading and recompute the contribution metric
    pub fn record_meter_reading(&mut self, in_energy: f64, out_energy: f64) {
        self.total_production += out_energy;
        self.total_consumption += in_energy;
        self.contribution_metric = if self.total_consumption == 0.0 {
            0.0
        } else {
            self.total_production / self.total_consumption
        };
    }
}

// ============================================================================
// Energy Delivery Monitor
// ============================================================================

/// Metered energy tallies and the pending transfer index of a game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyDeliveryMonitor {
    /// Monitor ID
    pub id: MonitorId,
    /// Game being monitored
    pub game: GameId,
    pub total_in_by_buyer: Vec<f64>,
    pub total_out_by_buyer: Vec<f64>,
    pub total_in_by_seller: Vec<f64>,
    pub total_out_by_seller: Vec<f64>,
    /// Transfers not yet delivered, in creation order
    pub pending_energy_transfers: Vec<TransferId>,
}

impl EnergyDeliveryMonitor {
    /// Create a zeroed monitor for a game
    pub fn new(game: &GameId, nr_buyers: usize, nr_sellers: usize) -> Self {
        Self {
            id: MonitorId::for_game(game),
            game: game.clone(),
            total_in_by_buyer: vec![0.0; nr_buyers],
            total_out_by_buyer: vec![0.0; nr_buyers],
            total_in_by_seller: vec![0.0; nr_sellers],
            total_out_by_seller: vec![0.0; nr_sellers],
            pending_energy_transfers: Vec::new(),
        }
    }

    /// Add a reading to the tallies of the given role
    pub fn record(&mut self, role: Role, in_energy: f64, out_energy: f64) -> Result<()> {
        let (total_in, total_out) = match role {
            Role::Seller(_) => (&mut self.total_in_by_seller, &mut self.total_out_by_seller),
            Role::Buyer(_) => (&mut self.total_in_by_buyer, &mut self.total_out_by_buyer),
        };

        let idx = role.index();
        match (total_in.get_mut(idx), total_out.get_mut(idx)) {
            (Some(t_in), Some(t_out)) => {
                *t_in += in_energy;
                *t_out += out_energy;
                Ok(())
            }
            _ => Err(MarketError::Consistency(format!(
                "monitor {} has no tally for {}",
                self.id, role
            ))),
        }
    }

    pub fn nr_pending(&self) -> usize {
        self.pending_energy_transfers.len()
    }
}

// ============================================================================
// Energy Transfer
// ============================================================================

/// Energy a seller owes a buyer, priced when bidding ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyTransfer {
    /// Transfer ID
    pub id: TransferId,
    /// Game the transfer belongs to
    pub game: GameId,
    /// Seller
    pub from: ProsumerId,
    /// Buyer
    pub to: ProsumerId,
    /// Energy to deliver
    pub amount: f64,
    /// Price frozen against the buyer, fixed at creation
    pub cost: f64,
    /// Set once metering covered the amount on both ends
    pub is_fulfilled: bool,
}

impl EnergyTransfer {
    /// Whether the prosumer is either end of this transfer
    pub fn involves(&self, prosumer: &ProsumerId) -> bool {
        &self.from == prosumer || &self.to == prosumer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_game() -> Game {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Game::new(GameId::new("Game-test"), start, 60_000)
    }

    #[test]
    fn test_registration_window_is_half_open() {
        let game = test_game();
        let start = game.registration_start;

        assert!(game.in_registration_window(start));
        assert!(game.in_registration_window(start + Duration::milliseconds(59_999)));
        assert!(!game.in_registration_window(start + Duration::milliseconds(60_000)));
        assert!(!game.in_registration_window(start - Duration::milliseconds(1)));
    }

    #[test]
    fn test_unrepresentable_window_end() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let game = Game::new(GameId::new("Game-test"), start, i64::MAX);

        assert_eq!(game.registration_end(), None);
        assert!(!game.in_registration_window(start));
        assert_eq!(
            test_game().registration_end(),
            Some(start + Duration::milliseconds(60_000))
        );
    }

    #[test]
    fn test_phase_progression() {
        let mut game = test_game();
        assert_eq!(game.phase(), GamePhase::Registering);
        game.accepts_registrations = false;
        assert_eq!(game.phase(), GamePhase::Bidding);
        game.bidding_finished = true;
        assert_eq!(game.phase(), GamePhase::Delivery);
        game.market_closed = true;
        assert_eq!(game.phase(), GamePhase::Closed);
    }

    #[test]
    fn test_role_lookup() {
        let mut game = test_game();
        game.sellers.push(ProsumerId::new("S1"));
        game.buyers_ordered.push(ProsumerId::new("B1"));

        assert_eq!(game.role_of(&ProsumerId::new("S1")), Some(Role::Seller(0)));
        assert_eq!(game.role_of(&ProsumerId::new("B1")), Some(Role::Buyer(0)));
        assert_eq!(game.role_of(&ProsumerId::new("X")), None);
    }

    #[test]
    fn test_consistency_detects_participant_mismatch() {
        let mut game = test_game();
        game.sellers.push(ProsumerId::new("S1"));
        game.offers_amounts.push(10.0);
        game.offers_prices.push(0.1);
        assert!(matches!(game.check_consistency(), Err(MarketError::Consistency(_))));

        game.participants.push(ProsumerId::new("S1"));
        assert!(game.check_consistency().is_ok());
    }

    #[test]
    fn test_contribution_metric_follows_meter() {
        let mut prosumer = Prosumer::new(ProsumerId::new("P1"), 100.0, 0.7);

        prosumer.record_meter_reading(0.0, 5.0);
        assert_eq!(prosumer.contribution_metric, 0.0);

        prosumer.record_meter_reading(10.0, 0.0);
        assert_eq!(prosumer.contribution_metric, 0.5);
        assert_eq!(prosumer.total_production, 5.0);
        assert_eq!(prosumer.total_consumption, 10.0);
    }

    #[test]
    fn test_monitor_record_by_role() {
        let mut monitor = EnergyDeliveryMonitor::new(&GameId::new("G"), 2, 1);
        monitor.record(Role::Buyer(1), 3.0, 1.0).unwrap();
        monitor.record(Role::Seller(0), 0.5, 7.0).unwrap();

        assert_eq!(monitor.total_in_by_buyer, vec![0.0, 3.0]);
        assert_eq!(monitor.total_out_by_buyer, vec![0.0, 1.0]);
        assert_eq!(monitor.total_out_by_seller, vec![7.0]);
        assert!(monitor.record(Role::Seller(3), 1.0, 1.0).is_err());
    }
}
