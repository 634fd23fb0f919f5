//! Bidding state machine
//!
//! Buyers bid in contribution order, one turn each per round. A round ends
//! when the last buyer plays; the game then either starts another round or
//! terminates.

use common::ProsumerId;
use serde::{Deserialize, Serialize};

use crate::domain::Game;
use crate::error::{MarketError, Rejection, Result};
use crate::event::TerminationReason;

/// What a successful bid led to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BidOutcome {
    /// The next buyer in the same round is in turn
    NextTurn { index: usize },
    /// A new round started with buyer 0 in turn
    NewRound { round: u32 },
    /// Bidding ended
    Finished { reason: TerminationReason },
}

impl BidOutcome {
    /// Index of the buyer now in turn, if bidding continues
    pub fn next_buyer(&self) -> Option<usize> {
        match self {
            BidOutcome::NextTurn { index } => Some(*index),
            BidOutcome::NewRound { .. } => Some(0),
            BidOutcome::Finished { .. } => None,
        }
    }
}

/// Lowest index that has not played this round, 0 if all have
pub fn buyer_in_turn(played: &[bool]) -> usize {
    played.iter().position(|p| !p).unwrap_or(0)
}

/// Exactly two buyers kept playing in both the previous and the current round
///
/// Two buyers outbidding each other forever would never stop on their own.
pub fn is_vicious_circle(keep_playing: &[bool], previous: &[bool]) -> bool {
    let mut matches = 0;
    for (&keep, &prev) in keep_playing.iter().zip(previous) {
        if keep && prev {
            matches += 1;
            if matches > 2 {
                return false;
            }
        }
    }
    matches == 2
}

fn validate_amounts(game: &Game, buyer: &ProsumerId, amounts: Option<&[f64]>) -> Result<Vec<f64>> {
    let amounts = amounts.ok_or_else(|| Rejection::MissingBidAmounts(buyer.clone()))?;
    if amounts.len() != game.nr_sellers() {
        return Err(Rejection::BidLengthMismatch {
            got: amounts.len(),
            expected: game.nr_sellers(),
        }
        .into());
    }
    if amounts.iter().any(|a| !a.is_finite() || *a < 0.0) {
        return Err(Rejection::InvalidBidAmount.into());
    }
    Ok(amounts.to_vec())
}

fn store_bid(game: &mut Game, index: usize, bid: Vec<f64>) -> Result<()> {
    match index.cmp(&game.buy_bids.len()) {
        std::cmp::Ordering::Less => game.buy_bids[index] = bid,
        std::cmp::Ordering::Equal => game.buy_bids.insert(index, bid),
        std::cmp::Ordering::Greater => {
            return Err(MarketError::Consistency(format!(
                "bid of buyer #{} with only {} bid vectors stored",
                index,
                game.buy_bids.len()
            )))
        }
    }
    Ok(())
}

/// Apply one buyer's move to the game
///
/// On [`BidOutcome::Finished`] the game is marked as finished bidding; the
/// caller creates the delivery monitor.
pub fn apply_bid(
    game: &mut Game,
    buyer: &ProsumerId,
    keep_playing: bool,
    bid_amounts: Option<&[f64]>,
) -> Result<BidOutcome> {
    if game.accepts_registrations {
        return Err(Rejection::BiddingNotOpen(game.id.clone()).into());
    }
    if game.bidding_finished {
        return Err(Rejection::BiddingFinished(game.id.clone()).into());
    }

    let index = game
        .buyer_index(buyer)
        .ok_or_else(|| Rejection::NotRegisteredBuyer(buyer.clone()))?;

    let nr_buyers = game.nr_buyers();
    if game.buyers_played_current_round.len() != nr_buyers
        || game.buyers_keep_playing.len() != nr_buyers
        || game.buyers_keep_playing_previous.len() != nr_buyers
    {
        return Err(MarketError::Consistency(format!(
            "turn state of game {} does not cover {} buyers",
            game.id, nr_buyers
        )));
    }

    if game.buyers_played_current_round[index] {
        return Err(Rejection::AlreadyPlayedRound(buyer.clone()).into());
    }

    let in_turn = buyer_in_turn(&game.buyers_played_current_round);
    if in_turn != index {
        return Err(Rejection::NotBuyersTurn {
            buyer: buyer.clone(),
            index,
            in_turn,
        }
        .into());
    }

    if keep_playing {
        let bid = validate_amounts(game, buyer, bid_amounts)?;
        store_bid(game, index, bid)?;
    } else if index >= game.buy_bids.len() {
        store_bid(game, index, vec![0.0; game.nr_sellers()])?;
    }
    game.buyers_keep_playing[index] = keep_playing;
    game.buyers_played_current_round[index] = true;

    if index + 1 < nr_buyers {
        return Ok(BidOutcome::NextTurn { index: index + 1 });
    }

    // Last buyer of the round
    let reason = if game.buyers_keep_playing.iter().all(|keep| !keep) {
        Some(TerminationReason::AllStopped)
    } else if is_vicious_circle(&game.buyers_keep_playing, &game.buyers_keep_playing_previous) {
        Some(TerminationReason::ViciousCircle)
    } else {
        None
    };

    if let Some(reason) = reason {
        game.bidding_finished = true;
        return Ok(BidOutcome::Finished { reason });
    }

    game.nr_rounds += 1;
    game.buyers_keep_playing_previous =
        std::mem::replace(&mut game.buyers_keep_playing, vec![true; nr_buyers]);
    game.buyers_played_current_round = vec![false; nr_buyers];

    Ok(BidOutcome::NewRound {
        round: game.nr_rounds,
    })
}
