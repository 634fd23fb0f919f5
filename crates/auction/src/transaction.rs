//! Transaction surface
//!
//! Every state change enters the market as a [`Transaction`]. Transactions
//! are tagged by `type` so they can be read from scripts or a wire format.

use chrono::{DateTime, Utc};
use common::{GameId, ProsumerId, TransferId};
use serde::{Deserialize, Serialize};

use crate::bidding::BidOutcome;

/// A request to change market state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Transaction {
    /// Open a new game for registration
    PublishGame {
        timestamp: DateTime<Utc>,
        /// Falls back to the configured window when absent
        #[serde(default)]
        registration_duration_ms: Option<i64>,
    },
    /// Join a game as seller
    PublishOffer {
        timestamp: DateTime<Utc>,
        game: GameId,
        initiator: ProsumerId,
        amount: f64,
        price: f64,
    },
    /// Join a game as buyer
    PublishDemand {
        timestamp: DateTime<Utc>,
        game: GameId,
        initiator: ProsumerId,
        amount: f64,
    },
    /// Close registration and start bidding
    StopGameRegistration { game: GameId },
    /// Play a buyer's turn
    PublishBuyBid {
        game: GameId,
        initiator: ProsumerId,
        keep_playing: bool,
        #[serde(default)]
        bid_amounts: Option<Vec<f64>>,
    },
    /// Report metered energy of a participant
    PublishMeterReading {
        game: GameId,
        initiator: ProsumerId,
        in_energy: f64,
        out_energy: f64,
    },
    /// Release undelivered transfers and settle with the grid
    CloseMarket { game: GameId },
    /// Onboard a prosumer with an opening balance
    RegisterProsumer {
        prosumer: ProsumerId,
        account_balance: f64,
        #[serde(default)]
        contribution_metric: f64,
    },
}

impl Transaction {
    /// Label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::PublishGame { .. } => "publish_game",
            Transaction::PublishOffer { .. } => "publish_offer",
            Transaction::PublishDemand { .. } => "publish_demand",
            Transaction::StopGameRegistration { .. } => "stop_game_registration",
            Transaction::PublishBuyBid { .. } => "publish_buy_bid",
            Transaction::PublishMeterReading { .. } => "publish_meter_reading",
            Transaction::CloseMarket { .. } => "close_market",
            Transaction::RegisterProsumer { .. } => "register_prosumer",
        }
    }

    /// Game the transaction targets, if any
    pub fn game(&self) -> Option<&GameId> {
        match self {
            Transaction::PublishOffer { game, .. }
            | Transaction::PublishDemand { game, .. }
            | Transaction::StopGameRegistration { game }
            | Transaction::PublishBuyBid { game, .. }
            | Transaction::PublishMeterReading { game, .. }
            | Transaction::CloseMarket { game } => Some(game),
            Transaction::PublishGame { .. } | Transaction::RegisterProsumer { .. } => None,
        }
    }

    /// Mutable access to the targeted game, for rebinding scripted ids
    pub fn game_mut(&mut self) -> Option<&mut GameId> {
        match self {
            Transaction::PublishOffer { game, .. }
            | Transaction::PublishDemand { game, .. }
            | Transaction::StopGameRegistration { game }
            | Transaction::PublishBuyBid { game, .. }
            | Transaction::PublishMeterReading { game, .. }
            | Transaction::CloseMarket { game } => Some(game),
            Transaction::PublishGame { .. } | Transaction::RegisterProsumer { .. } => None,
        }
    }
}

/// Result of closing a market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseSummary {
    /// Pending transfers whose cost was released from the buyer
    pub unfrozen_transfers: usize,
    /// Pending transfers left frozen
    pub still_frozen: usize,
    /// Grid settlement applied to each participant, buyers first
    pub grid_settlements: Vec<(ProsumerId, f64)>,
}

/// What an accepted transaction produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "receipt", rename_all = "snake_case")]
pub enum Receipt {
    GamePublished { game: GameId },
    OfferAccepted { seller_index: usize },
    DemandAccepted { buyer_index: usize },
    RegistrationStopped { nr_buyers: usize, nr_sellers: usize },
    BidAccepted { outcome: BidOutcome },
    MeterReadingRecorded { fulfilled: Vec<TransferId> },
    MarketClosed { summary: CloseSummary },
    ProsumerRegistered { prosumer: ProsumerId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scripted_transactions() {
        let yaml = r#"
- type: RegisterProsumer
  prosumer: S1
  account_balance: 1000.0
- type: PublishGame
  timestamp: "2024-05-01T12:00:00Z"
- type: PublishBuyBid
  game: Game-1
  initiator: B1
  keep_playing: true
  bid_amounts: [15.0, 15.0]
- type: PublishBuyBid
  game: Game-1
  initiator: B1
  keep_playing: false
"#;
        let txs: Vec<Transaction> = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(txs.len(), 4);
        assert_eq!(txs[0].kind(), "register_prosumer");
        assert!(matches!(
            txs[1],
            Transaction::PublishGame {
                registration_duration_ms: None,
                ..
            }
        ));
        assert!(matches!(
            &txs[2],
            Transaction::PublishBuyBid { bid_amounts: Some(b), .. } if b == &vec![15.0, 15.0]
        ));
        assert!(matches!(
            txs[3],
            Transaction::PublishBuyBid {
                bid_amounts: None,
                ..
            }
        ));
    }

    #[test]
    fn test_game_rebinding() {
        let mut tx = Transaction::CloseMarket {
            game: GameId::new("@current"),
        };
        if let Some(game) = tx.game_mut() {
            *game = GameId::new("Game-2024-05-01.abcd1234");
        }
        assert_eq!(tx.game().map(|g| g.as_str()), Some("Game-2024-05-01.abcd1234"));
        assert!(Transaction::PublishGame {
            timestamp: Utc::now(),
            registration_duration_ms: None
        }
        .game()
        .is_none());
    }
}
