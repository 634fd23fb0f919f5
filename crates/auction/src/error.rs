//! Market error types

use common::{GameId, ProsumerId, TransferId};
use settlement::SettlementError;
use thiserror::Error;

use crate::store::StoreError;

/// Why a transaction was refused
///
/// A rejection leaves the registry untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("Registration duration must be positive, got {0} ms")]
    NonPositiveDuration(i64),

    #[error("Registration window of {0} ms ends beyond the supported date range")]
    WindowOutOfRange(i64),

    #[error("Offer amount and price must be positive (amount {amount}, price {price})")]
    NonPositiveOffer { amount: f64, price: f64 },

    #[error("Demand amount must be positive, got {0}")]
    NonPositiveDemand(f64),

    #[error("Transaction timestamp is outside the registration window of game {0}")]
    OutsideRegistrationWindow(GameId),

    #[error("Game {0} no longer accepts registrations")]
    RegistrationClosed(GameId),

    #[error("Prosumer {0} is already registered in the game")]
    AlreadyParticipant(ProsumerId),

    #[error("Prosumer {0} already submitted an offer in the game")]
    AlreadySeller(ProsumerId),

    #[error("Prosumer {0} already submitted a demand in the game")]
    AlreadyBuyer(ProsumerId),

    #[error("No buyers in game {0}")]
    NoBuyers(GameId),

    #[error("Bidding has not started for game {0}")]
    BiddingNotOpen(GameId),

    #[error("Bidding already finished for game {0}")]
    BiddingFinished(GameId),

    #[error("Buyer {0} is not registered in the game")]
    NotRegisteredBuyer(ProsumerId),

    #[error("Buyer {0} already submitted a bid this round")]
    AlreadyPlayedRound(ProsumerId),

    #[error("Not the turn of buyer {buyer} (#{index}), buyer #{in_turn} is in turn")]
    NotBuyersTurn {
        buyer: ProsumerId,
        index: usize,
        in_turn: usize,
    },

    #[error("Buyer {0} keeps playing but did not specify a bid")]
    MissingBidAmounts(ProsumerId),

    #[error("Bid has {got} amounts for {expected} sellers")]
    BidLengthMismatch { got: usize, expected: usize },

    #[error("Bid amounts must be non-negative finite numbers")]
    InvalidBidAmount,

    #[error("Meter readings must be non-negative finite numbers (in {in_energy}, out {out_energy})")]
    InvalidMeterReading { in_energy: f64, out_energy: f64 },

    #[error("Prosumer {0} is not a participant of the game")]
    NotParticipant(ProsumerId),

    #[error("Market for game {0} is already closed")]
    MarketClosed(GameId),

    #[error("Prosumer {0} already exists")]
    ProsumerExists(ProsumerId),

    #[error("Opening balance and contribution metric must be finite (balance {balance}, metric {metric})")]
    InvalidProsumerSeed { balance: f64, metric: f64 },
}

/// Errors that can occur in the market engine
#[derive(Error, Debug)]
pub enum MarketError {
    /// Transaction refused by validation
    #[error("Transaction rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Game state broke an invariant
    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Game not found: {0}")]
    GameNotFound(GameId),

    #[error("Prosumer not found: {0}")]
    ProsumerNotFound(ProsumerId),

    #[error("Energy transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("Expected exactly one energy delivery monitor for game {game}, found {found}")]
    MonitorNotUnique { game: GameId, found: usize },

    /// Pricing inputs did not line up
    #[error("Pricing failed: {0}")]
    Pricing(#[from] SettlementError),

    #[error("Registry error: {0}")]
    Store(#[from] StoreError),
}

impl MarketError {
    /// Invariant violations, as opposed to ordinary rejections
    pub fn is_fatal(&self) -> bool {
        matches!(self, MarketError::Consistency(_) | MarketError::Pricing(_))
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, MarketError::Rejected(_))
    }

    /// Returns the rejection reason, if any
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            MarketError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// Result type for market operations
pub type Result<T> = std::result::Result<T, MarketError>;
