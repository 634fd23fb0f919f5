//! Settlement error types

use thiserror::Error;

/// Errors that can occur while pricing a game's transfers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    /// A seller offered no capacity, so its load is undefined
    #[error("Seller {seller} offered non-positive capacity {capacity}")]
    NonPositiveCapacity { seller: usize, capacity: f64 },

    /// Bid, offer and distance vectors disagree on the number of sellers/buyers
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A price or cost parameter is not a positive finite number
    #[error("Invalid price parameter {name}: {value}")]
    InvalidPrice { name: &'static str, value: f64 },
}
