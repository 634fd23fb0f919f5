//! Settlement pricing for the energy market
//!
//! This crate holds the money math of a game, free of any storage concerns:
//!
//! - Seller load from the final bid matrix
//! - Transfer cost from offer price, load and hop distance
//! - Grid fallback pricing for energy moved outside matched transfers
//! - The fulfillment predicate used during meter reconciliation

pub mod error;
pub mod pricing;

pub use error::SettlementError;
pub use pricing::{
    grid_net_fund, is_fulfillable, seller_loads, transfer_cost, transfer_matrix, PriceSchedule,
    PricedTransfer, DEFAULT_GRID_BUY_PRICE, DEFAULT_GRID_SELL_PRICE,
    DEFAULT_TRANSMISSION_COST_PER_HOP,
};

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, SettlementError>;
