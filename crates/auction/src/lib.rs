//! Double-auction engine for peer-to-peer energy trading
//!
//! Prosumers join a game as sellers (offering energy at a price) or buyers
//! (demanding energy). Buyers then bid against the sellers' offers in turns,
//! ranked by how much they contribute to the grid. When bidding ends every
//! (buyer, seller) pair gets a priced transfer whose cost is frozen against
//! the buyer; meter readings later release the funds to the seller.
//!
//! # Modules
//!
//! - `membership` - admission and buyer ranking while registering
//! - `bidding` - turn order, rounds and termination
//! - `delivery` - transfer pricing, meter reconciliation, market close
//! - `engine` - transaction processing against a [`Registry`]
//! - `store` - registry trait and in-memory implementation
//! - `event` - events and emitters

pub mod bidding;
pub mod delivery;
pub mod domain;
pub mod engine;
pub mod error;
pub mod event;
mod ledger;
pub mod membership;
pub mod settings;
pub mod store;
pub mod transaction;

// Re-export commonly used types
pub use bidding::BidOutcome;
pub use domain::{EnergyDeliveryMonitor, EnergyTransfer, Game, GamePhase, Prosumer};
pub use engine::MarketEngine;
pub use error::{MarketError, Rejection, Result};
pub use event::{
    ChannelEmitter, EventEmitter, MarketEvent, RecordingEmitter, TerminationReason, TracingEmitter,
};
pub use settings::MarketSettings;
pub use transaction::{CloseSummary, Receipt, Transaction};

// Store exports
pub use store::{ChangeSet, InMemoryRegistry, Registry, StoreError};
