//! Common types used across the energy market
//!
//! Typed identifiers for every record kind kept in the registry, plus the
//! role a prosumer plays inside a single game.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a game (one per registration period)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub String);

impl GameId {
    /// Create a GameId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate the identifier for a game whose registration opens at `start`
    ///
    /// Ids read as `Game-<date>.<suffix>` so several games may open on the
    /// same day.
    pub fn generate(start: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("Game-{}.{}", start.format("%Y-%m-%d"), &suffix[..8]))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GameId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Unique identifier for a prosumer (market participant)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProsumerId(pub String);

impl ProsumerId {
    /// Create a ProsumerId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProsumerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Unique identifier for an energy transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub String);

impl TransferId {
    /// Generate a fresh transfer id scoped to a game
    pub fn generate(game: &GameId) -> Self {
        Self(format!("EnergyTransfer.{}.{}", game, Uuid::new_v4()))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an energy delivery monitor
///
/// A game has at most one monitor, so the id is derived from the game id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(pub String);

impl MonitorId {
    /// The monitor id for a game
    pub fn for_game(game: &GameId) -> Self {
        Self(format!("Monitor.{}", game))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MonitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a prosumer inside a game, with its index in the ordered list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "index", rename_all = "lowercase")]
pub enum Role {
    /// Seller at the given FCFS position
    Seller(usize),
    /// Buyer at the given contribution-ranked position
    Buyer(usize),
}

impl Role {
    /// Position of the prosumer in its role's list
    pub fn index(&self) -> usize {
        match self {
            Role::Seller(idx) | Role::Buyer(idx) => *idx,
        }
    }

    /// Returns true for sellers
    pub fn is_seller(&self) -> bool {
        matches!(self, Role::Seller(_))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Seller(idx) => write!(f, "seller #{}", idx),
            Role::Buyer(idx) => write!(f, "buyer #{}", idx),
        }
    }
}
