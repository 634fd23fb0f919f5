//! Registry traits for the market engine
//!
//! This module defines the trait that all registry implementations must satisfy.

use async_trait::async_trait;
use common::{GameId, ProsumerId, TransferId};

use crate::domain::{EnergyDeliveryMonitor, EnergyTransfer, Game, Prosumer};

/// Errors that can occur in the registry
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Store error: {0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A single write carried by a [`ChangeSet`]
#[derive(Debug, Clone)]
pub enum Write {
    AddGame(Game),
    UpdateGame(Game),
    AddProsumer(Prosumer),
    UpdateProsumer(Prosumer),
    AddTransfer(EnergyTransfer),
    UpdateTransfer(EnergyTransfer),
    AddMonitor(EnergyDeliveryMonitor),
    UpdateMonitor(EnergyDeliveryMonitor),
}

impl Write {
    /// Record kind, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Write::AddGame(_) | Write::UpdateGame(_) => "Game",
            Write::AddProsumer(_) | Write::UpdateProsumer(_) => "Prosumer",
            Write::AddTransfer(_) | Write::UpdateTransfer(_) => "EnergyTransfer",
            Write::AddMonitor(_) | Write::UpdateMonitor(_) => "EnergyDeliveryMonitor",
        }
    }
}

/// Writes produced by one transaction, committed all-or-nothing
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    writes: Vec<Write>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_game(&mut self, game: Game) -> &mut Self {
        self.writes.push(Write::AddGame(game));
        self
    }

    pub fn update_game(&mut self, game: Game) -> &mut Self {
        self.writes.push(Write::UpdateGame(game));
        self
    }

    pub fn add_prosumer(&mut self, prosumer: Prosumer) -> &mut Self {
        self.writes.push(Write::AddProsumer(prosumer));
        self
    }

    pub fn update_prosumer(&mut self, prosumer: Prosumer) -> &mut Self {
        self.writes.push(Write::UpdateProsumer(prosumer));
        self
    }

    pub fn add_transfer(&mut self, transfer: EnergyTransfer) -> &mut Self {
        self.writes.push(Write::AddTransfer(transfer));
        self
    }

    pub fn update_transfer(&mut self, transfer: EnergyTransfer) -> &mut Self {
        self.writes.push(Write::UpdateTransfer(transfer));
        self
    }

    pub fn add_monitor(&mut self, monitor: EnergyDeliveryMonitor) -> &mut Self {
        self.writes.push(Write::AddMonitor(monitor));
        self
    }

    pub fn update_monitor(&mut self, monitor: EnergyDeliveryMonitor) -> &mut Self {
        self.writes.push(Write::UpdateMonitor(monitor));
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Trait for market record storage
///
/// Reads return owned snapshots. All writes go through [`Registry::commit`],
/// which must apply a change set entirely or not at all.
#[async_trait]
pub trait Registry: Send + Sync {
    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    async fn get_game(&self, id: &GameId) -> StoreResult<Option<Game>>;

    async fn get_prosumer(&self, id: &ProsumerId) -> StoreResult<Option<Prosumer>>;

    async fn get_transfer(&self, id: &TransferId) -> StoreResult<Option<EnergyTransfer>>;

    /// All monitors recorded for a game (a healthy game has exactly one)
    async fn find_monitors_by_game(&self, game: &GameId)
        -> StoreResult<Vec<EnergyDeliveryMonitor>>;

    /// All transfers of a game, in no particular order
    async fn find_transfers_by_game(&self, game: &GameId) -> StoreResult<Vec<EnergyTransfer>>;

    /// All prosumers, sorted by id
    async fn list_prosumers(&self) -> StoreResult<Vec<Prosumer>>;

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Register a new prosumer
    async fn add_prosumer(&self, prosumer: Prosumer) -> StoreResult<()> {
        let mut changes = ChangeSet::new();
        changes.add_prosumer(prosumer);
        self.commit(changes).await
    }

    /// Apply every write of a change set atomically
    async fn commit(&self, changes: ChangeSet) -> StoreResult<()>;
}
