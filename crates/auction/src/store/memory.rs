//! In-memory registry implementation

use async_trait::async_trait;
use common::{GameId, MonitorId, ProsumerId, TransferId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::traits::{ChangeSet, Registry, StoreError, StoreResult, Write};
use crate::domain::{EnergyDeliveryMonitor, EnergyTransfer, Game, Prosumer};

#[derive(Default)]
struct RegistryState {
    games: HashMap<GameId, Game>,
    prosumers: HashMap<ProsumerId, Prosumer>,
    transfers: HashMap<TransferId, EnergyTransfer>,
    monitors: HashMap<MonitorId, EnergyDeliveryMonitor>,
}

impl RegistryState {
    fn contains(&self, write: &Write) -> bool {
        match write {
            Write::AddGame(g) | Write::UpdateGame(g) => self.games.contains_key(&g.id),
            Write::AddProsumer(p) | Write::UpdateProsumer(p) => self.prosumers.contains_key(&p.id),
            Write::AddTransfer(t) | Write::UpdateTransfer(t) => self.transfers.contains_key(&t.id),
            Write::AddMonitor(m) | Write::UpdateMonitor(m) => self.monitors.contains_key(&m.id),
        }
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::AddGame(g) | Write::UpdateGame(g) => {
                self.games.insert(g.id.clone(), g);
            }
            Write::AddProsumer(p) | Write::UpdateProsumer(p) => {
                self.prosumers.insert(p.id.clone(), p);
            }
            Write::AddTransfer(t) | Write::UpdateTransfer(t) => {
                self.transfers.insert(t.id.clone(), t);
            }
            Write::AddMonitor(m) | Write::UpdateMonitor(m) => {
                self.monitors.insert(m.id.clone(), m);
            }
        }
    }
}

fn record_id(write: &Write) -> String {
    match write {
        Write::AddGame(g) | Write::UpdateGame(g) => g.id.to_string(),
        Write::AddProsumer(p) | Write::UpdateProsumer(p) => p.id.to_string(),
        Write::AddTransfer(t) | Write::UpdateTransfer(t) => t.id.to_string(),
        Write::AddMonitor(m) | Write::UpdateMonitor(m) => m.id.to_string(),
    }
}

fn is_add(write: &Write) -> bool {
    matches!(
        write,
        Write::AddGame(_) | Write::AddProsumer(_) | Write::AddTransfer(_) | Write::AddMonitor(_)
    )
}

/// In-memory registry for testing and simulation
///
/// A single lock guards every collection so a commit is observed entirely or
/// not at all.
pub struct InMemoryRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Number of games stored
    pub fn game_count(&self) -> usize {
        self.state.read().games.len()
    }

    /// Number of transfers stored
    pub fn transfer_count(&self) -> usize {
        self.state.read().transfers.len()
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn get_game(&self, id: &GameId) -> StoreResult<Option<Game>> {
        Ok(self.state.read().games.get(id).cloned())
    }

    async fn get_prosumer(&self, id: &ProsumerId) -> StoreResult<Option<Prosumer>> {
        Ok(self.state.read().prosumers.get(id).cloned())
    }

    async fn get_transfer(&self, id: &TransferId) -> StoreResult<Option<EnergyTransfer>> {
        Ok(self.state.read().transfers.get(id).cloned())
    }

    async fn find_monitors_by_game(
        &self,
        game: &GameId,
    ) -> StoreResult<Vec<EnergyDeliveryMonitor>> {
        let state = self.state.read();
        Ok(state
            .monitors
            .values()
            .filter(|m| &m.game == game)
            .cloned()
            .collect())
    }

    async fn find_transfers_by_game(&self, game: &GameId) -> StoreResult<Vec<EnergyTransfer>> {
        let state = self.state.read();
        Ok(state
            .transfers
            .values()
            .filter(|t| &t.game == game)
            .cloned()
            .collect())
    }

    async fn list_prosumers(&self) -> StoreResult<Vec<Prosumer>> {
        let mut prosumers: Vec<Prosumer> = self.state.read().prosumers.values().cloned().collect();
        prosumers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(prosumers)
    }

    async fn commit(&self, changes: ChangeSet) -> StoreResult<()> {
        let writes = changes.into_writes();
        let mut state = self.state.write();

        // Validate the whole batch before touching anything
        let mut added: HashSet<(&'static str, String)> = HashSet::new();
        for write in &writes {
            let key = (write.kind(), record_id(write));
            let exists = state.contains(write) || added.contains(&key);

            if is_add(write) {
                if exists {
                    return Err(StoreError::AlreadyExists {
                        kind: key.0,
                        id: key.1,
                    });
                }
                added.insert(key);
            } else if !exists {
                return Err(StoreError::NotFound {
                    kind: key.0,
                    id: key.1,
                });
            }
        }

        let count = writes.len();
        for write in writes {
            state.apply(write);
        }

        debug!(writes = count, "Committed change set");
        Ok(())
    }
}
