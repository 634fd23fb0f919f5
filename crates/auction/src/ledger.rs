//! Prosumer working set for one transaction

use std::collections::BTreeMap;

use common::ProsumerId;

use crate::domain::Prosumer;
use crate::error::{MarketError, Result};
use crate::store::{ChangeSet, Registry};

/// Prosumer records loaded once and modified in place
///
/// A prosumer touched several times in one transaction (a buyer that is also
/// the meter reader, say) is updated from a single snapshot.
#[derive(Debug, Default)]
pub(crate) struct ProsumerBook {
    records: BTreeMap<ProsumerId, Prosumer>,
}

impl ProsumerBook {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Load on first access, then hand out the working copy
    pub(crate) async fn get_mut(
        &mut self,
        registry: &dyn Registry,
        id: &ProsumerId,
    ) -> Result<&mut Prosumer> {
        if !self.records.contains_key(id) {
            let prosumer = registry
                .get_prosumer(id)
                .await?
                .ok_or_else(|| MarketError::ProsumerNotFound(id.clone()))?;
            self.records.insert(id.clone(), prosumer);
        }
        self.records
            .get_mut(id)
            .ok_or_else(|| MarketError::ProsumerNotFound(id.clone()))
    }

    /// Queue an update for every loaded prosumer, in id order
    pub(crate) fn write_into(self, changes: &mut ChangeSet) {
        for prosumer in self.records.into_values() {
            changes.update_prosumer(prosumer);
        }
    }
}
