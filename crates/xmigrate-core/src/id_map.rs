//! Source → destination identifier translation table.
//!
//! Partitioned by [`ResourceKind::id_namespace`]. Every entry is written once,
//! by the task that created the resource, and read by the transformer for
//! every descendant that references it. Writes go through the dashmap entry
//! API so concurrent branches cannot lose or overwrite each other's entries.

use crate::kind::ResourceKind;
use crate::{MigrateError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Result of a successful [`IdentifierMap::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The pair was new.
    Inserted,
    /// The same pair was already present (re-runs are no-ops).
    Unchanged,
}

/// Concurrency-safe, write-once identifier table.
#[derive(Debug, Default)]
pub struct IdentifierMap {
    entries: DashMap<(ResourceKind, String), String>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `source_id → destination_id` for `kind`.
    ///
    /// Inserting an identical pair again is accepted and reported as
    /// [`InsertOutcome::Unchanged`]; a different destination for an existing
    /// source identifier is an [`MigrateError::IdMapConflict`].
    pub fn insert(
        &self,
        kind: ResourceKind,
        source_id: &str,
        destination_id: &str,
    ) -> Result<InsertOutcome> {
        let namespace = kind.id_namespace();
        match self.entries.entry((namespace, source_id.to_string())) {
            Entry::Occupied(existing) => {
                if existing.get() == destination_id {
                    Ok(InsertOutcome::Unchanged)
                } else {
                    Err(MigrateError::IdMapConflict {
                        kind: namespace,
                        source_id: source_id.to_string(),
                        existing: existing.get().clone(),
                        attempted: destination_id.to_string(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(destination_id.to_string());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    /// Destination identifier for a source identifier, if mapped.
    pub fn get(&self, kind: ResourceKind, source_id: &str) -> Option<String> {
        self.entries
            .get(&(kind.id_namespace(), source_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Like [`get`](Self::get), but a miss is a [`MigrateError::MappingMiss`].
    pub fn lookup(&self, kind: ResourceKind, source_id: &str, context: &str) -> Result<String> {
        self.get(kind, source_id)
            .ok_or_else(|| MigrateError::MappingMiss {
                kind: kind.id_namespace(),
                source_id: source_id.to_string(),
                context: context.to_string(),
            })
    }

    pub fn contains(&self, kind: ResourceKind, source_id: &str) -> bool {
        self.entries
            .contains_key(&(kind.id_namespace(), source_id.to_string()))
    }

    /// Entries of one partition, sorted by source identifier.
    pub fn entries(&self, kind: ResourceKind) -> Vec<(String, String)> {
        let namespace = kind.id_namespace();
        let mut entries: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        entries.sort();
        entries
    }

    /// Partitions holding at least one entry, in hierarchy order.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .iter()
            .copied()
            .filter(|kind| {
                self.entries
                    .iter()
                    .any(|entry| entry.key().0 == *kind)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
