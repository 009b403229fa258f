//! Run-scoped state shared by every component of one migration.

use crate::config::MigrationConfig;
use crate::failure::FailureLog;
use crate::id_map::IdentifierMap;
use crate::sharing::SharingResolver;
use crate::transport::{DynFileSync, DynTransport};
use std::sync::Arc;

/// Collaborators and shared tables for one run.
///
/// Built once by the caller and handed to the coordinator; every walker of
/// the run reads and writes the same identifier map, sharing table and
/// failure log.
#[derive(Clone)]
pub struct MigrationContext {
    pub source: DynTransport,
    pub destination: DynTransport,
    pub file_sync: DynFileSync,
    pub id_map: Arc<IdentifierMap>,
    pub sharing: Arc<SharingResolver>,
    pub failures: Arc<FailureLog>,
    pub config: MigrationConfig,
}

impl MigrationContext {
    pub fn new(
        source: DynTransport,
        destination: DynTransport,
        file_sync: DynFileSync,
        config: MigrationConfig,
    ) -> Self {
        Self {
            source,
            destination,
            file_sync,
            id_map: Arc::new(IdentifierMap::new()),
            sharing: Arc::new(SharingResolver::new()),
            failures: Arc::new(FailureLog::new()),
            config,
        }
    }

    /// Continue from an identifier map filled by an earlier session.
    pub fn with_id_map(mut self, id_map: Arc<IdentifierMap>) -> Self {
        self.id_map = id_map;
        self
    }
}

impl std::fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContext")
            .field("source", &self.source.name())
            .field("destination", &self.destination.name())
            .field("id_map_entries", &self.id_map.len())
            .field("failures", &self.failures.len())
            .field("config", &self.config)
            .finish()
    }
}
