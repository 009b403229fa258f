//! Deferred cross-project sharing.
//!
//! While pairs are walked, every shareable resource is registered here under
//! its label, either as owned by the destination project of the pair that
//! holds its canonical copy or as visible in another destination project.
//! Once every pair has been walked, [`SharingResolver::resolve`] grants each
//! participant access to the owner's copy.

use crate::error::MigrateError;
use crate::failure::{FailureLog, FailureRecord};
use crate::id_map::IdentifierMap;
use crate::kind::ResourceKind;
use crate::transport::{ResourceTransport, ShareGrant};
use crate::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Sharing state of one subject, experiment or assessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharingRecord {
    pub kind: ResourceKind,
    pub label: String,
    /// Source identifier, used to find the owner's destination identifier.
    pub source_id: String,
    /// Destination project holding the canonical copy.
    pub owner: Option<String>,
    /// Destination projects to grant access to.
    pub participants: BTreeSet<String>,
}

impl SharingRecord {
    fn new(kind: ResourceKind, label: &str, source_id: &str) -> Self {
        Self {
            kind,
            label: label.to_string(),
            source_id: source_id.to_string(),
            owner: None,
            participants: BTreeSet::new(),
        }
    }
}

/// A record that could not be shared at the end of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedShare {
    pub kind: ResourceKind,
    pub label: String,
    pub source_id: String,
    pub participants: BTreeSet<String>,
    pub reason: String,
}

/// Outcome of [`SharingResolver::resolve`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SharingReport {
    pub grants_issued: Vec<ShareGrant>,
    pub grant_failures: Vec<ShareGrant>,
    pub unresolved: Vec<UnresolvedShare>,
}

impl SharingReport {
    pub fn is_clean(&self) -> bool {
        self.grant_failures.is_empty() && self.unresolved.is_empty()
    }
}

/// Sharing table for one run, written concurrently by the tree walk.
#[derive(Debug, Default)]
pub struct SharingResolver {
    records: DashMap<(ResourceKind, String), SharingRecord>,
}

impl SharingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `owner` as the destination project holding the canonical copy.
    ///
    /// Registering the same owner again is a no-op; a different owner is an
    /// [`MigrateError::OwnershipConflict`].
    pub fn record_owner(
        &self,
        kind: ResourceKind,
        label: &str,
        source_id: &str,
        owner: &str,
    ) -> Result<()> {
        let mut record = self
            .records
            .entry((kind, label.to_string()))
            .or_insert_with(|| SharingRecord::new(kind, label, source_id));

        if let Some(existing) = record.owner.as_deref() {
            if existing != owner {
                return Err(MigrateError::OwnershipConflict {
                    kind,
                    label: label.to_string(),
                    owner: existing.to_string(),
                    attempted: owner.to_string(),
                });
            }
            return Ok(());
        }

        record.owner = Some(owner.to_string());
        record.source_id = source_id.to_string();
        record.participants.remove(owner);
        Ok(())
    }

    /// Register `participant` as a destination project that should see the resource.
    pub fn record_participant(
        &self,
        kind: ResourceKind,
        label: &str,
        source_id: &str,
        participant: &str,
    ) {
        match self.records.entry((kind, label.to_string())) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.owner.as_deref() != Some(participant) {
                    record.participants.insert(participant.to_string());
                }
            }
            Entry::Vacant(vacant) => {
                let mut record = SharingRecord::new(kind, label, source_id);
                record.participants.insert(participant.to_string());
                vacant.insert(record);
            }
        }
    }

    pub fn get(&self, kind: ResourceKind, label: &str) -> Option<SharingRecord> {
        self.records
            .get(&(kind, label.to_string()))
            .map(|record| record.clone())
    }

    /// Every record, ordered by kind then label.
    pub fn records(&self) -> Vec<SharingRecord> {
        let mut records: Vec<SharingRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| (a.kind, &a.label).cmp(&(b.kind, &b.label)));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Issue every grant on the destination.
    ///
    /// Must run once, after every pair has been walked. Subjects are shared
    /// before experiments and experiments before assessors. A failed grant is
    /// recorded and the remaining grants still go out.
    pub async fn resolve(
        &self,
        destination: &dyn ResourceTransport,
        id_map: &IdentifierMap,
        failures: &FailureLog,
    ) -> SharingReport {
        let mut report = SharingReport::default();

        for record in self.records() {
            if record.participants.is_empty() {
                continue;
            }

            let Some(owner) = record.owner.clone() else {
                warn!(
                    "{} {} is shared with {:?} but its owning project was not migrated",
                    record.kind, record.label, record.participants
                );
                report.unresolved.push(unresolved(&record, "no owning project in this run"));
                continue;
            };

            let Some(destination_id) = id_map.get(record.kind, &record.source_id) else {
                warn!(
                    "Could not find destination ID for {} {} (source {})",
                    record.kind, record.label, record.source_id
                );
                report.unresolved.push(unresolved(
                    &record,
                    "owner copy has no destination identifier",
                ));
                continue;
            };

            for participant in &record.participants {
                let grant = ShareGrant {
                    kind: record.kind,
                    owner_project: owner.clone(),
                    destination_id: destination_id.clone(),
                    label: record.label.clone(),
                    participant_project: participant.clone(),
                };
                match destination.grant_access(&grant).await {
                    Ok(()) => {
                        info!(
                            "Shared {} {} ({}) with project {}",
                            record.kind, record.label, destination_id, participant
                        );
                        report.grants_issued.push(grant);
                    }
                    Err(e) => {
                        warn!(
                            "Failed to share {} {} with project {}: {}",
                            record.kind, record.label, participant, e
                        );
                        failures.record(
                            FailureRecord::from_error(
                                record.kind,
                                &record.label,
                                &record.source_id,
                                &owner,
                                &e,
                            )
                            .with_participant(participant.as_str()),
                        );
                        report.grant_failures.push(grant);
                    }
                }
            }
        }

        info!(
            "Sharing applied: {} grants issued, {} failed, {} unresolved",
            report.grants_issued.len(),
            report.grant_failures.len(),
            report.unresolved.len()
        );
        report
    }
}

fn unresolved(record: &SharingRecord, reason: &str) -> UnresolvedShare {
    UnresolvedShare {
        kind: record.kind,
        label: record.label.clone(),
        source_id: record.source_id.clone(),
        participants: record.participants.clone(),
        reason: reason.to_string(),
    }
}
