//! Per-resource failure log.
//!
//! Resource-local errors are recorded here and the walk carries on; the log
//! is read once at the end of the run for the summary.

use crate::error::{FailureClass, MigrateError};
use crate::kind::ResourceKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// One failed resource, with enough context to retry it by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub kind: ResourceKind,
    /// Label of the resource (the identifier for scans).
    pub label: String,
    pub source_id: String,
    /// Source project being walked when the failure happened, or the owning
    /// destination project for a failed sharing grant.
    pub project: String,
    /// Destination project a failed sharing grant was meant for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
    pub class: FailureClass,
    pub message: String,
}

impl FailureRecord {
    pub fn from_error(
        kind: ResourceKind,
        label: &str,
        source_id: &str,
        project: &str,
        error: &MigrateError,
    ) -> Self {
        Self {
            kind,
            label: label.to_string(),
            source_id: source_id.to_string(),
            project: project.to_string(),
            participant: None,
            class: error.failure_class(),
            message: error.to_string(),
        }
    }

    pub fn with_participant(mut self, participant: impl Into<String>) -> Self {
        self.participant = Some(participant.into());
        self
    }
}

impl std::fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({}) in {}", self.kind, self.label, self.source_id, self.project)?;
        if let Some(participant) = &self.participant {
            write!(f, " shared with {}", participant)?;
        }
        write!(f, ": {}: {}", self.class, self.message)
    }
}

/// Append-only failure log shared by every task of a run.
#[derive(Debug, Default)]
pub struct FailureLog {
    records: Mutex<Vec<FailureRecord>>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, failure: FailureRecord) {
        warn!("Failed to migrate {}", failure);
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    /// Snapshot of every failure recorded so far, in recording order.
    pub fn records(&self) -> Vec<FailureRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Failure count per kind.
    pub fn counts(&self) -> BTreeMap<ResourceKind, usize> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut counts = BTreeMap::new();
        for failure in records.iter() {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.counts().get(&kind).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
