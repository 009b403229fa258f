//! Top-level driver for a migration run.

use crate::catalog::refresh_project_catalogs;
use crate::config::ExportConfig;
use crate::context::MigrationContext;
use crate::export;
use crate::failure::FailureRecord;
use crate::kind::ResourceKind;
use crate::project::ProjectPair;
use crate::sharing::SharingReport;
use crate::walker::{PairReport, ResourceTreeWalker};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Everything a run produced, for the end-of-run summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pairs: Vec<PairReport>,
    pub failure_counts: BTreeMap<ResourceKind, usize>,
    pub failures: Vec<FailureRecord>,
    pub sharing: SharingReport,
    /// Identifier-map files written at the end of the run.
    pub exported: Vec<PathBuf>,
}

impl RunSummary {
    /// Whether every pair walked to completion.
    pub fn is_success(&self) -> bool {
        self.pairs.iter().all(PairReport::is_success)
    }

    pub fn failed_pairs(&self) -> impl Iterator<Item = &PairReport> {
        self.pairs.iter().filter(|pair| !pair.is_success())
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Log the summary at info level, failures at warn level.
    pub fn log_summary(&self) {
        info!(
            "Migration finished in {}s: {} of {} pairs complete",
            self.duration().num_seconds(),
            self.pairs.len() - self.failed_pairs().count(),
            self.pairs.len()
        );
        for pair in &self.pairs {
            match &pair.error {
                Some(error) => warn!(
                    "{} -> {}: {} ({})",
                    pair.source_project, pair.destination_project, pair.state, error
                ),
                None => info!(
                    "{} -> {}: {}",
                    pair.source_project, pair.destination_project, pair.state
                ),
            }
        }
        for (kind, count) in &self.failure_counts {
            warn!("{} failures: {}", kind, count);
        }
        for failure in &self.failures {
            warn!("  {}", failure);
        }
        info!(
            "Sharing: {} grants issued, {} failed",
            self.sharing.grants_issued.len(),
            self.sharing.grant_failures.len()
        );
        for unresolved in &self.sharing.unresolved {
            warn!(
                "Unresolved shared {} {} ({}): {}",
                unresolved.kind, unresolved.label, unresolved.source_id, unresolved.reason
            );
        }
    }
}

/// Runs a list of project pairs one after another, then resolves sharing.
pub struct MigrationCoordinator {
    ctx: MigrationContext,
    pairs: Vec<ProjectPair>,
}

impl MigrationCoordinator {
    pub fn new(ctx: MigrationContext, pairs: Vec<ProjectPair>) -> Self {
        Self { ctx, pairs }
    }

    pub fn context(&self) -> &MigrationContext {
        &self.ctx
    }

    /// Migrate every pair, then apply sharing once and export the identifier maps.
    ///
    /// A failed pair does not stop the following ones.
    pub async fn run(self) -> RunSummary {
        let started_at = Utc::now();
        let mut pairs = Vec::with_capacity(self.pairs.len());

        for pair in &self.pairs {
            let mut report = ResourceTreeWalker::new(&self.ctx, pair).walk().await;
            if report.is_success() && !self.ctx.config.rsync_only {
                self.finish_pair(pair, &mut report).await;
            }
            pairs.push(report);
        }

        let sharing = self
            .ctx
            .sharing
            .resolve(
                self.ctx.destination.as_ref(),
                &self.ctx.id_map,
                &self.ctx.failures,
            )
            .await;

        let mut exported = Vec::new();
        if let Some(output_dir) = &self.ctx.config.output_dir {
            match export::export_id_maps(&self.ctx.id_map, output_dir) {
                Ok(paths) => exported = paths,
                Err(e) => warn!("Failed to export identifier maps: {}", e),
            }
        }

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            pairs,
            failure_counts: self.ctx.failures.counts(),
            failures: self.ctx.failures.records(),
            sharing,
            exported,
        };
        summary.log_summary();
        summary
    }

    /// Post-walk steps; failures become warnings on the pair report.
    async fn finish_pair(&self, pair: &ProjectPair, report: &mut PairReport) {
        let config = &self.ctx.config;

        if config.copy_project_configs {
            if let Err(e) = self.copy_project_configs(pair).await {
                warn!("Failed to copy project configuration: {}", e);
                report
                    .warnings
                    .push(format!("project configuration: {}", e));
            }
        }

        if config.refresh_catalogs {
            match refresh_project_catalogs(
                self.ctx.destination.as_ref(),
                &pair.destination.id,
                config.concurrency.subjects,
            )
            .await
            {
                Ok(catalogs) => report.catalogs = Some(catalogs),
                Err(e) => {
                    warn!("Failed to refresh catalogs: {}", e);
                    report.warnings.push(format!("catalog refresh: {}", e));
                }
            }
        }

        if let Some(output_dir) = &config.output_dir {
            let dir = output_dir.join(&pair.source.id);
            for kind in ExportConfig::METADATA_KINDS {
                let result = match self
                    .ctx
                    .source
                    .resource_metadata(&pair.source.id, kind)
                    .await
                {
                    Ok(rows) => export::export_metadata(kind, &rows, &dir),
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!("Failed to export {} metadata: {}", kind, e);
                    report
                        .warnings
                        .push(format!("{} metadata export: {}", kind, e));
                }
            }
        }
    }

    async fn copy_project_configs(&self, pair: &ProjectPair) -> crate::Result<()> {
        let entries = self.ctx.source.project_configs(&pair.source.id).await?;
        for entry in &entries {
            self.ctx
                .destination
                .put_project_config(&pair.destination.id, entry)
                .await?;
        }
        info!(
            "Copied {} configuration settings from {} to {}",
            entries.len(),
            pair.source.id,
            pair.destination.id
        );
        Ok(())
    }
}
