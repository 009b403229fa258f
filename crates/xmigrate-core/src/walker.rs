//! Tree walk for one project pair.
//!
//! The walk creates the destination project, copies the archive files, then
//! fans out level by level: subjects of the project, experiments of each
//! subject, and scans plus assessors of each experiment. A level only starts
//! once its parent has been created and mapped, so no task ever sees an
//! unmapped parent identifier. Each level runs with its own concurrency
//! ceiling from [`ConcurrencyLimits`](crate::config::ConcurrencyLimits).
//!
//! Failures below the project are recorded in the run's [`FailureLog`] and
//! the walk continues with the siblings. Failures while creating the project,
//! syncing files or checking datatypes abort the pair.
//!
//! [`FailureLog`]: crate::failure::FailureLog

use crate::catalog::CatalogRefreshReport;
use crate::config::ConcurrencyLimits;
use crate::context::MigrationContext;
use crate::failure::FailureRecord;
use crate::kind::ResourceKind;
use crate::project::{ProjectPair, ResourcePath};
use crate::record::{Record, XnatNamespace};
use crate::transform::AttributeTransformer;
use crate::transport::ChildRef;
use crate::{MigrateError, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Progress of one pair's walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkState {
    NotStarted,
    ProjectCreated,
    SubjectsInFlight,
    Complete,
    Failed,
}

impl std::fmt::Display for WalkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WalkState::NotStarted => "not started",
            WalkState::ProjectCreated => "project created",
            WalkState::SubjectsInFlight => "subjects in flight",
            WalkState::Complete => "complete",
            WalkState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What happened to one resource that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceOutcome {
    /// Created on the destination by this walk.
    Created,
    /// Already on the destination; nothing was sent.
    AlreadyPresent,
    /// Owned by another project; registered for sharing.
    NotOwner,
    /// Left out on purpose (unsupported datatype, shared parent).
    Skipped,
}

impl ResourceOutcome {
    /// Whether the resource now exists on the destination under this pair.
    pub fn is_present(self) -> bool {
        matches!(self, ResourceOutcome::Created | ResourceOutcome::AlreadyPresent)
    }
}

/// Per-kind tally of a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub created: usize,
    pub already_present: usize,
    pub not_owner: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: ResourceOutcome) {
        match outcome {
            ResourceOutcome::Created => self.created += 1,
            ResourceOutcome::AlreadyPresent => self.already_present += 1,
            ResourceOutcome::NotOwner => self.not_owner += 1,
            ResourceOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.already_present + self.not_owner + self.skipped + self.failed
    }
}

/// Result of walking one pair.
#[derive(Debug, Clone, Serialize)]
pub struct PairReport {
    pub source_project: String,
    pub destination_project: String,
    pub state: WalkState,
    pub counts: BTreeMap<ResourceKind, OutcomeCounts>,
    /// Pair-aborting error, if any.
    pub error: Option<String>,
    /// Non-fatal problems in the steps that follow the walk.
    pub warnings: Vec<String>,
    /// Destination catalog refresh, when it ran.
    pub catalogs: Option<CatalogRefreshReport>,
}

impl PairReport {
    pub fn is_success(&self) -> bool {
        self.state == WalkState::Complete
    }

    pub fn counts_for(&self, kind: ResourceKind) -> OutcomeCounts {
        self.counts.get(&kind).copied().unwrap_or_default()
    }
}

/// A resource that exists on both sides, below which the walk continues.
struct Branch {
    source: ResourcePath,
    destination: ResourcePath,
    /// Whether this pair owns the resource (and therefore created it).
    owned: bool,
}

/// Walks one source project and recreates it on the destination.
pub struct ResourceTreeWalker<'a> {
    ctx: &'a MigrationContext,
    pair: &'a ProjectPair,
    transformer: AttributeTransformer<'a>,
    limits: ConcurrencyLimits,
    tally: Mutex<BTreeMap<ResourceKind, OutcomeCounts>>,
}

impl<'a> ResourceTreeWalker<'a> {
    pub fn new(ctx: &'a MigrationContext, pair: &'a ProjectPair) -> Self {
        Self {
            ctx,
            pair,
            transformer: AttributeTransformer::new(&pair.source, &pair.destination, &ctx.id_map),
            limits: ctx.config.concurrency.normalized(),
            tally: Mutex::new(BTreeMap::new()),
        }
    }

    /// Walk the pair to completion.
    ///
    /// Never returns an error: a pair-aborting failure is reported through
    /// [`PairReport::state`] and [`PairReport::error`].
    pub async fn walk(&self) -> PairReport {
        info!(
            "Migrating project: {} -> {}",
            self.pair.source.id, self.pair.destination.id
        );

        let mut state = WalkState::NotStarted;
        let error = match self.run(&mut state).await {
            Ok(()) => {
                state = WalkState::Complete;
                None
            }
            Err(e) => {
                error!(
                    "Migration of {} -> {} failed in state '{}': {}",
                    self.pair.source.id, self.pair.destination.id, state, e
                );
                state = WalkState::Failed;
                Some(e.to_string())
            }
        };

        let counts = self
            .tally
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (kind, count) in &counts {
            info!(
                "{}: {} created, {} already present, {} not owned, {} skipped, {} failed",
                kind,
                count.created,
                count.already_present,
                count.not_owner,
                count.skipped,
                count.failed
            );
        }

        PairReport {
            source_project: self.pair.source.id.clone(),
            destination_project: self.pair.destination.id.clone(),
            state,
            counts,
            error,
            warnings: Vec::new(),
            catalogs: None,
        }
    }

    async fn run(&self, state: &mut WalkState) -> Result<()> {
        let project = self.create_project().await?;
        self.count(ResourceKind::Project, project);
        *state = WalkState::ProjectCreated;

        self.sync_files().await?;
        if self.ctx.config.rsync_only {
            info!("rsync-only mode, skipping resource creation");
            return Ok(());
        }

        if self.ctx.config.strict_datatypes {
            self.check_creatable_datatypes().await?;
        }
        let datatypes = self.ctx.destination.datatypes().await?;

        *state = WalkState::SubjectsInFlight;
        let project = Branch {
            source: self.pair.source.path(),
            destination: self.pair.destination.path(),
            owned: true,
        };
        let subjects = self
            .ctx
            .source
            .list_children(ResourceKind::Subject, &project.source)
            .await?;
        info!("Walking {} subjects", subjects.len());

        let datatypes = &datatypes;
        let project = &project;
        stream::iter(subjects)
            .for_each_concurrent(self.limits.subjects, |subject| async move {
                self.walk_subject(project, subject, datatypes).await;
            })
            .await;
        Ok(())
    }

    async fn create_project(&self) -> Result<ResourceOutcome> {
        let kind = ResourceKind::Project;
        let source = &self.pair.source;
        let destination = &self.pair.destination;

        let record = self.ctx.source.fetch_record(kind, &source.path()).await?;
        let record = self.transformer.transform(&record, kind)?;

        let root = ResourcePath::root();
        let outcome = self
            .create_if_absent(kind, &root, &destination.id, &record)
            .await?;
        self.ctx.destination.invalidate_listing_cache(kind, &root).await;
        self.ctx.id_map.insert(kind, &source.id, &destination.id)?;
        Ok(outcome)
    }

    async fn sync_files(&self) -> Result<()> {
        let (Some(source_root), Some(destination_root)) = (
            self.pair.source.transfer_path.as_ref(),
            self.pair.destination.transfer_path.as_ref(),
        ) else {
            info!("No transfer paths configured, skipping file sync");
            return Ok(());
        };

        self.ctx
            .file_sync
            .sync(
                &source_root.join(&self.pair.source.id),
                &destination_root.join(&self.pair.destination.id),
            )
            .await
    }

    async fn check_creatable_datatypes(&self) -> Result<()> {
        let source = self.ctx.source.creatable_datatypes().await?;
        let destination = self.ctx.destination.creatable_datatypes().await?;
        let mut missing: Vec<String> = source.difference(&destination).cloned().collect();
        if missing.is_empty() {
            info!("All source datatypes are enabled on destination");
            return Ok(());
        }
        missing.sort();
        Err(MigrateError::UnsupportedDatatypes { missing })
    }

    async fn walk_subject(&self, project: &Branch, subject: ChildRef, datatypes: &HashSet<String>) {
        let kind = ResourceKind::Subject;
        let result = self.migrate_shareable(kind, project, &subject).await;
        let Some(outcome) = self.settle(kind, &subject, result) else {
            return;
        };

        let branch = Branch {
            source: project.source.child(kind, &subject.id),
            destination: project.destination.child(kind, &subject.label),
            owned: outcome.is_present(),
        };
        let experiments = match self
            .ctx
            .source
            .list_children(ResourceKind::Experiment, &branch.source)
            .await
        {
            Ok(experiments) => experiments,
            Err(e) => {
                self.fail(kind, &subject, &e);
                return;
            }
        };

        let branch = &branch;
        stream::iter(experiments)
            .for_each_concurrent(
                self.limits.experiments,
                |experiment| async move {
                    self.walk_experiment(branch, experiment, datatypes).await;
                },
            )
            .await;
    }

    async fn walk_experiment(
        &self,
        subject: &Branch,
        experiment: ChildRef,
        datatypes: &HashSet<String>,
    ) {
        let kind = ResourceKind::Experiment;
        let result = self.migrate_experiment(subject, &experiment, datatypes).await;
        let Some(outcome) = self.settle(kind, &experiment, result) else {
            return;
        };
        if outcome == ResourceOutcome::Skipped {
            return;
        }

        let branch = Branch {
            source: subject.source.child(kind, &experiment.id),
            destination: subject.destination.child(kind, &experiment.label),
            owned: outcome.is_present(),
        };

        let mut children = Vec::new();
        for child_kind in [ResourceKind::Scan, ResourceKind::Assessor] {
            match self
                .ctx
                .source
                .list_children(child_kind, &branch.source)
                .await
            {
                Ok(listed) => children.extend(listed.into_iter().map(|child| (child_kind, child))),
                Err(e) => {
                    self.fail(kind, &experiment, &e);
                    return;
                }
            }
        }

        let branch = &branch;
        stream::iter(children)
            .for_each_concurrent(
                self.limits.children,
                |(child_kind, child)| async move {
                    let result = match child_kind {
                        ResourceKind::Scan => self.migrate_scan(branch, &child).await,
                        _ => self.migrate_shareable(child_kind, branch, &child).await,
                    };
                    self.settle(child_kind, &child, result);
                },
            )
            .await;
    }

    async fn migrate_experiment(
        &self,
        subject: &Branch,
        experiment: &ChildRef,
        datatypes: &HashSet<String>,
    ) -> Result<ResourceOutcome> {
        let source_path = subject
            .source
            .child(ResourceKind::Experiment, &experiment.id);
        let declared = match &experiment.xsi_type {
            Some(xsi_type) => xsi_type.clone(),
            None => {
                let record = self
                    .ctx
                    .source
                    .fetch_record(ResourceKind::Experiment, &source_path)
                    .await?;
                declared_type(&record).ok_or_else(|| {
                    MigrateError::Other(format!(
                        "experiment {} declares no xsi:type",
                        experiment.label
                    ))
                })?
            }
        };

        if !datatypes.contains(&declared) {
            warn!(
                "Datatype {} not available on destination, skipping experiment {}",
                declared, experiment.label
            );
            return Ok(ResourceOutcome::Skipped);
        }
        self.migrate_shareable(ResourceKind::Experiment, subject, experiment)
            .await
    }

    /// Ownership check, create and mapping for a subject, experiment or assessor.
    async fn migrate_shareable(
        &self,
        kind: ResourceKind,
        parent: &Branch,
        child: &ChildRef,
    ) -> Result<ResourceOutcome> {
        let record = self
            .ctx
            .source
            .fetch_record(kind, &parent.source.child(kind, &child.id))
            .await?;

        let source_project = self.pair.source.id.as_str();
        let destination_project = self.pair.destination.id.as_str();
        let owner = record.attr("project").unwrap_or(source_project);

        if owner != source_project {
            debug!("{} {} is owned by {}, registering share", kind, child.label, owner);
            self.ctx
                .sharing
                .record_participant(kind, &child.label, &child.id, destination_project);
            return Ok(ResourceOutcome::NotOwner);
        }

        if !parent.owned {
            return Err(MigrateError::MappingMiss {
                kind: parent.source.kind(),
                source_id: parent.source.leaf().to_string(),
                context: format!(
                    "{} {} is owned by {} but its parent is shared from another project",
                    kind, child.label, source_project
                ),
            });
        }

        self.ctx
            .sharing
            .record_owner(kind, &child.label, &child.id, destination_project)?;

        let record = self.transformer.transform(&record, kind)?;
        let outcome = self
            .create_if_absent(kind, &parent.destination, &child.label, &record)
            .await?;
        let destination_id = self
            .destination_id(kind, &parent.destination, &child.label)
            .await?;
        self.ctx.id_map.insert(kind, &child.id, &destination_id)?;
        Ok(outcome)
    }

    async fn migrate_scan(&self, experiment: &Branch, scan: &ChildRef) -> Result<ResourceOutcome> {
        let kind = ResourceKind::Scan;
        if !experiment.owned {
            debug!(
                "Skipping scan {} for shared experiment {}",
                scan.id,
                experiment.source.leaf()
            );
            return Ok(ResourceOutcome::Skipped);
        }

        let record = self
            .ctx
            .source
            .fetch_record(kind, &experiment.source.child(kind, &scan.id))
            .await?;
        let record = self.transformer.transform(&record, kind)?;
        let outcome = self
            .create_if_absent(kind, &experiment.destination, &scan.id, &record)
            .await?;
        self.ctx
            .destination
            .invalidate_listing_cache(kind, &experiment.destination)
            .await;
        self.ctx.id_map.insert(kind, &scan.id, &scan.id)?;
        Ok(outcome)
    }

    async fn create_if_absent(
        &self,
        kind: ResourceKind,
        parent: &ResourcePath,
        key: &str,
        record: &Record,
    ) -> Result<ResourceOutcome> {
        let destination = &self.ctx.destination;
        if destination.exists(kind, &parent.child(kind, key)).await? {
            debug!("{} {} already on destination", kind, key);
            return Ok(ResourceOutcome::AlreadyPresent);
        }
        destination.create(kind, parent, record).await?;
        debug!("Created {} {} under {}", kind, key, parent);
        Ok(ResourceOutcome::Created)
    }

    /// Identifier the destination assigned to the child labelled `label`.
    async fn destination_id(
        &self,
        kind: ResourceKind,
        parent: &ResourcePath,
        label: &str,
    ) -> Result<String> {
        let destination = &self.ctx.destination;
        destination.invalidate_listing_cache(kind, parent).await;
        destination
            .list_children(kind, parent)
            .await?
            .into_iter()
            .find(|child| child.label == label)
            .map(|child| child.id)
            .ok_or_else(|| MigrateError::MappingMiss {
                kind,
                source_id: label.to_string(),
                context: format!("not yet listed under {} after create", parent),
            })
    }

    fn settle(
        &self,
        kind: ResourceKind,
        child: &ChildRef,
        result: Result<ResourceOutcome>,
    ) -> Option<ResourceOutcome> {
        match result {
            Ok(outcome) => {
                self.count(kind, outcome);
                Some(outcome)
            }
            Err(e) => {
                self.fail(kind, child, &e);
                None
            }
        }
    }

    fn count(&self, kind: ResourceKind, outcome: ResourceOutcome) {
        self.tally
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .add(outcome);
    }

    fn fail(&self, kind: ResourceKind, child: &ChildRef, error: &MigrateError) {
        self.tally
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .failed += 1;
        self.ctx.failures.record(FailureRecord::from_error(
            kind,
            &child.label,
            &child.id,
            &self.pair.source.id,
            error,
        ));
    }
}

/// Schema type a record declares through `xsi:type`.
fn declared_type(record: &Record) -> Option<String> {
    record
        .attr_q(&XnatNamespace::Xsi.name("type"))
        .map(str::to_string)
}
