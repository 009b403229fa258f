//! Destination catalog refresh after a pair's walk.

use crate::kind::ResourceKind;
use crate::project::ResourcePath;
use crate::transport::ResourceTransport;
use crate::Result;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Counts from one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogRefreshReport {
    pub refreshed: usize,
    /// Experiments whose viewer session data was regenerated.
    pub viewer_sessions: usize,
    pub failed: usize,
}

struct Counters {
    refreshed: AtomicUsize,
    viewer_sessions: AtomicUsize,
    failed: AtomicUsize,
}

/// Refresh every scan, assessor, experiment and subject catalog of a
/// destination project, then the project itself. Each experiment's viewer
/// session data is regenerated after its catalog.
///
/// Individual refresh failures are logged and counted; only a failure to
/// list the project's subjects is returned as an error.
pub async fn refresh_project_catalogs(
    destination: &dyn ResourceTransport,
    project: &str,
    concurrency: usize,
) -> Result<CatalogRefreshReport> {
    let project_path = ResourcePath::project(project);
    let subjects = destination
        .list_children(ResourceKind::Subject, &project_path)
        .await?;

    let counters = Counters {
        refreshed: AtomicUsize::new(0),
        viewer_sessions: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
    };
    let counters = &counters;
    let project_path = &project_path;

    stream::iter(subjects)
        .for_each_concurrent(concurrency.max(1), |subject| async move {
            let subject_path = project_path.child(ResourceKind::Subject, &subject.label);
            refresh_subject(destination, &subject_path, counters).await;
            refresh(destination, &subject_path, counters).await;
        })
        .await;
    refresh(destination, project_path, counters).await;

    let report = CatalogRefreshReport {
        refreshed: counters.refreshed.load(Ordering::SeqCst),
        viewer_sessions: counters.viewer_sessions.load(Ordering::SeqCst),
        failed: counters.failed.load(Ordering::SeqCst),
    };
    info!(
        "Refreshed {} catalogs and {} viewer sessions in {} ({} failed)",
        report.refreshed, report.viewer_sessions, project, report.failed
    );
    Ok(report)
}

async fn refresh_subject(
    destination: &dyn ResourceTransport,
    subject: &ResourcePath,
    counters: &Counters,
) {
    let experiments = match destination
        .list_children(ResourceKind::Experiment, subject)
        .await
    {
        Ok(experiments) => experiments,
        Err(e) => {
            warn!("Could not list experiments of {}: {}", subject, e);
            counters.failed.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    for experiment in experiments {
        let experiment_path = subject.child(ResourceKind::Experiment, &experiment.label);
        for kind in [ResourceKind::Scan, ResourceKind::Assessor] {
            match destination.list_children(kind, &experiment_path).await {
                Ok(children) => {
                    for child in children {
                        refresh(destination, &experiment_path.child(kind, &child.label), counters)
                            .await;
                    }
                }
                Err(e) => {
                    warn!("Could not list {} of {}: {}", kind.collection(), experiment_path, e);
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        refresh(destination, &experiment_path, counters).await;

        match destination
            .refresh_viewer_session(subject.project_id(), &experiment.id)
            .await
        {
            Ok(()) => {
                counters.viewer_sessions.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!("Failed to regenerate viewer session for {}: {}", experiment_path, e);
                counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

async fn refresh(destination: &dyn ResourceTransport, path: &ResourcePath, counters: &Counters) {
    match destination.refresh_catalog(path).await {
        Ok(()) => {
            counters.refreshed.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => {
            warn!("Failed to refresh catalog {}: {}", path.archive_uri(), e);
            counters.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
