//! Collaborators the migration engine talks to.
//!
//! The engine never builds URLs or touches HTTP itself. It drives a
//! [`ResourceTransport`] per server (source and destination) and a
//! [`FileSync`] for bulk file transfer. [`XnatClient`] and
//! [`RsyncFileSync`] are the production implementations; tests substitute
//! in-memory fakes.

mod rsync;
mod xnat;

pub use rsync::RsyncFileSync;
pub use xnat::{XnatClient, XnatCredentials};

use crate::kind::ResourceKind;
use crate::project::ResourcePath;
use crate::record::Record;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Lightweight listing entry for a child resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRef {
    /// Server identifier.
    pub id: String,
    /// Label; scans have none and repeat their identifier here.
    pub label: String,
    /// Declared datatype, e.g. `xnat:mrSessionData`.
    #[serde(default)]
    pub xsi_type: Option<String>,
}

impl ChildRef {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            xsi_type: None,
        }
    }

    pub fn with_type(mut self, xsi_type: impl Into<String>) -> Self {
        self.xsi_type = Some(xsi_type.into());
        self
    }

    /// Whether `key` names this child by identifier or label.
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.label == key
    }
}

/// Request to give a participant project access to an owner's resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareGrant {
    pub kind: ResourceKind,
    /// Destination project owning the canonical copy.
    pub owner_project: String,
    /// Destination identifier of the canonical copy.
    pub destination_id: String,
    pub label: String,
    /// Destination project receiving access.
    pub participant_project: String,
}

/// One per-project configuration setting (`/config/{tool}/{path}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfigEntry {
    pub tool: String,
    pub path: String,
    pub contents: String,
}

/// Listing columns kept for auditing (`ID,label,insert_user,…`).
pub type MetadataRow = BTreeMap<String, String>;

/// Access to one data-management server.
///
/// Paths are resolved against the server the implementation talks to;
/// segments may be identifiers or labels.
#[async_trait]
pub trait ResourceTransport: Send + Sync {
    /// Human-readable server name for logs.
    fn name(&self) -> &str;

    /// Fetch the full record of a resource.
    async fn fetch_record(&self, kind: ResourceKind, path: &ResourcePath) -> Result<Record>;

    /// Whether the resource at `path` exists.
    async fn exists(&self, kind: ResourceKind, path: &ResourcePath) -> Result<bool>;

    /// Create a resource of `kind` below `parent` from `record`.
    async fn create(&self, kind: ResourceKind, parent: &ResourcePath, record: &Record)
        -> Result<()>;

    /// Forget any cached listing of `kind` below `parent`.
    async fn invalidate_listing_cache(&self, kind: ResourceKind, parent: &ResourcePath);

    /// List the children of `kind` below `parent`.
    async fn list_children(
        &self,
        kind: ResourceKind,
        parent: &ResourcePath,
    ) -> Result<Vec<ChildRef>>;

    /// Datatypes the server has schemas for.
    async fn datatypes(&self) -> Result<HashSet<String>>;

    /// Datatypes users may create (excluding `xdat:` internals).
    async fn creatable_datatypes(&self) -> Result<HashSet<String>>;

    /// Share a resource with another project.
    async fn grant_access(&self, grant: &ShareGrant) -> Result<()>;

    /// Rebuild the file catalog of a resource.
    async fn refresh_catalog(&self, path: &ResourcePath) -> Result<()>;

    /// Regenerate the image viewer's session data for an experiment.
    async fn refresh_viewer_session(&self, project: &str, experiment_id: &str) -> Result<()>;

    /// Audit columns for every resource of `kind` in a project.
    async fn resource_metadata(&self, project: &str, kind: ResourceKind)
        -> Result<Vec<MetadataRow>>;

    /// Every per-project configuration setting.
    async fn project_configs(&self, project: &str) -> Result<Vec<ProjectConfigEntry>>;

    /// Write one per-project configuration setting.
    async fn put_project_config(&self, project: &str, entry: &ProjectConfigEntry) -> Result<()>;
}

/// Shared transport handle.
pub type DynTransport = Arc<dyn ResourceTransport>;

/// Bulk copy of a project's archive files.
#[async_trait]
pub trait FileSync: Send + Sync {
    /// Copy everything below `source` into `destination`; blocking, pass/fail.
    async fn sync(&self, source: &Path, destination: &Path) -> Result<()>;
}

/// Shared file-sync handle.
pub type DynFileSync = Arc<dyn FileSync>;
