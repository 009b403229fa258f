//! Centralized configuration for xmigrate.
//!
//! Compile-time defaults live in unit structs with associated constants;
//! [`MigrationConfig`] carries the per-run options chosen by the caller.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
    pub const USER_AGENT: &'static str = concat!("xmigrate/", env!("CARGO_PKG_VERSION"));
    pub const LISTING_CACHE_TTL: Duration = Duration::from_secs(300);
    pub const LISTING_CACHE_CAPACITY: u64 = 10_000;
    pub const ARCHIVE_PATH_ENDPOINT: &'static str = "/xapi/siteConfig/archivePath";
    pub const DATATYPES_ENDPOINT: &'static str = "/xapi/schemas/datatypes";
    pub const CREATABLE_ENDPOINT: &'static str = "/xapi/access/displays/createable";
    pub const REFRESH_CATALOG_ENDPOINT: &'static str = "/data/services/refresh/catalog";
    pub const REFRESH_CATALOG_OPTIONS: &'static str = "checksum,delete,append,populateStats";
    pub const VIEWER_ENDPOINT: &'static str = "/xapi/viewer/projects";
}

/// Tree-walk defaults.
pub struct WalkerDefaults;

impl WalkerDefaults {
    pub const SUBJECT_CONCURRENCY: usize = 4;
    pub const EXPERIMENT_CONCURRENCY: usize = 4;
    pub const CHILD_CONCURRENCY: usize = 8;
}

/// Export defaults.
pub struct ExportConfig;

impl ExportConfig {
    pub const METADATA_COLUMNS: [&'static str; 5] =
        ["ID", "label", "insert_user", "insert_date", "last_modified"];
    pub const METADATA_KINDS: [crate::kind::ResourceKind; 2] = [
        crate::kind::ResourceKind::Subject,
        crate::kind::ResourceKind::Experiment,
    ];
    pub const ID_MAP_SUFFIX: &'static str = "_id_map.csv";
    pub const METADATA_SUFFIX: &'static str = "_metadata.csv";
}

/// Concurrency ceiling for each level of the tree walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyLimits {
    /// Subjects of one project in flight at once.
    pub subjects: usize,
    /// Experiments of one subject in flight at once.
    pub experiments: usize,
    /// Scans and assessors of one experiment in flight at once.
    pub children: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            subjects: WalkerDefaults::SUBJECT_CONCURRENCY,
            experiments: WalkerDefaults::EXPERIMENT_CONCURRENCY,
            children: WalkerDefaults::CHILD_CONCURRENCY,
        }
    }
}

impl ConcurrencyLimits {
    /// Same ceiling at every level; zero is raised to one.
    pub fn uniform(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            subjects: limit,
            experiments: limit,
            children: limit,
        }
    }

    /// Copy with every zero ceiling raised to one.
    pub fn normalized(self) -> Self {
        Self {
            subjects: self.subjects.max(1),
            experiments: self.experiments.max(1),
            children: self.children.max(1),
        }
    }
}

/// Options for one migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub concurrency: ConcurrencyLimits,
    /// Stop each pair after the bulk file transfer.
    pub rsync_only: bool,
    /// Fail a pair before any subject when a creatable source datatype is
    /// missing on the destination.
    pub strict_datatypes: bool,
    /// Refresh destination catalogs after each pair's walk.
    pub refresh_catalogs: bool,
    /// Copy per-project configuration settings after each pair's walk.
    pub copy_project_configs: bool,
    /// Where identifier maps and metadata are exported; `None` disables exports.
    pub output_dir: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyLimits::default(),
            rsync_only: false,
            strict_datatypes: false,
            refresh_catalogs: true,
            copy_project_configs: true,
            output_dir: None,
        }
    }
}

impl MigrationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyLimits) -> Self {
        self.concurrency = concurrency.normalized();
        self
    }

    pub fn with_rsync_only(mut self, rsync_only: bool) -> Self {
        self.rsync_only = rsync_only;
        self
    }

    pub fn with_strict_datatypes(mut self, strict: bool) -> Self {
        self.strict_datatypes = strict;
        self
    }

    pub fn with_refresh_catalogs(mut self, refresh: bool) -> Self {
        self.refresh_catalogs = refresh;
        self
    }

    pub fn with_copy_project_configs(mut self, copy: bool) -> Self {
        self.copy_project_configs = copy;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
}
