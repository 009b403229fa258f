//! Project endpoints and resource paths.

use crate::kind::ResourceKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One project endpoint (source or destination) of a migration pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Project identifier on its server.
    pub id: String,
    /// Secondary identifier (short title).
    #[serde(default)]
    pub secondary_id: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Server-side archive root, e.g. `/data/xnat/archive`.
    pub archive_path: String,
    /// Locally mounted copy of the archive root used for bulk file transfer.
    #[serde(default)]
    pub transfer_path: Option<PathBuf>,
}

impl ProjectInfo {
    pub fn new(id: impl Into<String>, archive_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secondary_id: None,
            name: None,
            archive_path: archive_path.into(),
            transfer_path: None,
        }
    }

    pub fn with_secondary_id(mut self, secondary_id: impl Into<String>) -> Self {
        self.secondary_id = Some(secondary_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_transfer_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.transfer_path = Some(path.into());
        self
    }

    /// Root under which every file of this project is stored on the server.
    pub fn archive_root(&self) -> String {
        format!("{}/{}", self.archive_path.trim_end_matches('/'), self.id)
    }

    /// Path of the project resource itself.
    pub fn path(&self) -> ResourcePath {
        ResourcePath::project(&self.id)
    }
}

/// A source project paired with the destination it migrates to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPair {
    pub source: ProjectInfo,
    pub destination: ProjectInfo,
}

impl ProjectPair {
    pub fn new(source: ProjectInfo, destination: ProjectInfo) -> Self {
        Self {
            source,
            destination,
        }
    }
}

/// Location of a resource in the hierarchy, as (kind, id-or-label) segments.
///
/// Segments may hold either the server identifier or the label; the server
/// accepts both, and source paths use identifiers while destination paths
/// use labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    segments: Vec<(ResourceKind, String)>,
}

impl ResourcePath {
    /// The server root, parent of every project.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn project(id: &str) -> Self {
        Self::root().child(ResourceKind::Project, id)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path of a child resource below this one.
    pub fn child(&self, kind: ResourceKind, id: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push((kind, id.to_string()));
        Self { segments }
    }

    pub fn segments(&self) -> &[(ResourceKind, String)] {
        &self.segments
    }

    /// Kind of the last segment.
    pub fn kind(&self) -> ResourceKind {
        self.segments
            .last()
            .map(|(kind, _)| *kind)
            .unwrap_or(ResourceKind::Project)
    }

    /// Identifier or label held by the last segment.
    pub fn leaf(&self) -> &str {
        self.segments
            .last()
            .map(|(_, id)| id.as_str())
            .unwrap_or_default()
    }

    pub fn project_id(&self) -> &str {
        self.segments
            .first()
            .map(|(_, id)| id.as_str())
            .unwrap_or_default()
    }

    /// Enclosing resource; projects have the server root as parent.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    fn join(&self, root: &str) -> String {
        let mut uri = String::from(root);
        for (kind, id) in &self.segments {
            uri.push('/');
            uri.push_str(kind.collection());
            uri.push('/');
            uri.push_str(&urlencoding::encode(id));
        }
        uri
    }

    /// REST URI, e.g. `/data/projects/P/subjects/S1`.
    pub fn uri(&self) -> String {
        self.join("/data")
    }

    /// URI of the collection of `kind` below this resource.
    pub fn collection_uri(&self, kind: ResourceKind) -> String {
        format!("{}/{}", self.uri(), kind.collection())
    }

    /// Archive URI used by the catalog refresh service.
    pub fn archive_uri(&self) -> String {
        self.join("/archive")
    }
}

impl std::fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri())
    }
}
