//! Resource kinds of the XNAT hierarchy.

use serde::{Deserialize, Serialize};

/// Level of the project → subject → experiment → {scan, assessor} hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Project,
    Subject,
    Experiment,
    Scan,
    Assessor,
    Reconstruction,
    Resource,
    File,
}

impl ResourceKind {
    /// All kinds, in hierarchy order.
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Project,
        ResourceKind::Subject,
        ResourceKind::Experiment,
        ResourceKind::Scan,
        ResourceKind::Assessor,
        ResourceKind::Reconstruction,
        ResourceKind::Resource,
        ResourceKind::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Project => "project",
            ResourceKind::Subject => "subject",
            ResourceKind::Experiment => "experiment",
            ResourceKind::Scan => "scan",
            ResourceKind::Assessor => "assessor",
            ResourceKind::Reconstruction => "reconstruction",
            ResourceKind::Resource => "resource",
            ResourceKind::File => "file",
        }
    }

    /// URI segment naming the collection of this kind under its parent.
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Project => "projects",
            ResourceKind::Subject => "subjects",
            ResourceKind::Experiment => "experiments",
            ResourceKind::Scan => "scans",
            ResourceKind::Assessor => "assessors",
            ResourceKind::Reconstruction => "reconstructions",
            ResourceKind::Resource => "resources",
            ResourceKind::File => "files",
        }
    }

    /// Identifier partition this kind's identifiers live in.
    ///
    /// The server allocates assessor identifiers from the experiment
    /// sequence, so both share one partition of the identifier map.
    pub fn id_namespace(&self) -> ResourceKind {
        match self {
            ResourceKind::Assessor => ResourceKind::Experiment,
            other => *other,
        }
    }

    /// Whether a non-owning project may hold a shared reference to this kind.
    pub fn is_shareable(&self) -> bool {
        matches!(
            self,
            ResourceKind::Subject | ResourceKind::Experiment | ResourceKind::Assessor
        )
    }

    /// Whether identifiers of this kind are assigned by the caller rather
    /// than by the destination server.
    pub fn keeps_source_id(&self) -> bool {
        matches!(self, ResourceKind::Project | ResourceKind::Scan)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s.to_lowercase())
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
