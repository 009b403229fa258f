//! xmigrate core - headless engine for migrating XNAT projects between servers.
//!
//! The engine walks a source project (project → subjects → experiments →
//! scans and assessors), recreates every resource it owns on the destination,
//! translates embedded identifiers and archive paths as it goes, and applies
//! cross-project sharing once every project of the run has been migrated.
//! It talks to servers only through the [`ResourceTransport`] and
//! [`FileSync`] traits; [`XnatClient`] and [`RsyncFileSync`] are the
//! production implementations.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xmigrate_core::{
//!     MigrationConfig, MigrationContext, MigrationCoordinator, ProjectInfo, ProjectPair,
//!     RsyncFileSync, XnatClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> xmigrate_core::Result<()> {
//!     let source = XnatClient::new("https://old.example.org", None)?;
//!     let destination = XnatClient::new("https://new.example.org", None)?;
//!     let pair = ProjectPair::new(
//!         ProjectInfo::new("PROJ", source.archive_path().await?),
//!         ProjectInfo::new("PROJ", destination.archive_path().await?),
//!     );
//!
//!     let ctx = MigrationContext::new(
//!         Arc::new(source),
//!         Arc::new(destination),
//!         Arc::new(RsyncFileSync::new()),
//!         MigrationConfig::default(),
//!     );
//!     let summary = MigrationCoordinator::new(ctx, vec![pair]).run().await;
//!     println!("success: {}", summary.is_success());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod failure;
pub mod id_map;
pub mod kind;
pub mod project;
pub mod record;
pub mod sharing;
pub mod transform;
pub mod transport;
pub mod walker;

// Re-export commonly used types
pub use config::{ConcurrencyLimits, MigrationConfig};
pub use context::MigrationContext;
pub use coordinator::{MigrationCoordinator, RunSummary};
pub use error::{FailureClass, MigrateError, Result};
pub use failure::{FailureLog, FailureRecord};
pub use id_map::{IdentifierMap, InsertOutcome};
pub use kind::ResourceKind;
pub use project::{ProjectInfo, ProjectPair, ResourcePath};
pub use record::{QName, Record, XnatNamespace};
pub use sharing::{SharingRecord, SharingReport, SharingResolver, UnresolvedShare};
pub use transform::AttributeTransformer;
pub use transport::{
    ChildRef, DynFileSync, DynTransport, FileSync, MetadataRow, ProjectConfigEntry,
    ResourceTransport, RsyncFileSync, ShareGrant, XnatClient, XnatCredentials,
};
pub use walker::{OutcomeCounts, PairReport, ResourceOutcome, ResourceTreeWalker, WalkState};
