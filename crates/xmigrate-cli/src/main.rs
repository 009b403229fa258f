//! xmigrate - migrate XNAT projects from one server to another.
//!
//! Every option can also be given as an `XMIGRATE_*` environment variable.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use xmigrate_core::{
    ConcurrencyLimits, MigrationConfig, MigrationContext, MigrationCoordinator, ProjectInfo,
    ProjectPair, RsyncFileSync, XnatClient, XnatCredentials,
};

#[derive(Parser, Debug)]
#[command(name = "xmigrate", version)]
#[command(about = "Migrate XNAT projects between server instances")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, env = "XMIGRATE_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Migrate one project
    Migrate(MigrateArgs),
    /// Migrate several projects in one run, resolving sharing between them
    MigrateMultiple(MigrateMultipleArgs),
}

#[derive(Args, Debug)]
struct MigrateArgs {
    #[command(flatten)]
    servers: ServerArgs,

    #[command(flatten)]
    options: RunArgs,

    /// Source project identifier
    #[arg(long, env = "XMIGRATE_SOURCE_PROJECT")]
    source_project: String,

    /// Destination project identifier (defaults to the source identifier)
    #[arg(long, env = "XMIGRATE_DESTINATION_PROJECT")]
    destination_project: Option<String>,

    /// Destination project secondary identifier
    #[arg(long, env = "XMIGRATE_DESTINATION_SECONDARY_ID")]
    destination_secondary_id: Option<String>,

    /// Destination project display name
    #[arg(long, env = "XMIGRATE_DESTINATION_PROJECT_NAME")]
    destination_project_name: Option<String>,
}

#[derive(Args, Debug)]
struct MigrateMultipleArgs {
    #[command(flatten)]
    servers: ServerArgs,

    #[command(flatten)]
    options: RunArgs,

    /// Source project identifiers, in migration order
    #[arg(long, required = true, num_args = 1.., value_delimiter = ',', env = "XMIGRATE_SOURCE_PROJECTS")]
    source_projects: Vec<String>,

    /// Destination project identifiers (defaults to the source identifiers)
    #[arg(long, num_args = 1.., value_delimiter = ',', env = "XMIGRATE_DESTINATION_PROJECTS")]
    destination_projects: Vec<String>,

    /// Destination secondary identifiers, matched by position
    #[arg(long, num_args = 1.., value_delimiter = ',', env = "XMIGRATE_DESTINATION_SECONDARY_IDS")]
    destination_secondary_ids: Vec<String>,

    /// Destination display names, matched by position
    #[arg(long, num_args = 1.., value_delimiter = ',', env = "XMIGRATE_DESTINATION_PROJECT_NAMES")]
    destination_project_names: Vec<String>,
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Source server URL
    #[arg(long, env = "XMIGRATE_SOURCE_URL")]
    source_url: String,

    #[arg(long, env = "XMIGRATE_SOURCE_USER")]
    source_user: Option<String>,

    #[arg(long, env = "XMIGRATE_SOURCE_PASSWORD", hide_env_values = true)]
    source_password: Option<String>,

    /// Destination server URL
    #[arg(long, env = "XMIGRATE_DESTINATION_URL", default_value = "http://localhost")]
    destination_url: String,

    #[arg(long, env = "XMIGRATE_DESTINATION_USER")]
    destination_user: Option<String>,

    #[arg(long, env = "XMIGRATE_DESTINATION_PASSWORD", hide_env_values = true)]
    destination_password: Option<String>,

    /// Local mount of the source archive root, for file sync
    #[arg(long, env = "XMIGRATE_SOURCE_TRANSFER_PATH")]
    source_transfer_path: Option<PathBuf>,

    /// Local mount of the destination archive root, for file sync
    #[arg(long, env = "XMIGRATE_DESTINATION_TRANSFER_PATH")]
    destination_transfer_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Subjects migrated concurrently per project
    #[arg(long, env = "XMIGRATE_SUBJECT_CONCURRENCY")]
    subject_concurrency: Option<usize>,

    /// Experiments migrated concurrently per subject
    #[arg(long, env = "XMIGRATE_EXPERIMENT_CONCURRENCY")]
    experiment_concurrency: Option<usize>,

    /// Scans and assessors migrated concurrently per experiment
    #[arg(long, env = "XMIGRATE_CHILD_CONCURRENCY")]
    child_concurrency: Option<usize>,

    /// Only sync files, do not create resources
    #[arg(long, env = "XMIGRATE_RSYNC_ONLY")]
    rsync_only: bool,

    /// Fail a project when the destination lacks a creatable source datatype
    #[arg(long, env = "XMIGRATE_STRICT_DATATYPES")]
    strict_datatypes: bool,

    /// Skip the destination catalog refresh
    #[arg(long, env = "XMIGRATE_NO_REFRESH_CATALOGS")]
    no_refresh_catalogs: bool,

    /// Skip copying project configuration settings
    #[arg(long, env = "XMIGRATE_NO_COPY_CONFIGS")]
    no_copy_configs: bool,

    /// Directory for identifier maps and metadata exports
    #[arg(long, env = "XMIGRATE_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,
}

impl RunArgs {
    fn config(&self) -> MigrationConfig {
        let defaults = ConcurrencyLimits::default();
        MigrationConfig::new()
            .with_concurrency(ConcurrencyLimits {
                subjects: self.subject_concurrency.unwrap_or(defaults.subjects),
                experiments: self.experiment_concurrency.unwrap_or(defaults.experiments),
                children: self.child_concurrency.unwrap_or(defaults.children),
            })
            .with_rsync_only(self.rsync_only)
            .with_strict_datatypes(self.strict_datatypes)
            .with_refresh_catalogs(!self.no_refresh_catalogs)
            .with_copy_project_configs(!self.no_copy_configs)
            .with_output_dir(&self.output_dir)
    }
}

/// Pair up user and password; either one alone is an error.
fn credentials(
    server: &str,
    user: &Option<String>,
    password: &Option<String>,
) -> Result<Option<XnatCredentials>> {
    match (user, password) {
        (Some(user), Some(password)) => Ok(Some(XnatCredentials::new(user, password))),
        (None, None) => Ok(None),
        _ => bail!("{} user and password must be given together", server),
    }
}

/// Servers plus the archive roots they report.
struct Servers {
    source: XnatClient,
    destination: XnatClient,
    source_archive: String,
    destination_archive: String,
    source_transfer_path: Option<PathBuf>,
    destination_transfer_path: Option<PathBuf>,
}

impl Servers {
    async fn connect(args: &ServerArgs) -> Result<Self> {
        let source = XnatClient::new(
            &args.source_url,
            credentials("source", &args.source_user, &args.source_password)?,
        )?;
        let destination = XnatClient::new(
            &args.destination_url,
            credentials(
                "destination",
                &args.destination_user,
                &args.destination_password,
            )?,
        )?;

        let source_archive = source
            .archive_path()
            .await
            .context("Failed to fetch source archive path")?;
        let destination_archive = destination
            .archive_path()
            .await
            .context("Failed to fetch destination archive path")?;
        info!(
            "Archive roots: source {}, destination {}",
            source_archive, destination_archive
        );

        Ok(Self {
            source,
            destination,
            source_archive,
            destination_archive,
            source_transfer_path: args.source_transfer_path.clone(),
            destination_transfer_path: args.destination_transfer_path.clone(),
        })
    }

    fn source_project(&self, id: &str) -> ProjectInfo {
        let info = ProjectInfo::new(id, &self.source_archive);
        match &self.source_transfer_path {
            Some(path) => info.with_transfer_path(path),
            None => info,
        }
    }

    fn destination_project(
        &self,
        id: &str,
        secondary_id: Option<&String>,
        name: Option<&String>,
    ) -> ProjectInfo {
        let mut info = ProjectInfo::new(id, &self.destination_archive);
        if let Some(secondary_id) = secondary_id {
            info = info.with_secondary_id(secondary_id);
        }
        if let Some(name) = name {
            info = info.with_name(name);
        }
        if let Some(path) = &self.destination_transfer_path {
            info = info.with_transfer_path(path);
        }
        info
    }

    async fn run(self, pairs: Vec<ProjectPair>, config: MigrationConfig) -> ExitCode {
        let ctx = MigrationContext::new(
            Arc::new(self.source),
            Arc::new(self.destination),
            Arc::new(RsyncFileSync::new()),
            config,
        );
        let summary = MigrationCoordinator::new(ctx, pairs).run().await;
        if summary.is_success() {
            info!("Migration run finished");
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

fn pairs_for_multiple(servers: &Servers, args: &MigrateMultipleArgs) -> Result<Vec<ProjectPair>> {
    let destinations = if args.destination_projects.is_empty() {
        &args.source_projects
    } else {
        &args.destination_projects
    };
    if destinations.len() != args.source_projects.len() {
        bail!(
            "Number of source projects ({}) must match destination projects ({})",
            args.source_projects.len(),
            destinations.len()
        );
    }

    Ok(args
        .source_projects
        .iter()
        .zip(destinations)
        .enumerate()
        .map(|(i, (source, destination))| {
            ProjectPair::new(
                servers.source_project(source),
                servers.destination_project(
                    destination,
                    args.destination_secondary_ids.get(i),
                    args.destination_project_names.get(i),
                ),
            )
        })
        .collect())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match cli.command {
        Command::Migrate(args) => {
            let servers = Servers::connect(&args.servers).await?;
            let destination = args
                .destination_project
                .as_deref()
                .unwrap_or(&args.source_project);
            let pair = ProjectPair::new(
                servers.source_project(&args.source_project),
                servers.destination_project(
                    destination,
                    args.destination_secondary_id.as_ref(),
                    args.destination_project_name.as_ref(),
                ),
            );
            Ok(servers.run(vec![pair], args.options.config()).await)
        }
        Command::MigrateMultiple(args) => {
            let servers = Servers::connect(&args.servers).await?;
            let pairs = pairs_for_multiple(&servers, &args)?;
            Ok(servers.run(pairs, args.options.config()).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_multiple_projects() {
        let cli = Cli::try_parse_from([
            "xmigrate",
            "migrate-multiple",
            "--source-url",
            "https://old.example.org",
            "--source-projects",
            "A,B",
            "--destination-projects",
            "A2",
            "B2",
            "--rsync-only",
        ])
        .unwrap();
        match cli.command {
            Command::MigrateMultiple(args) => {
                assert_eq!(args.source_projects, vec!["A", "B"]);
                assert_eq!(args.destination_projects, vec!["A2", "B2"]);
                assert!(args.options.config().rsync_only);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_credentials_must_be_paired() {
        assert!(credentials("source", &None, &None).unwrap().is_none());
        assert!(credentials("source", &Some("admin".into()), &Some("pw".into()))
            .unwrap()
            .is_some());
        assert!(credentials("source", &Some("admin".into()), &None).is_err());
    }

    #[test]
    fn test_run_args_defaults() {
        let cli = Cli::try_parse_from([
            "xmigrate",
            "migrate",
            "--source-url",
            "https://old.example.org",
            "--source-project",
            "P1",
            "--child-concurrency",
            "0",
        ])
        .unwrap();
        let Command::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };
        let config = args.options.config();
        assert!(config.refresh_catalogs);
        assert!(config.copy_project_configs);
        assert_eq!(config.concurrency.children, 1);
        assert_eq!(config.output_dir, Some(PathBuf::from("output")));
        assert_eq!(args.destination_project, None);
    }
}
