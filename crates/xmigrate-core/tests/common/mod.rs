//! In-memory XNAT stand-in for integration tests.
//!
//! Holds a resource tree, resolves path segments by identifier or label,
//! assigns identifiers on create the way the server does, and records every
//! create, grant, catalog refresh and config write it receives.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use xmigrate_core::{
    ChildRef, FileSync, MetadataRow, MigrateError, ProjectConfigEntry, QName, Record,
    ResourceKind, ResourcePath, ResourceTransport, Result, ShareGrant, XnatNamespace,
};

pub const SOURCE_ARCHIVE: &str = "/data/xnat/archive";
pub const DESTINATION_ARCHIVE: &str = "/srv/xnat/archive";

#[derive(Debug, Clone)]
struct Node {
    kind: ResourceKind,
    id: String,
    label: String,
    xsi_type: Option<String>,
    record: Record,
    children: Vec<Node>,
}

impl Node {
    fn matches(&self, kind: ResourceKind, key: &str) -> bool {
        self.kind == kind && (self.id == key || self.label == key)
    }
}

/// A recorded create call.
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub kind: ResourceKind,
    pub parent: String,
    pub record: Record,
}

#[derive(Debug)]
struct FakeState {
    root: Node,
    next_id: u32,
    datatypes: HashSet<String>,
    creatable: HashSet<String>,
    creates: Vec<CreateCall>,
    grants: Vec<ShareGrant>,
    refreshed: Vec<String>,
    viewer_sessions: Vec<(String, String)>,
    hide_listing_types: bool,
    configs: BTreeMap<String, Vec<ProjectConfigEntry>>,
    config_writes: Vec<(String, ProjectConfigEntry)>,
    fail_create_labels: HashSet<String>,
    fail_grants_to: HashSet<String>,
}

pub struct FakeServer {
    name: String,
    state: Mutex<FakeState>,
    creates_in_flight: AtomicUsize,
    max_creates_in_flight: AtomicUsize,
}

pub fn xnat(local: &str) -> QName {
    XnatNamespace::Xnat.name(local)
}

impl FakeServer {
    pub fn new(name: &str) -> Self {
        let root = Node {
            kind: ResourceKind::Project,
            id: String::new(),
            label: String::new(),
            xsi_type: None,
            record: Record::new(xnat("root")),
            children: Vec::new(),
        };
        let datatypes: HashSet<String> = [
            "xnat:projectData",
            "xnat:subjectData",
            "xnat:mrSessionData",
            "xnat:ctSessionData",
            "xnat:qcAssessmentData",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        Self {
            name: name.to_string(),
            state: Mutex::new(FakeState {
                root,
                next_id: 1,
                creatable: datatypes.clone(),
                datatypes,
                creates: Vec::new(),
                grants: Vec::new(),
                refreshed: Vec::new(),
                viewer_sessions: Vec::new(),
                hide_listing_types: false,
                configs: BTreeMap::new(),
                config_writes: Vec::new(),
                fail_create_labels: HashSet::new(),
                fail_grants_to: HashSet::new(),
            }),
            creates_in_flight: AtomicUsize::new(0),
            max_creates_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    // Seeding

    /// Insert a resource below `parent`, as the source server holds it.
    pub fn insert(
        &self,
        parent: &ResourcePath,
        kind: ResourceKind,
        id: &str,
        label: &str,
        xsi_type: &str,
        record: Record,
    ) -> ResourcePath {
        self.with_state(|state| {
            let parent_node = find_mut(&mut state.root, parent).expect("parent exists");
            parent_node.children.push(Node {
                kind,
                id: id.to_string(),
                label: label.to_string(),
                xsi_type: Some(xsi_type.to_string()),
                record,
                children: Vec::new(),
            });
        });
        parent.child(kind, id)
    }

    pub fn add_project(&self, id: &str) -> ResourcePath {
        let record = Record::new(xnat("projectData"))
            .with_attr("ID", id)
            .with_attr("secondary_ID", id)
            .with_child(Record::new(xnat("name")).with_text(format!("Project {}", id)));
        self.insert(
            &ResourcePath::root(),
            ResourceKind::Project,
            id,
            id,
            "xnat:projectData",
            record,
        )
    }

    pub fn add_subject(&self, project: &ResourcePath, id: &str, label: &str, owner: &str) -> ResourcePath {
        let record = Record::new(xnat("Subject"))
            .with_attr("ID", id)
            .with_attr("project", owner)
            .with_attr("label", label)
            .with_child(Record::new(xnat("experiments")));
        self.insert(project, ResourceKind::Subject, id, label, "xnat:subjectData", record)
    }

    pub fn add_experiment(
        &self,
        subject: &ResourcePath,
        id: &str,
        label: &str,
        owner: &str,
        xsi_type: &str,
    ) -> ResourcePath {
        let mut record = Record::new(xnat("MRSession"))
            .with_attr("ID", id)
            .with_attr("project", owner)
            .with_attr("label", label)
            .with_child(Record::new(xnat("subject_ID")).with_text(subject.leaf()))
            .with_child(Record::new(xnat("scans")))
            .with_child(Record::new(xnat("assessors")));
        record.set_attr_q(XnatNamespace::Xsi.name("type"), xsi_type);
        self.insert(subject, ResourceKind::Experiment, id, label, xsi_type, record)
    }

    /// Scan with one catalog file at `uri`.
    pub fn add_scan(&self, experiment: &ResourcePath, id: &str, modality: &str, uri: &str) -> ResourcePath {
        let record = Record::new(xnat("imageScanData"))
            .with_attr("ID", id)
            .with_attr("project", experiment.project_id())
            .with_child(Record::new(xnat("modality")).with_text(modality))
            .with_child(Record::new(xnat("image_session_ID")).with_text(experiment.leaf()))
            .with_child(Record::new(xnat("file")).with_attr("URI", uri));
        self.insert(experiment, ResourceKind::Scan, id, id, "xnat:imageScanData", record)
    }

    pub fn add_assessor(
        &self,
        experiment: &ResourcePath,
        id: &str,
        label: &str,
        owner: &str,
    ) -> ResourcePath {
        let record = Record::new(xnat("QCAssessment"))
            .with_attr("ID", id)
            .with_attr("project", owner)
            .with_attr("label", label)
            .with_child(Record::new(xnat("imageSession_ID")).with_text(experiment.leaf()));
        self.insert(
            experiment,
            ResourceKind::Assessor,
            id,
            label,
            "xnat:qcAssessmentData",
            record,
        )
    }

    pub fn set_datatypes(&self, types: &[&str]) {
        self.with_state(|state| {
            state.datatypes = types.iter().map(|s| s.to_string()).collect();
        });
    }

    pub fn set_creatable(&self, types: &[&str]) {
        self.with_state(|state| {
            state.creatable = types.iter().map(|s| s.to_string()).collect();
        });
    }

    pub fn set_configs(&self, project: &str, entries: Vec<ProjectConfigEntry>) {
        self.with_state(|state| {
            state.configs.insert(project.to_string(), entries);
        });
    }

    /// Leave `xsiType` out of listings, as some servers do.
    pub fn hide_listing_types(&self) {
        self.with_state(|state| state.hide_listing_types = true);
    }

    pub fn fail_create_of(&self, label: &str) {
        self.with_state(|state| {
            state.fail_create_labels.insert(label.to_string());
        });
    }

    pub fn fail_grants_to(&self, project: &str) {
        self.with_state(|state| {
            state.fail_grants_to.insert(project.to_string());
        });
    }

    // Inspection

    pub fn creates(&self) -> Vec<CreateCall> {
        self.with_state(|state| state.creates.clone())
    }

    pub fn creates_of(&self, kind: ResourceKind) -> Vec<CreateCall> {
        self.creates()
            .into_iter()
            .filter(|call| call.kind == kind)
            .collect()
    }

    pub fn grants(&self) -> Vec<ShareGrant> {
        self.with_state(|state| state.grants.clone())
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.with_state(|state| state.refreshed.clone())
    }

    /// `(project, experiment id)` of every viewer session regenerated.
    pub fn viewer_sessions(&self) -> Vec<(String, String)> {
        self.with_state(|state| state.viewer_sessions.clone())
    }

    /// Most create calls that were ever in progress at once.
    pub fn max_creates_in_flight(&self) -> usize {
        self.max_creates_in_flight.load(Ordering::SeqCst)
    }

    pub fn config_writes(&self) -> Vec<(String, ProjectConfigEntry)> {
        self.with_state(|state| state.config_writes.clone())
    }

    /// Identifier of the resource at `path`, if present.
    pub fn id_of(&self, path: &ResourcePath) -> Option<String> {
        self.with_state(|state| find(&state.root, path).map(|node| node.id.clone()))
    }

    pub fn record_of(&self, path: &ResourcePath) -> Option<Record> {
        self.with_state(|state| find(&state.root, path).map(|node| node.record.clone()))
    }
}

fn find<'a>(root: &'a Node, path: &ResourcePath) -> Option<&'a Node> {
    let mut node = root;
    for (kind, key) in path.segments() {
        node = node.children.iter().find(|child| child.matches(*kind, key))?;
    }
    Some(node)
}

fn find_mut<'a>(root: &'a mut Node, path: &ResourcePath) -> Option<&'a mut Node> {
    let mut node = root;
    for (kind, key) in path.segments() {
        node = node
            .children
            .iter_mut()
            .find(|child| child.matches(*kind, key))?;
    }
    Some(node)
}

fn server_error(path: &str, message: &str) -> MigrateError {
    MigrateError::Http {
        status: 500,
        url: path.to_string(),
        message: message.to_string(),
    }
}

#[async_trait]
impl ResourceTransport for FakeServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_record(&self, _kind: ResourceKind, path: &ResourcePath) -> Result<Record> {
        tokio::task::yield_now().await;
        self.record_of(path).ok_or_else(|| MigrateError::NotFound { path: path.uri() })
    }

    async fn exists(&self, _kind: ResourceKind, path: &ResourcePath) -> Result<bool> {
        Ok(self.id_of(path).is_some())
    }

    async fn create(&self, kind: ResourceKind, parent: &ResourcePath, record: &Record) -> Result<()> {
        let in_flight = self.creates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_creates_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        self.creates_in_flight.fetch_sub(1, Ordering::SeqCst);

        let name = self.name.clone();
        self.with_state(|state| {
            let label = record
                .attr("label")
                .or_else(|| record.attr("ID"))
                .unwrap_or_default()
                .to_string();
            if state.fail_create_labels.contains(&label) {
                return Err(server_error(&parent.collection_uri(kind), "create rejected"));
            }

            let id = if kind.keeps_source_id() {
                record.attr("ID").unwrap_or_default().to_string()
            } else {
                let n = state.next_id;
                state.next_id += 1;
                let prefix = match kind.id_namespace() {
                    ResourceKind::Subject => "S",
                    _ => "E",
                };
                format!("{}_{}{:05}", name.to_uppercase(), prefix, n)
            };

            state.creates.push(CreateCall {
                kind,
                parent: parent.uri(),
                record: record.clone(),
            });

            let parent_node = find_mut(&mut state.root, parent)
                .ok_or_else(|| MigrateError::NotFound { path: parent.uri() })?;
            parent_node.children.push(Node {
                kind,
                id: id.clone(),
                label: if kind == ResourceKind::Scan { id.clone() } else { label },
                xsi_type: Some(record.name.to_string()),
                record: record.clone().with_attr("ID", id),
                children: Vec::new(),
            });
            Ok(())
        })
    }

    async fn invalidate_listing_cache(&self, _kind: ResourceKind, _parent: &ResourcePath) {}

    async fn list_children(&self, kind: ResourceKind, parent: &ResourcePath) -> Result<Vec<ChildRef>> {
        tokio::task::yield_now().await;
        self.with_state(|state| {
            let node = find(&state.root, parent)
                .ok_or_else(|| MigrateError::NotFound { path: parent.uri() })?;
            Ok(node
                .children
                .iter()
                .filter(|child| child.kind == kind)
                .map(|child| ChildRef {
                    id: child.id.clone(),
                    label: child.label.clone(),
                    xsi_type: if state.hide_listing_types {
                        None
                    } else {
                        child.xsi_type.clone()
                    },
                })
                .collect())
        })
    }

    async fn datatypes(&self) -> Result<HashSet<String>> {
        Ok(self.with_state(|state| state.datatypes.clone()))
    }

    async fn creatable_datatypes(&self) -> Result<HashSet<String>> {
        Ok(self.with_state(|state| state.creatable.clone()))
    }

    async fn grant_access(&self, grant: &ShareGrant) -> Result<()> {
        self.with_state(|state| {
            if state.fail_grants_to.contains(&grant.participant_project) {
                return Err(server_error(&grant.participant_project, "grant rejected"));
            }
            state.grants.push(grant.clone());
            Ok(())
        })
    }

    async fn refresh_catalog(&self, path: &ResourcePath) -> Result<()> {
        self.with_state(|state| state.refreshed.push(path.archive_uri()));
        Ok(())
    }

    async fn refresh_viewer_session(&self, project: &str, experiment_id: &str) -> Result<()> {
        self.with_state(|state| {
            state
                .viewer_sessions
                .push((project.to_string(), experiment_id.to_string()))
        });
        Ok(())
    }

    async fn resource_metadata(&self, project: &str, kind: ResourceKind) -> Result<Vec<MetadataRow>> {
        let children = self.list_children(kind, &ResourcePath::project(project)).await?;
        Ok(children
            .into_iter()
            .map(|child| {
                let mut row = MetadataRow::new();
                row.insert("ID".into(), child.id);
                row.insert("label".into(), child.label);
                row.insert("insert_user".into(), "admin".into());
                row
            })
            .collect())
    }

    async fn project_configs(&self, project: &str) -> Result<Vec<ProjectConfigEntry>> {
        Ok(self.with_state(|state| state.configs.get(project).cloned().unwrap_or_default()))
    }

    async fn put_project_config(&self, project: &str, entry: &ProjectConfigEntry) -> Result<()> {
        self.with_state(|state| {
            state
                .config_writes
                .push((project.to_string(), entry.clone()))
        });
        Ok(())
    }
}

/// File sync that only records what it was asked to copy.
#[derive(Default)]
pub struct RecordingFileSync {
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    fail: bool,
}

impl RecordingFileSync {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileSync for RecordingFileSync {
    async fn sync(&self, source: &Path, destination: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((source.to_path_buf(), destination.to_path_buf()));
        if self.fail {
            return Err(MigrateError::FileSync {
                message: "rsync exited with status 23".into(),
            });
        }
        Ok(())
    }
}

/// Archive URI of a scan file below the source project `project`.
pub fn source_file(project: &str, rest: &str) -> String {
    format!("{}/{}/{}", SOURCE_ARCHIVE, project, rest)
}
