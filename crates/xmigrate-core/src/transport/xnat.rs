//! REST client for an XNAT server.
//!
//! Records travel as XML (`?format=xml`), listings as JSON result sets.
//! Child listings are cached per collection URI; the walker invalidates a
//! collection right after creating into it.

use super::{ChildRef, MetadataRow, ProjectConfigEntry, ResourceTransport, ShareGrant};
use crate::config::{ExportConfig, NetworkConfig};
use crate::kind::ResourceKind;
use crate::project::ResourcePath;
use crate::record::{xml, Record};
use crate::{MigrateError, Result};
use async_trait::async_trait;
use mini_moka::sync::Cache;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Basic-auth credentials for one server.
#[derive(Clone)]
pub struct XnatCredentials {
    pub username: String,
    pub password: String,
}

impl XnatCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for XnatCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XnatCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ResultSetEnvelope<T> {
    #[serde(rename = "ResultSet")]
    result_set: ResultSet<T>,
}

#[derive(Debug, Deserialize)]
struct ResultSet<T> {
    #[serde(rename = "Result", default = "Vec::new")]
    result: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ListingRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(rename = "xsiType", default)]
    xsi_type: Option<String>,
}

impl From<ListingRow> for ChildRef {
    fn from(row: ListingRow) -> Self {
        let label = row
            .label
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| row.id.clone());
        ChildRef {
            id: row.id,
            label,
            xsi_type: row.xsi_type.filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigToolRow {
    tool: String,
}

#[derive(Debug, Deserialize)]
struct ConfigSettingRow {
    path: String,
    #[serde(default)]
    contents: String,
}

#[derive(Debug, Deserialize)]
struct DisplayRow {
    #[serde(rename = "elementName")]
    element_name: String,
}

/// Client for one XNAT server.
pub struct XnatClient {
    client: Client,
    base_url: String,
    host: String,
    credentials: Option<XnatCredentials>,
    listings: Cache<String, Arc<Vec<ChildRef>>>,
}

impl XnatClient {
    /// Create a client with default timeout.
    pub fn new(base_url: &str, credentials: Option<XnatCredentials>) -> Result<Self> {
        Self::with_timeout(base_url, credentials, NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(
        base_url: &str,
        credentials: Option<XnatCredentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let parsed = url::Url::parse(base_url).map_err(|e| MigrateError::Config {
            message: format!("Invalid server URL {}: {}", base_url, e),
        })?;
        let host = parsed.host_str().unwrap_or("unknown").to_string();

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| MigrateError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            host,
            credentials,
            listings: Cache::builder()
                .time_to_live(NetworkConfig::LISTING_CACHE_TTL)
                .max_capacity(NetworkConfig::LISTING_CACHE_CAPACITY)
                .build(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.client.request(method, self.url(path));
        match &self.credentials {
            Some(creds) => request.basic_auth(&creds.username, Some(&creds.password)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str, path: &str) -> Result<Response> {
        let response = request.send().await.map_err(|e| MigrateError::Network {
            message: format!("{} {} failed: {}", what, self.url(path), e),
            source: Some(e),
        })?;
        check_status(response, &self.url(path)).await
    }

    async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> Result<String> {
        let response = self
            .send(self.request(Method::GET, path).query(query), "GET", path)
            .await?;
        Ok(response.text().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let body = self.get_text(path, query).await?;
        serde_json::from_str(&body).map_err(|e| MigrateError::Json {
            message: format!("Invalid JSON from {}: {}", self.url(path), e),
            source: Some(e),
        })
    }

    async fn get_result_set<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let envelope: ResultSetEnvelope<T> = self.get_json(path, query).await?;
        Ok(envelope.result_set.result)
    }

    /// Server-side archive root (`/xapi/siteConfig/archivePath`).
    pub async fn archive_path(&self) -> Result<String> {
        let body = self
            .get_text(NetworkConfig::ARCHIVE_PATH_ENDPOINT, &[])
            .await?;
        Ok(body.trim().trim_matches('"').to_string())
    }
}

/// Map non-success statuses to errors, keeping the body for context.
async fn check_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(MigrateError::Http {
        status: status.as_u16(),
        url: url.to_string(),
        message: message.trim().to_string(),
    })
}

/// Whether a config lookup failed only because the project has none.
fn viewer_session_path(project: &str, experiment_id: &str) -> String {
    format!(
        "{}/{}/experiments/{}",
        NetworkConfig::VIEWER_ENDPOINT,
        urlencoding::encode(project),
        urlencoding::encode(experiment_id)
    )
}

fn is_missing_config(err: &MigrateError) -> bool {
    match err {
        MigrateError::Http { message, .. } if message.contains("Couldn't find config for") => true,
        other => other.is_not_found(),
    }
}

fn parse_listing(rows: Vec<ListingRow>) -> Vec<ChildRef> {
    rows.into_iter().map(ChildRef::from).collect()
}

fn parse_metadata_rows(rows: Vec<serde_json::Map<String, serde_json::Value>>) -> Vec<MetadataRow> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect()
        })
        .collect()
}

#[async_trait]
impl ResourceTransport for XnatClient {
    fn name(&self) -> &str {
        &self.host
    }

    async fn fetch_record(&self, kind: ResourceKind, path: &ResourcePath) -> Result<Record> {
        debug!("Fetching {} {}", kind, path);
        let body = self
            .get_text(&path.uri(), &[("format", "xml")])
            .await
            .map_err(|e| match e {
                MigrateError::Http { status: 404, .. } => MigrateError::NotFound {
                    path: path.uri(),
                },
                other => other,
            })?;
        xml::parse(&body)
    }

    async fn exists(&self, kind: ResourceKind, path: &ResourcePath) -> Result<bool> {
        let Some(parent) = path.parent() else {
            return Ok(true);
        };
        let children = self.list_children(kind, &parent).await?;
        Ok(children.iter().any(|child| child.matches(path.leaf())))
    }

    async fn create(
        &self,
        kind: ResourceKind,
        parent: &ResourcePath,
        record: &Record,
    ) -> Result<()> {
        let path = parent.collection_uri(kind);
        let body = xml::to_string(record)?;
        debug!("Creating {} under {}", kind, parent);
        self.send(
            self.request(Method::POST, &path)
                .header(header::CONTENT_TYPE, "text/xml")
                .body(body),
            "POST",
            &path,
        )
        .await?;
        Ok(())
    }

    async fn invalidate_listing_cache(&self, kind: ResourceKind, parent: &ResourcePath) {
        self.listings.invalidate(&parent.collection_uri(kind));
    }

    async fn list_children(
        &self,
        kind: ResourceKind,
        parent: &ResourcePath,
    ) -> Result<Vec<ChildRef>> {
        let path = parent.collection_uri(kind);
        if let Some(cached) = self.listings.get(&path) {
            return Ok(cached.as_ref().clone());
        }
        let rows: Vec<ListingRow> = self.get_result_set(&path, &[("format", "json")]).await?;
        let children = parse_listing(rows);
        self.listings.insert(path, Arc::new(children.clone()));
        Ok(children)
    }

    async fn datatypes(&self) -> Result<HashSet<String>> {
        let types: Vec<String> = self
            .get_json(NetworkConfig::DATATYPES_ENDPOINT, &[])
            .await?;
        Ok(types.into_iter().collect())
    }

    async fn creatable_datatypes(&self) -> Result<HashSet<String>> {
        let rows: Vec<DisplayRow> = self
            .get_json(NetworkConfig::CREATABLE_ENDPOINT, &[])
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.element_name)
            .filter(|name| !name.starts_with("xdat:"))
            .collect())
    }

    async fn grant_access(&self, grant: &ShareGrant) -> Result<()> {
        let path = format!(
            "{}/projects/{}",
            ResourcePath::project(&grant.owner_project)
                .child(grant.kind, &grant.destination_id)
                .uri(),
            urlencoding::encode(&grant.participant_project)
        );
        self.send(
            self.request(Method::PUT, &path)
                .query(&[("label", grant.label.as_str())]),
            "PUT",
            &path,
        )
        .await?;
        Ok(())
    }

    async fn refresh_catalog(&self, path: &ResourcePath) -> Result<()> {
        let archive_uri = path.archive_uri();
        self.send(
            self.request(Method::POST, NetworkConfig::REFRESH_CATALOG_ENDPOINT)
                .query(&[
                    ("resource", archive_uri.as_str()),
                    ("options", NetworkConfig::REFRESH_CATALOG_OPTIONS),
                ]),
            "POST",
            NetworkConfig::REFRESH_CATALOG_ENDPOINT,
        )
        .await?;
        Ok(())
    }

    async fn refresh_viewer_session(&self, project: &str, experiment_id: &str) -> Result<()> {
        let path = viewer_session_path(project, experiment_id);
        self.send(self.request(Method::POST, &path), "POST", &path)
            .await?;
        Ok(())
    }

    async fn resource_metadata(
        &self,
        project: &str,
        kind: ResourceKind,
    ) -> Result<Vec<MetadataRow>> {
        let path = ResourcePath::project(project).collection_uri(kind);
        let columns = ExportConfig::METADATA_COLUMNS.join(",");
        let rows = self
            .get_result_set(&path, &[("columns", columns.as_str()), ("format", "json")])
            .await?;
        Ok(parse_metadata_rows(rows))
    }

    async fn project_configs(&self, project: &str) -> Result<Vec<ProjectConfigEntry>> {
        let base = format!("{}/config", ResourcePath::project(project).uri());
        let tools: Vec<ConfigToolRow> = match self.get_result_set(&base, &[]).await {
            Ok(tools) => tools,
            Err(e) if is_missing_config(&e) => {
                info!("No custom project configuration found for project {}", project);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for tool in tools {
            let path = format!("{}/{}", base, urlencoding::encode(&tool.tool));
            let settings: Vec<ConfigSettingRow> = self.get_result_set(&path, &[]).await?;
            entries.extend(settings.into_iter().map(|setting| ProjectConfigEntry {
                tool: tool.tool.clone(),
                path: setting.path,
                contents: setting.contents,
            }));
        }
        Ok(entries)
    }

    async fn put_project_config(&self, project: &str, entry: &ProjectConfigEntry) -> Result<()> {
        let path = format!(
            "{}/config/{}/{}",
            ResourcePath::project(project).uri(),
            urlencoding::encode(&entry.tool),
            entry.path
        );
        self.send(
            self.request(Method::PUT, &path)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(entry.contents.clone()),
            "PUT",
            &path,
        )
        .await?;
        Ok(())
    }
}
