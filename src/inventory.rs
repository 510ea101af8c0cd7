use crate::config::InventoryConfig;
use crate::error::{CamloadError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// One camera as reported by the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub camera_id: String,
    pub stream_url: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CameraRecord {
    pub fn new<S: Into<String>>(camera_id: S, stream_url: S, active: bool) -> Self {
        Self {
            camera_id: camera_id.into(),
            stream_url: stream_url.into(),
            active,
            name: None,
        }
    }
}

/// Source of the camera list a test run draws its targets from
#[async_trait]
pub trait CameraInventory: Send + Sync {
    /// Short label used in logs and errors
    fn name(&self) -> &str;

    async fn cameras(&self) -> Result<Vec<CameraRecord>>;
}

/// Camera entry in either the native shape or the camera API shape
/// (`id`, `fr_url`, `status == 1`)
#[derive(Debug, Deserialize)]
struct RawCamera {
    #[serde(alias = "id")]
    camera_id: Option<Value>,
    #[serde(alias = "fr_url")]
    stream_url: Option<String>,
    active: Option<bool>,
    status: Option<Value>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InventoryDocument {
    List(Vec<RawCamera>),
    Wrapped { cameras: Vec<RawCamera> },
}

impl RawCamera {
    fn into_record(self) -> Option<CameraRecord> {
        let camera_id = match self.camera_id? {
            Value::String(id) => id,
            Value::Number(id) => id.to_string(),
            _ => return None,
        };

        let active = match (self.active, &self.status) {
            (Some(active), _) => active,
            (None, Some(Value::Number(status))) => status.as_i64() == Some(1),
            (None, Some(Value::String(status))) => {
                status == "1" || status.eq_ignore_ascii_case("active")
            }
            (None, Some(Value::Bool(status))) => *status,
            (None, _) => true,
        };

        Some(CameraRecord {
            camera_id,
            stream_url: self.stream_url.unwrap_or_default(),
            active,
            name: self.name,
        })
    }
}

/// Parse an inventory JSON document. Entries without an id are skipped.
pub fn parse_inventory(json: &str) -> std::result::Result<Vec<CameraRecord>, serde_json::Error> {
    let raw = match serde_json::from_str::<InventoryDocument>(json)? {
        InventoryDocument::List(cameras) => cameras,
        InventoryDocument::Wrapped { cameras } => cameras,
    };

    Ok(raw.into_iter().filter_map(RawCamera::into_record).collect())
}

/// Inventory fetched from a camera API over HTTP
pub struct HttpInventory {
    url: String,
    client: reqwest::Client,
}

impl HttpInventory {
    pub fn new<S: Into<String>>(url: S, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl CameraInventory for HttpInventory {
    fn name(&self) -> &str {
        &self.url
    }

    async fn cameras(&self) -> Result<Vec<CameraRecord>> {
        info!("Fetching cameras from {}", self.url);

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CamloadError::inventory(
                self.url.clone(),
                format!("API returned status {}", status),
            ));
        }

        let body = response.text().await?;
        let cameras = parse_inventory(&body)
            .map_err(|e| CamloadError::inventory(self.url.clone(), e.to_string()))?;

        debug!("Inventory returned {} cameras", cameras.len());
        Ok(cameras)
    }
}

/// Inventory read from a JSON file on disk
pub struct FileInventory {
    path: PathBuf,
    label: String,
}

impl FileInventory {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let label = path.display().to_string();
        Self { path, label }
    }
}

#[async_trait]
impl CameraInventory for FileInventory {
    fn name(&self) -> &str {
        &self.label
    }

    async fn cameras(&self) -> Result<Vec<CameraRecord>> {
        info!("Loading cameras from {}", self.label);

        let body = tokio::fs::read_to_string(&self.path).await?;
        parse_inventory(&body).map_err(|e| CamloadError::inventory(self.label.clone(), e.to_string()))
    }
}

/// Pick the inventory configured for this run, preferring the API
pub fn from_config(config: &InventoryConfig) -> Result<Box<dyn CameraInventory>> {
    match (&config.api_url, &config.file) {
        (Some(url), _) => Ok(Box::new(HttpInventory::new(
            url.as_str(),
            Duration::from_secs(config.request_timeout_secs),
        )?)),
        (None, Some(file)) => Ok(Box::new(FileInventory::new(file))),
        (None, None) => Err(CamloadError::inventory(
            "configuration",
            "set inventory.api_url or inventory.file",
        )),
    }
}
