//! Configuration for the dev tool.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (credentials, endpoint, runtime namespace)
//! 2. Config file (.devtool/config.yaml) for processing tunables
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .devtool/config.yaml
//! - Falls back to the user config dir (asset-devtool/config.yaml)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::DevToolError;

/// Default compute service endpoint
pub const DEFAULT_ENDPOINT: &str = "https://asset-compute.adobe.io";

/// Default OpenWhisk API host for activation logs
pub const DEFAULT_RUNTIME_APIHOST: &str = "https://adobeioruntime.net";

/// Value of `ASSET_COMPUTE_DEV_TOOL_ENV` that disables the token gate
pub const DEVELOPMENT_ENV: &str = "development";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub processing: Option<ProcessingConfig>,
    #[serde(default)]
    pub storage: Option<StorageFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessingConfig {
    pub presign_ttl_seconds: Option<u64>,
    pub activation_wait_seconds: Option<u64>,
    pub journal_poll_interval_ms: Option<u64>,
    pub rendition_estimated_bytes: Option<u64>,
    pub rendition_part_count: Option<u32>,
    pub download_ttl_seconds: Option<u64>,
    pub handle_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageFileConfig {
    /// Folder holding uploaded source files
    pub source_prefix: Option<String>,
    /// Explicit backend choice when both credential sets are present
    pub backend: Option<String>,
}

/// Processing tunables with defaults applied
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingSettings {
    /// Validity of request-scoped presigned references (read and write)
    pub presign_ttl: Duration,
    /// Upper bound on waiting for completion events
    pub activation_wait: Duration,
    /// Delay between empty journal polls
    pub journal_poll_interval: Duration,
    /// Over-estimate of a rendition's size, for multi-part targets
    pub rendition_estimated_bytes: u64,
    /// Number of parts in a multi-part target
    pub rendition_part_count: u32,
    /// Validity of download links handed to the UI
    pub download_ttl: Duration,
    /// Lifetime of cached compute/storage clients
    pub handle_ttl: Duration,
    /// Folder holding uploaded source files
    pub source_prefix: String,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            presign_ttl: Duration::from_secs(600),     // 10 min
            activation_wait: Duration::from_secs(600), // 10 min
            journal_poll_interval: Duration::from_millis(2000),
            rendition_estimated_bytes: 100 * 1024 * 1024, // 100MB
            rendition_part_count: 50,
            download_ttl: Duration::from_secs(3600), // 60 min
            handle_ttl: Duration::from_secs(86_400), // 24 hours
            source_prefix: "source".to_string(),
        }
    }
}

/// Azure Blob Storage credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureCredentials {
    pub account: String,
    pub key: String,
    pub container: String,
}

/// Amazon S3 credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

/// The storage backend selected from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendConfig {
    Azure(AzureCredentials),
    S3(S3Credentials),
}

/// Credentials for the job-execution (activation log) backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCredentials {
    pub apihost: String,
    pub namespace: String,
    pub auth: String,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Compute service endpoint
    pub endpoint: String,
    /// Integration credential file (YAML or JSON)
    pub integration_file: Option<PathBuf>,
    /// Private key for JWT integrations
    pub private_key_file: Option<PathBuf>,
    /// API key override (defaults to the credential's client id)
    pub api_key: Option<String>,
    /// Azure credentials, when the full set is present
    pub azure: Option<AzureCredentials>,
    /// S3 credentials, when the full set is present
    pub s3: Option<S3Credentials>,
    /// Explicit storage backend choice ("azure" or "s3")
    pub storage_backend: Option<String>,
    /// Partially-set storage variables, reported when nothing is complete
    pub storage_hints: Vec<String>,
    /// Raw runtime credential inputs
    pub wsk_config_file: Option<PathBuf>,
    pub runtime_namespace: Option<String>,
    pub runtime_auth: Option<String>,
    pub runtime_apihost: String,
    /// Disables the dev token gate
    pub development: bool,
    /// Preferred listening port for a boundary layer
    pub port: u16,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Processing tunables
    pub processing: ProcessingSettings,
}

impl ResolvedConfig {
    /// Resolve configuration from a variable lookup and an optional parsed file
    pub fn from_lookup<F>(lookup: F, file: Option<(PathBuf, ConfigFile)>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let (config_file, file) = match file {
            Some((path, file)) => (Some(path), Some(file)),
            None => (None, None),
        };
        let processing_file = file
            .as_ref()
            .and_then(|f| f.processing.clone())
            .unwrap_or_default();
        let storage_file = file
            .as_ref()
            .and_then(|f| f.storage.clone())
            .unwrap_or_default();

        let defaults = ProcessingSettings::default();
        let processing = ProcessingSettings {
            presign_ttl: processing_file
                .presign_ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.presign_ttl),
            activation_wait: processing_file
                .activation_wait_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.activation_wait),
            journal_poll_interval: processing_file
                .journal_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.journal_poll_interval),
            rendition_estimated_bytes: processing_file
                .rendition_estimated_bytes
                .unwrap_or(defaults.rendition_estimated_bytes),
            rendition_part_count: processing_file
                .rendition_part_count
                .filter(|count| *count > 0)
                .unwrap_or(defaults.rendition_part_count),
            download_ttl: processing_file
                .download_ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_ttl),
            handle_ttl: processing_file
                .handle_ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.handle_ttl),
            source_prefix: storage_file
                .source_prefix
                .clone()
                .unwrap_or(defaults.source_prefix),
        };

        let azure = match (
            var("AZURE_STORAGE_ACCOUNT"),
            var("AZURE_STORAGE_KEY"),
            var("AZURE_STORAGE_CONTAINER_NAME"),
        ) {
            (Some(account), Some(key), Some(container)) => Some(AzureCredentials {
                account,
                key,
                container,
            }),
            _ => None,
        };

        let s3 = match (
            var("S3_BUCKET"),
            var("AWS_ACCESS_KEY_ID"),
            var("AWS_SECRET_ACCESS_KEY"),
        ) {
            (Some(bucket), Some(access_key_id), Some(secret_access_key)) => Some(S3Credentials {
                bucket,
                access_key_id,
                secret_access_key,
                region: var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            }),
            _ => None,
        };

        let storage_hints = [
            "AZURE_STORAGE_ACCOUNT",
            "AZURE_STORAGE_KEY",
            "AZURE_STORAGE_CONTAINER_NAME",
            "S3_BUCKET",
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
        ]
        .into_iter()
        .filter(|key| var(*key).is_some())
        .map(|key| key.to_string())
        .collect();

        // Newer variable names win over the older lower-case generation
        let runtime_namespace =
            var("AIO_RUNTIME_NAMESPACE").or_else(|| var("AIO_runtime_namespace"));
        let runtime_auth = var("AIO_RUNTIME_AUTH").or_else(|| var("AIO_runtime_auth"));

        Self {
            endpoint: var("ASSET_COMPUTE_URL").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            integration_file: var("ASSET_COMPUTE_INTEGRATION_FILE_PATH").map(PathBuf::from),
            private_key_file: var("ASSET_COMPUTE_PRIVATE_KEY_FILE_PATH").map(PathBuf::from),
            api_key: var("DEV_TOOL_API_KEY"),
            azure,
            s3,
            storage_backend: var("DEVTOOL_STORAGE_BACKEND").or(storage_file.backend),
            storage_hints,
            wsk_config_file: var("WSK_CONFIG_FILE").map(PathBuf::from),
            runtime_namespace,
            runtime_auth,
            runtime_apihost: var("AIO_RUNTIME_APIHOST")
                .unwrap_or_else(|| DEFAULT_RUNTIME_APIHOST.to_string()),
            development: var("ASSET_COMPUTE_DEV_TOOL_ENV").as_deref() == Some(DEVELOPMENT_ENV),
            port: var("ASSET_COMPUTE_DEV_PORT")
                .and_then(|port| port.parse().ok())
                .unwrap_or(9000),
            config_file,
            processing,
        }
    }

    /// Select the storage backend.
    ///
    /// Fails when neither credential set is complete, and when both are
    /// complete without an explicit `DEVTOOL_STORAGE_BACKEND` choice.
    pub fn storage_backend(&self) -> Result<StorageBackendConfig, DevToolError> {
        match (&self.azure, &self.s3, self.storage_backend.as_deref()) {
            (Some(azure), _, Some("azure")) => Ok(StorageBackendConfig::Azure(azure.clone())),
            (_, Some(s3), Some("s3")) => Ok(StorageBackendConfig::S3(s3.clone())),
            (_, _, Some(choice)) if choice != "azure" && choice != "s3" => {
                Err(DevToolError::StorageConfig(format!(
                    "Unknown storage backend '{}', expected 'azure' or 's3'",
                    choice
                )))
            }
            (_, _, Some(choice)) => Err(DevToolError::StorageConfig(format!(
                "Storage backend '{}' selected but its credentials are incomplete",
                choice
            ))),
            (Some(_), Some(_), None) => Err(DevToolError::StorageConfig(
                "Both Azure and AWS storage credentials are set; set DEVTOOL_STORAGE_BACKEND to 'azure' or 's3'"
                    .to_string(),
            )),
            (Some(azure), None, None) => Ok(StorageBackendConfig::Azure(azure.clone())),
            (None, Some(s3), None) => Ok(StorageBackendConfig::S3(s3.clone())),
            (None, None, None) => {
                let mut message = "Neither AWS nor Azure cloud storage credentials were provided, please set credentials up for either AWS or Azure".to_string();
                if !self.storage_hints.is_empty() {
                    message.push_str(&format!(
                        " (incomplete set: {})",
                        self.storage_hints.join(", ")
                    ));
                }
                Err(DevToolError::StorageConfig(message))
            }
        }
    }

    /// Resolve credentials for the activation log backend.
    ///
    /// A `WSK_CONFIG_FILE` (lines `NAMESPACE=...` and `AUTH=...`) wins over
    /// the runtime environment variables.
    pub fn runtime_credentials(&self) -> Result<RuntimeCredentials, DevToolError> {
        let (namespace, auth) = if let Some(ref path) = self.wsk_config_file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                DevToolError::Config(format!(
                    "Failed to read WSK_CONFIG_FILE {}: {}",
                    path.display(),
                    e
                ))
            })?;
            parse_wsk_properties(&content)
        } else {
            (self.runtime_namespace.clone(), self.runtime_auth.clone())
        };

        match (namespace, auth) {
            (Some(namespace), Some(auth)) => Ok(RuntimeCredentials {
                apihost: self.runtime_apihost.clone(),
                namespace,
                auth,
            }),
            _ => Err(DevToolError::Config(
                "Runtime namespace and auth are required to fetch activation logs (set AIO_RUNTIME_NAMESPACE and AIO_RUNTIME_AUTH, or WSK_CONFIG_FILE)"
                    .to_string(),
            )),
        }
    }

    /// Integration file to use for compute credentials.
    ///
    /// Falls back to `console.json` in the working directory when a private
    /// key path is configured.
    pub fn integration_file_path(&self) -> Option<PathBuf> {
        if let Some(ref path) = self.integration_file {
            return Some(path.clone());
        }
        let console = std::env::current_dir().ok()?.join("console.json");
        if self.private_key_file.is_some() && console.exists() {
            Some(console)
        } else {
            None
        }
    }
}

/// Parse `NAMESPACE=` and `AUTH=` lines of a wskprops file
fn parse_wsk_properties(content: &str) -> (Option<String>, Option<String>) {
    let mut namespace = None;
    let mut auth = None;
    for line in content.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("NAMESPACE=") {
            namespace = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("AUTH=") {
            auth = Some(value.trim().to_string());
        }
    }
    (namespace, auth)
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".devtool").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let user_config = dirs::config_dir()?.join("asset-devtool").join("config.yaml");
    user_config.exists().then_some(user_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let file = match find_config_file() {
        Some(path) => {
            let parsed = load_config_file(&path)?;
            Some((path, parsed))
        }
        None => None,
    };

    Ok(ResolvedConfig::from_lookup(|key| std::env::var(key).ok(), file))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
