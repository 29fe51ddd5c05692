use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::router::RoutingPolicy;

pub const CONFIG_FILE: &str = "studylink.json";
pub const MICROSCOPY_EXTENSION: &str = "@ohif/extension-dicom-microscopy";
pub const LOCAL_CAPABILITY: &str = "localApi";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub routing: RoutingSection,
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub data_source: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RoutingSection {
    #[serde(default)]
    pub default_mode: Option<String>,
    #[serde(default)]
    pub specialized_mode: Option<String>,
    #[serde(default)]
    pub sentinel_modality: Option<String>,
    #[serde(default)]
    pub data_source_tag: Option<String>,
    #[serde(default)]
    pub duplicate_qualifying: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FetchSection {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BuildSection {
    #[serde(default)]
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub default_mode: String,
    pub policy: RoutingPolicy,
    pub extensions: Vec<String>,
    pub timeout: Option<Duration>,
    pub workers: usize,
    pub data_source: String,
}

impl ResolvedConfig {
    pub fn extension_available(&self) -> bool {
        self.extensions.iter().any(|ext| ext == MICROSCOPY_EXTENSION)
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config(Config::default())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; otherwise the first of `./studylink.json`
    /// and the user config file is used, falling back to built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, IngestError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };

        let Some(config_path) = config_path else {
            tracing::debug!("no config file found, using defaults");
            return Ok(Self::resolve_config(Config::default()));
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| IngestError::ConfigRead(config_path.clone()))?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %config_path.display(), "loaded config");
        Ok(Self::resolve_config(config))
    }

    pub fn parse(content: &str) -> Result<Config, IngestError> {
        serde_json::from_str(content).map_err(|err| IngestError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        let defaults = RoutingPolicy::default();
        let routing = config.routing;
        let policy = RoutingPolicy {
            specialized_mode: routing
                .specialized_mode
                .unwrap_or(defaults.specialized_mode),
            sentinel_modality: routing
                .sentinel_modality
                .unwrap_or(defaults.sentinel_modality),
            data_source_tag: routing.data_source_tag.unwrap_or(defaults.data_source_tag),
            duplicate_qualifying: routing
                .duplicate_qualifying
                .unwrap_or(defaults.duplicate_qualifying),
        };

        let timeout = match config.fetch.timeout_secs.unwrap_or(60) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            default_mode: routing
                .default_mode
                .unwrap_or_else(|| "viewer".to_string()),
            policy,
            extensions: config.extensions.unwrap_or_else(default_extensions),
            timeout,
            workers: config.build.workers.unwrap_or(1).max(1),
            data_source: config
                .data_source
                .unwrap_or_else(|| LOCAL_CAPABILITY.to_string()),
        }
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "studylink")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .filter(|path| path.exists())
    }
}

pub fn default_extensions() -> Vec<String> {
    vec![MICROSCOPY_EXTENSION.to_string()]
}
