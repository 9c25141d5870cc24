//! Configuration file and environment overrides.
//!
//! The file is located in this order:
//!
//! 1. `--config <path>`
//! 2. `SEARCH_SYNC_CONFIG`
//! 3. `search-sync.toml` in the platform config directory
//!
//! A missing file in the platform directory is not an error; defaults apply.
//! After the file is read, `SEARCH_SYNC_HOSTS`, `SEARCH_SYNC_TIMEOUT`,
//! `SEARCH_SYNC_ENV` and `SEARCH_SYNC_DB` override it (`.env` files are
//! honoured).
//!
//! ```toml
//! environment = "production"
//!
//! [backend]
//! hosts = ["http://es-1:9200", "http://es-2:9200"]
//! timeout_secs = 2
//!
//! [database]
//! path = "app.db"
//!
//! [[index]]
//! name = "listing"
//! mappings_file = "mappings/listing.json"
//! [index.source]
//! table = "listings"
//! soft_delete_column = "is_deleted"
//! [[index.cascade]]
//! kind = "reindex"
//! entity = "listing_photo"
//! column = "listing_id"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::backend::HttpBackendConfig;
use crate::registry::{IndexDefinition, IndexRegistry, PipelineDefinition, RegistryError};
use crate::sync::CascadeRule;

pub const CONFIG_FILE_NAME: &str = "search-sync.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSection {
    pub hosts: Vec<String>,
    /// Availability probe timeout.
    pub timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            hosts: vec!["http://localhost:9200".to_string()],
            timeout_secs: 2,
            request_timeout_secs: 30,
            username: None,
            password: None,
        }
    }
}

impl BackendSection {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn http_config(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            hosts: self.hosts.clone(),
            connect_timeout: self.probe_timeout(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSection {
    pub table: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    pub soft_delete_column: Option<String>,
    /// Columns copied into the document; all columns when absent.
    pub fields: Option<Vec<String>>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSection {
    pub name: String,
    pub settings: Option<Value>,
    pub mappings: Option<Value>,
    pub settings_file: Option<PathBuf>,
    pub mappings_file: Option<PathBuf>,
    pub source: Option<SourceSection>,
    #[serde(default)]
    pub cascade: Vec<CascadeRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub processors: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub environment: String,
    pub backend: BackendSection,
    pub database: DatabaseSection,
    #[serde(rename = "index")]
    pub indexes: Vec<IndexSection>,
    #[serde(rename = "pipeline")]
    pub pipelines: Vec<PipelineSection>,
    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            backend: BackendSection::default(),
            database: DatabaseSection::default(),
            indexes: Vec::new(),
            pipelines: Vec::new(),
            base_dir: None,
        }
    }
}

/// `search-sync.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "search-sync", "search-sync")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

impl Config {
    /// Locate, read and override configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| dotenvy::var("SEARCH_SYNC_CONFIG").ok().map(PathBuf::from));
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("no configuration file found; using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        debug!(path = %path.display(), indexes = config.indexes.len(), "loaded configuration");
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(hosts) = dotenvy::var("SEARCH_SYNC_HOSTS") {
            let hosts: Vec<String> = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
            if hosts.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "SEARCH_SYNC_HOSTS",
                    message: "no hosts given".to_string(),
                });
            }
            self.backend.hosts = hosts;
        }
        if let Ok(timeout) = dotenvy::var("SEARCH_SYNC_TIMEOUT") {
            self.backend.timeout_secs =
                timeout
                    .trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                        key: "SEARCH_SYNC_TIMEOUT",
                        message: e.to_string(),
                    })?;
        }
        if let Ok(env) = dotenvy::var("SEARCH_SYNC_ENV") {
            self.environment = env;
        }
        if let Ok(db) = dotenvy::var("SEARCH_SYNC_DB") {
            self.database.path = Some(PathBuf::from(db));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database.path.as_deref().map(|p| self.resolve(p))
    }

    /// Build the registry; definitions that fail to load are skipped.
    pub fn registry(&self) -> IndexRegistry {
        let mut builder = IndexRegistry::builder();
        for section in &self.indexes {
            builder = builder.index_loader(&section.name, || self.index_definition(section));
        }
        for section in &self.pipelines {
            builder = builder.pipeline(PipelineDefinition::new(
                section.id.clone(),
                section.description.clone(),
                section.processors.clone(),
            ));
        }
        builder.build()
    }

    fn index_definition(&self, section: &IndexSection) -> Result<IndexDefinition, RegistryError> {
        let settings = self.document(&section.name, section.settings.as_ref(), section.settings_file.as_deref())?;
        let mappings = self.document(&section.name, section.mappings.as_ref(), section.mappings_file.as_deref())?;
        Ok(IndexDefinition::new(section.name.clone(), settings, mappings))
    }

    fn document(&self, name: &str, inline: Option<&Value>, file: Option<&Path>) -> Result<Value, RegistryError> {
        let load_err = |message: String| RegistryError::Load {
            name: name.to_string(),
            message,
        };
        match (inline, file) {
            (Some(_), Some(file)) => Err(load_err(format!(
                "both an inline document and {} were given",
                file.display()
            ))),
            (Some(value), None) => Ok(value.clone()),
            (None, Some(file)) => {
                let path = self.resolve(file);
                let text = fs::read_to_string(&path)
                    .map_err(|e| load_err(format!("{}: {e}", path.display())))?;
                serde_json::from_str(&text).map_err(|e| load_err(format!("{}: {e}", path.display())))
            }
            (None, None) => Ok(Value::Object(Default::default())),
        }
    }
}
