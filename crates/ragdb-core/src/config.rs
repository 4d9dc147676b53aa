use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::retry::RetryConfig;
use crate::types::IndexConfig;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_DOCUMENTS_FOR_BM25: usize = 10_000;

/// Settings for a document store and the components around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_uri: String,
    pub embedding_dim: usize,
    pub max_batch_size: usize,
    /// 0 disables the ceiling.
    pub max_documents_for_bm25: usize,
    pub pool_size: usize,
    pub cache_capacity: usize,
    pub retry: RetryConfig,
    pub index: IndexConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_uri: "data/ragdb".to_string(),
            embedding_dim: 1536,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_documents_for_bm25: DEFAULT_MAX_DOCUMENTS_FOR_BM25,
            pool_size: 4,
            cache_capacity: 1000,
            retry: RetryConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(Error::InvalidConfig("embedding_dim must be positive".into()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig("max_batch_size must be positive".into()));
        }
        if self.pool_size == 0 {
            return Err(Error::InvalidConfig("pool_size must be positive".into()));
        }
        if self.db_uri.trim().is_empty() {
            return Err(Error::InvalidConfig("db_uri cannot be empty".into()));
        }
        Ok(())
    }

    /// The database URI with `~` and environment variables expanded.
    pub fn resolved_db_uri(&self) -> String {
        if self.db_uri.contains("://") {
            self.db_uri.clone()
        } else {
            expand_path(&self.db_uri).to_string_lossy().into_owned()
        }
    }
}

/// Layered configuration: defaults, `config.toml`, `config.<env>.toml`, then `APP_*` env vars.
pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(StoreConfig::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate the whole store configuration.
    pub fn store(&self) -> anyhow::Result<StoreConfig> {
        let cfg: StoreConfig = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read store config: {}", e))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
