//! TOML configuration for channel naming and the token service.
//!
//! ```toml
//! [naming]
//! strategy = "random"   # or "counter"
//! length = 10
//! prefix = "C"
//!
//! [token]
//! source = "http"       # or "static"
//! base_url = "https://agoraapi.vercel.app/token"
//! timeout_ms = 5000
//! static_prefix = "tok-"
//! ```

use std::path::{Path, PathBuf};
use std::{env, fs};

use prox_core::NamingStrategy;
use prox_core::constants::{DEFAULT_CHANNEL_NAME_LEN, DEFAULT_CHANNEL_PREFIX};
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

pub const CONFIG_FILE_NAME: &str = "prox.toml";
pub const DEFAULT_TOKEN_URL: &str = "https://agoraapi.vercel.app/token";
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_STATIC_PREFIX: &str = "tok-";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub naming: NamingConfig,
    pub token: TokenConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Random,
    Counter,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub strategy: StrategyKind,
    /// Name length for the random strategy.
    pub length: usize,
    /// Prefix for the counter strategy.
    pub prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Random,
            length: DEFAULT_CHANNEL_NAME_LEN,
            prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }
}

impl NamingConfig {
    pub fn strategy(&self) -> NamingStrategy {
        match self.strategy {
            StrategyKind::Random => NamingStrategy::Random {
                length: self.length.max(1),
            },
            StrategyKind::Counter => NamingStrategy::Counter {
                prefix: self.prefix.clone(),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Http,
    Static,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub source: SourceKind,
    pub base_url: String,
    pub timeout_ms: u64,
    pub static_prefix: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Http,
            base_url: DEFAULT_TOKEN_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            static_prefix: DEFAULT_STATIC_PREFIX.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pure helpers (no I/O)
// ---------------------------------------------------------------------------

/// Pick the config file location.
///
/// Priority chain:
/// 1. Explicit `--config` path
/// 2. `PROX_CONFIG`
/// 3. `$PROX_HOME/prox.toml`
/// 4. `<home>/.prox/prox.toml`
fn resolve_path(
    explicit: Option<&Path>,
    config_env: Option<String>,
    home_env: Option<String>,
    user_home: &Path,
) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Some(p) = config_env.filter(|s| !s.is_empty()) {
        return PathBuf::from(p);
    }
    if let Some(dir) = home_env.filter(|s| !s.is_empty()) {
        return PathBuf::from(dir).join(CONFIG_FILE_NAME);
    }
    user_home.join(".prox").join(CONFIG_FILE_NAME)
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Replace the token URL when `url` is set and non-empty.
    fn with_token_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            self.token.base_url = url;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// I/O wrappers
// ---------------------------------------------------------------------------

fn user_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Where [`Config::load`] looks when no explicit path is given.
pub fn default_config_path() -> PathBuf {
    resolve_path(
        None,
        env::var("PROX_CONFIG").ok(),
        env::var("PROX_HOME").ok(),
        &user_home(),
    )
}

impl Config {
    /// Load the effective configuration.
    ///
    /// A missing file at an implicit location yields defaults; an explicit
    /// path must exist. `PROX_TOKEN_URL` overrides `token.base_url` either way.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };
        let config = match fs::read_to_string(&path) {
            Ok(content) => {
                tracing::debug!("loaded config from {}", path.display());
                Self::from_toml_str(&content)?
            }
            Err(e) if explicit.is_none() && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config at {}, using defaults", path.display());
                Self::default()
            }
            Err(source) => return Err(LinkError::Io { path, source }),
        };
        Ok(config.with_token_url(env::var("PROX_TOKEN_URL").ok()))
    }
}
