use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:9100";

/// Server settings resolved from the optional TOML file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    path: Option<PathBuf>,
    data: RawConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
struct RawConfig {
    server: RawServer,
    log: RawLog,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
struct RawServer {
    listen: Option<String>,
    capacity_bytes: Option<usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
struct RawLog {
    filter: Option<String>,
}

impl ServerConfig {
    /// Loads `explicit`, or the default path when it exists. An explicit path
    /// that does not exist is an error.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let data = match explicit.as_ref() {
            Some(path) => read_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    let data = read_file(&path)?;
                    return Ok(Self {
                        path: Some(path),
                        data,
                    });
                }
                _ => RawConfig::default(),
            },
        };
        Ok(Self {
            path: explicit,
            data,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn listen(&self) -> &str {
        self.data.server.listen.as_deref().unwrap_or(DEFAULT_LISTEN)
    }

    pub fn capacity_bytes(&self) -> Option<usize> {
        self.data.server.capacity_bytes
    }

    pub fn log_filter(&self) -> Option<&str> {
        self.data.log.filter.as_deref()
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read server config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse server config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("farmem").join("server.toml"))
}
