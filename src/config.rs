//! Layered configuration: defaults, then an optional TOML file, then the
//! environment and command line (clap resolves those two, flag over env).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::protocol::DEFAULT_PORT;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub storage_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_PORT),
            storage_dir: PathBuf::from("./attachments"),
        }
    }
}

impl ServerConfig {
    /// Defaults, overlaid with `path` when given. Keys missing from the file
    /// keep their default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let data = std::fs::read_to_string(path)?;
                Self::from_toml(&data).map_err(|source| Error::Config {
                    path: path.to_path_buf(),
                    source,
                })
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(data: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(data)
    }

    pub fn with_overrides(mut self, bind: Option<String>, storage_dir: Option<PathBuf>) -> Self {
        if let Some(bind) = bind {
            self.bind = bind;
        }
        if let Some(dir) = storage_dir {
            self.storage_dir = dir;
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub server: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", DEFAULT_PORT),
        }
    }
}

impl ClientConfig {
    pub fn with_server(server: Option<String>) -> Self {
        match server {
            Some(server) => Self { server },
            None => Self::default(),
        }
    }
}
