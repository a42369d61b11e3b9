//! Server configuration: a small TOML document naming the data and meta
//! locations.  Flags on the binaries override file values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the on-disk shard layout.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Location of the persisted meta store.
    #[serde(default = "default_meta_path")]
    pub meta_path: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_meta_path() -> PathBuf {
    PathBuf::from("meta/meta.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            meta_path: default_meta_path(),
        }
    }
}

impl Config {
    /// load reads a config file; a missing explicit path is an error, no
    /// path at all yields the defaults.
    pub async fn load(path: Option<&Path>) -> Result<Config> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::ConfigInvalid(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&raw).map_err(|e| Error::ConfigInvalid(format!("{}: {}", path.display(), e)))
    }
}
