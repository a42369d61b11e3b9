//! Server: the shared bootstrap both binaries go through.  Opens the config
//! and the meta client; hands out the data directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::meta::fs::FsMetaClient;
use crate::meta::MetaClient;

pub struct Server {
    config: Config,
    meta: Arc<FsMetaClient>,
}

impl Server {
    pub async fn open(config_path: Option<&Path>) -> Result<Server> {
        let config = Config::load(config_path).await?;
        let meta = Arc::new(FsMetaClient::open(&config.meta_path).await?);
        Ok(Server { config, meta })
    }

    pub fn meta_client(&self) -> Arc<dyn MetaClient> {
        Arc::clone(&self.meta) as Arc<dyn MetaClient>
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config.data_dir.clone()
    }
}
