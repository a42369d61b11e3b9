//! JSON-persisted meta store.  Every mutation rewrites `meta.json` through a
//! temporary file so a crash never leaves a half-written document.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::meta::{
    truncate_nanos, DatabaseInfo, MetaClient, RetentionPolicyInfo, RetentionPolicySpec,
    RetentionPolicyUpdate, ShardGroupInfo, ShardInfo,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetaData {
    databases: Vec<DatabaseInfo>,
    max_shard_group_id: u64,
    max_shard_id: u64,
}

pub struct FsMetaClient {
    path: PathBuf,
    data: Mutex<MetaData>,
}

impl FsMetaClient {
    /// open loads the store at path, starting empty if the file does not
    /// exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| Error::Meta(format!("parse {}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MetaData::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    async fn persist(&self, data: &MetaData) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let raw = serde_json::to_vec_pretty(data)
            .map_err(|e| Error::Meta(format!("encode meta: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn find_db<'a>(data: &'a mut MetaData, name: &str) -> Result<&'a mut DatabaseInfo> {
    data.databases
        .iter_mut()
        .find(|db| db.name == name)
        .ok_or_else(|| Error::DatabaseMissing(name.to_string()))
}

fn find_rp<'a>(db: &'a mut DatabaseInfo, name: &str) -> Result<&'a mut RetentionPolicyInfo> {
    let db_name = db.name.clone();
    db.retention_policies
        .iter_mut()
        .find(|rp| rp.name == name)
        .ok_or_else(|| Error::Meta(format!("retention policy {} not found on {}", name, db_name)))
}

fn rp_from_spec(spec: &RetentionPolicySpec) -> RetentionPolicyInfo {
    RetentionPolicyInfo {
        name: spec.name.clone(),
        duration: spec.duration.unwrap_or(0),
        shard_group_duration: spec.shard_group_duration,
        shard_groups: Vec::new(),
    }
}

#[async_trait]
impl MetaClient for FsMetaClient {
    async fn database(&self, name: &str) -> Result<Option<DatabaseInfo>> {
        let data = self.data.lock().await;
        Ok(data.databases.iter().find(|db| db.name == name).cloned())
    }

    async fn retention_policy(
        &self,
        db: &str,
        name: &str,
    ) -> Result<Option<RetentionPolicyInfo>> {
        let data = self.data.lock().await;
        let Some(db) = data.databases.iter().find(|d| d.name == db) else {
            return Err(Error::DatabaseMissing(db.to_string()));
        };
        Ok(db.retention_policy(name).cloned())
    }

    async fn create_database(&self, name: &str) -> Result<DatabaseInfo> {
        let mut data = self.data.lock().await;
        if let Some(db) = data.databases.iter().find(|db| db.name == name) {
            return Ok(db.clone());
        }
        let db = DatabaseInfo {
            name: name.to_string(),
            default_retention_policy: String::new(),
            retention_policies: Vec::new(),
        };
        data.databases.push(db.clone());
        self.persist(&data).await?;
        debug!(database = name, "created database");
        Ok(db)
    }

    async fn create_database_with_retention_policy(
        &self,
        name: &str,
        spec: &RetentionPolicySpec,
    ) -> Result<DatabaseInfo> {
        let mut data = self.data.lock().await;
        match data.databases.iter_mut().find(|db| db.name == name) {
            Some(db) => {
                if db.retention_policy(&spec.name).is_none() {
                    db.retention_policies.push(rp_from_spec(spec));
                    if db.default_retention_policy.is_empty() {
                        db.default_retention_policy = spec.name.clone();
                    }
                }
            }
            None => {
                data.databases.push(DatabaseInfo {
                    name: name.to_string(),
                    default_retention_policy: spec.name.clone(),
                    retention_policies: vec![rp_from_spec(spec)],
                });
            }
        }
        self.persist(&data).await?;
        debug!(database = name, rp = %spec.name, "created database with retention policy");
        Ok(data
            .databases
            .iter()
            .find(|db| db.name == name)
            .cloned()
            .unwrap())
    }

    async fn create_retention_policy(
        &self,
        db: &str,
        spec: &RetentionPolicySpec,
        make_default: bool,
    ) -> Result<RetentionPolicyInfo> {
        let mut data = self.data.lock().await;
        let dbi = find_db(&mut data, db)?;

        if let Some(rp) = dbi.retention_policy(&spec.name) {
            // Creating an identical policy is a no-op; a conflicting one is
            // an error the importer turns into a replace decision.
            if rp.duration == spec.duration.unwrap_or(rp.duration)
                && rp.shard_group_duration == spec.shard_group_duration
            {
                return Ok(rp.clone());
            }
            return Err(Error::DuplicateRetentionPolicy(spec.name.clone()));
        }

        let rp = rp_from_spec(spec);
        dbi.retention_policies.push(rp.clone());
        if make_default || dbi.default_retention_policy.is_empty() {
            dbi.default_retention_policy = spec.name.clone();
        }
        self.persist(&data).await?;
        Ok(rp)
    }

    async fn update_retention_policy(
        &self,
        db: &str,
        name: &str,
        update: &RetentionPolicyUpdate,
        make_default: bool,
    ) -> Result<()> {
        let mut data = self.data.lock().await;
        let dbi = find_db(&mut data, db)?;
        let rp = find_rp(dbi, name)?;
        if let Some(d) = update.duration {
            rp.duration = d;
        }
        if let Some(d) = update.shard_group_duration {
            rp.shard_group_duration = d;
        }
        if make_default {
            dbi.default_retention_policy = name.to_string();
        }
        self.persist(&data).await
    }

    async fn delete_shard_group(&self, db: &str, rp: &str, id: u64) -> Result<()> {
        let mut data = self.data.lock().await;
        let dbi = find_db(&mut data, db)?;
        let rpi = find_rp(dbi, rp)?;
        rpi.shard_groups.retain(|g| g.id != id);
        self.persist(&data).await
    }

    async fn create_shard_group(
        &self,
        db: &str,
        rp: &str,
        timestamp: i64,
    ) -> Result<ShardGroupInfo> {
        let mut data = self.data.lock().await;
        let group_id = data.max_shard_group_id + 1;
        let shard_id = data.max_shard_id + 1;

        let dbi = find_db(&mut data, db)?;
        let rpi = find_rp(dbi, rp)?;

        if let Some(g) = rpi.shard_group_by_timestamp(timestamp) {
            return Ok(g.clone());
        }

        let start = truncate_nanos(timestamp, rpi.shard_group_duration);
        let group = ShardGroupInfo {
            id: group_id,
            start_time: start,
            end_time: start + rpi.shard_group_duration,
            shards: vec![ShardInfo { id: shard_id }],
        };
        rpi.shard_groups.push(group.clone());
        rpi.shard_groups.sort_by_key(|g| g.start_time);

        data.max_shard_group_id = group_id;
        data.max_shard_id = shard_id;
        self.persist(&data).await?;
        debug!(database = db, rp, group = group_id, shard = shard_id, "created shard group");
        Ok(group)
    }

    async fn shard_groups_by_time_range(
        &self,
        db: &str,
        rp: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<ShardGroupInfo>> {
        let data = self.data.lock().await;
        let Some(dbi) = data.databases.iter().find(|d| d.name == db) else {
            return Err(Error::DatabaseMissing(db.to_string()));
        };
        let Some(rpi) = dbi.retention_policy(rp) else {
            return Err(Error::Meta(format!(
                "retention policy {} not found on {}",
                rp, db
            )));
        };
        let mut groups: Vec<_> = rpi
            .shard_groups
            .iter()
            .filter(|g| g.overlaps(min, max))
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.start_time);
        Ok(groups)
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        data.databases.retain(|db| db.name != name);
        self.persist(&data).await
    }
}
