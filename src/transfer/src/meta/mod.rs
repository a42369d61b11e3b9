//! Meta client: the opaque view of the server used by both the exporter and
//! the importer.  The trait mirrors the operations a cluster meta service
//! exposes; `fs` holds the local JSON-backed implementation the binaries run
//! against.

pub mod fs;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardInfo {
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardGroupInfo {
    pub id: u64,
    /// Half-open interval [start_time, end_time) in Unix nanoseconds.
    pub start_time: i64,
    pub end_time: i64,
    pub shards: Vec<ShardInfo>,
}

impl ShardGroupInfo {
    pub fn contains(&self, t: i64) -> bool {
        self.start_time <= t && t < self.end_time
    }

    pub fn overlaps(&self, min: i64, max: i64) -> bool {
        self.start_time <= max && min < self.end_time
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionPolicyInfo {
    pub name: String,
    /// Data lifetime in nanoseconds; 0 keeps data forever.
    pub duration: i64,
    /// Width of each shard group in nanoseconds.
    pub shard_group_duration: i64,
    pub shard_groups: Vec<ShardGroupInfo>,
}

impl RetentionPolicyInfo {
    pub fn shard_group_by_timestamp(&self, t: i64) -> Option<&ShardGroupInfo> {
        self.shard_groups.iter().find(|g| g.contains(t))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub default_retention_policy: String,
    pub retention_policies: Vec<RetentionPolicyInfo>,
}

impl DatabaseInfo {
    pub fn retention_policy(&self, name: &str) -> Option<&RetentionPolicyInfo> {
        self.retention_policies.iter().find(|rp| rp.name == name)
    }
}

/// RetentionPolicySpec is the creation request for a retention policy.
#[derive(Debug, Clone)]
pub struct RetentionPolicySpec {
    pub name: String,
    /// None leaves the duration at the server default (infinite).
    pub duration: Option<i64>,
    pub shard_group_duration: i64,
}

/// RetentionPolicyUpdate mutates an existing retention policy; None fields
/// are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicyUpdate {
    pub duration: Option<i64>,
    pub shard_group_duration: Option<i64>,
}

/// MetaClient is the server contract.  Implementations are externally safe
/// for concurrent use; operations may block on I/O.
#[async_trait]
pub trait MetaClient: Send + Sync {
    async fn database(&self, name: &str) -> Result<Option<DatabaseInfo>>;

    async fn retention_policy(&self, db: &str, name: &str)
        -> Result<Option<RetentionPolicyInfo>>;

    async fn create_database(&self, name: &str) -> Result<DatabaseInfo>;

    async fn create_database_with_retention_policy(
        &self,
        name: &str,
        spec: &RetentionPolicySpec,
    ) -> Result<DatabaseInfo>;

    async fn create_retention_policy(
        &self,
        db: &str,
        spec: &RetentionPolicySpec,
        make_default: bool,
    ) -> Result<RetentionPolicyInfo>;

    async fn update_retention_policy(
        &self,
        db: &str,
        name: &str,
        update: &RetentionPolicyUpdate,
        make_default: bool,
    ) -> Result<()>;

    async fn delete_shard_group(&self, db: &str, rp: &str, id: u64) -> Result<()>;

    async fn create_shard_group(&self, db: &str, rp: &str, timestamp: i64)
        -> Result<ShardGroupInfo>;

    /// shard_groups_by_time_range returns the groups owned by this node
    /// whose interval overlaps [min, max], ascending by start time.
    async fn shard_groups_by_time_range(
        &self,
        db: &str,
        rp: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<ShardGroupInfo>>;

    async fn drop_database(&self, name: &str) -> Result<()>;
}

/// truncate_nanos floors t to a multiple of d, correct for negative
/// timestamps.
pub fn truncate_nanos(t: i64, d: i64) -> i64 {
    t.div_euclid(d) * d
}
