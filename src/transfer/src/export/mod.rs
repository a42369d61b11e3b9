//! Exporter: plans which shard groups feed which target buckets, then
//! drives a result set per bucket into a format writer.

use std::path::PathBuf;
use std::sync::Arc;

use common_base::point::{MAX_TIME, MIN_TIME};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::format::{self, write_bucket};
use crate::meta::{truncate_nanos, MetaClient, ShardGroupInfo};
use crate::storage::resultset::{ResultSet, ShardSeriesCursor};
use crate::storage::shard::ShardReader;
use crate::storage::ReadRequest;

pub struct ExporterConfig {
    pub database: String,
    /// Empty selects the database's default retention policy.
    pub rp: String,
    /// Target bucket width in nanoseconds.
    pub shard_duration: i64,
    /// Inclusive shard-id range to export.
    pub min_shard_id: u64,
    pub max_shard_id: u64,
    /// Time range to export, half-open on the metadata query.
    pub start_time: i64,
    pub end_time: i64,
    /// Maximum points per (series, field) per bucket; 0 is unlimited.
    pub limit: u64,
}

/// Bucket is one target interval and the source groups whose start falls in
/// it.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub start: i64,
    pub end: i64,
    pub groups: Vec<ShardGroupInfo>,
}

pub struct Exporter {
    meta: Arc<dyn MetaClient>,
    data_dir: PathBuf,
    cfg: ExporterConfig,

    rp: String,
    buckets: Vec<Bucket>,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("data_dir", &self.data_dir)
            .field("rp", &self.rp)
            .field("buckets", &self.buckets)
            .finish()
    }
}

impl Exporter {
    /// new validates the database and retention policy; `open` resolves the
    /// plan.
    pub async fn new(
        meta: Arc<dyn MetaClient>,
        data_dir: impl Into<PathBuf>,
        mut cfg: ExporterConfig,
    ) -> Result<Self> {
        cfg.start_time = cfg.start_time.max(MIN_TIME);
        cfg.end_time = cfg.end_time.min(MAX_TIME);
        if cfg.start_time > cfg.end_time {
            return Err(Error::ConfigInvalid("empty time range".into()));
        }
        if cfg.shard_duration <= 0 {
            return Err(Error::ConfigInvalid(
                "shard duration must be positive".into(),
            ));
        }
        if cfg.min_shard_id > cfg.max_shard_id {
            return Err(Error::ConfigInvalid("empty shard id range".into()));
        }

        let db = meta
            .database(&cfg.database)
            .await?
            .ok_or_else(|| Error::DatabaseMissing(cfg.database.clone()))?;

        let rp = if cfg.rp.is_empty() {
            if db.default_retention_policy.is_empty() {
                return Err(Error::ConfigInvalid(format!(
                    "database {} has no default retention policy",
                    cfg.database
                )));
            }
            db.default_retention_policy.clone()
        } else {
            cfg.rp.clone()
        };
        if db.retention_policy(&rp).is_none() {
            return Err(Error::ConfigInvalid(format!(
                "retention policy {} not found on {}",
                rp, cfg.database
            )));
        }

        Ok(Self {
            meta,
            data_dir: data_dir.into(),
            cfg,
            rp,
            buckets: Vec::new(),
        })
    }

    /// open resolves the shard groups in range, filters by shard id and
    /// partitions them into target-duration buckets.
    pub async fn open(&mut self) -> Result<()> {
        let groups = self
            .meta
            .shard_groups_by_time_range(
                &self.cfg.database,
                &self.rp,
                self.cfg.start_time,
                self.cfg.end_time,
            )
            .await?;

        let d = self.cfg.shard_duration;
        let mut buckets: Vec<Bucket> = Vec::new();
        for group in groups {
            if group.id < self.cfg.min_shard_id || group.id > self.cfg.max_shard_id {
                debug!(group = group.id, "group filtered by shard id range");
                continue;
            }
            let start = truncate_nanos(group.start_time, d);
            match buckets.last_mut() {
                Some(b) if b.start == start => b.groups.push(group),
                _ => buckets.push(Bucket {
                    start,
                    end: start + d,
                    groups: vec![group],
                }),
            }
        }
        self.buckets = buckets;
        Ok(())
    }

    pub fn rp(&self) -> &str {
        &self.rp
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// print_plan renders a human-readable summary of the plan.  A dry run
    /// never opens shard files.
    pub fn print_plan(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        writeln!(
            out,
            "Exporting {} bucket(s) of {} from {}.{}",
            self.buckets.len(),
            duration_string(self.cfg.shard_duration),
            self.cfg.database,
            self.rp
        )
        .unwrap();
        for b in &self.buckets {
            let shards: Vec<String> = b
                .groups
                .iter()
                .flat_map(|g| g.shards.iter().map(|s| s.id.to_string()))
                .collect();
            writeln!(
                out,
                "bucket [{}, {}) time [{} - {}] shards: {}",
                b.start,
                b.end,
                time_string(b.start),
                time_string(b.end - 1),
                shards.join(",")
            )
            .unwrap();
        }
        out
    }

    /// write_to streams every planned bucket into the writer.
    pub async fn write_to(
        &self,
        w: &mut dyn format::Writer,
        ctx: CancellationToken,
    ) -> Result<()> {
        for bucket in &self.buckets {
            if ctx.is_cancelled() {
                return Err(Error::Canceled);
            }

            let mut shards = Vec::new();
            for group in &bucket.groups {
                for shard in &group.shards {
                    let dir = self
                        .data_dir
                        .join(&self.cfg.database)
                        .join(&self.rp)
                        .join(shard.id.to_string());
                    shards.push(ShardReader::open(dir).await?);
                }
            }
            info!(
                start = bucket.start,
                end = bucket.end,
                shards = shards.len(),
                "exporting bucket"
            );

            let cur = ShardSeriesCursor::new(&shards)?;
            let req = ReadRequest {
                ctx: ctx.clone(),
                start: bucket.start,
                end: bucket.end,
                limit: self.cfg.limit,
            };
            let mut rs = ResultSet::new(req, Box::new(cur));
            write_bucket(w, bucket.start, bucket.end, &mut rs).await?;
        }

        if ctx.is_cancelled() {
            return Err(Error::Canceled);
        }
        w.close().await
    }
}

fn duration_string(ns: i64) -> String {
    let secs = ns / 1_000_000_000;
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ns", ns)
    }
}

fn time_string(ns: i64) -> String {
    match chrono::DateTime::from_timestamp(
        ns.div_euclid(1_000_000_000),
        ns.rem_euclid(1_000_000_000) as u32,
    ) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string(),
        None => ns.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Exporter, ExporterConfig};
    use crate::meta::fs::FsMetaClient;
    use crate::meta::{MetaClient, RetentionPolicySpec};

    const HOUR: i64 = 3_600_000_000_000;

    async fn seeded_meta(dir: &std::path::Path, sgd: i64, groups: usize) -> Arc<FsMetaClient> {
        let client = FsMetaClient::open(dir.join("meta.json")).await.unwrap();
        client
            .create_database_with_retention_policy(
                "db0",
                &RetentionPolicySpec {
                    name: "rp0".to_string(),
                    duration: None,
                    shard_group_duration: sgd,
                },
            )
            .await
            .unwrap();
        for i in 0..groups {
            client
                .create_shard_group("db0", "rp0", i as i64 * sgd)
                .await
                .unwrap();
        }
        Arc::new(client)
    }

    fn cfg(d: i64, min: u64, max: u64) -> ExporterConfig {
        ExporterConfig {
            database: "db0".to_string(),
            rp: String::new(),
            shard_duration: d,
            min_shard_id: min,
            max_shard_id: max,
            start_time: i64::MIN + 2,
            end_time: i64::MAX - 1,
            limit: 0,
        }
    }

    #[tokio::test]
    async fn test_plan_one_bucket_per_group() {
        let dir = tempfile::tempdir().unwrap();
        let meta = seeded_meta(dir.path(), 7 * 24 * HOUR, 2).await;

        let mut e = Exporter::new(meta, dir.path(), cfg(7 * 24 * HOUR, 0, u64::MAX))
            .await
            .unwrap();
        e.open().await.unwrap();

        let buckets = e.buckets();
        assert_eq!(buckets.len(), 2, "unexpected buckets: {:?}", buckets);
        assert_eq!(buckets[0].start, 0);
        assert_eq!(buckets[1].start, 604_800_000_000_000);
        assert_eq!(e.rp(), "rp0");
    }

    #[tokio::test]
    async fn test_plan_groups_coalesce_into_wider_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let meta = seeded_meta(dir.path(), HOUR, 30).await;

        let mut e = Exporter::new(meta, dir.path(), cfg(24 * HOUR, 0, u64::MAX))
            .await
            .unwrap();
        e.open().await.unwrap();

        let buckets = e.buckets();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].groups.len(), 24);
        assert_eq!(buckets[1].groups.len(), 6);
        assert_eq!(buckets[1].start, 24 * HOUR);
    }

    #[tokio::test]
    async fn test_plan_filters_shard_id_range() {
        let dir = tempfile::tempdir().unwrap();
        let meta = seeded_meta(dir.path(), HOUR, 6).await;

        let mut e = Exporter::new(meta, dir.path(), cfg(HOUR, 2, 5)).await.unwrap();
        e.open().await.unwrap();

        let ids: Vec<u64> = e
            .buckets()
            .iter()
            .flat_map(|b| b.groups.iter().map(|g| g.id))
            .collect();
        assert_eq!(ids, vec![2, 3, 4, 5], "unexpected group ids: {:?}", ids);
    }

    #[tokio::test]
    async fn test_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(FsMetaClient::open(dir.path().join("meta.json")).await.unwrap());
        let err = Exporter::new(meta, dir.path(), cfg(HOUR, 0, u64::MAX))
            .await
            .unwrap_err();
        assert!(
            matches!(err, crate::Error::DatabaseMissing(_)),
            "unexpected error: {}",
            err
        );
    }

    #[tokio::test]
    async fn test_print_plan_lists_shards() {
        let dir = tempfile::tempdir().unwrap();
        let meta = seeded_meta(dir.path(), HOUR, 2).await;
        let mut e = Exporter::new(meta, dir.path(), cfg(HOUR, 0, u64::MAX))
            .await
            .unwrap();
        e.open().await.unwrap();

        let plan = e.print_plan();
        assert!(plan.contains("2 bucket(s)"), "unexpected plan: {}", plan);
        assert!(plan.contains("shards: 1"), "unexpected plan: {}", plan);
    }
}
