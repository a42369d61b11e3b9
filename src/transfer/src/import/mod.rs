//! Importer: consumes a binary transfer stream and materializes on-disk
//! shards, the series file and retention-policy metadata.

pub mod series_writer;
pub mod shard_writer;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::engine::tsm1::value::Values;
use crate::error::{Error, Result};
use crate::format::binary::reader::Reader;
use crate::models;
use crate::import::series_writer::SeriesWriter;
use crate::import::shard_writer::{shard_path, ShardWriter};
use crate::meta::{MetaClient, RetentionPolicyInfo, RetentionPolicySpec, RetentionPolicyUpdate};
use crate::series::series_file::SERIES_FILE_DIRECTORY;
use crate::series::SeriesFile;

pub struct Importer {
    meta: Arc<dyn MetaClient>,
    db: String,
    data_dir: PathBuf,
    build_tsi: bool,

    rpi: Option<RetentionPolicyInfo>,
    sh: Option<ShardWriter>,
    sfile: Option<Arc<Mutex<SeriesFile>>>,
    sw: Option<SeriesWriter>,
    close_err: Option<Error>,
}

impl Importer {
    pub fn new(
        meta: Arc<dyn MetaClient>,
        db: &str,
        data_dir: impl Into<PathBuf>,
        build_tsi: bool,
    ) -> Self {
        Self {
            meta,
            db: db.to_string(),
            data_dir: data_dir.into(),
            build_tsi,
            rpi: None,
            sh: None,
            sfile: None,
            sw: None,
            close_err: None,
        }
    }

    /// drop_database removes the database from the meta store and deletes
    /// its on-disk directory.  Invoked before create_database when the
    /// caller asked for a clean slate.
    pub async fn drop_database(&mut self) -> Result<()> {
        self.meta.drop_database(&self.db).await?;
        let dir = self.data_dir.join(&self.db);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(database = %self.db, "dropped database");
        Ok(())
    }

    /// create_database creates or reconciles the target database and
    /// retention policy.  With replace, a policy whose durations differ has
    /// its shard groups deleted and its durations updated; without, the
    /// conflict surfaces as DuplicateRetentionPolicy.
    pub async fn create_database(&mut self, rp: &RetentionPolicySpec, replace: bool) -> Result<()> {
        let db_info = self.meta.database(&self.db).await?;
        if db_info.is_none() {
            return self.create_database_with_retention_policy(rp).await;
        }

        let rpi = self.meta.retention_policy(&self.db, &rp.name).await?;
        let update_rp = rpi.as_ref().map_or(false, |rpi| {
            replace
                && (rp.duration.map_or(false, |d| d != rpi.duration)
                    || rpi.shard_group_duration != rp.shard_group_duration)
        });

        if update_rp {
            self.update_retention_policy(rpi.as_ref().unwrap(), rp).await?;
        } else {
            self.meta.create_retention_policy(&self.db, rp, false).await?;
        }

        self.create_database_with_retention_policy(rp).await
    }

    async fn update_retention_policy(
        &self,
        old: &RetentionPolicyInfo,
        new: &RetentionPolicySpec,
    ) -> Result<()> {
        for group in &old.shard_groups {
            self.meta
                .delete_shard_group(&self.db, &new.name, group.id)
                .await?;
        }
        warn!(
            database = %self.db,
            rp = %new.name,
            groups = old.shard_groups.len(),
            "replacing retention policy"
        );

        let update = RetentionPolicyUpdate {
            duration: new.duration,
            shard_group_duration: Some(new.shard_group_duration),
        };
        self.meta
            .update_retention_policy(&self.db, &new.name, &update, false)
            .await
    }

    async fn create_database_with_retention_policy(
        &mut self,
        rp: &RetentionPolicySpec,
    ) -> Result<()> {
        let db_info = if rp.name.is_empty() {
            self.meta.create_database(&self.db).await?
        } else {
            self.meta
                .create_database_with_retention_policy(&self.db, rp)
                .await?
        };
        self.rpi = db_info.retention_policy(&rp.name).cloned();
        Ok(())
    }

    /// start_shard_group opens the bucket [start, end): creates the shard
    /// group and its directory, the shard writer and the series writer.
    pub async fn start_shard_group(&mut self, start: i64, end: i64) -> Result<()> {
        let rpi_name = self
            .rpi
            .as_ref()
            .map(|rpi| rpi.name.clone())
            .ok_or_else(|| Error::Meta("create_database must run before the first bucket".into()))?;

        // Re-read the policy: replace may have deleted groups since.
        let rpi = self
            .meta
            .retention_policy(&self.db, &rpi_name)
            .await?
            .ok_or_else(|| Error::Meta(format!("retention policy {} vanished", rpi_name)))?;
        if rpi.shard_group_by_timestamp(start).is_some() {
            return Err(Error::ShardExists(start));
        }
        self.rpi = Some(rpi);

        let group = self.meta.create_shard_group(&self.db, &rpi_name, start).await?;
        let shard_id = group.shards[0].id;

        let dir = shard_path(&self.data_dir, &self.db, &rpi_name, shard_id);
        tokio::fs::create_dir_all(&dir).await?;
        info!(
            database = %self.db,
            rp = %rpi_name,
            shard = shard_id,
            start,
            end,
            "starting shard group"
        );

        self.sh = Some(ShardWriter::new(shard_id, &dir));
        self.start_series_file(&dir).await?;
        Ok(())
    }

    /// start_series_file opens the shared series file lazily, once per
    /// bucket, and binds a series writer to the new shard.
    async fn start_series_file(&mut self, shard_dir: &std::path::Path) -> Result<()> {
        let sfile_dir = self.data_dir.join(&self.db).join(SERIES_FILE_DIRECTORY);
        let sfile = Arc::new(Mutex::new(SeriesFile::open(sfile_dir).await?));

        let sw = if self.build_tsi {
            SeriesWriter::tsi(Arc::clone(&sfile), shard_dir).await?
        } else {
            SeriesWriter::in_mem(Arc::clone(&sfile))
        };

        self.sfile = Some(sfile);
        self.sw = Some(sw);
        Ok(())
    }

    /// add_series registers the composite key's series with the series
    /// writer.
    pub async fn add_series(&mut self, composite_key: &[u8]) -> Result<()> {
        let sw = self
            .sw
            .as_mut()
            .ok_or_else(|| Error::Meta("importer not currently writing a shard".into()))?;
        sw.add_series(composite_key).await
    }

    /// write forwards a typed batch to the shard writer.
    pub async fn write(&mut self, composite_key: &[u8], values: Values) -> Result<()> {
        let sh = self
            .sh
            .as_mut()
            .ok_or_else(|| Error::Meta("importer not currently writing a shard".into()))?;
        sh.write(composite_key, values).await
    }

    /// close_shard_group seals the bucket.  The series writer and series
    /// file are closed before the shard writer publishes its files, so the
    /// series data is always durable first.  Both closes are attempted; the
    /// first error wins.
    pub async fn close_shard_group(&mut self) -> Result<()> {
        let mut first_err: Option<Error> = None;

        if let Some(mut sw) = self.sw.take() {
            if let Err(e) = sw.close().await {
                first_err.get_or_insert(e);
            }
        }
        if let Some(sfile) = self.sfile.take() {
            if let Err(e) = sfile.lock().await.close().await {
                first_err.get_or_insert(e);
            }
        }
        if let Some(mut sh) = self.sh.take() {
            if first_err.is_some() {
                sh.abort().await;
            } else if let Err(e) = sh.close().await {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// abort_shard_group tears down the active bucket after a fatal error,
    /// deleting the partially-written shard directory.
    pub async fn abort_shard_group(&mut self) {
        self.sw.take();
        self.sfile.take();
        let Some(mut sh) = self.sh.take() else {
            return;
        };
        sh.abort().await;

        if let Some(rpi) = &self.rpi {
            let dir = shard_path(&self.data_dir, &self.db, &rpi.name, sh.id());
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!(dir = %dir.display(), error = %e, "failed to remove aborted shard dir");
            }
        }
    }

    /// close is idempotent; an open bucket is sealed and the first close
    /// status is reported on every later call.
    pub async fn close(&mut self) -> Result<()> {
        if self.sh.is_none() && self.sw.is_none() && self.sfile.is_none() {
            return match &self.close_err {
                Some(e) => Err(e.clone_shallow()),
                None => Ok(()),
            };
        }
        let result = self.close_shard_group().await;
        if let Err(e) = &result {
            self.close_err = Some(e.clone_shallow());
        }
        result
    }
}

/// run drives a binary stream whose file header has already been consumed
/// into the importer, bucket by bucket.  On a mid-bucket error the partially
/// written shard directory is deleted before the error surfaces.
pub async fn run<R: AsyncRead + Unpin + Send>(
    reader: &mut Reader<R>,
    importer: &mut Importer,
) -> Result<()> {
    while let Some(bucket) = reader.next_bucket().await? {
        if let Err(e) = import_shard(reader, importer, bucket.start, bucket.end).await {
            importer.abort_shard_group().await;
            return Err(e);
        }
    }
    Ok(())
}

async fn import_shard<R: AsyncRead + Unpin + Send>(
    reader: &mut Reader<R>,
    importer: &mut Importer,
    start: i64,
    end: i64,
) -> Result<()> {
    importer.start_shard_group(start, end).await?;

    while let Some(series) = reader.next_series().await? {
        let key = models::composite_key(&series.series_key, &series.field);
        importer.add_series(&key).await?;

        let mut points = reader.points(series.field_type);
        while let Some(batch) = points.try_next().await? {
            importer.write(&key, batch).await?;
        }
    }

    importer.close_shard_group().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Importer;
    use crate::engine::tsm1::value::{Value, Values};
    use crate::error::Error;
    use crate::meta::fs::FsMetaClient;
    use crate::meta::{MetaClient, RetentionPolicySpec};

    const HOUR: i64 = 3_600_000_000_000;

    fn spec(sgd: i64) -> RetentionPolicySpec {
        RetentionPolicySpec {
            name: "rp0".to_string(),
            duration: None,
            shard_group_duration: sgd,
        }
    }

    async fn importer(dir: &std::path::Path, build_tsi: bool) -> Importer {
        let meta = Arc::new(FsMetaClient::open(dir.join("meta.json")).await.unwrap());
        Importer::new(meta, "db0", dir.join("data"), build_tsi)
    }

    #[tokio::test]
    async fn test_full_bucket_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut i = importer(dir.path(), true).await;

        i.create_database(&spec(HOUR), false).await.unwrap();
        i.start_shard_group(0, HOUR).await.unwrap();
        i.add_series(b"cpu,host=a\xffvalue").await.unwrap();
        i.write(
            b"cpu,host=a\xffvalue",
            Values::Integer(vec![Value::new(1, 1), Value::new(2, 2)]),
        )
        .await
        .unwrap();
        i.close_shard_group().await.unwrap();
        i.close().await.unwrap();

        let shard_dir = dir.path().join("data/db0/rp0/1");
        assert!(shard_dir.join("000000001-000000001.tsm").exists());
        assert!(shard_dir.join("index/L0-00000001.tsl").exists());
        assert!(dir.path().join("data/db0/_series/series.log").exists());
    }

    #[tokio::test]
    async fn test_start_existing_shard_group_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut i = importer(dir.path(), false).await;

        i.create_database(&spec(HOUR), false).await.unwrap();
        i.start_shard_group(0, HOUR).await.unwrap();
        i.close_shard_group().await.unwrap();

        let err = i.start_shard_group(0, HOUR).await.unwrap_err();
        assert!(matches!(err, Error::ShardExists(0)), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_replace_deletes_groups_and_updates_durations() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(FsMetaClient::open(dir.path().join("meta.json")).await.unwrap());

        // Existing policy: 1h groups, one of them populated.
        {
            let mut i = Importer::new(Arc::clone(&meta) as Arc<dyn MetaClient>, "db0", dir.path().join("data"), false);
            i.create_database(&spec(HOUR), false).await.unwrap();
            i.start_shard_group(0, HOUR).await.unwrap();
            i.close_shard_group().await.unwrap();
        }

        // Without replace, a different shard duration conflicts.
        let mut i = Importer::new(Arc::clone(&meta) as Arc<dyn MetaClient>, "db0", dir.path().join("data"), false);
        let err = i.create_database(&spec(24 * HOUR), false).await.unwrap_err();
        assert!(
            matches!(err, Error::DuplicateRetentionPolicy(_)),
            "unexpected error: {}",
            err
        );

        // With replace, groups are deleted and the duration updated.
        i.create_database(&spec(24 * HOUR), true).await.unwrap();
        let rpi = meta.retention_policy("db0", "rp0").await.unwrap().unwrap();
        assert_eq!(rpi.shard_group_duration, 24 * HOUR);
        assert!(rpi.shard_groups.is_empty(), "groups survived replace");

        // The old bucket start is free again.
        i.start_shard_group(0, 24 * HOUR).await.unwrap();
        i.close_shard_group().await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_removes_shard_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut i = importer(dir.path(), false).await;

        i.create_database(&spec(HOUR), false).await.unwrap();
        i.start_shard_group(0, HOUR).await.unwrap();
        i.write(b"cpu\xffvalue", Values::Integer(vec![Value::new(1, 1)]))
            .await
            .unwrap();
        i.abort_shard_group().await;

        assert!(
            !dir.path().join("data/db0/rp0/1").exists(),
            "aborted shard dir survived"
        );
        i.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_without_bucket_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut i = importer(dir.path(), false).await;
        let err = i
            .write(b"cpu\xffvalue", Values::Integer(vec![Value::new(1, 1)]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not currently writing"));
    }
}
