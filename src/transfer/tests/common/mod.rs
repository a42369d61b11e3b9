//! Shared fixtures for the end-to-end tests: a seeded server, an in-memory
//! export, and a raw frame builder for crafting hostile streams.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use influxdb_transfer::engine::tsm1::codec::encode_points;
use influxdb_transfer::engine::tsm1::value::Values;
use influxdb_transfer::engine::tsm1::varint::append_uvarint;
use influxdb_transfer::export::{Exporter, ExporterConfig};
use influxdb_transfer::format::binary::writer::Writer as BinaryWriter;
use influxdb_transfer::format::{self};
use influxdb_transfer::import::Importer;
use influxdb_transfer::meta::fs::FsMetaClient;
use influxdb_transfer::meta::{MetaClient, RetentionPolicySpec};
use influxdb_transfer::models;

pub const HOUR: i64 = 3_600_000_000_000;
pub const WEEK: i64 = 7 * 24 * HOUR;

pub struct Fixture {
    pub meta: Arc<FsMetaClient>,
    pub data_dir: PathBuf,
    _dir: tempfile::TempDir,
}

impl Fixture {
    pub async fn new() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(
            FsMetaClient::open(dir.path().join("meta.json"))
                .await
                .unwrap(),
        );
        Fixture {
            meta,
            data_dir: dir.path().join("data"),
            _dir: dir,
        }
    }

    pub fn meta(&self) -> Arc<dyn MetaClient> {
        Arc::clone(&self.meta) as Arc<dyn MetaClient>
    }

    /// seed materializes one bucket per entry of `buckets` on `db`.`rp`.
    /// Each bucket is (start, series entries), each entry a composite key
    /// plus its points.
    pub async fn seed(
        &self,
        db: &str,
        rp: &str,
        sgd: i64,
        buckets: &[(i64, Vec<(Vec<u8>, Values)>)],
    ) {
        let mut importer = Importer::new(self.meta(), db, &self.data_dir, false);
        importer
            .create_database(
                &RetentionPolicySpec {
                    name: rp.to_string(),
                    duration: None,
                    shard_group_duration: sgd,
                },
                false,
            )
            .await
            .unwrap();

        for (start, series) in buckets {
            importer.start_shard_group(*start, start + sgd).await.unwrap();
            for (key, values) in series {
                importer.add_series(key).await.unwrap();
                importer.write(key, values.clone()).await.unwrap();
            }
            importer.close_shard_group().await.unwrap();
        }
        importer.close().await.unwrap();
    }

    pub async fn export_with(
        &self,
        cfg: ExporterConfig,
        w: &mut dyn format::Writer,
    ) -> influxdb_transfer::Result<()> {
        let mut exporter = Exporter::new(self.meta(), &self.data_dir, cfg).await?;
        exporter.open().await?;
        exporter.write_to(w, CancellationToken::new()).await
    }

    /// export_binary exports db.rp at the given target duration into bytes.
    pub async fn export_binary(&self, db: &str, rp: &str, duration: i64) -> Vec<u8> {
        let mut out = Vec::new();
        let mut w = BinaryWriter::new(&mut out, db, rp, duration);
        self.export_with(export_cfg(db, rp, duration), &mut w)
            .await
            .unwrap();
        out
    }

    /// import_binary feeds a stream into db.rp, returning the first error.
    pub async fn import_binary(
        &self,
        db: &str,
        rp: &str,
        stream: &[u8],
        replace: bool,
    ) -> influxdb_transfer::Result<()> {
        let mut reader = influxdb_transfer::format::binary::reader::Reader::new(stream);
        let header = reader.read_header().await?;

        let mut importer = Importer::new(self.meta(), db, &self.data_dir, false);
        importer
            .create_database(
                &RetentionPolicySpec {
                    name: rp.to_string(),
                    duration: None,
                    shard_group_duration: header.shard_duration,
                },
                replace,
            )
            .await?;

        let result = influxdb_transfer::import::run(&mut reader, &mut importer).await;
        let close_result = importer.close().await;
        result?;
        close_result
    }

    pub fn rp_dir(&self, db: &str, rp: &str) -> PathBuf {
        self.data_dir.join(db).join(rp)
    }
}

pub fn export_cfg(db: &str, rp: &str, duration: i64) -> ExporterConfig {
    ExporterConfig {
        database: db.to_string(),
        rp: rp.to_string(),
        shard_duration: duration,
        min_shard_id: 0,
        max_shard_id: u64::MAX,
        start_time: i64::MIN + 2,
        end_time: i64::MAX - 1,
        limit: 0,
    }
}

/// shard_dir_count counts the non-series directories under a retention
/// policy directory.
pub fn shard_dir_count(rp_dir: &Path) -> usize {
    match std::fs::read_dir(rp_dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()).count(),
        Err(_) => 0,
    }
}

/// StreamBuilder assembles raw wire bytes for hostile-input tests.
#[derive(Default)]
pub struct StreamBuilder {
    buf: Vec<u8>,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn magic(mut self) -> Self {
        self.buf.extend_from_slice(b"IFLX");
        self
    }

    pub fn frame(mut self, tag: u8, payload: &[u8]) -> Self {
        self.buf.push(tag);
        append_uvarint(&mut self.buf, payload.len() as u64);
        self.buf.extend_from_slice(payload);
        self
    }

    pub fn file_header(self, db: &str, rp: &str, shard_duration: i64) -> Self {
        let mut p = Vec::new();
        p.extend_from_slice(&1u32.to_be_bytes());
        append_uvarint(&mut p, db.len() as u64);
        p.extend_from_slice(db.as_bytes());
        append_uvarint(&mut p, rp.len() as u64);
        p.extend_from_slice(rp.as_bytes());
        p.extend_from_slice(&(shard_duration as u64).to_be_bytes());
        self.frame(1, &p)
    }

    pub fn bucket_header(self, start: i64, end: i64) -> Self {
        let mut p = Vec::new();
        p.extend_from_slice(&(start as u64).to_be_bytes());
        p.extend_from_slice(&(end as u64).to_be_bytes());
        self.frame(2, &p)
    }

    pub fn series_header(self, series_key: &[u8], field: &[u8], field_type: u8) -> Self {
        let mut p = vec![field_type];
        append_uvarint(&mut p, series_key.len() as u64);
        p.extend_from_slice(series_key);
        append_uvarint(&mut p, field.len() as u64);
        p.extend_from_slice(field);
        self.frame(3, &p)
    }

    pub fn points(self, tag: u8, values: &Values) -> Self {
        let mut p = Vec::new();
        append_uvarint(&mut p, values.len() as u64);
        encode_points(&mut p, values);
        self.frame(tag, &p)
    }

    pub fn bucket_footer(self) -> Self {
        self.frame(9, &[])
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// composite builds a composite key for test series.
pub fn composite(series_key: &[u8], field: &[u8]) -> Vec<u8> {
    models::composite_key(series_key, field)
}

/// collect_stream reads every point in a stream back into (series key,
/// field, values) tuples, checking frame-level invariants on the way.
pub async fn collect_stream(stream: &[u8]) -> (Vec<i64>, Vec<(Vec<u8>, Vec<u8>, Values)>) {
    let mut reader = influxdb_transfer::format::binary::reader::Reader::new(stream);
    let header = reader.read_header().await.unwrap();

    let mut bucket_starts = Vec::new();
    let mut series = Vec::new();
    while let Some(bucket) = reader.next_bucket().await.unwrap() {
        assert_eq!(
            bucket.end - bucket.start,
            header.shard_duration,
            "bucket width does not match the header"
        );
        bucket_starts.push(bucket.start);

        while let Some(sh) = reader.next_series().await.unwrap() {
            let mut all: Option<Values> = None;
            let mut points = reader.points(sh.field_type);
            while let Some(batch) = points.try_next().await.unwrap() {
                assert_eq!(
                    batch.field_type(),
                    sh.field_type,
                    "type drifted inside series"
                );
                match &mut all {
                    Some(v) => v.extend(batch).unwrap(),
                    None => all = Some(batch),
                }
            }
            if let Some(all) = all {
                series.push((sh.series_key.clone(), sh.field.clone(), all));
            }
        }
    }
    (bucket_starts, series)
}
