//! End-to-end scenarios: export → binary stream → import → export.

mod common;

use common::{
    collect_stream, composite, export_cfg, shard_dir_count, Fixture, StreamBuilder, HOUR, WEEK,
};

use influxdb_transfer::engine::tsm1::value::{FieldType, Value, Values};
use influxdb_transfer::error::Error;
use influxdb_transfer::format::text;
use influxdb_transfer::meta::MetaClient;

#[tokio::test]
async fn test_s1_two_weekly_buckets() {
    let f = Fixture::new().await;
    f.seed(
        "db0",
        "rp0",
        WEEK,
        &[
            (
                0,
                vec![(
                    composite(b"cpu,host=a", b"value"),
                    Values::Integer(vec![Value::new(100, 1), Value::new(200, 2)]),
                )],
            ),
            (
                WEEK,
                vec![(
                    composite(b"cpu,host=a", b"value"),
                    Values::Integer(vec![Value::new(WEEK + 5, 3)]),
                )],
            ),
        ],
    )
    .await;

    let stream = f.export_binary("db0", "rp0", WEEK).await;
    assert_eq!(&stream[..4], &[0x49, 0x46, 0x4C, 0x58], "bad magic");

    let (buckets, series) = collect_stream(&stream).await;
    assert_eq!(buckets, vec![0, 604_800_000_000_000], "unexpected buckets");
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].0, b"cpu,host=a".to_vec());
    assert_eq!(series[0].1, b"value".to_vec());
}

#[tokio::test]
async fn test_s2_shard_id_range_filter() {
    let f = Fixture::new().await;

    // Six groups, group id i+1 holds the single value i.
    let key = composite(b"cpu", b"value");
    let seeded: Vec<(i64, Vec<(Vec<u8>, Values)>)> = (0..6)
        .map(|i| {
            (
                i as i64 * HOUR,
                vec![(
                    key.clone(),
                    Values::Integer(vec![Value::new(i as i64 * HOUR + 1, i)]),
                )],
            )
        })
        .collect();
    f.seed("db0", "rp0", HOUR, &seeded).await;

    let mut out = Vec::new();
    let mut w = influxdb_transfer::format::binary::writer::Writer::new(
        &mut out, "db0", "rp0", HOUR,
    );
    let mut cfg = export_cfg("db0", "rp0", HOUR);
    cfg.min_shard_id = 2;
    cfg.max_shard_id = 5;
    f.export_with(cfg, &mut w).await.unwrap();

    let (_, series) = collect_stream(&out).await;
    let mut got = Vec::new();
    for (_, _, values) in series {
        let Values::Integer(v) = values else { panic!("expected integers") };
        got.extend(v.into_iter().map(|x| x.value));
    }
    got.sort();
    assert_eq!(got, vec![1, 2, 3, 4], "groups 1 and 6 leaked into the export");
}

#[tokio::test]
async fn test_s3_values_format() {
    let f = Fixture::new().await;
    f.seed(
        "db0",
        "rp0",
        HOUR,
        &[(
            0,
            vec![(
                composite(b"cpu,host=a", b"value"),
                Values::Integer(vec![Value::new(100, 3)]),
            )],
        )],
    )
    .await;

    let mut out = Vec::new();
    let mut w = text::Writer::new(&mut out, text::Mode::Values);
    f.export_with(export_cfg("db0", "rp0", HOUR), &mut w)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "3i 100\n");
}

#[tokio::test]
async fn test_series_format_suppresses_points() {
    let f = Fixture::new().await;
    f.seed(
        "db0",
        "rp0",
        HOUR,
        &[(
            0,
            vec![
                (
                    composite(b"cpu,host=a", b"value"),
                    Values::Integer(vec![Value::new(100, 3)]),
                ),
                (
                    composite(b"mem", b"used"),
                    Values::Float(vec![Value::new(7, 0.5)]),
                ),
            ],
        )],
    )
    .await;

    let mut out = Vec::new();
    let mut w = text::Writer::new(&mut out, text::Mode::Series);
    f.export_with(export_cfg("db0", "rp0", HOUR), &mut w)
        .await
        .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "cpu,host=a value\nmem used\n"
    );
}

#[tokio::test]
async fn test_s4_replace_updates_shard_duration() {
    let f = Fixture::new().await;

    // Destination: an existing policy with 1h groups.
    f.seed(
        "dst",
        "rp0",
        HOUR,
        &[(
            0,
            vec![(
                composite(b"old", b"value"),
                Values::Integer(vec![Value::new(1, 1)]),
            )],
        )],
    )
    .await;

    // Source stream declares 24h buckets.
    f.seed(
        "src",
        "rp0",
        24 * HOUR,
        &[(
            0,
            vec![(
                composite(b"cpu", b"value"),
                Values::Integer(vec![Value::new(5, 5)]),
            )],
        )],
    )
    .await;
    let stream = f.export_binary("src", "rp0", 24 * HOUR).await;

    // Without replace the durations conflict.
    let err = f.import_binary("dst", "rp0", &stream, false).await.unwrap_err();
    assert!(
        matches!(err, Error::DuplicateRetentionPolicy(_)),
        "unexpected error: {}",
        err
    );

    f.import_binary("dst", "rp0", &stream, true).await.unwrap();
    let rpi = f.meta.retention_policy("dst", "rp0").await.unwrap().unwrap();
    assert_eq!(rpi.shard_group_duration, 24 * HOUR);
    assert_eq!(rpi.shard_groups.len(), 1, "old groups survived the replace");
    assert_eq!(rpi.shard_groups[0].start_time, 0);
}

#[tokio::test]
async fn test_s5_truncated_point_batch() {
    let f = Fixture::new().await;

    // A batch that claims 100 points but is cut off mid-encoding.
    let values = Values::Integer((0..100).map(|i| Value::new(i, i)).collect());
    let stream = StreamBuilder::new()
        .magic()
        .file_header("db0", "rp0", HOUR)
        .bucket_header(0, HOUR)
        .series_header(b"cpu", b"value", FieldType::Integer.as_u8())
        .points(4, &values)
        .bucket_footer()
        .build();
    let truncated = &stream[..stream.len() - 40];

    let err = f
        .import_binary("db0", "rp0", truncated, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnexpectedEof), "unexpected error: {}", err);

    // The aborted bucket left no shard directory behind.
    assert_eq!(shard_dir_count(&f.rp_dir("db0", "rp0")), 0);
}

#[tokio::test]
async fn test_s6_duplicate_timestamp_last_writer_wins() {
    let f = Fixture::new().await;

    let stream = StreamBuilder::new()
        .magic()
        .file_header("db0", "rp0", HOUR)
        .bucket_header(0, HOUR)
        .series_header(b"cpu", b"value", FieldType::Integer.as_u8())
        .points(4, &Values::Integer(vec![Value::new(100, 3)]))
        .points(4, &Values::Integer(vec![Value::new(100, 4)]))
        .bucket_footer()
        .build();

    f.import_binary("db0", "rp0", &stream, false).await.unwrap();

    let out = f.export_binary("db0", "rp0", HOUR).await;
    let (_, series) = collect_stream(&out).await;
    assert_eq!(series.len(), 1);
    assert_eq!(
        series[0].2,
        Values::Integer(vec![Value::new(100, 4)]),
        "second write did not win"
    );
}

#[tokio::test]
async fn test_unordered_input_detected() {
    let f = Fixture::new().await;

    let stream = StreamBuilder::new()
        .magic()
        .file_header("db0", "rp0", HOUR)
        .bucket_header(0, HOUR)
        .series_header(b"cpu", b"value", FieldType::Integer.as_u8())
        .points(4, &Values::Integer(vec![Value::new(100, 1)]))
        .points(4, &Values::Integer(vec![Value::new(50, 2)]))
        .bucket_footer()
        .build();

    let err = f.import_binary("db0", "rp0", &stream, false).await.unwrap_err();
    assert!(
        matches!(err, Error::UnorderedInput { ts: 50, last: 100, .. }),
        "unexpected error: {}",
        err
    );
    assert_eq!(shard_dir_count(&f.rp_dir("db0", "rp0")), 0);
}

#[tokio::test]
async fn test_type_mismatch_mid_series() {
    let f = Fixture::new().await;

    let stream = StreamBuilder::new()
        .magic()
        .file_header("db0", "rp0", HOUR)
        .bucket_header(0, HOUR)
        .series_header(b"cpu", b"value", FieldType::Integer.as_u8())
        .points(5, &Values::Float(vec![Value::new(1, 1.0)]))
        .bucket_footer()
        .build();

    let err = f.import_binary("db0", "rp0", &stream, false).await.unwrap_err();
    assert!(
        matches!(err, Error::TypeMismatch { expected: "integer", got: "float" }),
        "unexpected error: {}",
        err
    );
}

#[tokio::test]
async fn test_unknown_tag_mid_bucket() {
    let f = Fixture::new().await;

    let stream = StreamBuilder::new()
        .magic()
        .file_header("db0", "rp0", HOUR)
        .bucket_header(0, HOUR)
        .frame(42, b"junk")
        .bucket_footer()
        .build();

    let err = f.import_binary("db0", "rp0", &stream, false).await.unwrap_err();
    assert!(matches!(err, Error::CorruptFrame(_)), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_bucket_width_must_match_header() {
    let f = Fixture::new().await;

    let stream = StreamBuilder::new()
        .magic()
        .file_header("db0", "rp0", HOUR)
        .bucket_header(0, 2 * HOUR)
        .bucket_footer()
        .build();

    let err = f.import_binary("db0", "rp0", &stream, false).await.unwrap_err();
    assert!(matches!(err, Error::CorruptFrame(_)), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_full_round_trip_is_stable() {
    let f = Fixture::new().await;
    f.seed(
        "src",
        "rp0",
        HOUR,
        &[
            (
                0,
                vec![
                    (
                        composite(b"cpu,host=a,region=west", b"usage"),
                        Values::Float(vec![
                            Value::new(10, 0.5),
                            Value::new(20, 1.25),
                            Value::new(30, -4.0),
                        ]),
                    ),
                    (
                        composite(b"cpu,host=a,region=west", b"count"),
                        Values::Unsigned(vec![Value::new(10, u64::MAX), Value::new(25, 0)]),
                    ),
                    (
                        composite(b"events", b"message"),
                        Values::String(vec![
                            Value::new(5, b"hello world".to_vec()),
                            Value::new(6, b"".to_vec()),
                        ]),
                    ),
                ],
            ),
            (
                HOUR,
                vec![(
                    composite(b"up", b"ok"),
                    Values::Boolean(vec![Value::new(HOUR + 1, true), Value::new(HOUR + 2, false)]),
                )],
            ),
        ],
    )
    .await;

    let first = f.export_binary("src", "rp0", HOUR).await;
    f.import_binary("dst", "rp0", &first, false).await.unwrap();
    let second = f.export_binary("dst", "rp0", HOUR).await;

    // Strip the file headers (they carry the database name) and compare the
    // bucket payloads byte for byte.
    let (b1, s1) = collect_stream(&first).await;
    let (b2, s2) = collect_stream(&second).await;
    assert_eq!(b1, b2, "bucket layout changed across the round trip");
    assert_eq!(s1, s2, "point data changed across the round trip");
    assert_eq!(&first[..4], &second[..4]);
}
