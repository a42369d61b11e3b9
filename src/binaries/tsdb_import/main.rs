use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use influxdb_transfer::format::binary::reader::Reader;
use influxdb_transfer::import::Importer;
use influxdb_transfer::meta::RetentionPolicySpec;
use influxdb_transfer::server::Server;
use transfer_tools::flags;

/// Import a bulk transfer stream from standard input.
#[derive(Debug, Parser)]
#[clap(name = "tsdb_import", about, version)]
struct Args {
    /// Database name
    #[clap(long)]
    database: String,

    /// Retention policy name
    #[clap(long)]
    rp: String,

    /// Retention policy shard duration; must match the stream header when
    /// given
    #[clap(long)]
    shard_duration: Option<String>,

    /// Build the on-disk TSI index per shard
    #[clap(long)]
    build_tsi: bool,

    /// Enable replacing an existing retention policy
    #[clap(long)]
    replace: bool,

    /// Drop the database before importing
    #[clap(long)]
    drop: bool,

    /// Config file
    #[clap(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let server = Server::open(args.config.as_deref()).await?;

    let mut reader = Reader::new(tokio::io::stdin());
    let header = reader.read_header().await?;

    if let Some(flag) = &args.shard_duration {
        let flag = flags::parse_duration(flag)?;
        if flag != header.shard_duration {
            anyhow::bail!(
                "config invalid: -shard-duration {} does not match the stream's {}",
                flag,
                header.shard_duration
            );
        }
    }

    let mut importer = Importer::new(
        server.meta_client(),
        &args.database,
        server.data_dir(),
        args.build_tsi,
    );

    if args.drop {
        importer.drop_database().await?;
    }

    let spec = RetentionPolicySpec {
        name: args.rp.clone(),
        duration: None,
        shard_group_duration: header.shard_duration,
    };
    importer.create_database(&spec, args.replace).await?;

    let result = influxdb_transfer::import::run(&mut reader, &mut importer).await;
    let close_result = importer.close().await;
    result?;
    close_result?;
    Ok(())
}
