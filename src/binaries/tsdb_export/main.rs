use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use influxdb_transfer::export::{Exporter, ExporterConfig};
use influxdb_transfer::format::{self, binary, line, text};
use influxdb_transfer::server::Server;
use transfer_tools::flags;

/// Export a database's shard data as a bulk transfer stream.
#[derive(Debug, Parser)]
#[clap(name = "tsdb_export", about, version)]
struct Args {
    /// Database name
    #[clap(long)]
    database: String,

    /// Retention policy name (default: the database default)
    #[clap(long, default_value = "")]
    rp: String,

    /// Target shard duration
    #[clap(long, default_value = "168h")]
    duration: String,

    /// Range of target shards to export, e.g. 2-5 (default: all)
    #[clap(long)]
    range: Option<String>,

    /// Output format (line, binary, series, values, discard)
    #[clap(long, default_value = "line")]
    format: String,

    /// Lower time bound, RFC3339
    #[clap(long)]
    start: Option<String>,

    /// Upper time bound, RFC3339
    #[clap(long)]
    end: Option<String>,

    /// Print the plan to stdout and exit
    #[clap(long)]
    print: bool,

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
    match args.format.as_str() {
        "line" | "binary" | "series" | "values" | "discard" => {}
        other => anyhow::bail!("invalid format '{}'", other),
    }

    let shard_duration = flags::parse_duration(&args.duration)?;
    let (min_shard_id, max_shard_id) = match &args.range {
        Some(r) => flags::parse_range(r)?,
        None => (0, u64::MAX),
    };
    let start_time = match &args.start {
        Some(s) => flags::parse_time(s)?,
        None => common_base::point::MIN_TIME,
    };
    let end_time = match &args.end {
        Some(s) => flags::parse_time(s)?,
        None => common_base::point::MAX_TIME,
    };

    let server = Server::open(args.config.as_deref()).await?;
    let cfg = ExporterConfig {
        database: args.database.clone(),
        rp: args.rp.clone(),
        shard_duration,
        min_shard_id,
        max_shard_id,
        start_time,
        end_time,
        limit: 0,
    };
    let mut exporter = Exporter::new(server.meta_client(), server.data_dir(), cfg).await?;
    exporter.open().await?;

    if args.print {
        print!("{}", exporter.print_plan());
        return Ok(());
    }

    let ctx = CancellationToken::new();
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctx.cancel();
            }
        });
    }

    let stdout = tokio::io::stdout();
    let mut writer: Box<dyn format::Writer> = match args.format.as_str() {
        "binary" => Box::new(binary::writer::Writer::new(
            stdout,
            &args.database,
            exporter.rp(),
            shard_duration,
        )),
        "line" => Box::new(line::Writer::new(stdout)),
        "series" => Box::new(text::Writer::new(stdout, text::Mode::Series)),
        "values" => Box::new(text::Writer::new(stdout, text::Mode::Values)),
        _ => Box::new(format::Discard),
    };

    exporter.write_to(writer.as_mut(), ctx).await?;
    Ok(())
}
