//! Attribution job: rebuilds affiliate visits and visit → connect → payment
//! chains from the campaign event log and hands them to reporting.

use std::path::PathBuf;

use affiliate_attribution::{load_chains_and_visits, InMemoryEventStore, PgEventStore};
use affiliate_core::config::AppConfig;
use affiliate_core::JobOutput;
use affiliate_reporting::ChannelReport;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "attribution-job")]
#[command(about = "Rebuild affiliate visits and conversion chains from the campaign event log")]
#[command(version)]
struct Cli {
    /// Postgres connection string (overrides config)
    #[arg(long, global = true, env = "PG_CONNECTION")]
    database_url: Option<String>,

    /// Attribution window in days before the first payment (overrides config)
    #[arg(long, global = true)]
    window_days: Option<u32>,

    /// Maximum chain lookups in flight (overrides config)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the job and write visits and chains as JSON
    Run {
        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pretty-print the JSON
        #[arg(long, default_value_t = false)]
        pretty: bool,

        /// Replay a JSON array of events instead of querying Postgres
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Run the job and print per-channel visit and conversion totals
    Summary {
        /// Output format: csv, json
        #[arg(long, default_value = "csv", value_parser = ["csv", "json"])]
        format: String,

        /// Replay a JSON array of events instead of querying Postgres
        #[arg(long)]
        events: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attribution_job=info,affiliate_attribution=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(url) = cli.database_url {
        config.postgres.url = url;
    }
    if let Some(days) = cli.window_days {
        config.attribution.window_days = days;
    }
    if let Some(concurrency) = cli.concurrency {
        config.attribution.max_concurrent_lookups = concurrency;
    }

    info!(
        window_days = config.attribution.window_days,
        concurrency = config.attribution.fan_out(),
        "Configuration loaded"
    );

    match cli.command {
        Commands::Run {
            output,
            pretty,
            events,
        } => {
            let job = run_job(&config, events).await?;
            let json = if pretty {
                serde_json::to_string_pretty(&job)?
            } else {
                serde_json::to_string(&job)?
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    info!(path = %path.display(), "Job output written");
                }
                None => println!("{json}"),
            }
        }
        Commands::Summary { format, events } => {
            let job = run_job(&config, events).await?;
            let report = ChannelReport::from_output(&job);
            match format.as_str() {
                "csv" => print!("{}", report.export_csv()),
                "json" => println!("{}", report.export_json()?),
                other => anyhow::bail!("unknown summary format: {other}"),
            }
        }
    }

    Ok(())
}

async fn run_job(config: &AppConfig, events: Option<PathBuf>) -> anyhow::Result<JobOutput> {
    let output = match events {
        Some(path) => {
            info!(path = %path.display(), "Replaying events from file");
            let store = InMemoryEventStore::from_json_file(&path)?;
            load_chains_and_visits(store, &config.attribution).await?
        }
        None => {
            let store = PgEventStore::connect(&config.postgres).await?;
            load_chains_and_visits(store, &config.attribution).await?
        }
    };

    if !output.chains_complete {
        warn!(
            chains = output.chains.len(),
            "Chain pass stopped early, chains are partial"
        );
    }
    Ok(output)
}
