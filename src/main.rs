//! CLI entry point for the transit alerts aggregator.
//!
//! Provides subcommands for a single aggregation cycle, periodic refresh,
//! decoding one feed by hand, and listing the configured agencies.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_alerts::{
    aggregator::Aggregator,
    config::AppConfig,
    decode::DecoderRegistry,
    fetch::{BasicClient, DEFAULT_TIMEOUT, HttpFetcher, load_source},
    mapper::AlertMapper,
    output::{append_status_rows, print_summary, write_report},
    routes::RouteTable,
};

#[derive(Parser)]
#[command(name = "transit_alerts")]
#[command(about = "Aggregate transit service alerts from GTFS-RT and bulletin feeds", long_about = None)]
struct Cli {
    /// Agency configuration JSON (built-in Puget Sound agencies when absent)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<String>,

    /// GTFS routes.txt used to resolve route names
    #[arg(long, global = true, env = "ROUTES_PATH", default_value = "data/routes.txt")]
    routes: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one aggregation cycle and print the report as JSON
    Fetch {
        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Refresh periodically, writing the latest report after every cycle
    Watch {
        /// Seconds between refreshes (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Number of cycles to run (0 = until interrupted)
        #[arg(short = 'n', long, default_value_t = 0)]
        cycles: usize,

        /// File the latest report is written to
        #[arg(short, long, default_value = "alerts.json")]
        output: String,

        /// CSV file to append per-agency status rows to
        #[arg(long)]
        status_log: Option<String>,
    },
    /// Decode a single feed from a file or URL with an agency's decoder
    Decode {
        /// Agency whose decoder and defaults are used
        #[arg(short, long)]
        agency: String,

        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,
    },
    /// List configured agencies
    ListAgencies,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/transit_alerts.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_alerts.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            AppConfig::load(path).with_context(|| format!("loading agency config from {path}"))?
        }
        None => AppConfig::puget_sound(),
    };

    match cli.command {
        Commands::Fetch { output } => {
            let aggregator = build_aggregator(&config, &cli.routes)?;
            let report = aggregator.fetch_all().await;

            print_summary(&report);
            write_report(&report, output.as_deref())?;
        }
        Commands::Watch {
            interval,
            cycles,
            output,
            status_log,
        } => {
            let interval = interval.unwrap_or(config.refresh_interval_secs);
            if interval == 0 {
                bail!("--interval must be positive");
            }
            let aggregator = build_aggregator(&config, &cli.routes)?;

            info!(interval, cycles, output = %output, "Starting refresh loop");

            aggregator
                .watch(Duration::from_secs(interval), cycles, |report| {
                    print_summary(report);
                    write_report(report, Some(&output))?;
                    if let Some(path) = &status_log {
                        append_status_rows(path, report)?;
                    }
                    Ok(())
                })
                .await?;
        }
        Commands::Decode { agency, source } => {
            let Some(agency) = config.agency(&agency) else {
                bail!("unknown agency '{agency}'");
            };

            let registry = DecoderRegistry::from_agencies(std::slice::from_ref(agency))?;
            let decoder = registry
                .get(&agency.id)
                .with_context(|| format!("no decoder for agency '{}'", agency.id))?;
            let mapper = AlertMapper::new(Arc::new(load_routes(&config, &cli.routes)));

            let bytes = load_source(&BasicClient::new(), &source).await?;
            let records = decoder.decode(&bytes)?;

            let now = Utc::now();
            let alerts: Vec<_> = records
                .iter()
                .map(|record| mapper.map(agency, record, now))
                .collect();

            info!(
                agency_id = %agency.id,
                format = decoder.format().as_str(),
                records = alerts.len(),
                "Feed decoded"
            );
            println!("{}", serde_json::to_string_pretty(&alerts)?);
        }
        Commands::ListAgencies => {
            for agency in &config.agencies {
                let services: Vec<_> = agency.services.iter().map(|s| s.as_str()).collect();
                info!(
                    agency_id = %agency.id,
                    name = %agency.name,
                    format = agency.format.as_str(),
                    services = %services.join(","),
                    auth = if agency.auth.requires_auth() { "auth-required" } else { "open" },
                    feed_url = %agency.feed_url,
                    "Agency"
                );
            }
            info!(
                total = config.agencies.len(),
                refresh_interval_secs = config.refresh_interval_secs,
                "Agency list summary"
            );
        }
    }

    Ok(())
}

/// Loads the route table, applying any route-table agency ids from config.
fn load_routes(config: &AppConfig, path: &str) -> RouteTable {
    let mut table = RouteTable::load(path);
    for agency in &config.agencies {
        if let Some(gtfs_id) = &agency.gtfs_agency_id {
            table = table.with_agency_id(&agency.id, gtfs_id);
        }
    }
    if table.is_empty() {
        warn!(path, "Route names will fall back to raw feed identifiers");
    }
    table
}

fn build_aggregator(config: &AppConfig, routes_path: &str) -> Result<Aggregator> {
    let routes = Arc::new(load_routes(config, routes_path));
    let registry = DecoderRegistry::from_agencies(&config.agencies)?;
    let fetcher = HttpFetcher::from_agencies(&config.agencies, DEFAULT_TIMEOUT)?;

    Ok(Aggregator::new(
        config.agencies.clone(),
        registry,
        AlertMapper::new(routes),
        Arc::new(fetcher),
    ))
}
