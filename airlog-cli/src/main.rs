//! CLI for the airlog sensor acquisition pipeline.
//!
//! Provides commands for running acquisition and for inspecting, querying,
//! and compacting airlog logs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use airlog::pipeline::{spawn_acquisition, spawn_maintenance};
use airlog::query::{group_by_metric, records_since_now};
use airlog::{DriverSettings, LogStore, Mediator, RetentionPolicy, SensorDriver, SensorMap, StoreConfig, now_secs};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// airlog: environmental sensor acquisition into an append-only log.
#[derive(Parser)]
#[command(name = "airlog", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Read every configured sensor into the log until killed.
    Run {
        /// JSON file mapping sensor identities to serial devices.
        #[arg(long, default_value = "config.json")]
        config: PathBuf,

        /// Path to the log file.
        #[arg(long, default_value = "persist/table.csv")]
        store: PathBuf,

        /// Serial baud rate.
        #[arg(long, default_value = "9600")]
        baud: u32,

        /// Seconds between retention passes.
        #[arg(long, default_value = "600")]
        maintenance_interval_secs: u64,

        /// Sync the log to disk after every append.
        #[arg(long)]
        sync_writes: bool,
    },

    /// Display log size, record counts, and per-metric freshness.
    Info {
        /// Path to the log file.
        store_path: PathBuf,
    },

    /// Print recent records from a log.
    Query {
        /// Path to the log file.
        store_path: PathBuf,

        /// Only print this metric.
        #[arg(long)]
        metric: Option<String>,

        /// How far back to look (e.g., "1h", "30m", "7d").
        #[arg(long, default_value = "1h")]
        range: String,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Run one retention and consolidation pass.
    Retain {
        /// Path to the log file.
        store_path: PathBuf,

        /// Drop records older than this.
        #[arg(long, default_value = "7d")]
        retention: String,

        /// Keep records younger than this at full resolution.
        #[arg(long, default_value = "1h")]
        full_resolution: String,

        /// Consolidation bucket width.
        #[arg(long, default_value = "1m")]
        bucket: String,
    },
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON array of objects.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            store,
            baud,
            maintenance_interval_secs,
            sync_writes,
        } => cmd_run(
            &config,
            &store,
            baud,
            Duration::from_secs(maintenance_interval_secs),
            sync_writes,
        ),
        Commands::Info { store_path } => cmd_info(&store_path),
        Commands::Query {
            store_path,
            metric,
            range,
            format,
        } => cmd_query(&store_path, metric.as_deref(), &range, &format),
        Commands::Retain {
            store_path,
            retention,
            full_resolution,
            bucket,
        } => cmd_retain(&store_path, &retention, &full_resolution, &bucket),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `airlog run`.
fn cmd_run(
    config_path: &Path,
    store_path: &Path,
    baud: u32,
    maintenance_interval: Duration,
    sync_writes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let sensors = SensorMap::load(config_path)?;
    if sensors.is_empty() {
        return Err(format!("No sensors configured in '{}'", config_path.display()).into());
    }

    let settings = DriverSettings {
        baud_rate: baud,
        ..DriverSettings::default()
    };
    let store_config = StoreConfig {
        sync_writes,
        ..StoreConfig::default()
    };
    let store = Arc::new(LogStore::open(store_path, store_config)?);
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for (identity, device) in sensors.iter() {
        // A sensor that cannot be opened is skipped; the rest still run.
        let driver = match SensorDriver::open_serial(identity, device, &settings) {
            Ok(driver) => driver,
            Err(e) => {
                error!(%identity, device = %device.display(), error = %e, "skipping sensor");
                continue;
            }
        };
        handles.push(spawn_acquisition(
            driver,
            Mediator::default(),
            Arc::clone(&store),
            Arc::clone(&shutdown),
        )?);
    }

    if handles.is_empty() {
        return Err("No sensor could be opened".into());
    }

    let maintenance = spawn_maintenance(Arc::clone(&store), maintenance_interval, Arc::clone(&shutdown))?;
    info!(
        sensors = handles.len(),
        store = %store_path.display(),
        "acquisition running"
    );

    for handle in handles {
        let name = handle.thread().name().unwrap_or("sensor").to_string();
        if handle.join().is_err() {
            error!(thread = %name, "acquisition thread panicked");
        }
    }
    if maintenance.join().is_err() {
        error!("maintenance thread panicked");
    }
    Ok(())
}

/// Implements `airlog info <store_path>`.
fn cmd_info(store_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = LogStore::open_read_only(store_path, StoreConfig::default())?;
    let size = std::fs::metadata(store_path)?.len();
    let records = store.snapshot()?;
    let now = now_secs();

    println!("Store: {}", store_path.display());
    println!("  Size: {}", format_bytes(size));
    println!("  Records: {}", records.len());
    println!();

    let groups = group_by_metric(records);
    println!("Metrics: {}", groups.len());
    for (metric, series) in &groups {
        let (Some(first), Some(last)) = (series.first(), series.last()) else {
            continue;
        };
        println!("  {metric}");
        println!("    Records: {}", series.len());
        println!("    Span: {}", format_duration_secs(last.timestamp - first.timestamp));
        println!("    Latest: {} ({} ago)", last.value, format_duration_secs(now - last.timestamp));
    }

    Ok(())
}

/// Implements `airlog query <store_path>`.
fn cmd_query(
    store_path: &Path,
    metric: Option<&str>,
    range: &str,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = LogStore::open_read_only(store_path, StoreConfig::default())?;
    let range_secs = parse_duration(range)?;

    let mut data: Vec<_> = records_since_now(&store.snapshot()?, range_secs.as_secs_f64())
        .into_iter()
        .filter(|record| metric.is_none_or(|m| record.metric == m))
        .collect();
    data.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    match format {
        OutputFormat::Csv => {
            println!("# range={range}, points={}", data.len());
            println!("metric,value,timestamp");
            for record in &data {
                println!("{},{},{}", record.metric, record.value, record.timestamp);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "metric": metric,
                "range": range,
                "count": data.len(),
                "data": data,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `airlog retain <store_path>`.
///
/// Safe next to a running `airlog run`: the store's lock file makes the
/// rewrite wait for in-flight appends and holds new ones off until the
/// rename is done.
fn cmd_retain(
    store_path: &Path,
    retention: &str,
    full_resolution: &str,
    bucket: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !store_path.exists() {
        return Err(format!("No log found at '{}'", store_path.display()).into());
    }

    let config = StoreConfig {
        retention: RetentionPolicy {
            retention: parse_duration(retention)?,
            full_resolution: parse_duration(full_resolution)?,
            bucket: parse_duration(bucket)?,
            ..RetentionPolicy::default()
        },
        ..StoreConfig::default()
    };
    let store = LogStore::open(store_path, config)?;
    let report = store.retain_and_consolidate()?;

    println!("Retention pass on {}", store_path.display());
    println!("  Dropped: {}", report.dropped);
    println!(
        "  Consolidated: {} -> {}",
        report.consolidated_from, report.consolidated_into
    );
    println!("  Kept at full resolution: {}", report.kept_recent);
    println!("  Records now: {}", report.total_after());

    Ok(())
}

/// Parses a duration string like "1h", "30m", "7d", "10s".
fn parse_duration(s: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let s = s.trim();
    let Some((unit_start, _)) = s.char_indices().last() else {
        return Err("Empty duration string".into());
    };

    let (num_str, unit) = s.split_at(unit_start);
    let num: u64 = num_str.parse()?;

    let secs = match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        "d" => num * 86400,
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, or d.").into()),
    };

    Ok(Duration::from_secs(secs))
}

/// Formats seconds as a human-readable duration.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // display-only
fn format_duration_secs(secs: f64) -> String {
    let secs = secs.max(0.0).round() as u64;
    if secs >= 86400 {
        format!("{:.1}d", secs as f64 / 86400.0)
    } else if secs >= 3600 {
        format!("{:.1}h", secs as f64 / 3600.0)
    } else if secs >= 60 {
        format!("{:.1}m", secs as f64 / 60.0)
    } else {
        format!("{secs}s")
    }
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
