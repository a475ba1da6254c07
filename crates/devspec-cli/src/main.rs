//! Devspec - resolve a device's configuration parameters from the device catalog
//!
//! The host integration supplies a device identity; this binary resolves it
//! through the local snapshot index and/or the remote catalog and prints the
//! normalized parameter specification.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use devspec_catalog::{CatalogService, HttpTransport, LocalCatalogIndex, RemoteCatalog};
use devspec_core::{parse_record, CatalogRecord, DeviceIdentity, FirmwareVersion};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "devspec")]
#[command(about = "Resolve device configuration parameters from the device catalog")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "devspec.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Snapshot directory for the local index (overrides config)
    #[arg(long, global = true)]
    snapshot_dir: Option<PathBuf>,

    /// Never contact the remote catalog service
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a device identity to its parameter specification
    Resolve {
        /// Manufacturer id (decimal or 0x hex)
        #[arg(long, value_parser = parse_id::<u32>)]
        manufacturer: u32,
        /// Product type (decimal or 0x hex)
        #[arg(long, value_parser = parse_id::<u16>)]
        product_type: u16,
        /// Product id (decimal or 0x hex)
        #[arg(long, value_parser = parse_id::<u16>)]
        product_id: u16,
        /// Firmware version, e.g. 5.13
        #[arg(long)]
        firmware: FirmwareVersion,
        /// Abort after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load the local snapshot index and report its contents
    Index,
    /// Parse and normalize a single catalog record file
    Parse {
        file: PathBuf,
    },
}

/// Parse an integer given in decimal or with a 0x prefix
fn parse_id<T: TryFrom<u64>>(s: &str) -> Result<T, String> {
    let s = s.trim();
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    }
    .map_err(|e| format!("invalid id {:?}: {}", s, e))?;
    T::try_from(value).map_err(|_| format!("id {} is out of range", value))
}

fn init_logging(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Cancellation token that fires on Ctrl-C or after the optional timeout
fn cancellation(timeout_secs: Option<u64>) -> CancellationToken {
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    if let Some(secs) = timeout_secs {
        let on_timeout = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            on_timeout.cancel();
        });
    }

    cancel
}

async fn load_local_index(
    config: &Config,
    cancel: &CancellationToken,
) -> Result<Option<Arc<LocalCatalogIndex>>> {
    let Some(dir) = &config.local.snapshot_dir else {
        return Ok(None);
    };

    let index = Arc::new(LocalCatalogIndex::with_max_concurrent_reads(
        config.local.max_concurrent_reads,
    ));
    index
        .load(dir, cancel)
        .await
        .with_context(|| format!("Failed to load snapshot index from {}", dir.display()))?;
    Ok(Some(index))
}

fn remote_catalog(config: &Config) -> Result<Option<Arc<RemoteCatalog<HttpTransport>>>> {
    if !config.remote.enabled {
        return Ok(None);
    }

    let timeout = match config.remote.request_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let transport = HttpTransport::new(&config.remote.user_agent, timeout)
        .context("Failed to create HTTP client")?;
    Ok(Some(Arc::new(RemoteCatalog::with_base_url(
        transport,
        &config.remote.base_url,
    ))))
}

async fn build_service(config: &Config, cancel: &CancellationToken) -> Result<CatalogService> {
    let local = load_local_index(config, cancel).await?;
    let remote = remote_catalog(config)?;

    let mut service = CatalogService::new();
    if config.resolver.prefer_local {
        if let Some(local) = local.clone() {
            service = service.with_source(local);
        }
    }
    if let Some(remote) = remote {
        service = service.with_source(remote);
    }
    if !config.resolver.prefer_local {
        if let Some(local) = local {
            service = service.with_source(local);
        }
    }

    if service.source_names().is_empty() {
        bail!("No catalog source configured: set local.snapshot_dir or enable the remote catalog");
    }
    info!(sources = ?service.source_names(), "Catalog service ready");
    Ok(service)
}

fn print_record(record: &CatalogRecord) {
    println!("{} - {} ({})", record.manufacturer_label, record.label, record.description);
    println!("Catalog id: {}", record.id);
    for param in &record.parameters {
        let label = record.parameter_label(param.number).unwrap_or("(unnamed)");
        println!(
            "  #{:<3} {} [size {}, {}..{}, default {}]",
            param.number, label, param.size, param.minimum, param.maximum, param.default
        );
        for sub in &param.sub_parameters {
            println!("        - {} (mask 0x{:X})", sub.label, sub.bitmask);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let mut config = config::load_config(&args.config)?;
    if let Some(dir) = args.snapshot_dir {
        config.local.snapshot_dir = Some(dir);
    }
    if args.offline {
        config.remote.enabled = false;
    }

    match args.command {
        Command::Resolve {
            manufacturer,
            product_type,
            product_id,
            firmware,
            timeout_secs,
            json,
        } => {
            let cancel = cancellation(timeout_secs);
            let service = build_service(&config, &cancel).await?;
            let identity = DeviceIdentity::new(manufacturer, product_type, product_id, firmware);

            let record = service
                .resolve(&identity, &cancel)
                .await
                .with_context(|| format!("Failed to resolve {}", identity))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_record(&record);
            }
        }
        Command::Index => {
            let cancel = cancellation(None);
            let Some(index) = load_local_index(&config, &cancel).await? else {
                bail!("No snapshot directory configured");
            };
            if let Some(stats) = index.stats() {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
        }
        Command::Parse { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let record = parse_record(&bytes)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    Ok(())
}
