// # ledger-indexd - Ledger Indexer Daemon
//
// Thin integration layer. All indexing logic lives in ledger-index-core;
// this binary only:
// 1. Loads the YAML configuration
// 2. Installs the log subscriber
// 3. Builds the ledger transport, content store and pin store
// 4. Runs the IndexerEngine until SIGINT/SIGTERM
//
// ## Configuration
//
// - `LEDGER_INDEXD_CONFIG`: Path to the YAML configuration (default `setup.yml`)
// - `LEDGER_INDEXD_LOG_LEVEL`: Overrides `log_level` from the file
//
// ## Example
//
// ```yaml
// rippled:
//   host: xrplcluster.com
//   port: 443
//   secure: true
//   max_message_mib: 1024
// indexer:
//   create_index_ms: 300000
//   freq_index_check_ms: 30000
//   file_path: /var/lib/ledger-index/records
//   remove_indexes_secs: 3600
// ipfsnode:
//   api_host: 127.0.0.1
//   api_port: 5001
//   ipns_key: ledger-index
//   pin_state_path: /var/lib/ledger-index/pins.json
// log_level: info
// ```

use anyhow::{Context, Result};
use ledger_index_core::config::IndexerConfig;
use ledger_index_core::engine::{EngineEvent, IndexerEngine};
use ledger_index_core::state::FilePinStore;
use ledger_index_kubo::KuboStore;
use ledger_index_rippled::RippledTransport;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Default configuration file, relative to the working directory
const DEFAULT_CONFIG_PATH: &str = "setup.yml";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexerExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<IndexerExitCode> for ExitCode {
    fn from(code: IndexerExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Path of the configuration file
fn config_path() -> PathBuf {
    env::var_os("LEDGER_INDEXD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Read, parse and validate the configuration at `path`
///
/// `log_level`, when set, replaces the level from the file before validation.
fn load_config(path: &Path, log_level: Option<String>) -> Result<IndexerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read configuration file {}", path.display()))?;

    let mut config: IndexerConfig = serde_yaml::from_str(&text)
        .with_context(|| format!("invalid configuration in {}", path.display()))?;

    if let Some(level) = log_level {
        config.log_level = level;
    }

    config.validate()?;
    Ok(config)
}

fn tracing_level(log_level: &str) -> Level {
    match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn main() -> ExitCode {
    let path = config_path();
    let config = match load_config(&path, env::var("LEDGER_INDEXD_LOG_LEVEL").ok()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return IndexerExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing_level(&config.log_level))
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return IndexerExitCode::ConfigError.into();
    }

    info!("Starting ledger-indexd");
    info!("Configuration loaded from {}", path.display());

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IndexerExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        let engine = match build_engine(config).await {
            Ok(engine) => engine,
            Err(e) => {
                error!("Startup error: {:#}", e);
                return IndexerExitCode::ConfigError;
            }
        };

        match engine.run().await {
            Ok(()) => IndexerExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {}", e);
                IndexerExitCode::RuntimeError
            }
        }
    });

    code.into()
}

/// Wire the concrete transport, store and pin state into an engine
async fn build_engine(config: IndexerConfig) -> Result<IndexerEngine> {
    let transport = RippledTransport::from_config(&config.rippled)?;
    info!("Ledger node: {}", config.rippled.endpoint());

    let store = KuboStore::from_config(&config.ipfsnode)?;
    info!("IPFS node: {}", config.ipfsnode.api_url());

    let pins = FilePinStore::new(&config.ipfsnode.pin_state_path).await?;
    info!("Pin state: {}", config.ipfsnode.pin_state_path.display());

    if !config.ipfsnode.ignore_pins.is_empty() {
        info!("{} pin(s) exempt from eviction", config.ipfsnode.ignore_pins.len());
    }

    let (engine, events) =
        IndexerEngine::new(Box::new(transport), Arc::new(store), Box::new(pins), config)?;
    tokio::spawn(log_events(events));

    Ok(engine)
}

/// Drain engine events into the log
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            EngineEvent::Published {
                index, root, name, ..
            } => info!("index {} live at /ipns/{} (/ipfs/{})", index, name, root),
            EngineEvent::Disconnected => warn!("ledger node disconnected"),
            _ => debug!("engine event: {:?}", event),
        }
    }
}
