//! CloudRAID daemon and settings tool
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          cloudraid run                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Directory   │───▶│    Intake    │───▶│   CloudRAID  │       │
//! │  │   Scanner    │    │   Workers    │    │   Service    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │                                                 │                │
//! │                                 LocalDirConnector x3 + Raid5     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cloudraid::adapters::{
    local_dir_connectors, CompositeEventPublisher, InMemoryMetadataStore, JsonLinesEventPublisher,
    LoggingEventPublisher, Raid5Codec,
};
use cloudraid::config::{CoreConfig, IntakeConfig, IntakeMode, Settings};
use cloudraid::domain::ports::{ErasureCodec, EventPublisher, MetadataStore, StorageConnector};
use cloudraid::engine::{CloudRaidService, ConnectorSet, CoreContext};
use cloudraid::intake::{
    DirectoryScanner, DistributionHandler, FileQueue, IntakeHandler, IntakePool, PathLockTable,
    ValidationHandler,
};
use cloudraid::metrics::CoreMetrics;

// =============================================================================
// CLI Arguments
// =============================================================================

/// CloudRAID - RAID5 distribution across three storage backends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file
    #[arg(long, env = "CLOUDRAID_CONFIG", default_value = "cloudraid.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the engine, the intake pipeline and the HTTP endpoints
    Run {
        /// Metrics server bind address
        #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
        metrics_addr: String,

        /// Health server bind address
        #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
        health_addr: String,
    },
    /// Inspect or edit the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print one value
    Get { key: String },
    /// Print every value; defaults are marked with `*`
    List,
    /// Set a value
    Set { key: String, value: String },
    /// Remove an explicitly set value
    Rm { key: String },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    match args.command {
        Command::Run {
            ref metrics_addr,
            ref health_addr,
        } => run(&args.config, metrics_addr, health_addr).await,
        Command::Config { ref action } => edit_config(&args.config, action),
    }
}

async fn run(config_path: &Path, metrics_addr: &str, health_addr: &str) -> anyhow::Result<()> {
    let settings = Settings::load(config_path)
        .with_context(|| format!("loading settings from {}", config_path.display()))?;
    let core = CoreConfig::from_settings(&settings)?;
    let intake = IntakeConfig::from_settings(&settings)?;

    info!("Starting CloudRAID");
    info!("  Settings: {}", config_path.display());
    info!("  Slots: {}", core.slots);
    info!("  Asynchronous upload: {}", core.asynchronous);
    info!("  Intake mode: {:?}", intake.mode);

    let metrics = CoreMetrics::new()?;
    let codec: Arc<dyn ErasureCodec> = Arc::new(Raid5Codec::new(core.block_size)?);
    let connectors: Vec<Arc<dyn StorageConnector>> =
        local_dir_connectors(&settings, &core.split_output_dir)?
            .into_iter()
            .map(|c| Arc::new(c) as Arc<dyn StorageConnector>)
            .collect();
    let mut publishers =
        CompositeEventPublisher::new().with_publisher(Arc::new(LoggingEventPublisher::new()));
    if let Some(log) = settings.get("events.log") {
        let audit = JsonLinesEventPublisher::open(log)
            .await
            .with_context(|| format!("opening event log {}", log))?;
        info!("  Event log: {}", audit.path().display());
        publishers = publishers.with_publisher(Arc::new(audit));
    }
    let events: Arc<dyn EventPublisher> = Arc::new(publishers);
    let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());

    let ctx = CoreContext::new(
        core.clone(),
        metadata,
        Arc::clone(&codec),
        ConnectorSet::new(connectors)?,
        Arc::clone(&events),
        metrics.clone(),
    );
    let service = CloudRaidService::new(ctx);
    info!(
        "{} {} by {}",
        service.name(),
        service.version(),
        service.vendor()
    );

    if !service.connect_all().await? {
        bail!("not every storage connector could connect");
    }
    info!("All storage connectors connected");

    // Start health server
    let health_addr = health_addr.to_string();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = metrics_addr.to_string();
    let registry = metrics.registry().clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    let shutdown = CancellationToken::new();
    let pool = match &intake.watch_dir {
        Some(watch_dir) => {
            let queue = Arc::new(FileQueue::new());
            let scanner = Arc::new(DirectoryScanner::new(watch_dir, Arc::clone(&queue)));
            tokio::spawn(scanner.run(intake.scan_interval, shutdown.child_token()));

            let handler: Arc<dyn IntakeHandler> = match intake.mode {
                IntakeMode::Validate => Arc::new(ValidationHandler::new(
                    Arc::clone(&codec),
                    core.split_output_dir.join("validate"),
                    core.passphrase.clone(),
                    Arc::clone(&events),
                )),
                IntakeMode::Distribute => Arc::new(DistributionHandler::new(
                    service.clone(),
                    watch_dir,
                    intake.owner,
                )),
            };

            info!("Watching {}", watch_dir.display());
            Some(IntakePool::spawn(
                intake.workers,
                intake.interval,
                queue,
                Arc::new(PathLockTable::new()),
                handler,
                Arc::clone(&events),
                metrics.clone(),
            ))
        }
        None => {
            warn!("intake.watch.dir is not set, filesystem intake disabled");
            None
        }
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    shutdown.cancel();
    if let Some(pool) = pool {
        pool.stop().await;
    }
    service.wait_idle().await;

    info!("CloudRAID shutdown complete");
    Ok(())
}

// =============================================================================
// Settings Editing
// =============================================================================

fn edit_config(path: &Path, action: &ConfigAction) -> anyhow::Result<()> {
    let mut settings = Settings::load(path)
        .with_context(|| format!("loading settings from {}", path.display()))?;

    match action {
        ConfigAction::Get { key } => match settings.get(key) {
            Some(value) => println!("{}", value),
            None => bail!("{} is not set", key),
        },
        ConfigAction::List => {
            for entry in settings.entries() {
                let marker = if entry.is_default { "*" } else { " " };
                println!("{} {} = {}", marker, entry.key, entry.value);
            }
        }
        ConfigAction::Set { key, value } => {
            settings.put(key.as_str(), value.as_str());
            settings.save(path)?;
        }
        ConfigAction::Rm { key } => {
            if settings.remove(key).is_none() {
                bail!("{} is not set in {}", key, path.display());
            }
            settings.save(path)?;
        }
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// HTTP Endpoints
// =============================================================================

fn respond(
    status: hyper::StatusCode,
    body: impl Into<hyper::body::Bytes>,
) -> hyper::Response<http_body_util::Full<hyper::body::Bytes>> {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> anyhow::Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr.parse().context("invalid health server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind health server")?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await.context("health server accept")?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                let response = match req.uri().path() {
                    "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "ok"),
                    _ => respond(StatusCode::NOT_FOUND, "not found"),
                };
                Ok::<_, std::convert::Infallible>(response)
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

async fn run_metrics_server(addr: &str, registry: prometheus::Registry) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr.parse().context("invalid metrics server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await.context("metrics server accept")?;
        let io = TokioIo::new(stream);
        let registry = registry.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let registry = registry.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            match encoder.encode(&registry.gather(), &mut buffer) {
                                Ok(()) => {
                                    let mut response = respond(StatusCode::OK, buffer);
                                    if let Ok(value) = HeaderValue::from_str(encoder.format_type())
                                    {
                                        response.headers_mut().insert(CONTENT_TYPE, value);
                                    }
                                    response
                                }
                                Err(e) => respond(
                                    StatusCode::INTERNAL_SERVER_ERROR,
                                    format!("encoding metrics failed: {}", e),
                                ),
                            }
                        }
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
