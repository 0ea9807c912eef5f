//! memcached_exporter - Prometheus exporter for memcached.
//!
//! Serves memcached statistics on an HTTP telemetry path. Each request
//! triggers one scrape of the configured server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use clap::{Parser, ValueEnum};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use memcached_exporter::collector::{MemcachedCollector, MetricMapper};
use memcached_exporter::config::{
    DEFAULT_ADDRESS, TargetConfig, TlsFiles, validate_telemetry_path,
};
use memcached_exporter::registry::build_registry;
use memcached_exporter::util::parse_duration;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "memcached_exporter",
    about = "Prometheus exporter for memcached statistics",
    version = memcached_exporter::VERSION
)]
struct Args {
    /// memcached address (host:port).
    #[arg(long = "memcached.address", default_value = DEFAULT_ADDRESS, env = "MEMCACHED_EXPORTER_ADDRESS")]
    address: String,

    /// Deadline for one scrape, e.g. 500ms, 1s, 1m30s.
    #[arg(long = "memcached.timeout", default_value = "1s", value_parser = parse_duration, env = "MEMCACHED_EXPORTER_TIMEOUT")]
    timeout: Duration,

    /// memcached PID file; enables process metrics for the server (Linux).
    #[arg(long = "memcached.pid-file", env = "MEMCACHED_EXPORTER_PID_FILE")]
    pid_file: Option<PathBuf>,

    /// Also scrape per-connection stats (`stats conns`).
    #[arg(long = "memcached.stats-conns")]
    stats_conns: bool,

    /// Connect to memcached over TLS.
    #[arg(long = "memcached.tls.enable")]
    tls_enable: bool,

    /// Client certificate file (PEM).
    #[arg(long = "memcached.tls.certfile", requires = "tls_enable")]
    tls_cert_file: Option<PathBuf>,

    /// Client private key file (PEM: PKCS#8, PKCS#1 or SEC1).
    #[arg(long = "memcached.tls.keyfile", requires = "tls_enable")]
    tls_key_file: Option<PathBuf>,

    /// CA bundle to verify the server certificate with (PEM).
    #[arg(long = "memcached.tls.cafile", requires = "tls_enable")]
    tls_ca_file: Option<PathBuf>,

    /// Server name to verify; defaults to the host part of the address.
    #[arg(long = "memcached.tls.servername", requires = "tls_enable")]
    tls_server_name: Option<String>,

    /// Skip server certificate verification.
    #[arg(long = "memcached.tls.skipverify", requires = "tls_enable")]
    tls_skip_verify: bool,

    /// Address to listen on for HTTP requests.
    #[arg(long = "web.listen-address", default_value = "0.0.0.0:9150", env = "MEMCACHED_EXPORTER_LISTEN")]
    listen_address: String,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    telemetry_path: String,

    /// Log output format.
    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Log level; takes precedence over -v and -q.
    #[arg(long = "log.level", value_enum, env = "MEMCACHED_EXPORTER_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Increase verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run one scrape, print it as JSON and exit.
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(
        log_level(args.verbose, args.quiet, args.log_level),
        args.log_format,
    );

    if let Err(e) = run(args) {
        error!(error = %format!("{e:#}"), "exiting");
        process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    validate_telemetry_path(&args.telemetry_path)?;
    let collector = build_collector(&args)?;

    if args.once {
        let snapshot = collector.collect();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        if !snapshot.up {
            anyhow::bail!("memcached at {} is not reachable", args.address);
        }
        return Ok(());
    }

    let registry =
        build_registry(collector, args.pid_file.clone()).context("failed to build registry")?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(serve(args, registry))
}

fn build_collector(args: &Args) -> anyhow::Result<MemcachedCollector> {
    let mut target =
        TargetConfig::new(args.address.clone(), args.timeout)?.with_conns(args.stats_conns);

    if args.tls_enable {
        let files = TlsFiles {
            cert_file: args.tls_cert_file.clone(),
            key_file: args.tls_key_file.clone(),
            ca_file: args.tls_ca_file.clone(),
            server_name: args.tls_server_name.clone(),
            skip_verify: args.tls_skip_verify,
        };
        let tls = files.load(&args.address).context("failed to load TLS configuration")?;
        if files.skip_verify {
            warn!("memcached TLS certificate verification is disabled");
        }
        target = target.with_tls(tls);
    }

    let mapper = MetricMapper::memcached().context("invalid metric table")?;
    info!(
        address = %target.address,
        timeout_ms = target.timeout.as_millis() as u64,
        tls = target.tls.is_some(),
        commands = ?target.commands,
        "memcached target configured"
    );
    Ok(MemcachedCollector::new(target, Arc::new(mapper)))
}

fn log_level(verbose: u8, quiet: bool, level: Option<LogLevel>) -> Level {
    if let Some(level) = level {
        return level.into();
    }
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn init_logging(level: Level, format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

// ============================================================
// HTTP
// ============================================================

#[derive(Clone)]
struct AppState {
    registry: Registry,
    telemetry_path: Arc<str>,
}

async fn serve(args: Args, registry: Registry) -> anyhow::Result<()> {
    let addr: SocketAddr = args
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address {}", args.listen_address))?;

    let state = AppState {
        registry,
        telemetry_path: Arc::from(args.telemetry_path.as_str()),
    };

    let mut app = Router::new().route(&args.telemetry_path, get(handle_metrics));
    if args.telemetry_path != "/" {
        app = app.route("/", get(handle_landing));
    }
    let app = app.with_state(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(version = memcached_exporter::VERSION, %addr, path = %args.telemetry_path, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("stopped");
    Ok(())
}

async fn handle_metrics(State(state): State<AppState>) -> Response {
    let registry = state.registry.clone();
    // Scrapes do blocking socket I/O.
    let families = match tokio::task::spawn_blocking(move || registry.gather()).await {
        Ok(families) => families,
        Err(e) => {
            error!(error = %e, "metrics gathering task failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut body) {
        error!(error = %e, "failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], body).into_response()
}

async fn handle_landing(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>Memcached Exporter</title></head>\n\
         <body>\n\
         <h1>Memcached Exporter</h1>\n\
         <p>Version {}</p>\n\
         <p><a href=\"{}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        memcached_exporter::VERSION,
        state.telemetry_path
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}
