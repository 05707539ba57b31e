//! rapq server entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rapq_server::demo;
use rapq_server::network::{NetworkConfig, NetworkModule};
use rapq_server::service::{QueryConfig, QueryService};
use rapq_server::storage::MemoryBackend;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// HTTP query interface over registered entities.
#[derive(Debug, Parser)]
#[command(name = "rapq-server", version)]
struct Cli {
    #[arg(long, env = "RAPQ_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "RAPQ_PORT", default_value_t = 8080)]
    port: u16,

    /// Page size when a request gives none; 0 disables paging by default.
    #[arg(long, env = "RAPQ_DEFAULT_PAGE_SIZE", default_value_t = rapq_core::DEFAULT_PAGE_SIZE)]
    default_page_size: i64,

    /// Base of link hrefs; defaults to `http://<host>:<port>`.
    #[arg(long, env = "RAPQ_BASE_URL")]
    base_url: Option<String>,

    /// Seconds a request may run before 408.
    #[arg(long, env = "RAPQ_REQUEST_TIMEOUT", default_value_t = 30)]
    request_timeout: u64,

    /// JSON array of entity definitions replacing the built-in schema.
    #[arg(long, env = "RAPQ_SCHEMA")]
    schema: Option<PathBuf>,

    /// JSON fixture `{"<entity>": [records]}` replacing the built-in records.
    #[arg(long, env = "RAPQ_DATA")]
    data: Option<PathBuf>,

    #[arg(long, env = "RAPQ_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "rapq_server=info,rapq_core=info,tower_http=info")]
    log_level: String,
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let json = cli.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let registry = match &cli.schema {
        Some(path) => demo::registry_from_file(path)?,
        None => demo::registry()?,
    };
    let registry = Arc::new(registry);

    let backend = MemoryBackend::new(Arc::clone(&registry));
    let loaded = match &cli.data {
        Some(path) => backend.load_file(path)?,
        None if cli.schema.is_none() => demo::seed(&backend)?,
        None => 0,
    };
    tracing::info!(entities = registry.len(), records = loaded, "store ready");

    let config = QueryConfig {
        default_page_size: cli.default_page_size,
        base_url: cli
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", cli.host, cli.port)),
        ..QueryConfig::default()
    };
    let service = QueryService::new(registry, Arc::new(backend), config)?;

    let mut network = NetworkModule::new(
        NetworkConfig {
            host: cli.host,
            port: cli.port,
            request_timeout: Duration::from_secs(cli.request_timeout),
            ..NetworkConfig::default()
        },
        Arc::new(service),
    );
    network.start().await?;
    network
        .serve(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown requested");
        })
        .await
}
