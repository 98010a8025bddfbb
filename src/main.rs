use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context as _;
use db_latency_meter::{QueryLogger, QueryMeter, QueryTracer};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod handlers;
mod load_generator;
mod redis_client;
mod server;
mod settings;

use settings::Settings;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Redis client whose operations are timed by the query meter.
    pub redis: redis_client::TracedRedis,

    /// Prometheus registry the OpenTelemetry exporter writes into.
    pub registry: Registry,

    /// Flag checked by every load-generator worker on each iteration.
    pub load_running: Arc<AtomicBool>,

    /// Handle to the spawned load-generator task so we can await clean shutdown.
    pub load_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

fn init_logs() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

fn init_metrics(registry: &Registry) -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .context("failed to create prometheus exporter")?;
    let provider = SdkMeterProvider::builder().with_reader(exporter).build();
    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(provider)
}

fn build_meter(settings: &Settings) -> anyhow::Result<QueryMeter> {
    let mut builder = QueryMeter::builder();
    if settings.log_queries {
        builder = builder.downstream(QueryLogger::new());
    }
    if let Some(bounds) = &settings.bucket_boundaries {
        builder = builder.bucket_boundaries(bounds.clone());
    }
    builder.build().context("failed to create latency histogram")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logs();
    let settings = Settings::build().context("failed to load settings")?;
    tracing::info!(?settings, "starting");

    // ── 1. Meter ─────────────────────────────────────────────────
    let registry = Registry::new();
    let provider = init_metrics(&registry)?;
    let meter: Arc<dyn QueryTracer> = Arc::new(build_meter(&settings)?);

    // ── 2. Connect to Redis (timed as a `connect` operation) ─────
    let redis = redis_client::connect(&settings.redis_url, meter)
        .await
        .with_context(|| format!("cannot connect to Redis at {}", settings.redis_url))?;
    tracing::info!(host = %redis.info().host, port = redis.info().port, "connected to redis");

    // ── 3. Build shared state ────────────────────────────────────
    let state = Arc::new(AppState {
        redis,
        registry,
        load_running: Arc::new(AtomicBool::new(false)),
        load_handle: tokio::sync::Mutex::new(None),
    });

    // ── 4. Bind & serve ──────────────────────────────────────────
    let app = server::create_router(state);
    let listener = tokio::net::TcpListener::bind(settings.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen_addr))?;

    tracing::info!(addr = %settings.listen_addr, "serving metrics at /metrics");

    let served = axum::serve(listener, app)
        .await
        .context("server exited with error");
    if let Err(err) = provider.shutdown() {
        tracing::warn!(error = %err, "failed to shut down meter provider");
    }
    served
}
