use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod destination;
pub mod engine;
pub mod repository;
pub mod service;
pub mod stage;
pub mod store;

use config::{Config, StateBackend};
use destination::{DestinationWriter, MemoryDestination, PgDestinationWriter};
use engine::events::TracingEventSink;
use engine::{Engine, Orchestrator};
use service::SchemaRegistry;
use stage::{HttpStageClient, LoadStageClient, S3ResultSource, StageClients};
use store::{MemoryStore, PgStore, PipelineStore, RunStateStore, SchemaStore};

struct Backend {
    runs: Arc<dyn RunStateStore>,
    pipelines: Arc<dyn PipelineStore>,
    schemas: Arc<dyn SchemaStore>,
    destination: Arc<dyn DestinationWriter>,
}

async fn connect(config: &Config) -> anyhow::Result<Backend> {
    match config.state_backend {
        StateBackend::Memory => {
            tracing::warn!("Using the in-memory state backend; runs will not survive a restart");
            let store = Arc::new(MemoryStore::new());
            Ok(Backend {
                runs: store.clone(),
                pipelines: store.clone(),
                schemas: store,
                destination: Arc::new(MemoryDestination::new()),
            })
        }
        StateBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(&config.database_url).await?;
            tracing::info!("Database connection pool created");

            db::run_migrations(&pool).await?;

            let destination_pool = match &config.destination_database_url {
                Some(url) => db::create_pool(url).await?,
                None => pool.clone(),
            };

            let store = Arc::new(PgStore::new(pool));
            Ok(Backend {
                runs: store.clone(),
                pipelines: store.clone(),
                schemas: store,
                destination: Arc::new(PgDestinationWriter::new(destination_pool)),
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tributary_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tributary Orchestrator...");

    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!(
        id = %config.orchestrator_id,
        backend = ?config.state_backend,
        max_concurrent_runs = config.max_concurrent_runs,
        "Configuration loaded"
    );

    let backend = connect(&config).await?;

    let request_timeout = config.stage_request_timeout;
    let results = Arc::new(S3ResultSource::from_env().await);
    let clients = StageClients {
        transform: Arc::new(HttpStageClient::new(&config.transform_url, request_timeout)?),
        catalog: Arc::new(HttpStageClient::new(&config.catalog_url, request_timeout)?),
        query: Arc::new(HttpStageClient::new(&config.query_url, request_timeout)?),
        load: Arc::new(LoadStageClient::new(backend.destination, results)),
    };

    let engine = Engine {
        store: backend.runs,
        clients,
        registry: SchemaRegistry::new(backend.schemas),
        events: Arc::new(TracingEventSink),
        settings: config.engine_settings(),
    };
    let orchestrator = Orchestrator::new(engine, backend.pipelines);

    // Adopt runs orphaned by a previous instance before taking new work
    match orchestrator.recover().await {
        Ok(adopted) => tracing::info!(adopted, "Startup recovery complete"),
        Err(err) => tracing::warn!(error = %err, "Startup recovery failed"),
    }

    let recovery = orchestrator.clone();
    let recovery_interval = config.recovery_interval;
    tokio::spawn(async move { recovery.run_recovery_loop(recovery_interval).await });

    tokio::spawn(engine::schedule::run_schedule_loop(
        orchestrator.clone(),
        config.schedule_tick,
    ));

    // Build router with all API endpoints
    let app = api::create_router(api::AppState::new(orchestrator));

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
