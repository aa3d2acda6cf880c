// Maintenance API server
// Decision: no real cloud-calling provider client ships in this repo, so this binary wires
// the engine to MockProviderClient so the server is runnable standalone. Point
// MAINTENANCE_DATA_DIR at a real path for durable state.

mod error;
mod operations;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use maintenance_engine::{
    Engine, EngineConfig, FileStore, MockProviderClient, NullNotifier, NullStore,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        operations::create_operation,
        operations::list_operations,
        operations::get_operation,
        operations::list_events,
        operations::start_operation,
        operations::pause_operation,
        operations::resume_operation,
        operations::patch_operation,
        operations::delete_operation,
    ),
    components(
        schemas(
            maintenance_engine::Operation,
            maintenance_engine::OperationState,
            maintenance_engine::OperationType,
            maintenance_engine::OperationParams,
            maintenance_engine::OperationRequest,
            maintenance_engine::InstanceTypeChangeParams,
            maintenance_engine::EngineUpgradeParams,
            maintenance_engine::InstanceCycleParams,
            maintenance_engine::Step,
            maintenance_engine::StepState,
            maintenance_engine::StepAction,
            maintenance_engine::WaitCondition,
            maintenance_engine::Event,
            maintenance_engine::EventType,
            maintenance_engine::InterventionResponse,
            maintenance_engine::InterventionAction,
            operations::PauseRequest,
            operations::PatchOperationRequest,
        )
    ),
    tags(
        (name = "operations", description = "Maintenance operation lifecycle: create, start, pause, resume, inspect"),
    ),
    info(
        title = "Maintenance Engine API",
        version = "0.1.0",
        description = "Orchestrates multi-step maintenance operations against Aurora-style clusters",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maintenance_api=debug,maintenance_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("maintenance-api starting...");

    let config = EngineConfig::from_env();
    tracing::info!(region = ?config.region, auto_resume = config.auto_resume, "engine configuration loaded");

    let store: Arc<dyn maintenance_engine::Store> = match &config.data_dir {
        Some(dir) => {
            tracing::info!(data_dir = %dir, "using file-backed store");
            Arc::new(FileStore::new(dir.clone()).await.context("failed to open file store")?)
        }
        None => {
            tracing::warn!("MAINTENANCE_DATA_DIR not set; using in-memory store, state will not survive a restart");
            Arc::new(NullStore::new())
        }
    };

    let provider = Arc::new(MockProviderClient::new());
    let notifier = Arc::new(NullNotifier);

    let engine = Engine::new(store, provider, notifier, config)
        .await
        .context("failed to initialize engine")?;

    let state = operations::AppState { engine };

    let app = Router::new()
        .route("/health", get(health))
        .merge(operations::routes(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = "0.0.0.0:8080";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
