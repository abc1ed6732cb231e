use crate::catalog::DeviceCatalog;
use crate::config::RunnerConfig;
use crate::core::{BuildRequest, BuildResult, Device, ErrorKind};
use crate::discovery::{DiscoveredDevice, DiscoveredDevices, DiscoveryEvent};
use crate::events::EventBus;
use crate::orchestrator::{BuildOrchestrator, BUSY_MESSAGE};
use crate::BuildRunner;
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream};
use parking_lot::RwLock;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<dyn BuildRunner>,
    pub catalog: Arc<DeviceCatalog>,
    pub events: EventBus,
    pub discovered: Arc<RwLock<DiscoveredDevices>>,
}

impl AppState {
    pub fn new(runner: Arc<dyn BuildRunner>, catalog: DeviceCatalog, events: EventBus) -> Self {
        Self {
            runner,
            catalog: Arc::new(catalog),
            events,
            discovered: Arc::new(RwLock::new(DiscoveredDevices::new())),
        }
    }
}

fn status_for(result: &BuildResult) -> StatusCode {
    if result.success {
        StatusCode::OK
    } else if result.error_type == Some(ErrorKind::GenericError)
        && result.message.as_deref() == Some(BUSY_MESSAGE)
    {
        StatusCode::CONFLICT
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    }
}

async fn build_handler(
    State(state): State<AppState>,
    Json(request): Json<BuildRequest>,
) -> (StatusCode, Json<BuildResult>) {
    info!(
        "Build request: {:?} {} from {}",
        request.job_type,
        request.target.name,
        request.firmware_source.kind_name()
    );

    let result = state.runner.submit_build(&request).await;
    if !result.success {
        error!(
            "Build failed: {:?} {}",
            result.error_type,
            result.message.as_deref().unwrap_or_default()
        );
    }

    (status_for(&result), Json(result))
}

async fn devices_handler(State(state): State<AppState>) -> Json<Vec<Device>> {
    Json(state.catalog.devices().to_vec())
}

async fn discovered_handler(State(state): State<AppState>) -> Json<Vec<DiscoveredDevice>> {
    Json(state.discovered.read().snapshot())
}

/// Accepts announcements from a network discovery agent.
async fn discovery_event_handler(
    State(state): State<AppState>,
    Json(event): Json<DiscoveryEvent>,
) -> StatusCode {
    info!("Discovery event: {:?}", event);
    state.discovered.write().apply(event);
    StatusCode::NO_CONTENT
}

/// Server-sent stream of `progress` and `log` events for builds started
/// after the client connected.
async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let progress = sse_topic(state.events.subscribe_progress(), "progress");
    let logs = sse_topic(state.events.subscribe_log(), "log");
    Sse::new(stream::select(progress, logs)).keep_alive(KeepAlive::default())
}

fn sse_topic<T>(
    rx: broadcast::Receiver<T>,
    name: &'static str,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    T: Clone + Serialize + Send + 'static,
{
    stream::unfold(rx, move |mut rx| async move {
        let event = match rx.recv().await {
            Ok(item) => Event::default()
                .event(name)
                .json_data(&item)
                .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
            // Tell the client it lost events instead of silently skipping them.
            Err(RecvError::Lagged(missed)) => Event::default()
                .event("lagged")
                .data(format!("{} {} events dropped", missed, name)),
            Err(RecvError::Closed) => return None,
        };
        Some((Ok(event), rx))
    })
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "firmware-runner",
        "version": env!("CARGO_PKG_VERSION"),
        "busy": state.runner.is_busy(),
    }))
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/build", post(build_handler))
        .route("/devices", get(devices_handler))
        .route("/health", get(health_handler))
        .route("/events", get(events_handler))
        .route(
            "/discovered",
            get(discovered_handler).post(discovery_event_handler),
        )
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .with_state(state)
}

/// Forwards pipeline notifications and build output to the process log.
fn spawn_event_logger(bus: &EventBus) {
    let mut progress = bus.subscribe_progress();
    tokio::spawn(async move {
        loop {
            match progress.recv().await {
                Ok(event) => info!("Progress {:?} {:?}", event.kind, event.step),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Progress logger lagged, {} events skipped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut logs = bus.subscribe_log();
    tokio::spawn(async move {
        loop {
            match logs.recv().await {
                Ok(batch) => {
                    for line in batch.data.lines() {
                        info!(target: "build_log", "{}", line);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(target: "build_log", "{} log batches dropped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

pub async fn run_server(config: RunnerConfig) -> Result<()> {
    let catalog = match &config.device_catalog {
        Some(path) => DeviceCatalog::load(path).await?,
        None => DeviceCatalog::default(),
    };

    let bus = EventBus::with_capacity(config.event_capacity);
    spawn_event_logger(&bus);

    let orchestrator = BuildOrchestrator::from_config(&config, bus.clone());
    orchestrator.start_log_ticker(config.log_flush_interval);

    let app = create_app(AppState::new(Arc::new(orchestrator), catalog, bus));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server running on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
