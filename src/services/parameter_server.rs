//! Parameter server HTTP API
//!
//! Serves the current policy snapshot and TD-errors to actors. Handlers only
//! ever read through [`ModelReader`], so they never wait on a training step.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::domain::{PolicyVariables, Transitions};
use crate::error::{LearnerError, Result};
use crate::model::ModelReader;
use crate::services::actor_hub::ActorHubHandle;

/// Shared state for the parameter server
pub struct ServerState {
    model: ModelReader,
    hub: Option<ActorHubHandle>,
    started_at: Instant,
}

impl ServerState {
    pub fn new(model: ModelReader) -> Self {
        Self {
            model,
            hub: None,
            started_at: Instant::now(),
        }
    }

    /// Report the actor count on `/status`
    pub fn with_hub(mut self, hub: ActorHubHandle) -> Self {
        self.hub = Some(hub);
        self
    }
}

/// `/status` response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub step: u64,
    pub active_actors: usize,
    pub uptime_seconds: u64,
}

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, String)>;

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/policy_variables", get(policy_variables_handler))
        .route("/td_errors", post(td_errors_handler))
        .route("/healthz", get(liveness_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parameter server
pub struct ParameterServer {
    state: Arc<ServerState>,
}

impl ParameterServer {
    pub fn new(state: ServerState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Bind `addr` and serve until the listener fails
    pub async fn run(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Starting parameter server on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        axum::serve(listener, router(Arc::clone(&self.state)))
            .await
            .map_err(|e| LearnerError::Internal(format!("Parameter server error: {}", e)))
    }
}

async fn policy_variables_handler(State(state): State<Arc<ServerState>>) -> Json<PolicyVariables> {
    Json(state.model.current().variables())
}

async fn td_errors_handler(
    State(state): State<Arc<ServerState>>,
    Json(transitions): Json<Transitions>,
) -> ApiResult<Vec<f32>> {
    let policy = state.model.current();
    let result = tokio::task::spawn_blocking(move || policy.td_errors(&transitions))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match result {
        Ok(td_errors) => Ok(Json(td_errors)),
        Err(e @ (LearnerError::LengthMismatch { .. } | LearnerError::Algorithm(_))) => {
            warn!(error = %e, "rejected td_errors request");
            Err((StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
        }
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

async fn status_handler(State(state): State<Arc<ServerState>>) -> ApiResult<StatusResponse> {
    let active_actors = match &state.hub {
        Some(hub) => hub
            .active_actors()
            .await
            .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?
            .len(),
        None => 0,
    };

    Ok(Json(StatusResponse {
        step: state.model.step(),
        active_actors,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}
