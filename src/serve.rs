use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::artifact::ModelArtifact;
use crate::error::{ErrorKind, SpilloverError};
use crate::model::{CertificationReport, ErrorResponse, PredictRequest, PredictResponse};

/// Handle to the model currently being served. Replacing it swaps the whole
/// artifact; requests already holding the previous `Arc` finish against it.
#[derive(Debug, Clone)]
pub struct ModelSlot {
    tx: Arc<watch::Sender<Arc<ModelArtifact>>>,
}

impl ModelSlot {
    pub fn new(artifact: ModelArtifact) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(artifact));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<ModelArtifact> {
        self.tx.borrow().clone()
    }

    /// Install a new artifact and return the one it replaced.
    pub fn replace(&self, artifact: ModelArtifact) -> Arc<ModelArtifact> {
        let next = Arc::new(artifact);
        tracing::info!(version = %next.version, "serving model replaced");
        self.tx.send_replace(next)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ModelArtifact>> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Uuid,
    pub created_at: DateTime<Utc>,
    pub linear_only: bool,
}

pub fn router(slot: ModelSlot) -> Router {
    Router::new()
        .route("/predict", post(predict_handler))
        .route("/report", get(report_handler))
        .route("/health", get(health_handler))
        .with_state(slot)
}

pub async fn serve(bind: &str, slot: ModelSlot) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, version = %slot.current().version, "serving spillover model");
    axum::serve(listener, router(slot)).await?;
    Ok(())
}

fn error_response(err: &SpilloverError) -> Response {
    let status = match err.kind() {
        ErrorKind::DataError => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::from(err))).into_response()
}

pub async fn predict_handler(
    State(slot): State<ModelSlot>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            return error_response(&SpilloverError::InvalidInput(rejection.body_text()));
        }
    };
    let artifact = slot.current();
    match artifact.model.predict(req.fed_rate, req.selic) {
        Ok(prediction) => Json(PredictResponse::from(&prediction)).into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "prediction request failed");
            error_response(&e)
        }
    }
}

pub async fn report_handler(State(slot): State<ModelSlot>) -> Json<CertificationReport> {
    Json(slot.current().report.clone())
}

pub async fn health_handler(State(slot): State<ModelSlot>) -> Json<HealthResponse> {
    let artifact = slot.current();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: artifact.version,
        created_at: artifact.created_at,
        linear_only: artifact.model.is_linear_only(),
    })
}
