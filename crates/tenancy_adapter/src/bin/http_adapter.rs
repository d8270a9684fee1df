#![forbid(unsafe_code)]

use std::{env, net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tenancy_adapter::{
    AdapterErrorResponse, AdapterFailure, AdapterHealthResponse, AdapterRuntime, RefreshResponse,
    SimulateCheckRequest, SimulateCheckResponse, StartSubmissionRequest, SubmissionResponse,
    VerificationStateResponse,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

type Rejection = (StatusCode, Json<AdapterErrorResponse>);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let bind = env::var("TENANCY_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let addr: SocketAddr = bind.parse()?;

    let runtime = Arc::new(AdapterRuntime::default_from_env()?);
    runtime.refresh().await;

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/verification", get(verification_state))
        .route("/v1/verification/refresh", post(refresh))
        .route("/v1/simulation/checks/:check/simulate", post(simulate_check))
        .route("/v1/simulation/reset", post(reset_simulation))
        .route("/v1/simulation/complete", post(complete_simulation))
        .route("/v1/submissions", get(submission).post(start_submission))
        .with_state(Arc::clone(&runtime));

    info!(%addr, "tenancy_adapter_http listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    runtime.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

fn reject(failure: AdapterFailure) -> Rejection {
    let status = match failure {
        AdapterFailure::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AdapterFailure::SimulationInactive | AdapterFailure::Conflict(_) => StatusCode::CONFLICT,
        AdapterFailure::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(failure.to_response()))
}

async fn healthz(State(runtime): State<Arc<AdapterRuntime>>) -> Json<AdapterHealthResponse> {
    Json(runtime.health_report())
}

async fn verification_state(
    State(runtime): State<Arc<AdapterRuntime>>,
) -> Json<VerificationStateResponse> {
    Json(runtime.verification_report())
}

async fn refresh(State(runtime): State<Arc<AdapterRuntime>>) -> Json<RefreshResponse> {
    Json(runtime.refresh().await)
}

async fn simulate_check(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(check): Path<String>,
    Json(request): Json<SimulateCheckRequest>,
) -> Result<Json<SimulateCheckResponse>, Rejection> {
    runtime
        .simulate_check(&check, request)
        .await
        .map(Json)
        .map_err(reject)
}

async fn reset_simulation(
    State(runtime): State<Arc<AdapterRuntime>>,
) -> Result<Json<VerificationStateResponse>, Rejection> {
    runtime.reset_simulation().await.map(Json).map_err(reject)
}

async fn complete_simulation(
    State(runtime): State<Arc<AdapterRuntime>>,
) -> Result<Json<VerificationStateResponse>, Rejection> {
    runtime.complete_simulation().await.map(Json).map_err(reject)
}

async fn start_submission(
    State(runtime): State<Arc<AdapterRuntime>>,
    Json(request): Json<StartSubmissionRequest>,
) -> Result<Json<SubmissionResponse>, Rejection> {
    runtime.start_submission(request).await.map(Json).map_err(reject)
}

async fn submission(
    State(runtime): State<Arc<AdapterRuntime>>,
) -> Result<Json<SubmissionResponse>, Rejection> {
    runtime.submission_report().map(Json).map_err(reject)
}
