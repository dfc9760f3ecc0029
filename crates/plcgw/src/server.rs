//! HTTP control API.
//!
//! `GET /api/plc?action=...` for queries, `POST /api/plc` with a JSON body
//! for everything, `GET /healthz` for liveness.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::debug;

use plcgw_core::{ControlRequest, ControlResponse, ControlSurface, Outcome};

#[derive(Debug, Deserialize)]
struct ActionQuery {
    action: Option<String>,
}

pub fn router(surface: Arc<ControlSurface>) -> Router {
    Router::new()
        .route("/api/plc", get(query).post(command))
        .route("/healthz", get(health))
        .with_state(surface)
}

/// Serve until `shutdown` resolves, then finish in-flight requests.
pub async fn serve(
    listener: TcpListener,
    surface: Arc<ControlSurface>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(surface))
        .with_graceful_shutdown(shutdown)
        .await
}

fn status_code(outcome: Outcome) -> StatusCode {
    match outcome {
        Outcome::Ok => StatusCode::OK,
        Outcome::BadRequest => StatusCode::BAD_REQUEST,
        Outcome::NotFound => StatusCode::NOT_FOUND,
        Outcome::Conflict => StatusCode::CONFLICT,
        Outcome::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Outcome::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond(response: &ControlResponse) -> Response {
    (status_code(response.outcome), Json(response)).into_response()
}

fn bad_request(error: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": error })),
    )
        .into_response()
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn query(
    State(surface): State<Arc<ControlSurface>>,
    Query(params): Query<ActionQuery>,
) -> Response {
    let Some(action) = params.action else {
        return bad_request("Missing 'action' query parameter".into());
    };
    let request = match serde_json::from_value::<ControlRequest>(json!({ "action": action })) {
        Ok(request) if request.is_query() => request,
        Ok(_) => return bad_request(format!("Action '{action}' requires POST")),
        Err(_) => return bad_request(format!("Unknown action '{action}'")),
    };
    debug!(%action, "control query");
    respond(&surface.handle(request).await)
}

async fn command(State(surface): State<Arc<ControlSurface>>, body: Bytes) -> Response {
    respond(&surface.handle_body(&body).await)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
