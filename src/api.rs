use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::dashboard::{DashboardClient, UpstreamReply};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
}

fn required(value: Option<String>) -> Result<String, ApiError> {
    value.filter(|v| !v.is_empty()).ok_or(ApiError::MissingParams)
}

fn relay(reply: UpstreamReply) -> Result<Json<Value>, ApiError> {
    if reply.is_success() {
        return Ok(Json(reply.body));
    }
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Err(ApiError::Upstream { status, body: reply.body })
}

pub async fn import_task(
    State(client): State<DashboardClient>,
    req: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = req?;
    let base_url = required(req.base_url)?;
    let cookie = required(req.cookie)?;
    let data = match req.data {
        Some(Value::Object(map)) if !map.is_empty() => Value::Object(map),
        _ => return Err(ApiError::MissingParams),
    };

    let reply = client.create_service(&base_url, &cookie, &data).await?;
    if !reply.is_success() {
        warn!(base_url = %base_url, status = reply.status, "dashboard rejected task");
    }
    relay(reply)
}

pub async fn list_tasks(
    State(client): State<DashboardClient>,
    req: Result<Json<ListRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = req?;
    let base_url = required(req.base_url)?;
    let cookie = required(req.cookie)?;
    relay(client.list_services(&base_url, &cookie).await?)
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "nezha-import proxy is running",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub fn create_router(client: DashboardClient) -> Router {
    Router::new()
        .route("/api/import", post(import_task))
        .route("/api/list", post(list_tasks))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(client)
}

pub async fn start_server(port: u16, client: DashboardClient) -> anyhow::Result<()> {
    let app = create_router(client);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Import proxy: http://localhost:{}", listener.local_addr()?.port());
    axum::serve(listener, app).await?;
    Ok(())
}
