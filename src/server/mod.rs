//! Management HTTP API
//!
//! CRUD over registered peripherals, subscribers, and endpoints, plus the
//! activity monitoring snapshot. Writes go through the storage layer; the
//! pipeline is never touched directly.

use crate::error::{Error, Result};
use crate::monitoring::{ActivityMonitor, ActivityRecord};
use crate::notification::subscriber::{Endpoint, Subscriber, Target};
use crate::storage::{NewEndpoint, NewSubscriber, NewTarget, Storage};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub activity: Arc<ActivityMonitor>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    take: usize,
    #[serde(default)]
    skip: usize,
}

#[derive(Debug, Serialize)]
struct ListResponse<T> {
    items: Vec<T>,
    quantity: u64,
}

#[derive(Debug, Serialize)]
struct CreatedResponse {
    id: u64,
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Config(_) | Error::InvalidUniqueKey(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({ "error": self.0.to_string() }));

        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Serve the management API until the shutdown signal flips.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    info!(address = %addr, "management api listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| Error::Network(e.to_string()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/monitoring/activity", get(get_activity))
        .route(
            "/api/v1/registry/peripherals",
            get(list_peripherals).post(create_peripheral),
        )
        .route(
            "/api/v1/registry/peripherals/:id",
            get(get_peripheral)
                .put(update_peripheral)
                .delete(delete_peripheral),
        )
        .route(
            "/api/v1/registry/peripherals/:id/subscribers",
            get(list_subscribers).post(create_subscriber),
        )
        .route(
            "/api/v1/registry/subscribers/:id",
            axum::routing::delete(delete_subscriber),
        )
        .route(
            "/api/v1/registry/endpoints",
            get(list_endpoints).post(create_endpoint),
        )
        .route(
            "/api/v1/registry/endpoints/:id",
            get(get_endpoint).put(update_endpoint).delete(delete_endpoint),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn get_activity(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<ListResponse<ActivityRecord>> {
    let items = state.activity.get_records(query.take, query.skip);
    let quantity = state.activity.quantity() as u64;

    Json(ListResponse { items, quantity })
}

async fn list_peripherals(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse<Target>>> {
    let (items, quantity) = state.storage.find_targets(query.take, query.skip).await?;

    Ok(Json(ListResponse { items, quantity }))
}

async fn get_peripheral(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Target>> {
    let target = state
        .storage
        .get_target(id)
        .await?
        .ok_or_else(|| Error::NotFound("target".to_string()))?;

    Ok(Json(target))
}

async fn create_peripheral(
    State(state): State<AppState>,
    Json(target): Json<NewTarget>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    validate_target(&target)?;

    let id = state.storage.create_target(target).await?;

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn update_peripheral(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(target): Json<NewTarget>,
) -> ApiResult<StatusCode> {
    validate_target(&target)?;

    state
        .storage
        .update_target(Target {
            id,
            key: target.key,
            name: target.name,
            kind: target.kind,
            enabled: target.enabled,
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn delete_peripheral(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<StatusCode> {
    state.storage.delete_target(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn list_subscribers(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Vec<Subscriber>>> {
    Ok(Json(state.storage.get_subscribers(id).await?))
}

async fn create_subscriber(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(subscriber): Json<NewSubscriber>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    if subscriber.name.trim().is_empty() {
        return Err(Error::Config("missed subscriber name".to_string()).into());
    }

    if subscriber.event.trim().is_empty() {
        return Err(Error::Config("missed subscriber event".to_string()).into());
    }

    let id = state.storage.create_subscriber(id, subscriber).await?;

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn delete_subscriber(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<StatusCode> {
    state.storage.delete_subscriber(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn list_endpoints(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse<Endpoint>>> {
    let (items, quantity) = state.storage.find_endpoints(query.take, query.skip).await?;

    Ok(Json(ListResponse { items, quantity }))
}

async fn get_endpoint(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Endpoint>> {
    let endpoint = state
        .storage
        .get_endpoint(id)
        .await?
        .ok_or_else(|| Error::NotFound("endpoint".to_string()))?;

    Ok(Json(endpoint))
}

async fn create_endpoint(
    State(state): State<AppState>,
    Json(endpoint): Json<NewEndpoint>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    validate_endpoint(&endpoint)?;

    let id = state.storage.create_endpoint(endpoint).await?;

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn update_endpoint(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(endpoint): Json<NewEndpoint>,
) -> ApiResult<StatusCode> {
    validate_endpoint(&endpoint)?;

    state
        .storage
        .update_endpoint(Endpoint {
            id,
            name: endpoint.name,
            url: endpoint.url,
            method: endpoint.method,
            headers: endpoint.headers,
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn delete_endpoint(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<StatusCode> {
    state.storage.delete_endpoint(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

fn validate_target(target: &NewTarget) -> std::result::Result<(), ApiError> {
    if target.key.trim().is_empty() {
        return Err(Error::Config("missed peripheral key".to_string()).into());
    }

    if target.name.trim().is_empty() {
        return Err(Error::Config("missed peripheral name".to_string()).into());
    }

    Ok(())
}

fn validate_endpoint(endpoint: &NewEndpoint) -> std::result::Result<(), ApiError> {
    if endpoint.name.trim().is_empty() {
        return Err(Error::Config("missed endpoint name".to_string()).into());
    }

    if endpoint.url.trim().is_empty() {
        return Err(Error::Config("missed endpoint url".to_string()).into());
    }

    if endpoint.method.trim().is_empty() {
        return Err(Error::Config("missed endpoint method".to_string()).into());
    }

    Ok(())
}
