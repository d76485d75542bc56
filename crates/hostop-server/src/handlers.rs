//! HTTP route handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use hostop_broker::client_session::run_client_session;
use hostop_core::api::{CreateCvdRequest, DeviceDescriptor, ListOperationsResponse};
use hostop_core::messages::{ForwardMsg, InfraConfig, NewConnMsg, NewConnReply};
use hostop_core::{Operation, OperatorError};
use hostop_transport::ws_pair;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;
use crate::server::AppState;

type ApiResult<T> = Result<T, ApiError>;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        ApiError(OperatorError::validation(format!(
            "Malformed JSON in request: {e}"
        )))
    })
}

fn parse_int(params: &HashMap<String, String>, name: &str, default: i64) -> ApiResult<i64> {
    match params.get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            ApiError(OperatorError::validation(format!(
                "Invalid value for {name}: {raw}"
            )))
        }),
    }
}

pub async fn statusz() -> &'static str {
    "ok"
}

pub async fn create_cvd(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Operation>> {
    let req: CreateCvdRequest = parse_body(&body)?;
    Ok(Json(state.instances.create_cvd(req)?))
}

pub async fn list_devices(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.devices.list_ids())
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeviceDescriptor>> {
    let device = state
        .devices
        .get(&id)
        .ok_or_else(|| OperatorError::not_found(format!("Device not found: {id}")))?;
    Ok(Json(DeviceDescriptor {
        device_id: device.id().to_owned(),
        device_port: device.port(),
        device_info: device.info().clone(),
    }))
}

pub async fn device_files(
    State(state): State<AppState>,
    Path((id, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> ApiResult<Response> {
    let device = state
        .devices
        .get(&id)
        .ok_or_else(|| OperatorError::not_found(format!("Device not found: {id}")))?;
    let proxied = state.proxy.fetch(&device, &path, query.as_deref()).await?;

    let status = StatusCode::from_u16(proxied.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut resp = (status, proxied.body).into_response();
    if let Some(ct) = proxied
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        resp.headers_mut().insert(header::CONTENT_TYPE, ct);
    }
    Ok(resp)
}

pub async fn list_operations(State(state): State<AppState>) -> Json<ListOperationsResponse> {
    Json(ListOperationsResponse {
        operations: state.instances.operations().list_running(),
    })
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Operation>> {
    Ok(Json(state.instances.operations().get(&name)?))
}

/// Block until the operation is done or the configured deadline passes.
pub async fn wait_operation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Operation>> {
    let ops = state.instances.operations();
    match tokio::time::timeout(state.wait_timeout, ops.wait(&name)).await {
        Ok(op) => Ok(Json(op?)),
        Err(_) => Err(ApiError(OperatorError::Unavailable(format!(
            "Operation {name} is still running"
        )))),
    }
}

pub async fn create_polled_connection(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<NewConnReply>> {
    let msg: NewConnMsg = parse_body(&body)?;
    let conn = state.polled.create(&state.devices, &msg.device_id)?;
    Ok(Json(NewConnReply {
        connection_id: conn.id().to_string(),
        device_info: conn.device().info().clone(),
    }))
}

pub async fn forward_polled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<&'static str>> {
    let msg: ForwardMsg = parse_body(&body)?;
    let payload = msg
        .payload
        .ok_or_else(|| OperatorError::validation("Missing payload"))?;
    state.polled.forward(&id, payload).await?;
    Ok(Json("ok"))
}

pub async fn polled_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Value>>> {
    let start = parse_int(&params, "start", 0)?;
    let count = parse_int(&params, "count", -1)?;
    Ok(Json(state.polled.get_messages(&id, start, count)?))
}

pub async fn infra_config(State(state): State<AppState>) -> Json<InfraConfig> {
    Json(state.infra.as_ref().clone())
}

pub async fn connect_client(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| client_socket(socket, state))
}

async fn client_socket(socket: WebSocket, state: AppState) {
    let (sink, source) = ws_pair(socket);
    run_client_session(&state.devices, &state.infra, Arc::new(sink), source).await;
}
