// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! avn-daemon
#![deny(unsafe_code)]

use avn_core::ResponseEnvelope;
use avn_runtime::{Engine, RequestContext};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared daemon state.
#[derive(Clone)]
pub struct AppState {
    /// The engine; every request runs its secured lifecycle.
    pub engine: Engine,
}

/// Build the router: the single command endpoint plus `/health`, with
/// permissive CORS.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route("/", any(dispatch))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": avn_core::ENGINE_VERSION,
    }))
}

/// Upper bound on accepted request bodies (16 MiB).
const BODY_LIMIT: usize = 16 * 1024 * 1024;

async fn dispatch(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let query: BTreeMap<String, String> = parts
        .uri
        .query()
        .map(|raw| form_pairs(&Bytes::from(raw.as_bytes().to_vec())).into_iter().collect())
        .unwrap_or_default();
    let connect_info = parts.extensions.get::<ConnectInfo<SocketAddr>>().cloned();
    let headers = parts.headers;
    let body = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return envelope_response(ResponseEnvelope::from_error(
                "request",
                &avn_core::EngineError::invalid_argument(format!("unreadable body: {err}")),
            ));
        }
    };

    let request = build_request(&query, &headers, connect_info, &body);
    let action = request.action.clone();
    let engine = state.engine.clone();

    // The engine is synchronous (filesystem I/O); keep it off the
    // async workers.
    let envelope = tokio::task::spawn_blocking(move || engine.handle_request(request))
        .await
        .unwrap_or_else(|join_err| {
            ResponseEnvelope::from_error(
                &action,
                &avn_core::EngineError::internal(format!("worker failed: {join_err}")),
            )
        });

    envelope_response(envelope)
}

fn envelope_response(envelope: ResponseEnvelope) -> Response {
    let status =
        StatusCode::from_u16(envelope.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let retry_after = envelope
        .meta
        .get("retry_after")
        .and_then(Value::as_u64)
        .and_then(|secs| HeaderValue::from_str(&secs.to_string()).ok());

    let mut response = (status, Json(envelope)).into_response();
    if let Some(value) = retry_after {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

/// Assemble the engine request from query, headers, and body.
///
/// - `action` from query or JSON body; a `command` string switches to
///   statement dispatch.
/// - JSON object bodies merge into parameters; a top-level `payload`
///   key is preserved verbatim; non-JSON bodies are absorbed as the
///   payload.
/// - Token: `Authorization: Bearer …`, else `X-API-Key`, else
///   `token` / `api_key` parameter.
fn build_request(
    query: &BTreeMap<String, String>,
    headers: &HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: &Bytes,
) -> RequestContext {
    let mut draft = RequestDraft::default();

    for (key, value) in query {
        draft.absorb(key, Value::String(value.clone()));
    }

    if !body.is_empty() {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => {
                for (key, value) in map {
                    if key == "payload" {
                        // Preserved verbatim, never re-interpreted.
                        draft.parameters.insert("payload".into(), value);
                        continue;
                    }
                    draft.absorb(&key, value);
                }
            }
            Ok(other) => {
                draft.parameters.insert("payload".into(), other);
            }
            Err(_) => {
                if is_form(headers) {
                    for (key, value) in form_pairs(body) {
                        draft.absorb(&key, Value::String(value));
                    }
                } else {
                    draft.parameters.insert(
                        "payload".into(),
                        Value::String(String::from_utf8_lossy(body).into_owned()),
                    );
                }
            }
        }
    }

    let RequestDraft {
        parameters,
        mut action,
        statement,
        mut token,
        mut admin_secret,
    } = draft;

    // Header credentials outrank parameters.
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        token = Some(bearer.trim().to_string());
    } else if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        token = Some(key.trim().to_string());
    }
    if let Some(secret) = headers.get("x-admin-secret").and_then(|v| v.to_str().ok()) {
        admin_secret = Some(secret.trim().to_string());
    }

    let client = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_default();

    if action.is_empty() && statement.is_some() {
        action = "command".into();
    }

    RequestContext {
        client,
        token,
        admin_secret,
        action,
        parameters,
        statement,
    }
}

#[derive(Default)]
struct RequestDraft {
    parameters: BTreeMap<String, Value>,
    action: String,
    statement: Option<String>,
    token: Option<String>,
    admin_secret: Option<String>,
}

impl RequestDraft {
    fn absorb(&mut self, key: &str, value: Value) {
        match key {
            "action" => {
                if let Some(s) = value.as_str() {
                    self.action = s.to_ascii_lowercase();
                }
            }
            "command" => {
                if let Some(s) = value.as_str() {
                    self.statement = Some(s.to_string());
                }
            }
            "token" | "api_key" => {
                if self.token.is_none() {
                    self.token = value.as_str().map(str::to_string);
                }
            }
            "admin_secret" => {
                if self.admin_secret.is_none() {
                    self.admin_secret = value.as_str().map(str::to_string);
                }
            }
            _ => {
                self.parameters.insert(key.to_string(), value);
            }
        }
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

fn form_pairs(body: &Bytes) -> Vec<(String, String)> {
    String::from_utf8_lossy(body)
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((
                urldecode(key),
                urldecode(value),
            ))
        })
        .collect()
}

fn urldecode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Serve the app on `bind`.
///
/// # Errors
///
/// Propagates bind and serve failures.
pub async fn serve(state: Arc<AppState>, bind: SocketAddr) -> anyhow::Result<()> {
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "daemon listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
