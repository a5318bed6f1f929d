// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface of the broker.
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET | `/v2/catalog` | reload and return the catalog |
//! | PUT | `/v2/service_instances/{id}` | provision |
//! | GET | `/v2/service_instances/{id}` | status |
//! | GET | `/v2/service_instances/{id}/last_operation` | status |
//! | DELETE | `/v2/service_instances/{id}` | deprovision |
//! | PUT | `/v2/service_instances/{id}/service_bindings/{bid}` | bind |
//! | DELETE | `/v2/service_instances/{id}/service_bindings/{bid}` | unbind |
//!
//! Every route requires HTTP basic auth.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use couchbroker_core::{
    BrokerError, Catalog, LastOperation, LifecycleController, ProvisionRequest, UnbindOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Credentials every request must present.
#[derive(Clone)]
pub struct BasicAuth {
    user: String,
    password: String,
}

impl BasicAuth {
    /// Expect `user` / `password`.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Whether an `Authorization` header value carries the expected credentials.
    fn accepts(&self, header_value: &str) -> bool {
        let Some(encoded) = header_value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((user, password)) => user == self.user && password == self.password,
            None => false,
        }
    }
}

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    controller: LifecycleController,
    auth: Arc<BasicAuth>,
}

impl AppState {
    /// Create handler state.
    pub fn new(controller: LifecycleController, auth: BasicAuth) -> Self {
        Self {
            controller,
            auth: Arc::new(auth),
        }
    }

    /// The controller behind the handlers.
    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }
}

/// Build the broker router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v2/catalog", get(catalog_handler))
        .route(
            "/v2/service_instances/{instance_id}",
            put(create_instance_handler)
                .get(instance_status_handler)
                .delete(delete_instance_handler),
        )
        .route(
            "/v2/service_instances/{instance_id}/last_operation",
            get(instance_status_handler),
        )
        .route(
            "/v2/service_instances/{instance_id}/service_bindings/{binding_id}",
            put(bind_handler).delete(unbind_handler),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| state.auth.accepts(v));

    if !authorized {
        warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "Rejected request without valid credentials"
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            header::WWW_AUTHENTICATE,
            header::HeaderValue::from_static("Basic realm=\"couchbroker\""),
        );
        return (StatusCode::UNAUTHORIZED, headers, "Unauthorized").into_response();
    }
    next.run(request).await
}

// ============================================================================
// Errors
// ============================================================================

/// Handler error, rendered as a broker API error response.
#[derive(Debug)]
pub struct ApiError(BrokerError);

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(BrokerError::InvalidRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BrokerError::NotFound(_) => StatusCode::NOT_FOUND,
            BrokerError::Gone(_) => return (StatusCode::GONE, Json(json!({}))).into_response(),
            BrokerError::InvalidPlan(_) | BrokerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            debug!(error = %self.0, status = %status, "Request rejected");
        }
        (status, Json(json!({ "description": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Serialize)]
struct ProvisionResponse {
    dashboard_url: String,
    last_operation: LastOperation,
}

#[derive(Debug, Default, Deserialize)]
struct BindRequest {
    #[serde(default)]
    app_guid: Option<String>,
}

async fn catalog_handler(State(state): State<AppState>) -> ApiResult<Json<Catalog>> {
    Ok(Json(state.controller.reload_catalog().await?))
}

async fn create_instance_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ProvisionResponse>)> {
    let Json(request) = body?;
    if request.plan_id.is_empty() {
        let error = BrokerError::InvalidRequest("plan_id is required".to_string());
        return Err(error.into());
    }

    let last_operation = state
        .controller
        .create_instance(&instance_id, request)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ProvisionResponse {
            dashboard_url: last_operation.dashboard_url.clone(),
            last_operation,
        }),
    ))
}

async fn instance_status_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<LastOperation>> {
    let last_operation = state.controller.get_instance_status(&instance_id).await?;
    Ok(Json(last_operation))
}

async fn delete_instance_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.controller.delete_instance(&instance_id).await?;
    Ok(Json(json!({ "description": "deleted" })))
}

async fn bind_handler(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let app_guid = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<BindRequest>(&body)
            .map_err(|e| BrokerError::InvalidRequest(format!("invalid bind request: {}", e)))?
            .app_guid
    };
    let credentials = state
        .controller
        .bind_app(&binding_id, &instance_id, app_guid)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "credentials": credentials })),
    ))
}

async fn unbind_handler(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let response = match state.controller.unbind(&binding_id, &instance_id).await? {
        UnbindOutcome::Removed => {
            (StatusCode::OK, Json(json!({ "description": "deleted" }))).into_response()
        }
        UnbindOutcome::AlreadyGone => {
            (StatusCode::GONE, Json(json!({ "description": "already gone" }))).into_response()
        }
    };
    Ok(response)
}
