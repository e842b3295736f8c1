//! Environment, variable, promotion and deployment handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use chartdeck_dispatch::{DeploymentRequest, DispatchError};
use chartdeck_promote::{PromoteError, PromotionMode, compare};
use chartdeck_state::*;

use crate::ApiState;
use crate::response::{ApiResponse, error_response, internal};

/// Header naming the submitting user.
pub const USER_HEADER: &str = "x-user-id";

const SECRET_MASK: &str = "******";

fn environment_not_found(id: EnvironmentId) -> Response {
    error_response(&format!("environment {id} not found"), StatusCode::NOT_FOUND)
}

fn masked(mut var: Variable) -> Variable {
    if var.secret {
        var.value = SECRET_MASK.to_string();
    }
    var
}

// ── Environments ───────────────────────────────────────────────

/// Body of `POST /environments`.
#[derive(Debug, Deserialize)]
pub struct NewEnvironment {
    pub group: String,
    pub name: String,
    #[serde(default)]
    pub cluster: ClusterConnection,
    pub namespace: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub product_version: Option<String>,
}

/// GET /api/v1/environments
pub async fn list_environments(State(state): State<ApiState>) -> Response {
    match state.store.list_environments() {
        Ok(envs) => ApiResponse::ok(envs).into_response(),
        Err(e) => internal(e),
    }
}

/// POST /api/v1/environments
pub async fn create_environment(
    State(state): State<ApiState>,
    Json(req): Json<NewEnvironment>,
) -> Response {
    for (field, value) in [("group", &req.group), ("name", &req.name), ("namespace", &req.namespace)] {
        if value.trim().is_empty() {
            return error_response(&format!("{field} is required"), StatusCode::BAD_REQUEST);
        }
    }
    let env = Environment {
        id: 0,
        group: req.group,
        name: req.name,
        cluster: req.cluster,
        namespace: req.namespace,
        gateway: req.gateway,
        product_version: req.product_version,
        created_at: 0,
        updated_at: 0,
    };
    match state.store.create_environment(env) {
        Ok(env) => (StatusCode::CREATED, ApiResponse::ok(env)).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/environments/{id}
pub async fn get_environment(State(state): State<ApiState>, Path(id): Path<EnvironmentId>) -> Response {
    match state.store.get_environment(id) {
        Ok(Some(env)) => ApiResponse::ok(env).into_response(),
        Ok(None) => environment_not_found(id),
        Err(e) => internal(e),
    }
}

/// DELETE /api/v1/environments/{id}
pub async fn delete_environment(State(state): State<ApiState>, Path(id): Path<EnvironmentId>) -> Response {
    match state.store.delete_environment(id) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => environment_not_found(id),
        Err(e) => internal(e),
    }
}

// ── Variables ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub scope: Option<String>,
}

/// GET /api/v1/environments/{id}/variables[?scope=]
///
/// Secret values are masked.
pub async fn list_variables(
    State(state): State<ApiState>,
    Path(id): Path<EnvironmentId>,
    Query(query): Query<ScopeQuery>,
) -> Response {
    match state.store.get_environment(id) {
        Ok(Some(_)) => {}
        Ok(None) => return environment_not_found(id),
        Err(e) => return internal(e),
    }
    let vars = match &query.scope {
        Some(scope) => state.store.list_variables_by_scope(id, scope),
        None => state.store.list_variables_by_environment(id),
    };
    match vars {
        Ok(vars) => ApiResponse::ok(vars.into_iter().map(masked).collect::<Vec<_>>()).into_response(),
        Err(e) => internal(e),
    }
}

/// Body of `POST /environments/{id}/variables`.
#[derive(Debug, Deserialize)]
pub struct VariableInput {
    #[serde(default = "global_scope")]
    pub scope: String,
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub secret: bool,
    #[serde(default)]
    pub description: String,
}

fn global_scope() -> String {
    GLOBAL_SCOPE.to_string()
}

/// POST /api/v1/environments/{id}/variables
///
/// Values are checked against the configured rules in plaintext, then
/// encrypted when `secret` is set.
pub async fn upsert_variable(
    State(state): State<ApiState>,
    Path(id): Path<EnvironmentId>,
    Json(input): Json<VariableInput>,
) -> Response {
    if input.name.trim().is_empty() || input.scope.trim().is_empty() {
        return error_response("scope and name are required", StatusCode::BAD_REQUEST);
    }
    match state.store.get_environment(id) {
        Ok(Some(_)) => {}
        Ok(None) => return environment_not_found(id),
        Err(e) => return internal(e),
    }
    if let Err(violation) = state.rules.validate(&input.name, &input.value) {
        return error_response(&violation.to_string(), StatusCode::BAD_REQUEST);
    }

    let value = if input.secret {
        match state.cipher.encrypt(&input.value) {
            Ok(ciphertext) => ciphertext,
            Err(e) => return internal(e),
        }
    } else {
        input.value
    };
    let var = Variable {
        environment_id: id,
        scope: input.scope,
        name: input.name,
        value,
        secret: input.secret,
        description: input.description,
    };
    match state.store.upsert_variable(&var) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(masked(var))).into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct VariableKey {
    #[serde(default = "global_scope")]
    pub scope: String,
    pub name: String,
}

/// DELETE /api/v1/environments/{id}/variables?scope=&name=
pub async fn delete_variable(
    State(state): State<ApiState>,
    Path(id): Path<EnvironmentId>,
    Query(key): Query<VariableKey>,
) -> Response {
    match state.store.delete_variable(id, &key.scope, &key.name) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("variable not found", StatusCode::NOT_FOUND),
        Err(e) => internal(e),
    }
}

// ── Compare & promote ──────────────────────────────────────────

/// GET /api/v1/environments/{id}/compare/{target}
pub async fn compare_environments(
    State(state): State<ApiState>,
    Path((source, target)): Path<(EnvironmentId, EnvironmentId)>,
) -> Response {
    for id in [source, target] {
        match state.store.get_environment(id) {
            Ok(Some(_)) => {}
            Ok(None) => return environment_not_found(id),
            Err(e) => return internal(e),
        }
    }
    let vars = state
        .store
        .list_variables_by_environment(source)
        .and_then(|s| Ok((s, state.store.list_variables_by_environment(target)?)));
    match vars {
        Ok((source_vars, target_vars)) => ApiResponse::ok(compare(&source_vars, &target_vars)).into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct PromoteBody {
    pub source: EnvironmentId,
    pub mode: PromotionMode,
}

#[derive(Debug, Serialize)]
pub struct PromoteAccepted {
    pub source: EnvironmentId,
    pub target: EnvironmentId,
    pub variables_copied: u32,
}

/// POST /api/v1/environments/{id}/promote
///
/// Answers once variables are copied; releases follow in the background.
pub async fn promote_environment(
    State(state): State<ApiState>,
    Path(target): Path<EnvironmentId>,
    Json(body): Json<PromoteBody>,
) -> Response {
    match state.promoter.promote(body.source, target, body.mode).await {
        Ok(handle) => {
            let accepted = PromoteAccepted {
                source: body.source,
                target,
                variables_copied: handle.variables_copied,
            };
            info!(source = body.source, target, "promotion accepted");
            (StatusCode::ACCEPTED, ApiResponse::ok(accepted)).into_response()
        }
        Err(e @ PromoteError::Validation(_)) => error_response(&e.to_string(), StatusCode::BAD_REQUEST),
        Err(e @ PromoteError::EnvironmentNotFound(_)) => error_response(&e.to_string(), StatusCode::NOT_FOUND),
        Err(e) => internal(e),
    }
}

// ── Deployments ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DispatchBody {
    pub deployments: Vec<DeploymentRequest>,
}

#[derive(Debug, Serialize)]
pub struct DispatchAccepted {
    pub request_id: RequestId,
    pub units: usize,
}

/// POST /api/v1/deployments
///
/// Acceptance only; poll `/requests/{id}` for the outcome.
pub async fn dispatch_deployments(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<DispatchBody>,
) -> Response {
    let Some(user_id) = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return error_response(&format!("{USER_HEADER} header is required"), StatusCode::BAD_REQUEST);
    };

    let units = body.deployments.len();
    match state.dispatcher.dispatch(user_id, body.deployments).await {
        Ok(request) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(DispatchAccepted {
                request_id: request.id,
                units,
            }),
        )
            .into_response(),
        Err(e @ DispatchError::Validation(_)) => error_response(&e.to_string(), StatusCode::BAD_REQUEST),
        Err(e @ DispatchError::EnvironmentNotFound(_)) => error_response(&e.to_string(), StatusCode::NOT_FOUND),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Serialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: RequestDeployment,
    pub deployments: Vec<Deployment>,
}

/// GET /api/v1/requests/{id}
pub async fn get_request(State(state): State<ApiState>, Path(id): Path<RequestId>) -> Response {
    let request = match state.store.get_request(id) {
        Ok(Some(request)) => request,
        Ok(None) => return error_response(&format!("request {id} not found"), StatusCode::NOT_FOUND),
        Err(e) => return internal(e),
    };
    match state.store.list_deployments_for_request(id) {
        Ok(deployments) => ApiResponse::ok(RequestView { request, deployments }).into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user: String,
}

/// GET /api/v1/requests?user=
pub async fn list_requests(State(state): State<ApiState>, Query(query): Query<UserQuery>) -> Response {
    match state.store.list_requests_for_user(&query.user) {
        Ok(requests) => ApiResponse::ok(requests).into_response(),
        Err(e) => internal(e),
    }
}
