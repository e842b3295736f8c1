//! Chart, release and reporting handlers.
//!
//! Calls that reach the chart backend or the registry map collaborator
//! failures to 502.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use chartdeck_backend::{Kubeconfig, TemplateKind};
use chartdeck_insight::{InsightError, UpgradeQuery};
use chartdeck_state::{ChartRelease, Environment, EnvironmentId};

use crate::ApiState;
use crate::response::{ApiResponse, bad_gateway, error_response, internal};

fn load_environment(state: &ApiState, id: EnvironmentId) -> Result<Environment, Response> {
    match state.store.get_environment(id) {
        Ok(Some(env)) => Ok(env),
        Ok(None) => Err(error_response(&format!("environment {id} not found"), StatusCode::NOT_FOUND)),
        Err(e) => Err(internal(e)),
    }
}

// ── Charts ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub all_versions: bool,
}

/// GET /api/v1/charts?q=&all_versions=
pub async fn search_charts(State(state): State<ApiState>, Query(query): Query<SearchQuery>) -> Response {
    match state.backend.search_charts(&query.q, query.all_versions).await {
        Ok(charts) => ApiResponse::ok(charts).into_response(),
        Err(e) => bad_gateway(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TemplateQuery {
    pub chart: String,
    pub version: String,
    pub kind: TemplateKind,
}

/// GET /api/v1/charts/template?chart=&version=&kind=values|readme|chart
pub async fn get_template(State(state): State<ApiState>, Query(query): Query<TemplateQuery>) -> Response {
    match state
        .templates
        .get_template(&query.chart, &query.version, query.kind)
        .await
    {
        Ok(body) => ApiResponse::ok(body).into_response(),
        Err(e) => bad_gateway(e),
    }
}

/// POST /api/v1/charts/releases
pub async fn register_chart_release(
    State(state): State<ApiState>,
    Json(release): Json<ChartRelease>,
) -> Response {
    if release.chart.trim().is_empty() || release.version.trim().is_empty() {
        return error_response("chart and version are required", StatusCode::BAD_REQUEST);
    }
    match state.store.put_chart_release(&release) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(release)).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/charts/{name}/{version}/graph
pub async fn dependency_graph(
    State(state): State<ApiState>,
    Path((name, version)): Path<(String, String)>,
) -> Response {
    match state.graphs.build(&name, &version) {
        Ok(graph) => ApiResponse::ok(graph).into_response(),
        Err(e @ InsightError::ChartNotFound(_)) => error_response(&e.to_string(), StatusCode::NOT_FOUND),
        Err(e) => internal(e),
    }
}

/// POST /api/v1/upgrades
pub async fn detect_upgrades(State(state): State<ApiState>, Json(queries): Json<Vec<UpgradeQuery>>) -> Response {
    let reports = state.detector.detect_many(queries).await;
    ApiResponse::ok(reports).into_response()
}

// ── Releases ───────────────────────────────────────────────────

/// GET /api/v1/environments/{id}/releases
pub async fn list_releases(State(state): State<ApiState>, Path(id): Path<EnvironmentId>) -> Response {
    let env = match load_environment(&state, id) {
        Ok(env) => env,
        Err(resp) => return resp,
    };
    let kubeconfig = Kubeconfig::for_environment(&env);
    match state.backend.list_releases(&kubeconfig, &env.namespace).await {
        Ok(releases) => ApiResponse::ok(releases).into_response(),
        Err(e) => bad_gateway(e),
    }
}

/// GET /api/v1/environments/{id}/releases/{name}/history
pub async fn release_history(
    State(state): State<ApiState>,
    Path((id, name)): Path<(EnvironmentId, String)>,
) -> Response {
    let env = match load_environment(&state, id) {
        Ok(env) => env,
        Err(resp) => return resp,
    };
    match state
        .backend
        .release_history(&Kubeconfig::for_environment(&env), &name)
        .await
    {
        Ok(history) => ApiResponse::ok(history).into_response(),
        Err(e) => bad_gateway(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RollbackBody {
    pub revision: u32,
}

/// POST /api/v1/environments/{id}/releases/{name}/rollback
pub async fn rollback_release(
    State(state): State<ApiState>,
    Path((id, name)): Path<(EnvironmentId, String)>,
    Json(body): Json<RollbackBody>,
) -> Response {
    if body.revision == 0 {
        return error_response("revision must be positive", StatusCode::BAD_REQUEST);
    }
    let env = match load_environment(&state, id) {
        Ok(env) => env,
        Err(resp) => return resp,
    };
    match state
        .backend
        .rollback(&Kubeconfig::for_environment(&env), &name, body.revision)
        .await
    {
        Ok(()) => ApiResponse::ok("rolled back").into_response(),
        Err(e) => bad_gateway(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteReleaseQuery {
    #[serde(default)]
    pub purge: bool,
}

/// DELETE /api/v1/environments/{id}/releases/{name}[?purge=true]
pub async fn delete_release(
    State(state): State<ApiState>,
    Path((id, name)): Path<(EnvironmentId, String)>,
    Query(query): Query<DeleteReleaseQuery>,
) -> Response {
    let env = match load_environment(&state, id) {
        Ok(env) => env,
        Err(resp) => return resp,
    };
    match state
        .backend
        .delete_release(&Kubeconfig::for_environment(&env), &name, query.purge)
        .await
    {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => bad_gateway(e),
    }
}
