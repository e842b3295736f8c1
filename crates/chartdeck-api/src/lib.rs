//! chartdeck-api: REST API for the deployment portal.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET/POST | `/api/v1/environments` | List / create environments |
//! | GET/DELETE | `/api/v1/environments/{id}` | Get / delete an environment |
//! | GET/POST/DELETE | `/api/v1/environments/{id}/variables` | List / upsert / delete variables |
//! | GET | `/api/v1/environments/{id}/compare/{target}` | Variable diff, `{id}` as source |
//! | POST | `/api/v1/environments/{id}/promote` | Promote another environment onto this one |
//! | GET | `/api/v1/environments/{id}/releases` | Releases running in the environment |
//! | DELETE | `/api/v1/environments/{id}/releases/{name}` | Uninstall a release |
//! | GET | `/api/v1/environments/{id}/releases/{name}/history` | Release revisions |
//! | POST | `/api/v1/environments/{id}/releases/{name}/rollback` | Roll back a release |
//! | POST | `/api/v1/deployments` | Dispatch a batch (`x-user-id` header) |
//! | GET | `/api/v1/requests` | Batches of a user (`?user=`) |
//! | GET | `/api/v1/requests/{id}` | Batch outcome with its units |
//! | GET | `/api/v1/charts` | Search charts |
//! | GET | `/api/v1/charts/template` | Fetch a chart artifact |
//! | POST | `/api/v1/charts/releases` | Register chart release metadata |
//! | GET | `/api/v1/charts/{name}/{version}/graph` | Dependency graph |
//! | POST | `/api/v1/upgrades` | Bulk upgrade detection |
//! | GET | `/metrics` | Prometheus exposition |
//!
//! Authorization is handled in front of this router.

pub mod chart_handlers;
pub mod handlers;
pub mod metrics;
mod response;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use chartdeck_backend::{ChartBackend, TemplateGate};
use chartdeck_dispatch::{Dispatcher, TrackerStats};
use chartdeck_insight::{DependencyGraphBuilder, UpgradeDetector};
use chartdeck_promote::Promoter;
use chartdeck_state::StateStore;
use chartdeck_vars::{RuleSet, SecretCipher};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub cipher: SecretCipher,
    pub rules: Arc<RuleSet>,
    pub dispatcher: Arc<Dispatcher>,
    pub promoter: Promoter,
    pub backend: Arc<dyn ChartBackend>,
    pub templates: Arc<TemplateGate>,
    pub detector: Arc<UpgradeDetector>,
    pub graphs: Arc<DependencyGraphBuilder>,
    pub tracker: Arc<TrackerStats>,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/environments",
            get(handlers::list_environments).post(handlers::create_environment),
        )
        .route(
            "/environments/{id}",
            get(handlers::get_environment).delete(handlers::delete_environment),
        )
        .route(
            "/environments/{id}/variables",
            get(handlers::list_variables)
                .post(handlers::upsert_variable)
                .delete(handlers::delete_variable),
        )
        .route("/environments/{id}/compare/{target}", get(handlers::compare_environments))
        .route("/environments/{id}/promote", post(handlers::promote_environment))
        .route("/environments/{id}/releases", get(chart_handlers::list_releases))
        .route(
            "/environments/{id}/releases/{name}",
            axum::routing::delete(chart_handlers::delete_release),
        )
        .route("/environments/{id}/releases/{name}/history", get(chart_handlers::release_history))
        .route("/environments/{id}/releases/{name}/rollback", post(chart_handlers::rollback_release))
        .route("/deployments", post(handlers::dispatch_deployments))
        .route("/requests", get(handlers::list_requests))
        .route("/requests/{id}", get(handlers::get_request))
        .route("/charts", get(chart_handlers::search_charts))
        .route("/charts/template", get(chart_handlers::get_template))
        .route("/charts/releases", post(chart_handlers::register_chart_release))
        .route("/charts/{name}/{version}/graph", get(chart_handlers::dependency_graph))
        .route("/upgrades", post(chart_handlers::detect_upgrades))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(metrics::prometheus_metrics).with_state(state))
}
