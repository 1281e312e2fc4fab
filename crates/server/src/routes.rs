use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, Level};
use axum::middleware;

use common::types::Health;
use service::giveaway::GiveawayService;

pub mod admin;
pub mod giveaway;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GiveawayService>,
    /// Key expected in `X-API-Key` on admin routes; admin routes answer 403
    /// when unset.
    pub admin_api_key: Option<Arc<str>>,
    pub metrics: Registry,
}

pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&state.metrics.gather(), &mut buf) {
        error!(error = %e, "cannot encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, [(header::CONTENT_TYPE, "text/plain".to_string())], Vec::new());
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, encoder.format_type().to_string())], buf)
}

/// Build the full application router: public giveaway routes, admin routes
/// behind the API key middleware, health and metrics.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/giveaway/leaderboard/:address", get(giveaway::leaderboard))
        .route("/giveaway/acceptMetadataRequest", post(giveaway::accept_metadata_request))
        .route("/giveaway/loginWithX", post(giveaway::login_with_x))
        .route("/giveaway/callbackX", get(giveaway::callback_x))
        .route("/giveaway/tasks", get(giveaway::tasks))
        .route("/giveaway/user/:address", get(giveaway::user))
        .route("/giveaway/registerDroplist", post(giveaway::register_droplist))
        .route("/giveaway/droplist/:address", get(giveaway::droplist_slot));

    let admin_routes = Router::new()
        .route("/giveaway/completeTask", post(admin::complete_task))
        .route("/giveaway/admin/tasks", post(admin::set_tasks))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin::require_api_key));

    public
        .merge(admin_routes)
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
                // 5xx
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}
