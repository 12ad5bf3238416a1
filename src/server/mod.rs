pub mod routes;
pub mod ws;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/simulate", post(routes::post_simulate))
        .route("/api/cancel", post(routes::post_cancel))
        .route("/api/state", get(routes::get_state))
        .route("/api/valuation", post(routes::post_valuation))
        .route("/api/quotes", post(routes::post_quotes))
        .route("/api/params", get(routes::list_params))
        .route("/api/params/{ticker}", get(routes::get_params).put(routes::put_params))
        .route("/api/counters", get(routes::get_counters))
        .route("/ws", get(ws::ws_handler))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
