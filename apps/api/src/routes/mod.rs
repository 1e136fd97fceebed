pub mod health;
pub mod request_id;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::generation::handlers as reviews;
use crate::history::handlers as history;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Review API
        .route("/api/v1/reviews", post(reviews::handle_create_review))
        .route("/api/v1/reviews/stream", post(reviews::handle_stream_review))
        .route("/api/v1/reviews/cache/stats", get(reviews::handle_cache_stats))
        .route(
            "/api/v1/reviews/metrics",
            get(reviews::handle_metrics).delete(reviews::handle_reset_metrics),
        )
        // History API
        .route("/api/v1/reviews/history", get(history::handle_list_history))
        .route(
            "/api/v1/reviews/history/:id",
            get(history::handle_restore_version).delete(history::handle_delete_version),
        )
        .layer(middleware::from_fn(request_id::propagate_request_id))
        .with_state(state)
}
