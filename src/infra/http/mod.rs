mod error;
mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::compile::CompileService;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use handlers::{ConvertRequest, JobQuery};
pub use middleware::RequestContext;

/// Extra room over the source ceiling for JSON quoting and escaping.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub compiler: Arc<CompileService>,
}

impl AppState {
    pub fn new(compiler: Arc<CompileService>) -> Self {
        Self { compiler }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Escaped JSON can be up to twice the raw source; the exact ceiling is enforced per request.
    let body_limit = state
        .compiler
        .settings()
        .max_source_bytes
        .get()
        .saturating_mul(2)
        .saturating_add(BODY_LIMIT_SLACK);

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/convert", post(handlers::convert))
        .route("/job", post(handlers::job))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
        .with_state(state)
}
