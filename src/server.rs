//! axum router: permissive CORS plus a no-cache middleware on every
//! response, mirroring `examples/original_source/backend/main.py`'s
//! `NoCacheMiddleware` and CORS setup, wired the way
//! `vyotiq-backend/src/server.rs` composes its own router + middleware stack.

use axum::{
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::routes;
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/shutdown", post(routes::health::shutdown_handler))
        .route("/graph", get(routes::api::graph))
        .route("/stats", get(routes::api::stats))
        .route("/clusters", get(routes::api::clusters))
        .route("/move-file", post(routes::api::move_file))
        .route("/search", post(routes::api::search))
        .route("/ask", post(routes::api::ask))
        .route("/open-file", post(routes::api::open_file))
        .layer(axum::middleware::from_fn(no_cache_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Sets `Cache-Control`/`Pragma`/`Expires` on every response so API clients
/// never see a stale cached view of the gravity loop's current state.
async fn no_cache_middleware(req: Request, next: Next) -> Result<Response, StatusCode> {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    Ok(response)
}
