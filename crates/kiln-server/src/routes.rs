//! HTTP routes for kiln server.

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{
        StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH, LOCATION},
    },
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use kiln_core::{Gateway, GatewayRequest, GatewayResponse, Method, Outcome};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

/// Application state shared across handlers.
pub struct AppState {
    pub gateway: Gateway,
}

/// Create the router: the gateway in front of everything, then the API
/// routes, then `static_dir` (if any) for whatever the gateway passes on.
pub fn create_router(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/trusted", get(trusted_handler));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.fallback(not_found_handler),
    };

    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gateway_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Answer from the gateway, or hand the request to the rest of the router.
async fn gateway_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let gateway_request = GatewayRequest {
        method: Method::parse(request.method().as_str()),
        path: request.uri().path().to_string(),
        if_none_match: request
            .headers()
            .get(IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    match state.gateway.handle(&gateway_request).await {
        Outcome::Respond(response) => into_response(response),
        Outcome::Redirect(url) => (StatusCode::FOUND, [(LOCATION, url)]).into_response(),
        Outcome::Next => next.run(request).await,
    }
}

fn into_response(response: GatewayResponse) -> Response {
    let mut builder = axum::http::Response::builder()
        .status(response.status)
        .header(CACHE_CONTROL, response.cache_control);
    if let Some(content_type) = response.content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    if let Some(etag) = response.etag {
        builder = builder.header(ETAG, etag);
    }

    builder.body(Body::from(response.body)).unwrap_or_else(|e| {
        tracing::error!("invalid gateway response: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

/// Health check handler.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Packages the gateway may currently bundle.
async fn trusted_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "trusted": state.gateway.trust().names()
    }))
}

async fn not_found_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}
