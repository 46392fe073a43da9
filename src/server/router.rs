//! Axum `Router` assembly (spec §4.7).

use super::{handlers, middleware as mw, ServerState};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub fn build(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(handlers::dashboard))
        .route("/ping", get(handlers::ping))
        .route("/value/:kind/:id", get(handlers::get_value_path))
        .route("/update/:kind/:id/:value", post(handlers::update_value_path))
        .route("/value/", post(handlers::get_value_json))
        .route("/update/", post(handlers::update_value_json))
        .route("/updates/", post(handlers::update_batch_json))
        .route("/update/*rest", post(handlers::update_catch_all))
        .layer(
            // `ServiceBuilder::layer` wraps the stack built so far, so
            // the *last*-registered layer ends up outermost and runs
            // first on the request path. Registering in reverse here
            // gives the intended outer → inner order (spec §4.7): gzip,
            // request logger, crypto (decrypt/verify/sign),
            // trusted-subnet gate.
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    mw::subnet_gate,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    mw::crypto_gate,
                ))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(mw::gzip_codec)),
        )
        .with_state(state)
}
