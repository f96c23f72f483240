//! Admin API: runtime inspection and throttle control.
//!
//! # Routes
//! - `GET /admin/status`
//! - `GET /admin/throttle`
//! - `PUT /admin/throttle/{name}` with `{"bytes_per_second": n}`
//! - `PUT /admin/burst-interval` with `{"ms": n}`
//! - `GET /admin/sessions`
//!
//! Every route requires the bearer token from `admin.api_key`.

pub mod auth;
pub mod handlers;

use std::time::Instant;

use axum::{
    middleware,
    routing::{get, put},
    Router,
};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::proxy::ProxyContext;

#[derive(Clone)]
pub struct AdminState {
    pub ctx: ProxyContext,
    pub started: Instant,
}

impl AdminState {
    pub fn new(ctx: ProxyContext) -> Self {
        Self {
            ctx,
            started: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/throttle", get(get_throttle))
        .route("/admin/throttle/{name}", put(put_throttle))
        .route("/admin/burst-interval", put(put_burst_interval))
        .route("/admin/sessions", get(get_sessions))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
