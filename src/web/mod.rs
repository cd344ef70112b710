//! HTTP control surface.
//!
//! Every route sits behind the [`AuthGate`]. Handlers are thin: they parse
//! the request, call into [`ColorState`] or [`DeviceRegistry`] and wrap the
//! result in the `{message, status}` envelope.

pub mod api;
pub mod auth;

use axum::{
    Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::color::ColorState;
use crate::devices::DeviceRegistry;
use crate::web::api::ApiResponse;
pub use crate::web::auth::AuthGate;

/// Application state shared with all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub devices: Arc<DeviceRegistry>,
    pub color: Arc<ColorState>,
    pub auth: AuthGate,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/color",
            get(api::get_color)
                .post(api::set_color)
                .delete(api::power_off)
                .put(api::power_on),
        )
        .route("/api/available", get(api::available))
        .route(
            "/api/list",
            get(api::list)
                .post(api::add_device)
                .delete(api::remove_device),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// A panicking handler answers 500 instead of taking the server down.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Exception failsafe: skipping handler panic => {}", detail);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ApiResponse::failed("Internal error while handling the request."),
    )
        .into_response()
}

pub async fn bind(port: u16) -> Result<TcpListener, std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Apollo {} is listening on http://{}", env!("CARGO_PKG_VERSION"), addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
