//! HTTP server wiring.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use super::v0;
use crate::error::Result;
use crate::monitor::RigStatus;
use crate::poller::StatusReceiver;
use crate::tracing::prelude::*;

#[derive(OpenApi)]
#[openapi(info(title = "minewatch", description = "GPU mining rig supervisor API"))]
struct ApiDoc;

/// State shared by every handler.
#[derive(Clone)]
pub struct SharedState {
    status_rx: StatusReceiver,
}

impl SharedState {
    pub fn new(status_rx: StatusReceiver) -> Self {
        Self { status_rx }
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> Option<Arc<RigStatus>> {
        self.status_rx.borrow().clone()
    }
}

/// Full application router, including the OpenAPI document.
pub fn router(state: SharedState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/v0", v0::routes())
        .with_state(state)
        .split_for_parts();

    router
        .route(
            "/api-docs/openapi.json",
            get(move || {
                let api = api.clone();
                async move { Json(api) }
            }),
        )
        .layer(TraceLayer::new_for_http())
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Serve on `listener` until cancelled.
pub async fn serve(listener: TcpListener, state: SharedState, cancel: CancellationToken) -> Result<()> {
    info!(addr = %listener.local_addr()?, "API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    debug!("API stopped");
    Ok(())
}
