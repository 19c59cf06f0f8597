//! HTTP serving on the handed-off listener.

use anyhow::Result;
use axum::{routing::get, Router};
use molt::{ListenerRegistry, ServerLifecycle};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the application router.
pub fn router() -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/pid", get(pid))
        .layer(TraceLayer::new_for_http())
}

async fn hello() -> &'static str {
    "Hello, world!"
}

/// Process id of the generation serving the request.
async fn pid() -> String {
    std::process::id().to_string()
}

/// Start serving `router()` on the registry's listener.
pub fn start(registry: &ListenerRegistry) -> Result<ServerLifecycle> {
    let listener = registry.listener().tokio_tcp()?;
    let addr = listener.local_addr()?;
    info!("Starting Axum HTTP server on {}", addr);

    let app = router();
    Ok(ServerLifecycle::start(move |stop| async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop.cancelled().await;
                info!("HTTP server received shutdown signal, draining connections");
            })
            .await
    }))
}
