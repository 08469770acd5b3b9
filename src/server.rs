use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Extension, Router};
use tokio::sync::oneshot;
use tracing::info;

use crate::{scrollkeeper::Scrollkeeper, websocket};

/// Shared state handed to each websocket handler.
#[derive(Clone)]
pub(crate) struct SnapshotFeed {
    pub(crate) scrollkeeper: Arc<Scrollkeeper>,
    pub(crate) interval: Duration,
}

async fn run(
    scrollkeeper: Arc<Scrollkeeper>,
    interval: Duration,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) {
    let app = Router::new()
        .route("/ws", get(websocket::ws_handler))
        // Each websocket pushes snapshots from the same mirror.
        .layer(Extension(SnapshotFeed {
            scrollkeeper,
            interval,
        }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        port_reply
            .send(addr.port())
            .expect("The receiver of which port was allocated should not be dropped");
    }

    info!("layout view listening on {}", addr);

    server.await.unwrap();
}

/// Start the snapshot server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(
    scrollkeeper: Arc<Scrollkeeper>,
    interval: Duration,
    allocated_port: oneshot::Sender<u16>,
) {
    run(scrollkeeper, interval, None, Some(allocated_port)).await
}

/// Start the snapshot server on the given port.
pub async fn run_on_port(scrollkeeper: Arc<Scrollkeeper>, interval: Duration, port: u16) {
    run(scrollkeeper, interval, Some(port), None).await
}
