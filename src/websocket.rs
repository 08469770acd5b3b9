use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use tracing::{debug, info};

use crate::server::SnapshotFeed;

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    Extension(feed): Extension<SnapshotFeed>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        debug!("`{}` connected", user_agent.as_str());
    }

    ws.on_upgrade(|socket| push_snapshots(socket, feed))
}

/// Push a JSON layout snapshot every report interval until the browser goes
/// away. The first push happens immediately on connect.
async fn push_snapshots(mut socket: WebSocket, feed: SnapshotFeed) {
    let mut ticker = tokio::time::interval(feed.interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = feed.scrollkeeper.to_json_snapshot().to_string();
                if socket.send(WsMessage::Text(snapshot)).await.is_err() {
                    debug!("client went away mid-push");
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
                        debug!("client disconnected");
                        break;
                    }
                    // Browsers ping now and then; axum answers those itself.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!("snapshot feed closed");
}
