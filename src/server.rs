//! WebSocket endpoint: one connection is one hub session.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::hub::{Push, SubscriptionHub};
use crate::probe::SnapshotSource;

/// Accept viewers until `shutdown` resolves, then cancel every session.
pub async fn serve<S, F>(
    listener: TcpListener,
    hub: Arc<SubscriptionHub<S>>,
    channel_capacity: usize,
    shutdown: F,
) where
    S: SnapshotSource,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        Arc::clone(&hub),
                        channel_capacity,
                    ));
                }
                Err(err) => tracing::warn!("accept failed: {err}"),
            },
            _ = &mut shutdown => break,
        }
    }
    hub.shutdown();
}

async fn handle_connection<S: SnapshotSource>(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<SubscriptionHub<S>>,
    channel_capacity: usize,
) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            tracing::debug!(%peer, "websocket handshake failed: {err}");
            return;
        }
    };
    let (tx, mut rx) = mpsc::channel::<Push>(channel_capacity.max(1));
    let Some(handle) = hub.subscribe(tx) else {
        tracing::debug!(%peer, "shutting down, closing late viewer");
        let _ = ws.close(None).await;
        return;
    };
    let (mut write, mut read) = ws.split();
    let session = handle.id();
    tracing::info!(%session, %peer, "viewer connected");

    loop {
        tokio::select! {
            push = rx.recv() => {
                // None: the hub cancelled this session.
                let Some(push) = push else { break };
                let text = match serde_json::to_string(&push) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::error!(%session, event = push.event(), "cannot encode push: {err}");
                        continue;
                    }
                };
                if let Err(err) = write.send(Message::Text(text.into())).await {
                    tracing::debug!(%session, "write failed: {err}");
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(%session, "read failed: {err}");
                    break;
                }
            },
        }
    }

    hub.unsubscribe(handle);
    let _ = write.close().await;
    tracing::info!(%session, %peer, "viewer disconnected");
}
