//! WebSocket sessions
//!
//! One reader loop and one writer task per socket. The reader feeds the
//! relay in arrival order; the writer drains the peer's outbound queue and
//! reports written bytes back to the backpressure accounting.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Redirect, Response},
};
use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::peers::{Outbound, PeerHandle, PeerRegistry};
use crate::protocol::ConnectParams;
use crate::relay::Relay;
use crate::ui::server::AppState;

/// `/`: WebSocket upgrade, or a redirect to the dashboard for plain GETs
pub async fn root(
    ws: Option<WebSocketUpgrade>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match ws {
        Some(ws) => accept(ws, params, state),
        None => Redirect::temporary("/index.html").into_response(),
    }
}

/// `/ws`
pub async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    accept(ws, params, state)
}

fn accept(ws: WebSocketUpgrade, params: ConnectParams, state: Arc<AppState>) -> Response {
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| session(socket, params, relay))
}

async fn session(socket: WebSocket, params: ConnectParams, relay: Arc<Relay>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let peer = relay.connect(tx, &params);
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_loop(sink, rx, peer.clone(), relay.registry().clone()));
    let reason = read_loop(stream, &peer, &relay).await;

    relay.disconnect(&peer, reason);
    peer.close();
    let _ = writer.await;
}

async fn read_loop(mut stream: SplitStream<WebSocket>, peer: &PeerHandle, relay: &Relay) -> &'static str {
    loop {
        let message = tokio::select! {
            _ = peer.closed() => return "forced close",
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => relay.handle_text(peer, &text),
            Some(Ok(Message::Binary(data))) => relay.handle_binary(peer, Bytes::from(data)),
            Some(Ok(Message::Close(_))) | None => return "closed",
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(peer = %peer.id(), "WebSocket read error: {}", e);
                return "read error";
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    peer: PeerHandle,
    registry: Arc<PeerRegistry>,
) {
    loop {
        let outbound = tokio::select! {
            _ = peer.closed() => break,
            outbound = rx.recv() => match outbound {
                Some(outbound) => outbound,
                None => break,
            },
        };

        let len = outbound.len();
        let message = match outbound {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Binary(bytes) => Message::Binary(bytes.to_vec()),
        };
        if let Err(e) = sink.send(message).await {
            tracing::debug!(peer = %peer.id(), "WebSocket write failed: {}", e);
            registry.disconnect(&peer, "write failed");
            break;
        }
        peer.mark_written(len);
    }

    let _ = sink.close().await;
}
