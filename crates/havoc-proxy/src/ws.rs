//! Real-time log stream over a WebSocket upgrade at `/ws`.
//!
//! The handshake is done by hand on the hyper connection: answer 101 with
//! the derived accept key, then drive the upgraded byte stream as a
//! tungstenite server socket. Each client runs in its own task with its own
//! broadcast receiver, so a slow or broken client only hurts itself; if it
//! falls behind the broadcast buffer it silently loses the oldest entries.

use crate::engine::Engine;
use futures::{SinkExt, StreamExt};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Message, Role};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

/// Answer the `/ws` handshake and spawn the per-client streaming task.
pub fn handle_upgrade(
    mut req: Request<Incoming>,
    engine: Arc<Engine>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let wants_websocket = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let key = req.headers().get(SEC_WEBSOCKET_KEY).cloned();

    let (Some(key), true) = (key, wants_websocket) else {
        return plain_response(StatusCode::BAD_REQUEST, "Expected WebSocket upgrade");
    };
    let accept = derive_accept_key(key.as_bytes());

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let socket =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                if let Err(err) = stream_logs(socket, engine).await {
                    debug!("WebSocket client error: {}", err);
                }
            }
            Err(err) => debug!("WebSocket upgrade failed: {}", err),
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "upgrade")
        .header(UPGRADE, "websocket")
        .header(SEC_WEBSOCKET_ACCEPT, accept)
        .body(empty_body())
        .unwrap_or_else(|_| plain_response(StatusCode::INTERNAL_SERVER_ERROR, ""))
}

async fn stream_logs(
    socket: WebSocketStream<TokioIo<Upgraded>>,
    engine: Arc<Engine>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    // Subscribe before the hello so entries appended mid-handshake are kept.
    let mut rx = engine.subscribe();
    let (mut sink, mut stream) = socket.split();

    let hello = serde_json::json!({"type": "connected", "message": "WebSocket connected"});
    sink.send(Message::Text(hello.to_string().into())).await?;

    loop {
        tokio::select! {
            entry = rx.recv() => match entry {
                Ok(entry) => {
                    let frame = serde_json::json!({"type": "new-log", "log": entry});
                    sink.send(Message::Text(frame.to_string().into())).await?;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("WebSocket subscriber lagged, {} log entries dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = stream.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                // Pings are answered by the protocol layer; inbound data is ignored.
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err),
            },
        }
    }

    let _ = sink.close().await;
    Ok(())
}

fn empty_body() -> BoxBody<Bytes, hyper::Error> {
    BoxBody::new(Full::new(Bytes::new()).map_err(|never: Infallible| match never {}))
}

fn plain_response(status: StatusCode, message: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .body(BoxBody::new(
            Full::new(Bytes::from(message.to_string())).map_err(|never: Infallible| match never {}),
        ))
        .unwrap_or_else(|_| Response::new(empty_body()))
}
