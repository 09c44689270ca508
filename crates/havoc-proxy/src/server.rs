//! Listener, connection driving, and surface routing.
//!
//! One listener serves all three surfaces: the proxy path (`/proxy/*`), the
//! management API, and the `/ws` log stream. Each connection is driven by
//! its own task, and that task - not hyper - owns the decision to tear the
//! socket down: when the chaos pipeline orders a timeout hang, the request
//! handler parks itself forever and signals the planned duration over a
//! per-connection channel. The connection task then races the hold timer
//! against the connection future and, when the timer wins, drops the
//! connection cold - no status line, no headers, nothing on the wire. A
//! client that gives up first wins the race instead and cancels the timer.

use crate::engine::Engine;
use crate::proxy::{self, HttpClient};
use crate::{admin_api, ws};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// The proxy server: engine state, the shared upstream client, and the
/// bound listener.
pub struct ProxyServer {
    engine: Arc<Engine>,
    client: HttpClient,
    listener: TcpListener,
}

impl ProxyServer {
    /// Bind the listener. Port 0 binds an ephemeral port; `local_addr`
    /// reports what was actually bound.
    pub async fn bind(addr: SocketAddr, engine: Arc<Engine>) -> Result<Self, anyhow::Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            engine,
            client: proxy::create_http_client(),
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let ProxyServer {
            engine,
            client,
            listener,
        } = self;

        info!("Listening on http://{}", listener.local_addr()?);
        info!("Proxy surface at /proxy/*, management API and /ws on the same port");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let engine = Arc::clone(&engine);
            let client = client.clone();
            tokio::spawn(async move {
                serve_connection(stream, remote_addr, engine, client).await;
            });
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    engine: Arc<Engine>,
    client: HttpClient,
) {
    let io = TokioIo::new(stream);

    // The handler signals a timeout hang here; capacity 1 is enough because
    // a hung HTTP/1.1 connection never processes another request.
    let (hang_tx, mut hang_rx) = mpsc::channel::<u64>(1);

    let service = service_fn(move |req: Request<Incoming>| {
        let engine = Arc::clone(&engine);
        let client = client.clone();
        let hang_tx = hang_tx.clone();
        async move { Ok::<_, Infallible>(route_request(req, engine, client, hang_tx).await) }
    });

    let conn = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades();
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(err) = result {
                debug!("Connection error from {}: {}", remote_addr, err);
            }
        }
        Some(duration_ms) = hang_rx.recv() => {
            // The handler is parked; the socket stays open and silent until
            // the timer fires, then the connection is dropped without an
            // HTTP write. If the peer hangs up first, the connection future
            // completes and the timer is cancelled.
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(duration_ms)) => {
                    debug!(
                        "Timeout fault: destroying socket for {} after {}ms",
                        remote_addr, duration_ms
                    );
                }
                _ = conn.as_mut() => {
                    debug!("Client {} disconnected before the timeout fired", remote_addr);
                }
            }
        }
    }
}

/// Dispatch a request to the surface that owns its path.
async fn route_request(
    req: Request<Incoming>,
    engine: Arc<Engine>,
    client: HttpClient,
    hang_tx: mpsc::Sender<u64>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let path = req.uri().path().to_string();
    if path == "/proxy" || path.starts_with("/proxy/") {
        proxy::handle_proxy(&engine, &client, req, &hang_tx).await
    } else if path == "/ws" {
        ws::handle_upgrade(req, engine)
    } else {
        admin_api::route_request(req, engine)
            .await
            .map(|body| BoxBody::new(body.map_err(|never: Infallible| match never {})))
    }
}
