//! Inbound envelope intake via the `POST /submit` HTTP listener.
//!
//! The server only parses and size-checks envelopes; verification and
//! dispatch happen behind the [`EnvelopeSink`], which normally enqueues the
//! envelope for the agent's dispatch loop and returns immediately.

use crate::envelope::{Envelope, MAX_ENVELOPE_SIZE};
use crate::transport::SUBMIT_PATH;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Receiver of parsed inbound envelopes.
#[async_trait]
pub trait EnvelopeSink: Send + Sync + 'static {
    /// Accept an envelope for processing. An error means the agent cannot
    /// take more work (e.g. it is shutting down).
    async fn submit(&self, envelope: Envelope) -> Result<(), String>;
}

/// Build the router serving [`SUBMIT_PATH`].
pub fn submit_router(sink: Arc<dyn EnvelopeSink>) -> Router {
    Router::new()
        .route(SUBMIT_PATH, post(submit_handler))
        .layer(DefaultBodyLimit::max(MAX_ENVELOPE_SIZE))
        .with_state(sink)
}

async fn submit_handler(
    State(sink): State<Arc<dyn EnvelopeSink>>,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let envelope = match Envelope::from_json(&body) {
        Ok(env) => env,
        Err(e) => {
            debug!(error = %e, "rejected malformed envelope");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            );
        }
    };

    match sink.submit(envelope).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({}))),
        Err(reason) => {
            warn!(%reason, "envelope sink refused envelope");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": reason })),
            )
        }
    }
}

/// A running `/submit` listener.
pub struct EnvelopeServer {
    local_addr: SocketAddr,
}

impl EnvelopeServer {
    /// Bind `addr` and serve until `shutdown` flips to `true`.
    pub async fn start(
        addr: SocketAddr,
        sink: Arc<dyn EnvelopeSink>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "envelope intake listening");

        let app = submit_router(sink);
        let handle = tokio::spawn(async move {
            let signal = async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
            {
                warn!(error = %e, "envelope intake stopped with error");
            }
            info!(%local_addr, "envelope intake stopped");
        });

        Ok((Self { local_addr }, handle))
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL of this server's submit route.
    pub fn submit_url(&self) -> String {
        format!("http://{}{}", self.local_addr, SUBMIT_PATH)
    }
}
