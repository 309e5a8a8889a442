//! Shared utilities for integration and load testing.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use resilient_transport::config::PipelineConfig;

/// What the backend saw for one request.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Seen {
    pub method: String,
    pub attempt: Option<String>,
    pub request_id: Option<String>,
    pub content_length: Option<String>,
    pub transfer_encoding: Option<String>,
    pub body: String,
}

/// A running backend on an ephemeral port.
#[allow(dead_code)]
pub struct Backend {
    pub addr: SocketAddr,
    hits: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<Seen>>>,
}

#[allow(dead_code)]
impl Backend {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

/// Start a backend that returns a fixed response.
#[allow(dead_code)]
pub async fn start_mock_backend(body: &'static str) -> Backend {
    start_programmable_backend(move |_| async move { body.into_response() }).await
}

/// Start a programmable backend. `f` gets the 0-based hit index.
#[allow(dead_code)]
pub async fn start_programmable_backend<F, Fut>(f: F) -> Backend
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let hits = Arc::new(AtomicU32::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let app = {
        let hits = hits.clone();
        let seen = seen.clone();
        Router::new().fallback(move |req: Request| {
            let hits = hits.clone();
            let seen = seen.clone();
            let f = f.clone();
            async move {
                let (parts, body) = req.into_parts();
                // Owned values only; nothing borrowed is held across the read.
                let record = {
                    let header = |name: &str| {
                        parts
                            .headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned)
                    };
                    Seen {
                        method: parts.method.to_string(),
                        attempt: header("x-retry-attempt"),
                        request_id: header("x-request-id"),
                        content_length: header("content-length"),
                        transfer_encoding: header("transfer-encoding"),
                        body: String::new(),
                    }
                };
                drop(parts);

                let body = axum::body::to_bytes(body, usize::MAX)
                    .await
                    .unwrap_or_default();

                seen.lock().push(Seen {
                    body: String::from_utf8_lossy(&body).into_owned(),
                    ..record
                });
                let n = hits.fetch_add(1, Ordering::SeqCst);
                f(n).await
            }
        })
    };

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Backend { addr, hits, seen }
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Pipeline config with short, deterministic delays.
#[allow(dead_code)]
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config.retry.jitter = false;
    config.transport.connect_timeout_ms = 1_000;
    config.transport.request_timeout_ms = 5_000;
    config
}
