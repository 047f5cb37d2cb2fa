//! Prometheus HTTP exposition server.
//!
//! Serves the [`Registry`] rendering on a configurable path, plus the usual
//! health endpoints.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ws90_metrics::prometheus::{MetricsServer, ServerConfig};
//! use ws90_metrics::Registry;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), ws90_metrics::ServerError> {
//! let registry = Arc::new(Registry::new());
//! let config = ServerConfig::builder().port(8000).build();
//!
//! let server = MetricsServer::bind(&config, registry).await?;
//! server.spawn();
//! // Metrics available at http://[::]:8000/metrics
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{Registry, ServerError};

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Pause after a failed `accept`. Errors like EMFILE repeat until
/// descriptors are freed.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for the metrics server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Path to serve metrics on (default: "/metrics").
    pub metrics_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv6Addr::UNSPECIFIED, 8000)),
            metrics_path: "/metrics".to_string(),
        }
    }
}

impl ServerConfig {
    /// Create a new config builder.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for ServerConfig.
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    listen_addr: Option<SocketAddr>,
    metrics_path: Option<String>,
}

impl ServerConfigBuilder {
    /// Set the full listen address.
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    /// Listen on all interfaces at `port`.
    pub fn port(self, port: u16) -> Self {
        self.listen_addr(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))
    }

    /// Set the metrics path.
    pub fn metrics_path(mut self, path: impl Into<String>) -> Self {
        self.metrics_path = Some(path.into());
        self
    }

    /// Build the config.
    pub fn build(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            listen_addr: self.listen_addr.unwrap_or(defaults.listen_addr),
            metrics_path: self.metrics_path.unwrap_or(defaults.metrics_path),
        }
    }
}

/// A bound metrics server, ready to accept connections.
#[derive(Debug)]
pub struct MetricsServer {
    listener: TcpListener,
    metrics_path: Arc<str>,
    registry: Arc<Registry>,
}

impl MetricsServer {
    /// Bind the listen socket. Fails if the address is unavailable.
    pub async fn bind(config: &ServerConfig, registry: Arc<Registry>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.listen_addr,
                source,
            })?;

        Ok(Self {
            listener,
            metrics_path: Arc::from(config.metrics_path.as_str()),
            registry,
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever. Per-connection failures are logged.
    pub async fn serve(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, path = %self.metrics_path, "Serving metrics");
        }

        let listener = &self.listener;
        loop {
            let (stream, peer) = accept_with_backoff(|| listener.accept()).await;
            let io = TokioIo::new(stream);

            let metrics_path = Arc::clone(&self.metrics_path);
            let registry = Arc::clone(&self.registry);

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let metrics_path = Arc::clone(&metrics_path);
                    let registry = Arc::clone(&registry);

                    async move { handle_request(req, &metrics_path, &registry) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(%peer, "Metrics connection error: {}", e);
                }
            });
        }
    }

    /// Run [`serve`](Self::serve) on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.serve())
    }
}

async fn accept_with_backoff<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(e) => {
                error!("Failed to accept metrics connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics_path: &str,
    registry: &Registry,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();

    let response = if path == metrics_path {
        text_response(StatusCode::OK, METRICS_CONTENT_TYPE, registry.render())
    } else if path == "/health" || path == "/healthz" {
        text_response(StatusCode::OK, "text/plain", "OK".to_string())
    } else {
        text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string())
    };

    Ok(response)
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
