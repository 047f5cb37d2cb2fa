//! # ws90-metrics
//!
//! Publishing engine for WS90 readings.
//!
//! A [`Broadcaster`] fans every accepted reading out to a set of
//! [`Subscriber`]s. The [`PrometheusPublisher`] turns readings into gauges in a
//! local [`Registry`] and expires a device's series with an [`ExpiringTimer`]
//! when the device goes quiet. The registry is served over HTTP by
//! [`prometheus::MetricsServer`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ws90_metrics::prometheus::{MetricsServer, ServerConfig};
//! use ws90_metrics::{Broadcaster, PrometheusPublisher, Registry};
//! use ws90_types::{WS90_FIELDS, WS90_MODEL_INFO};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(Registry::new());
//!     let publisher = PrometheusPublisher::new(
//!         &registry,
//!         WS90_FIELDS,
//!         WS90_MODEL_INFO,
//!         Duration::from_secs(120),
//!     )?;
//!
//!     let mut broadcaster = Broadcaster::new();
//!     broadcaster.subscribe(Arc::new(publisher));
//!
//!     let server = MetricsServer::bind(&ServerConfig::default(), registry).await?;
//!     server.spawn();
//!
//!     // Feed readings with `broadcaster.publish(&reading)`.
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `server` (default): the hyper-based exposition server

mod broadcast;
mod error;
mod publisher;
mod registry;
mod timer;

#[cfg(feature = "server")]
pub mod prometheus;

pub use broadcast::{Broadcaster, Delivery, Subscriber};
pub use error::{PublishError, RegistryError, ServerError};
pub use publisher::PrometheusPublisher;
pub use registry::{GaugeFamily, InfoFamily, Registry, DEVICE_LABEL};
pub use timer::ExpiringTimer;
