//! # ws90-adapters
//!
//! Remote publishers for WS90 readings.
//!
//! Each adapter implements [`ws90_metrics::Subscriber`] and can be attached to
//! the same [`ws90_metrics::Broadcaster`] as the local Prometheus publisher.
//!
//! ## Supported Backends
//!
//! - **VictoriaMetrics** (`victoriametrics` feature, on by default) - pushes
//!   every reading through the CSV import API
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ws90_adapters::victoriametrics::VictoriaMetricsPublisher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (publisher, worker) = VictoriaMetricsPublisher::builder()
//!         .base_url("http://localhost:8428")
//!         .spawn()?;
//!
//!     // Subscribe `publisher` to a broadcaster. The worker exits once it is dropped.
//!     drop(publisher);
//!     worker.await?;
//!     Ok(())
//! }
//! ```

pub mod error;

#[cfg(feature = "victoriametrics")]
pub mod victoriametrics;

pub use error::AdapterError;
