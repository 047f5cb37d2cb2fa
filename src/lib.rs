//! # ws90-exporter
//!
//! Exports readings of Fine Offset WS90 weather stations, as decoded by
//! `rtl_433`, to Prometheus and optionally VictoriaMetrics.
//!
//! ## Architecture
//!
//! ```text
//! rtl_433 ──stdout──▶ RtlReader ──Reading──▶ Broadcaster ─┬─▶ PrometheusPublisher ──▶ /metrics
//!         ──stderr──▶ log                                 └─▶ VictoriaMetricsPublisher ──▶ CSV import
//! ```
//!
//! - **[`source`]**: spawns the decoder, drains its pipes, and filters readings
//!   by model and device id
//! - **[`config`]**: layered configuration (defaults, TOML file, `WS90_*`
//!   environment, flags)
//! - **[`logging`]**: stderr or journald output through `tracing`
//! - **[`daemon`]**: wires everything together and waits for the decoder
//!
//! Publishing itself lives in the `ws90-metrics` and `ws90-adapters` crates.
//!
//! ## Usage
//!
//! ```bash
//! # All devices, metrics on :8000
//! ws90-exporter
//!
//! # Two stations, also pushing to VictoriaMetrics
//! ws90-exporter --id 100 --id 0x20 --vm-url http://localhost:8428
//!
//! # Without a radio
//! ws90-exporter --cmd "ws90-fake --id 100 --interval 5"
//! ```

pub mod config;
pub mod daemon;
pub mod logging;
pub mod source;

pub use config::{Args, ConfigError, ExporterConfig, Settings};
pub use daemon::Daemon;
pub use source::{
    process_line, CommandLine, CommandLineError, LineOutcome, ReaderError, ReaderHandle,
    ReaderState, ReadingFilter, Rejection, RtlReader,
};
