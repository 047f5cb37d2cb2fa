//! Reading source: the rtl_433 subprocess and the per-line pipeline.
//!
//! Every stdout line of the decoder goes through [`process_line`]: it is
//! parsed as a JSON object, checked against a [`ReadingFilter`], and handed
//! to the [`Broadcaster`] when accepted.

mod command;
mod rtl;
mod stream;

pub use command::{CommandLine, CommandLineError};
pub use rtl::{ReaderError, ReaderHandle, ReaderState, RtlReader};
pub use stream::drain_lines;

use tracing::{debug, error, trace, warn};
use ws90_metrics::{Broadcaster, Delivery};
use ws90_types::{DeviceFilter, DeviceId, Reading, WS90_MODEL};

/// Why a parsed reading was not published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// `model` is absent or names another sensor.
    WrongModel(Option<String>),
    /// The reading has no usable `id`.
    MissingId,
    /// The id is not in the allow-list.
    NotAllowed(DeviceId),
}

/// What happened to one stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Nothing but whitespace.
    Blank,
    /// Not a JSON object.
    Malformed,
    /// Parsed, but filtered out.
    Rejected(Rejection),
    /// Handed to the broadcaster.
    Published(Delivery),
}

/// Accepts readings of one model from an allow-list of devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingFilter {
    model: String,
    devices: DeviceFilter,
}

impl Default for ReadingFilter {
    fn default() -> Self {
        Self::new(WS90_MODEL, DeviceFilter::all())
    }
}

impl ReadingFilter {
    /// Accept `model` readings from `devices`.
    pub fn new(model: impl Into<String>, devices: DeviceFilter) -> Self {
        Self {
            model: model.into(),
            devices,
        }
    }

    /// Expected model string.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Device allow-list.
    pub fn devices(&self) -> &DeviceFilter {
        &self.devices
    }

    /// Check a reading, returning its device id when accepted.
    pub fn check(&self, reading: &Reading) -> Result<DeviceId, Rejection> {
        match reading.model() {
            Some(model) if model == self.model => {}
            other => return Err(Rejection::WrongModel(other.map(str::to_string))),
        }

        let id = reading.device_id().ok_or(Rejection::MissingId)?;
        if !self.devices.allows(id) {
            return Err(Rejection::NotAllowed(id));
        }

        Ok(id)
    }
}

/// Parse, filter and publish one line of decoder output.
pub fn process_line(line: &str, filter: &ReadingFilter, broadcaster: &Broadcaster) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() {
        return LineOutcome::Blank;
    }

    let reading: Reading = match serde_json::from_str(line) {
        Ok(reading) => reading,
        Err(e) => {
            warn!("Failed to parse rtl_433's JSON output ({}): {}", e, line);
            return LineOutcome::Malformed;
        }
    };

    match filter.check(&reading) {
        Ok(id) => {
            debug!(device_id = %id, ?reading, "Received reading");
            LineOutcome::Published(broadcaster.publish(&reading))
        }
        Err(rejection) => {
            match &rejection {
                Rejection::WrongModel(model) => {
                    trace!(?model, "Ignoring reading from another model")
                }
                Rejection::MissingId => error!(?reading, "No id in received reading"),
                Rejection::NotAllowed(id) => debug!(
                    "Received reading from id {} ({:#x}), expected one of {}. Ignoring.",
                    id,
                    id,
                    filter.devices()
                ),
            }
            LineOutcome::Rejected(rejection)
        }
    }
}

/// Log one stderr line of the decoder.
pub fn log_stderr_line(line: &str) {
    let line = line.trim();
    if !line.is_empty() {
        warn!(target: "rtl_433", "{}", line);
    }
}
