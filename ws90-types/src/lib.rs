//! # ws90-types
//!
//! Core types shared by every part of the WS90 exporter: decoded readings,
//! device identifiers, and the static tables that describe how a reading maps
//! onto published metrics.
//!
//! ## Example
//!
//! ```rust
//! use ws90_types::{DeviceId, Reading, WS90_FIELDS};
//!
//! let reading: Reading = serde_json::from_str(
//!     r#"{"model":"Fineoffset-WS90","id":100,"battery_mV":2800}"#,
//! ).unwrap();
//!
//! assert_eq!(reading.device_id(), Some(DeviceId::new(100)));
//!
//! let battery = WS90_FIELDS.iter().find(|f| f.key == "battery_mV").unwrap();
//! assert_eq!(battery.value(&reading), Some(2.8));
//! ```

mod device;
mod fields;
mod reading;

pub use device::*;
pub use fields::*;
pub use reading::*;

/// Model string rtl_433 reports for the Fine Offset WS90 weather station.
pub const WS90_MODEL: &str = "Fineoffset-WS90";
