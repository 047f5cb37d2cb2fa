//! Device identifiers and allow-lists.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier a sensor transmits with every reading.
///
/// Displays in decimal, which is also how it appears as the `id` label.
/// Hexadecimal formatting is available through `{:x}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Create a device id from its numeric value.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Interpret a JSON value as a device id.
    ///
    /// Unsigned integers are taken as-is; strings go through [`FromStr`].
    /// Anything else (negative, fractional, bool, null) yields `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_u64().map(Self),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<u64> for DeviceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::LowerHex for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Error returned when a device id cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid device id: {input:?} (expected decimal or 0x-prefixed hex)")]
pub struct ParseDeviceIdError {
    input: String,
}

impl FromStr for DeviceId {
    type Err = ParseDeviceIdError;

    /// Parse decimal (`100`) or hexadecimal (`0x64`) text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };

        parsed.map(Self).map_err(|_| ParseDeviceIdError {
            input: s.to_string(),
        })
    }
}

/// Set of devices a reader accepts readings from.
///
/// An empty filter accepts every device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    ids: BTreeSet<DeviceId>,
}

impl DeviceFilter {
    /// A filter that accepts every device.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse a list of textual ids, failing on the first invalid entry.
    pub fn parse<I, S>(ids: I) -> Result<Self, ParseDeviceIdError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ids.into_iter()
            .map(|s| s.as_ref().parse::<DeviceId>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(|ids| Self { ids })
    }

    /// Whether readings from `id` pass the filter.
    pub fn allows(&self, id: DeviceId) -> bool {
        self.ids.is_empty() || self.ids.contains(&id)
    }

    /// True when no ids are listed, i.e. every device is accepted.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of listed ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Iterate over the listed ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.ids.iter().copied()
    }
}

impl FromIterator<DeviceId> for DeviceFilter {
    fn from_iter<T: IntoIterator<Item = DeviceId>>(iter: T) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ids.is_empty() {
            return f.write_str("all devices");
        }
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} (0x{:x})", id, id)?;
        }
        Ok(())
    }
}
