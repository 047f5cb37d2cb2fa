//! Reading - one decoded sensor transmission.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::DeviceId;

/// A single decoded transmission, as emitted by rtl_433 on one JSON line.
///
/// Readings are loosely typed: apart from `model`, `id`, `firmware` and
/// `time`, which fields are present depends on the sensor. Publishers look
/// fields up by key through the field tables in this crate.
///
/// A `Reading` only deserializes from a JSON object; any other JSON value is
/// rejected.
///
/// # Example
///
/// ```rust
/// use ws90_types::Reading;
///
/// let reading: Reading = serde_json::from_str(
///     r#"{"model":"Fineoffset-WS90","id":100,"temperature_C":21.5}"#,
/// ).unwrap();
///
/// assert_eq!(reading.model(), Some("Fineoffset-WS90"));
/// assert_eq!(reading.number("temperature_C"), Some(21.5));
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reading {
    fields: Map<String, Value>,
}

impl Reading {
    /// Sensor model string, if present and a string.
    pub fn model(&self) -> Option<&str> {
        self.fields.get("model").and_then(Value::as_str)
    }

    /// Device id, if present and interpretable as one.
    pub fn device_id(&self) -> Option<DeviceId> {
        self.fields.get("id").and_then(DeviceId::from_json)
    }

    /// Raw `time` field.
    pub fn time(&self) -> Option<&Value> {
        self.fields.get("time")
    }

    /// Raw access to a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Numeric value of a field.
    ///
    /// Numbers convert directly, booleans map to `0`/`1` and strings are
    /// parsed. Missing or non-numeric fields give `None`.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Textual value of a field, used for labels.
    ///
    /// Strings are returned verbatim; other scalars use their JSON text.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// True when the reading has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Reading {
        serde_json::from_str(
            r#"{
                "time": "2024-01-01 00:00:00",
                "model": "Fineoffset-WS90",
                "id": 100,
                "firmware": 126,
                "temperature_C": 21.5,
                "battery_ok": true,
                "light_lux": "12.5",
                "data": "3fff000000"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn required_accessors() {
        let reading = sample();
        assert_eq!(reading.model(), Some("Fineoffset-WS90"));
        assert_eq!(reading.device_id(), Some(DeviceId::new(100)));
        assert_eq!(
            reading.time().and_then(Value::as_str),
            Some("2024-01-01 00:00:00")
        );
    }

    #[test]
    fn number_coercion() {
        let reading = sample();
        assert_eq!(reading.number("temperature_C"), Some(21.5));
        assert_eq!(reading.number("battery_ok"), Some(1.0));
        assert_eq!(reading.number("light_lux"), Some(12.5));
        assert_eq!(reading.number("data"), None);
        assert_eq!(reading.number("missing"), None);
    }

    #[test]
    fn text_rendering() {
        let reading = sample();
        assert_eq!(reading.text("firmware").as_deref(), Some("126"));
        assert_eq!(reading.text("model").as_deref(), Some("Fineoffset-WS90"));
        assert_eq!(reading.text("missing"), None);
    }

    #[test]
    fn only_objects_deserialize() {
        assert!(serde_json::from_str::<Reading>("42").is_err());
        assert!(serde_json::from_str::<Reading>("[1,2]").is_err());
        assert!(serde_json::from_str::<Reading>("\"x\"").is_err());
        assert!(serde_json::from_str::<Reading>("{}").unwrap().is_empty());
    }

    #[test]
    fn model_must_be_a_string() {
        let reading: Reading = serde_json::from_str(r#"{"model":5,"id":1}"#).unwrap();
        assert_eq!(reading.model(), None);
    }
}
