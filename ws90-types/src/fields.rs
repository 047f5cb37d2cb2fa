//! Field tables - the declarative mapping from readings to metrics.
//!
//! Adding a sensor field to every publisher only takes a new entry in
//! [`WS90_FIELDS`].

use crate::Reading;

/// Pure conversion from a raw reading value to the published value.
pub type Transform = fn(f64) -> f64;

/// The default transform: publish the raw value.
pub fn identity(value: f64) -> f64 {
    value
}

/// Millis to base unit (mV to V, mm to m).
pub fn milli_to_base(value: f64) -> f64 {
    value / 1000.0
}

/// Maps one reading key onto one gauge metric.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    /// Key in the reading.
    pub key: &'static str,
    /// Published metric name.
    pub name: &'static str,
    /// Help text.
    pub help: &'static str,
    /// Applied to the raw value before publishing.
    pub transform: Transform,
}

impl FieldDescriptor {
    /// Declare a field published as-is.
    pub const fn new(key: &'static str, name: &'static str, help: &'static str) -> Self {
        Self {
            key,
            name,
            help,
            transform: identity,
        }
    }

    /// Replace the transform.
    pub const fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Value to publish for `reading`, or `None` when the field is missing
    /// or not numeric.
    pub fn value(&self, reading: &Reading) -> Option<f64> {
        reading.number(self.key).map(self.transform)
    }
}

/// Describes an info-style metric carrying descriptive labels of a device.
#[derive(Debug, Clone, Copy)]
pub struct ModelInfoDescriptor {
    /// Metric base name; exposed with an `_info` suffix.
    pub name: &'static str,
    /// Help text.
    pub help: &'static str,
    /// Reading keys attached as labels, in order.
    pub labels: &'static [&'static str],
}

impl ModelInfoDescriptor {
    /// Declare an info metric.
    pub const fn new(
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Self {
        Self { name, help, labels }
    }

    /// Label pairs for `reading`. Missing keys render as empty values so the
    /// label set stays the same for every device.
    pub fn label_values(&self, reading: &Reading) -> Vec<(&'static str, String)> {
        self.labels
            .iter()
            .map(|key| (*key, reading.text(key).unwrap_or_default()))
            .collect()
    }
}

/// Gauges published for every WS90 reading.
pub const WS90_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("temperature_C", "ws90_temperature_celsius", "Temperature in Celsius"),
    FieldDescriptor::new("humidity", "ws90_humidity_ratio", "Humidity in percent"),
    FieldDescriptor::new("battery_ok", "ws90_battery_ratio", "Battery percent"),
    FieldDescriptor::new("battery_mV", "ws90_battery_volts", "Battery voltage")
        .with_transform(milli_to_base),
    FieldDescriptor::new("supercap_V", "ws90_supercap_volts", "Supercap voltage"),
    FieldDescriptor::new("wind_dir_deg", "ws90_wind_dir_degrees", "Wind direction in degrees"),
    FieldDescriptor::new("wind_avg_m_s", "ws90_wind_avg_speed", "Wind speed in m/s"),
    FieldDescriptor::new("wind_max_m_s", "ws90_wind_gust_speed", "Wind gust speed in m/s"),
    FieldDescriptor::new("uvi", "ws90_uvi", "UV index"),
    FieldDescriptor::new("light_lux", "ws90_light_lux", "Light in lux"),
    FieldDescriptor::new("rain_mm", "ws90_rain_m", "Total rain").with_transform(milli_to_base),
    FieldDescriptor::new("rain_start", "ws90_rain_start", "Rain start info"),
];

/// Info metrics published for every WS90 reading.
pub const WS90_MODEL_INFO: &[ModelInfoDescriptor] = &[ModelInfoDescriptor::new(
    "ws90_model",
    "Model information",
    &["firmware", "model"],
)];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn reading(json: &str) -> Reading {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn metric_names_are_unique() {
        let names: HashSet<_> = WS90_FIELDS.iter().map(|f| f.name).collect();
        assert_eq!(names.len(), WS90_FIELDS.len());
    }

    #[test]
    fn transforms_apply() {
        let r = reading(r#"{"battery_mV":2800,"rain_mm":1500,"temperature_C":21.5}"#);
        let by_key = |k: &str| WS90_FIELDS.iter().find(|f| f.key == k).unwrap();

        assert_eq!(by_key("battery_mV").value(&r), Some(2.8));
        assert_eq!(by_key("rain_mm").value(&r), Some(1.5));
        assert_eq!(by_key("temperature_C").value(&r), Some(21.5));
        assert_eq!(by_key("humidity").value(&r), None);
    }

    #[test]
    fn info_labels_keep_order_and_fill_missing() {
        let r = reading(r#"{"model":"Fineoffset-WS90","firmware":126}"#);
        let labels = WS90_MODEL_INFO[0].label_values(&r);
        assert_eq!(
            labels,
            vec![
                ("firmware", "126".to_string()),
                ("model", "Fineoffset-WS90".to_string())
            ]
        );

        let partial = reading(r#"{"model":"Fineoffset-WS90"}"#);
        assert_eq!(WS90_MODEL_INFO[0].label_values(&partial)[0].1, "");
    }
}
