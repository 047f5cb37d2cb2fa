//! Metric registry and Prometheus text exposition.
//!
//! Families are keyed by device id: every series carries an `id` label, and
//! removing a device drops its series from every family it appears in.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::RwLock;
use ws90_types::DeviceId;

use crate::RegistryError;

/// Label carrying the device id on every series.
pub const DEVICE_LABEL: &str = "id";

/// A gauge family with one series per device.
#[derive(Debug)]
pub struct GaugeFamily {
    name: String,
    help: String,
    series: RwLock<BTreeMap<DeviceId, f64>>,
}

impl GaugeFamily {
    fn new(name: &str, help: &str) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            series: RwLock::new(BTreeMap::new()),
        }
    }

    /// Exposed metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the device's value, creating the series if needed.
    pub fn set(&self, id: DeviceId, value: f64) {
        self.series.write().insert(id, value);
    }

    /// Current value for a device.
    pub fn get(&self, id: DeviceId) -> Option<f64> {
        self.series.read().get(&id).copied()
    }

    /// Drop the device's series. Returns whether it existed.
    pub fn remove(&self, id: DeviceId) -> bool {
        self.series.write().remove(&id).is_some()
    }

    /// Number of series.
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    /// True when no device has a series.
    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }

    fn render(&self, out: &mut String) {
        write_header(out, &self.name, &self.help);
        for (id, value) in self.series.read().iter() {
            let _ = writeln!(
                out,
                "{}{{{}=\"{}\"}} {}",
                self.name,
                DEVICE_LABEL,
                id,
                format_value(*value)
            );
        }
    }
}

/// An info family: a constant `1` series per device whose labels carry
/// descriptive attributes (model, firmware, ...).
///
/// Setting a device's labels replaces the previous label set, so a device
/// never has more than one series.
#[derive(Debug)]
pub struct InfoFamily {
    name: String,
    help: String,
    series: RwLock<BTreeMap<DeviceId, Vec<(String, String)>>>,
}

impl InfoFamily {
    fn new(name: &str, help: &str) -> Self {
        Self {
            name: format!("{}_info", name),
            help: help.to_string(),
            series: RwLock::new(BTreeMap::new()),
        }
    }

    /// Exposed metric name, including the `_info` suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the device's label set.
    pub fn set<K, V, I>(&self, id: DeviceId, labels: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let labels = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.series.write().insert(id, labels);
    }

    /// Current label set for a device.
    pub fn get(&self, id: DeviceId) -> Option<Vec<(String, String)>> {
        self.series.read().get(&id).cloned()
    }

    /// Drop the device's series. Returns whether it existed.
    pub fn remove(&self, id: DeviceId) -> bool {
        self.series.write().remove(&id).is_some()
    }

    /// Number of series.
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    /// True when no device has a series.
    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }

    fn render(&self, out: &mut String) {
        write_header(out, &self.name, &self.help);
        for (id, labels) in self.series.read().iter() {
            let _ = write!(out, "{}{{{}=\"{}\"", self.name, DEVICE_LABEL, id);
            for (key, value) in labels {
                let _ = write!(out, ",{}=\"{}\"", key, escape_label_value(value));
            }
            out.push_str("} 1\n");
        }
    }
}

#[derive(Debug, Clone)]
enum Family {
    Gauge(Arc<GaugeFamily>),
    Info(Arc<InfoFamily>),
}

impl Family {
    fn name(&self) -> &str {
        match self {
            Family::Gauge(g) => g.name(),
            Family::Info(i) => i.name(),
        }
    }
}

/// Collection of metric families served on the scrape endpoint.
///
/// # Example
///
/// ```rust
/// use ws90_metrics::Registry;
/// use ws90_types::DeviceId;
///
/// let registry = Registry::new();
/// let temperature = registry
///     .gauge("ws90_temperature_celsius", "Temperature in Celsius")
///     .unwrap();
///
/// temperature.set(DeviceId::new(100), 21.5);
///
/// let text = registry.render();
/// assert!(text.contains("ws90_temperature_celsius{id=\"100\"} 21.5"));
/// ```
#[derive(Debug, Default)]
pub struct Registry {
    families: RwLock<Vec<Family>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gauge family.
    pub fn gauge(&self, name: &str, help: &str) -> Result<Arc<GaugeFamily>, RegistryError> {
        let family = Arc::new(GaugeFamily::new(name, help));
        self.register(Family::Gauge(family.clone()))?;
        Ok(family)
    }

    /// Register an info family. It is exposed as `<name>_info`.
    pub fn info(&self, name: &str, help: &str) -> Result<Arc<InfoFamily>, RegistryError> {
        let family = Arc::new(InfoFamily::new(name, help));
        self.register(Family::Info(family.clone()))?;
        Ok(family)
    }

    fn register(&self, family: Family) -> Result<(), RegistryError> {
        let mut families = self.families.write();
        if families.iter().any(|f| f.name() == family.name()) {
            return Err(RegistryError::Duplicate(family.name().to_string()));
        }
        families.push(family);
        Ok(())
    }

    /// Number of registered families.
    pub fn len(&self) -> usize {
        self.families.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.families.read().is_empty()
    }

    /// Value of a gauge series, looked up by family name.
    pub fn gauge_value(&self, name: &str, id: DeviceId) -> Option<f64> {
        self.families.read().iter().find_map(|f| match f {
            Family::Gauge(g) if g.name() == name => g.get(id),
            _ => None,
        })
    }

    /// Number of series across all families that belong to `id`.
    pub fn series_count(&self, id: DeviceId) -> usize {
        self.families
            .read()
            .iter()
            .filter(|f| match f {
                Family::Gauge(g) => g.get(id).is_some(),
                Family::Info(i) => i.get(id).is_some(),
            })
            .count()
    }

    /// Render every family in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for family in self.families.read().iter() {
            match family {
                Family::Gauge(g) => g.render(&mut out),
                Family::Info(i) => i.render(&mut out),
            }
        }
        out
    }
}

fn write_header(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, escape_help(help));
    let _ = writeln!(out, "# TYPE {} gauge", name);
}

/// Format a sample value. Non-finite values use the exposition spellings.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        value.to_string()
    }
}

/// Escape a label value for Prometheus format.
/// Backslash, double-quote, and newline must be escaped.
fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Help text only escapes backslash and newline.
fn escape_help(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}
