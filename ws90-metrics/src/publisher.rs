//! Local registry publisher with per-device expiry.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};
use ws90_types::{DeviceId, FieldDescriptor, ModelInfoDescriptor, Reading};

use crate::registry::{GaugeFamily, InfoFamily, Registry};
use crate::{ExpiringTimer, PublishError, RegistryError, Subscriber};

/// Families registered for one field table.
#[derive(Debug)]
struct DeviceMetrics {
    gauges: Vec<(FieldDescriptor, Arc<GaugeFamily>)>,
    infos: Vec<(ModelInfoDescriptor, Arc<InfoFamily>)>,
}

impl DeviceMetrics {
    fn update(&self, id: DeviceId, reading: &Reading) {
        for (descriptor, family) in &self.infos {
            family.set(id, descriptor.label_values(reading));
        }

        for (descriptor, family) in &self.gauges {
            match descriptor.value(reading) {
                Some(value) => family.set(id, value),
                None => trace!(device_id = %id, field = descriptor.key, "Field missing, gauge left as is"),
            }
        }
    }

    /// Remove every series of `id`. Returns how many existed.
    fn clear(&self, id: DeviceId) -> usize {
        let gauges = self.gauges.iter().filter(|(_, f)| f.remove(id)).count();
        let infos = self.infos.iter().filter(|(_, f)| f.remove(id)).count();
        gauges + infos
    }
}

/// Publishes readings as gauges in a local [`Registry`].
///
/// Each device gets its own [`ExpiringTimer`]. Every reading re-arms it, and
/// when it fires all series carrying that device's id are removed, so a
/// sensor that went silent drops out of the next scrape. A zero clear
/// interval keeps series forever.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use ws90_metrics::{PrometheusPublisher, Registry, Subscriber};
/// use ws90_types::{Reading, WS90_FIELDS, WS90_MODEL_INFO};
///
/// let registry = Arc::new(Registry::new());
/// let publisher =
///     PrometheusPublisher::new(&registry, WS90_FIELDS, WS90_MODEL_INFO, Duration::ZERO).unwrap();
///
/// let reading: Reading = serde_json::from_str(
///     r#"{"model":"Fineoffset-WS90","id":100,"battery_mV":2800}"#,
/// )
/// .unwrap();
/// publisher.on_reading(&reading).unwrap();
///
/// assert!(registry.render().contains("ws90_battery_volts{id=\"100\"} 2.8"));
/// ```
#[derive(Debug)]
pub struct PrometheusPublisher {
    metrics: Arc<DeviceMetrics>,
    clear_interval: Duration,
    timers: Arc<Mutex<TimerMap>>,
}

type TimerMap = HashMap<DeviceId, Arc<ExpiringTimer<DeviceId>>>;

impl PrometheusPublisher {
    /// Register one family per descriptor in `registry`.
    pub fn new(
        registry: &Registry,
        fields: &[FieldDescriptor],
        infos: &[ModelInfoDescriptor],
        clear_interval: Duration,
    ) -> Result<Self, RegistryError> {
        let mut metrics = DeviceMetrics {
            gauges: Vec::with_capacity(fields.len()),
            infos: Vec::with_capacity(infos.len()),
        };
        for descriptor in fields {
            let family = registry.gauge(descriptor.name, descriptor.help)?;
            metrics.gauges.push((*descriptor, family));
        }
        for descriptor in infos {
            let family = registry.info(descriptor.name, descriptor.help)?;
            metrics.infos.push((*descriptor, family));
        }

        Ok(Self {
            metrics: Arc::new(metrics),
            clear_interval,
            timers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Remove the device's series now and cancel its expiry.
    pub fn clear_device(&self, id: DeviceId) -> usize {
        match self.timer(id) {
            Some(timer) => timer.disarm(|| self.metrics.clear(id)),
            None => self.metrics.clear(id),
        }
    }

    /// Number of devices with a live expiry timer.
    pub fn tracked_devices(&self) -> usize {
        self.timers.lock().len()
    }

    /// Whether an expiry is pending for `id`.
    pub fn expiry_pending(&self, id: DeviceId) -> bool {
        self.timer(id).is_some_and(|t| t.is_pending())
    }

    fn timer(&self, id: DeviceId) -> Option<Arc<ExpiringTimer<DeviceId>>> {
        self.timers.lock().get(&id).cloned()
    }

    fn timer_or_insert(&self, id: DeviceId) -> Arc<ExpiringTimer<DeviceId>> {
        let mut timers = self.timers.lock();
        timers
            .entry(id)
            .or_insert_with(|| {
                let metrics = Arc::clone(&self.metrics);
                let map = Arc::downgrade(&self.timers);
                Arc::new_cyclic(|me: &Weak<ExpiringTimer<DeviceId>>| {
                    let me = me.clone();
                    ExpiringTimer::new(move |id: &DeviceId| {
                        let removed = metrics.clear(*id);
                        forget_timer(&map, *id, &me);
                        debug!(device_id = %id, removed, "Device went silent, cleared its metrics");
                    })
                })
            })
            .clone()
    }

    /// Whether `timer` is still the one registered for `id`.
    fn is_current(&self, id: DeviceId, timer: &Arc<ExpiringTimer<DeviceId>>) -> bool {
        self.timers
            .lock()
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, timer))
    }
}

/// Drop the map entry of an expired timer, unless it was already replaced.
///
/// Runs under the timer's own lock, so the removed handle may be the last one.
fn forget_timer(map: &Weak<Mutex<TimerMap>>, id: DeviceId, timer: &Weak<ExpiringTimer<DeviceId>>) {
    let Some(map) = map.upgrade() else {
        return;
    };
    let mut timers = map.lock();
    if timers
        .get(&id)
        .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), timer.as_ptr()))
    {
        timers.remove(&id);
    }
}

impl Subscriber for PrometheusPublisher {
    fn name(&self) -> &str {
        "prometheus"
    }

    fn on_reading(&self, reading: &Reading) -> Result<(), PublishError> {
        let id = reading.device_id().ok_or(PublishError::MissingField("id"))?;

        if self.clear_interval.is_zero() {
            self.metrics.update(id, reading);
            return Ok(());
        }

        // Map lock is released before the timer lock is taken.
        loop {
            let timer = self.timer_or_insert(id);
            timer.refresh(self.clear_interval, id, || self.metrics.update(id, reading));
            if self.is_current(id, &timer) {
                return Ok(());
            }
            // Expired and forgotten between lookup and refresh.
            timer.cancel();
        }
    }
}
