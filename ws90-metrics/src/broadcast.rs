//! Reading broadcaster - fan-out of readings to publishers.

use std::fmt;
use std::sync::Arc;

use tracing::warn;
use ws90_types::Reading;

use crate::PublishError;

/// A backend that turns readings into externally visible metrics.
///
/// Subscribers are called synchronously from the reader, so an implementation
/// that needs to do slow I/O should hand the work to its own task.
pub trait Subscriber: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Handle one reading.
    fn on_reading(&self, reading: &Reading) -> Result<(), PublishError>;
}

/// Outcome of publishing one reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers that handled the reading.
    pub delivered: usize,
    /// Subscribers that reported an error.
    pub failed: usize,
}

/// Publish/subscribe channel for readings.
///
/// Subscriptions are made while wiring the daemon (`&mut self`); afterwards
/// the broadcaster is shared behind an `Arc` and only published to. Every
/// reading reaches every subscriber, in subscription order, and a failing
/// subscriber does not stop delivery to the rest.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use ws90_metrics::{Broadcaster, PublishError, Subscriber};
/// use ws90_types::Reading;
///
/// struct Printer;
///
/// impl Subscriber for Printer {
///     fn name(&self) -> &str {
///         "printer"
///     }
///
///     fn on_reading(&self, reading: &Reading) -> Result<(), PublishError> {
///         println!("{:?}", reading.device_id());
///         Ok(())
///     }
/// }
///
/// let mut broadcaster = Broadcaster::new();
/// broadcaster.subscribe(Arc::new(Printer));
///
/// let delivery = broadcaster.publish(&Reading::default());
/// assert_eq!(delivery.delivered, 1);
/// ```
#[derive(Default)]
pub struct Broadcaster {
    subscribers: Vec<Arc<dyn Subscriber>>,
}

impl Broadcaster {
    /// Create a broadcaster without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for every subsequent reading.
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Deliver `reading` to every subscriber.
    pub fn publish(&self, reading: &Reading) -> Delivery {
        let mut delivery = Delivery::default();

        for subscriber in &self.subscribers {
            match subscriber.on_reading(reading) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    warn!(
                        subscriber = subscriber.name(),
                        device_id = ?reading.device_id(),
                        "Subscriber failed to handle reading: {}",
                        e
                    );
                    delivery.failed += 1;
                }
            }
        }

        delivery
    }

    /// True when nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Subscriber names, in delivery order.
    pub fn subscriber_names(&self) -> Vec<&str> {
        self.subscribers.iter().map(|s| s.name()).collect()
    }
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.subscriber_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Log,
        fail: bool,
    }

    impl Subscriber for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn on_reading(&self, reading: &Reading) -> Result<(), PublishError> {
            self.log.lock().push((self.name, reading.clone()));
            if self.fail {
                Err(PublishError::MissingField("id"))
            } else {
                Ok(())
            }
        }
    }

    fn reading(id: u64) -> Reading {
        serde_json::from_value(serde_json::json!({ "id": id })).unwrap()
    }

    type Log = Arc<Mutex<Vec<(&'static str, Reading)>>>;

    fn broadcaster(subscribers: &[(&'static str, bool)]) -> (Broadcaster, Log) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut broadcaster = Broadcaster::new();
        for &(name, fail) in subscribers {
            broadcaster.subscribe(Arc::new(Recorder {
                name,
                log: log.clone(),
                fail,
            }));
        }
        (broadcaster, log)
    }

    #[test]
    fn delivers_to_all_in_subscription_order() {
        let (broadcaster, log) = broadcaster(&[("a", false), ("b", false), ("c", false)]);
        let r = reading(1);

        let delivery = broadcaster.publish(&r);

        assert_eq!(delivery, Delivery { delivered: 3, failed: 0 });
        let names: Vec<_> = log.lock().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(log.lock().iter().all(|(_, got)| *got == r));
    }

    #[test]
    fn failing_subscriber_does_not_block_others() {
        let (broadcaster, log) = broadcaster(&[("a", true), ("b", false)]);

        let delivery = broadcaster.publish(&reading(5));

        assert_eq!(delivery, Delivery { delivered: 1, failed: 1 });
        let names: Vec<_> = log.lock().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn readings_arrive_in_publish_order() {
        let (broadcaster, log) = broadcaster(&[("a", false)]);
        for id in 0..10 {
            broadcaster.publish(&reading(id));
        }

        let ids: Vec<_> = log
            .lock()
            .iter()
            .filter_map(|(_, r)| r.device_id())
            .map(|id| id.get())
            .collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn empty_broadcaster_delivers_nothing() {
        let broadcaster = Broadcaster::new();
        assert!(broadcaster.is_empty());
        assert_eq!(broadcaster.publish(&reading(1)), Delivery::default());
    }

    #[test]
    fn debug_lists_subscribers() {
        let (broadcaster, _) = broadcaster(&[("prometheus", false), ("victoriametrics", false)]);
        assert_eq!(broadcaster.subscriber_names(), vec!["prometheus", "victoriametrics"]);
        assert!(format!("{:?}", broadcaster).contains("victoriametrics"));
    }
}
