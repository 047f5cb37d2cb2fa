//! Expiring timer - a restartable single-shot deadline.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

type Action<K> = Arc<dyn Fn(&K) + Send + Sync>;

/// A deferred action that fires once unless it is re-armed first.
///
/// Each call to [`arm`](Self::arm) cancels the pending deadline, if any, and
/// schedules a fresh one. The action receives the key the timer was last armed
/// with. A zero delay disables the timer: arming with it changes nothing.
///
/// Arming and firing are serialized through one lock, and a deadline only
/// fires if no arm happened after it was scheduled. The action itself runs
/// while that lock is held, so [`refresh`](Self::refresh) can bundle an update
/// with the re-arm and never interleave with a clear.
///
/// Deadlines are tokio tasks, so arming must happen inside a tokio runtime.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use ws90_metrics::ExpiringTimer;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let timer = ExpiringTimer::new(|device: &u64| println!("device {device} went silent"));
/// timer.arm(Duration::from_secs(120), 100);
/// assert!(timer.is_pending());
/// # }
/// ```
pub struct ExpiringTimer<K> {
    action: Action<K>,
    state: Arc<Mutex<TimerState>>,
    retired: Arc<AtomicBool>,
}

#[derive(Default)]
struct TimerState {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl<K> ExpiringTimer<K>
where
    K: Send + 'static,
{
    /// Create an unarmed timer running `action` on expiry.
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        Self {
            action: Arc::new(action),
            state: Arc::new(Mutex::new(TimerState::default())),
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel any pending deadline and fire after `delay` with `key`.
    pub fn arm(&self, delay: Duration, key: K) {
        let mut state = self.state.lock();
        self.schedule(&mut state, delay, key);
    }

    /// Run `update`, then re-arm, as one step with respect to firing.
    pub fn refresh<F, R>(&self, delay: Duration, key: K, update: F) -> R
    where
        F: FnOnce() -> R,
    {
        let mut state = self.state.lock();
        let result = update();
        self.schedule(&mut state, delay, key);
        result
    }

    /// Run `update`, then cancel, as one step with respect to firing.
    pub fn disarm<F, R>(&self, update: F) -> R
    where
        F: FnOnce() -> R,
    {
        let mut state = self.state.lock();
        let result = update();
        Self::unschedule(&mut state);
        result
    }

    /// Cancel the pending deadline. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        Self::unschedule(&mut self.state.lock())
    }

    /// Whether a deadline is scheduled and has not fired yet.
    pub fn is_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    fn unschedule(state: &mut TimerState) -> bool {
        state.generation = state.generation.wrapping_add(1);
        match state.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn schedule(&self, state: &mut TimerState, delay: Duration, key: K) {
        if delay.is_zero() {
            return;
        }
        Self::unschedule(state);

        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let retired = Arc::clone(&self.retired);
        let action = Arc::clone(&self.action);

        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut state = shared.lock();
            // Re-armed, cancelled or dropped while we were waking up.
            if state.generation != generation || retired.load(Ordering::Acquire) {
                return;
            }
            state.pending = None;
            action(&key);
        }));
    }
}

impl<K> Drop for ExpiringTimer<K> {
    fn drop(&mut self) {
        self.retired.store(true, Ordering::Release);
        // The lock may be held by our own firing task, when the action drops
        // the last handle. Deadlines that wake later see `retired`.
        if let Some(mut state) = self.state.try_lock() {
            if let Some(handle) = state.pending.take() {
                handle.abort();
            }
        }
    }
}

impl<K> fmt::Debug for ExpiringTimer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ExpiringTimer");
        match self.state.try_lock() {
            Some(state) => debug
                .field("generation", &state.generation)
                .field("pending", &state.pending.is_some()),
            None => debug.field("state", &"<locked>"),
        };
        debug.finish()
    }
}
