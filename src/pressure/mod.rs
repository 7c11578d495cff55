//! Memory-pressure notifications
//!
//! A process-wide notifier fans reclamation events out to weakly-held
//! subscribers. Rust has no managed-runtime collector to hook, so the
//! default event source is a fixed-interval timer; hosts that do have a
//! pressure signal (an allocator metric, a cgroup watcher, a test) plug in
//! their own [`PressureSource`] or call [`PressureNotifier::notify_now`].
//!
//! Subscribers are invoked out-of-line on a small worker pool so a slow
//! subscriber never blocks the event source. Order across subscribers is
//! unspecified. A subscriber that becomes otherwise unreachable is dropped
//! silently on the next notification round; no explicit unsubscribe exists.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Default interval of the timer fallback.
pub const DEFAULT_PRESSURE_INTERVAL: Duration = Duration::from_secs(10);

/// Threads in the fan-out pool.
const FANOUT_WORKERS: usize = 2;

/// Receives memory-pressure notifications.
pub trait PressureCallback: Send + Sync {
    fn on_pressure(&self);
}

/// Source of memory-pressure events driving a notifier.
pub trait PressureSource: Send {
    /// Block until the next pressure event. Returning `false` stops the
    /// notifier's dispatch loop.
    fn wait_for_event(&mut self) -> bool;
}

/// Fixed-interval timer source: the degraded strategy used when the host
/// offers no real reclamation hook. Never fatal, only less precise.
pub struct TimerSource {
    interval: Duration,
}

impl TimerSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for TimerSource {
    fn default() -> Self {
        Self::new(DEFAULT_PRESSURE_INTERVAL)
    }
}

impl PressureSource for TimerSource {
    fn wait_for_event(&mut self) -> bool {
        thread::sleep(self.interval);
        true
    }
}

struct Core {
    subscribers: Mutex<Vec<Weak<dyn PressureCallback>>>,
    fanout_tx: Sender<Arc<dyn PressureCallback>>,
}

impl Core {
    /// Hand every live subscriber to the fan-out pool and sweep dead ones.
    fn dispatch(&self) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|weak| match weak.upgrade() {
            Some(callback) => {
                let _ = self.fanout_tx.send(callback);
                true
            }
            None => false,
        });
    }
}

static GLOBAL: Lazy<PressureNotifier> =
    Lazy::new(|| PressureNotifier::with_source(Box::new(TimerSource::default())));

/// Dispatcher of memory-pressure events to weakly-held subscribers.
///
/// The process-wide instance behind [`PressureNotifier::global`] is
/// constructed lazily on first use and never torn down. Standalone
/// instances (for tests, or custom sources) are created with
/// [`PressureNotifier::with_source`]; dropping one stops its fan-out
/// workers and ends its source loop after the next event.
pub struct PressureNotifier {
    core: Arc<Core>,
}

impl PressureNotifier {
    /// The process-wide notifier, driven by the default timer source.
    pub fn global() -> &'static PressureNotifier {
        &GLOBAL
    }

    /// Build a notifier driven by the given event source.
    pub fn with_source(mut source: Box<dyn PressureSource>) -> Self {
        let (fanout_tx, fanout_rx) = channel::unbounded::<Arc<dyn PressureCallback>>();

        for i in 0..FANOUT_WORKERS {
            let rx = fanout_rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("chunkstore-pressure-{i}"))
                .spawn(move || {
                    // Ends when every sender is gone.
                    for callback in rx.iter() {
                        callback.on_pressure();
                    }
                });
            if let Err(e) = spawned {
                warn!(error = %e, "pressure fan-out worker not started");
            }
        }

        let core = Arc::new(Core {
            subscribers: Mutex::new(Vec::new()),
            fanout_tx,
        });

        // The loop holds the core weakly: dropping the notifier drops the
        // fan-out sender (stopping the workers) and ends this loop on its
        // next event, instead of keeping everything alive forever.
        let loop_core = Arc::downgrade(&core);
        let spawned = thread::Builder::new()
            .name("chunkstore-pressure-source".into())
            .spawn(move || {
                debug!("pressure source loop started");
                while source.wait_for_event() {
                    match loop_core.upgrade() {
                        Some(core) => core.dispatch(),
                        None => break,
                    }
                }
                debug!("pressure source loop stopped");
            });
        if let Err(e) = spawned {
            warn!(error = %e, "pressure source not started; only explicit notifications will fire");
        }

        Self { core }
    }

    /// Register a callback. The notifier holds it weakly: once the caller
    /// drops its `Arc`, the subscription disappears on the next round.
    pub fn subscribe(&self, callback: Weak<dyn PressureCallback>) {
        self.core.subscribers.lock().push(callback);
    }

    /// Synthesize a pressure event immediately.
    pub fn notify_now(&self) {
        self.core.dispatch();
    }

    /// Number of currently registered subscriptions, dead weaks included
    /// until the next round sweeps them.
    pub fn subscriber_count(&self) -> usize {
        self.core.subscribers.lock().len()
    }
}
