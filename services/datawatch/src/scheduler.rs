//! Poll scheduler: a repeating pull timer with at-most-one pull in flight

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type PullFn<T> = Arc<dyn Fn() -> BoxFuture<'static, T> + Send + Sync>;
type InFlight<T> = Shared<BoxFuture<'static, T>>;

struct Timer {
    interval: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Timer {
    fn shutdown(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

struct Inner<T: Clone> {
    pull: PullFn<T>,
    in_flight: Mutex<Option<InFlight<T>>>,
    timer: Mutex<Option<Timer>>,
}

impl<T: Clone> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.shutdown();
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drives a caller-supplied pull function on a timer and on demand.
///
/// A pull runs as its own task: neither `stop()` nor dropping the caller
/// that started it cancels a pull once it has begun.
pub struct PollScheduler<T: Clone> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone> Clone for PollScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> std::fmt::Debug for PollScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("interval", &lock(&self.inner.timer).as_ref().map(|t| t.interval))
            .field("in_flight", &lock(&self.inner.in_flight).is_some())
            .finish()
    }
}

impl<T> PollScheduler<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(pull: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                pull: Arc::new(move || pull().boxed()),
                in_flight: Mutex::new(None),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Install a repeating trigger, replacing any previous one. A zero
    /// interval leaves the scheduler in manual-only mode.
    pub fn start(&self, interval: Duration) {
        let mut timer = lock(&self.inner.timer);
        if let Some(previous) = timer.take() {
            debug!("Replacing poll timer ({:?})", previous.interval);
            previous.shutdown();
        }

        if interval.is_zero() {
            info!("Auto-refresh disabled, manual refresh only");
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = token.cancelled() => break,
                }
                let Some(scheduler) = Self::from_weak(&weak) else {
                    break;
                };
                tokio::select! {
                    _ = scheduler.trigger_now() => {}
                    _ = token.cancelled() => break,
                }
            }
            debug!("Poll timer stopped");
        });

        info!("Auto-refresh every {:?}", interval);
        *timer = Some(Timer {
            interval,
            cancel,
            handle,
        });
    }

    /// Cancel the timer. Idempotent; an in-flight pull still completes.
    pub fn stop(&self) {
        if let Some(timer) = lock(&self.inner.timer).take() {
            debug!("Stopping poll timer ({:?})", timer.interval);
            timer.shutdown();
        }
    }

    /// Pull now, or join the pull already in flight and return its result
    pub async fn trigger_now(&self) -> T {
        let pull = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Pull already in flight, awaiting it");
                    existing.clone()
                }
                None => {
                    let weak = Arc::downgrade(&self.inner);
                    let fut = (self.inner.pull)();
                    let shared = async move {
                        let result = fut.await;
                        if let Some(inner) = weak.upgrade() {
                            *lock(&inner.in_flight) = None;
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    tokio::spawn(shared.clone());
                    shared
                }
            }
        };
        pull.await
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.timer).is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        lock(&self.inner.timer).as_ref().map(|t| t.interval)
    }

    pub fn in_flight(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }

    fn from_weak(weak: &Weak<Inner<T>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}
