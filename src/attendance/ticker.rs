use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

// Set to true to log ticker start/stop
const ENABLE_LOGS: bool = true;

use crate::log_info;

pub type TickCallback = Arc<dyn Fn(u32) + Send + Sync>;

struct TickerInner {
    mounted: usize,
    cancel_token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Periodic wake-up that runs only while at least one view is mounted.
///
/// The callback receives the running tick count for the current run. It is
/// expected to be short and non-blocking.
#[derive(Clone)]
pub struct TickSource {
    inner: Arc<Mutex<TickerInner>>,
    interval: Duration,
    on_tick: TickCallback,
}

/// Keeps the tick source alive. The ticker stops once every guard is dropped.
pub struct ViewGuard {
    source: TickSource,
}

impl TickSource {
    pub fn new(interval: Duration, on_tick: TickCallback) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TickerInner {
                mounted: 0,
                cancel_token: None,
                handle: None,
            })),
            interval,
            on_tick,
        }
    }

    /// Must be called from within a tokio runtime; the first mount spawns the
    /// ticker task.
    pub fn mount(&self) -> ViewGuard {
        let mut inner = self.lock();
        inner.mounted += 1;
        if inner.cancel_token.is_none() {
            self.spawn(&mut inner);
        }
        ViewGuard {
            source: self.clone(),
        }
    }

    pub fn mounted_views(&self) -> usize {
        self.lock().mounted
    }

    pub fn is_running(&self) -> bool {
        self.lock().cancel_token.is_some()
    }

    fn spawn(&self, inner: &mut TickerInner) {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let period = self.interval;
        let on_tick = self.on_tick.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: u32 = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        ticks = ticks.wrapping_add(1);
                        on_tick(ticks);
                    }
                }
            }
        });

        log_info!("tick source started ({}ms)", period.as_millis());
        inner.cancel_token = Some(cancel_token);
        inner.handle = Some(handle);
    }

    fn unmount(&self) {
        let mut inner = self.lock();
        inner.mounted = inner.mounted.saturating_sub(1);
        if inner.mounted > 0 {
            return;
        }

        if let Some(token) = inner.cancel_token.take() {
            token.cancel();
            log_info!("tick source stopped");
        }
        // The loop exits on cancellation; the handle is only dropped here.
        inner.handle.take();
    }

    fn lock(&self) -> MutexGuard<'_, TickerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ViewGuard {
    fn drop(&mut self) {
        self.source.unmount();
    }
}
