//! Fixed-interval sampling timer.
//!
//! The scheduler only decides *when* a cycle runs. Each tick spawns the
//! cycle as its own task, so a slow request never delays the next tick and
//! cycles may overlap. The first tick fires one full interval after
//! [`SamplingScheduler::start`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

impl SchedulerState {
    fn as_str(self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
            SchedulerState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    interval: Duration,
    state: watch::Sender<SchedulerState>,
    ticks: AtomicU64,
}

/// Cloneable handle to one timer. `Idle -> Running -> Stopped`, no restart.
#[derive(Clone)]
pub struct SamplingScheduler {
    inner: Arc<Inner>,
}

impl SamplingScheduler {
    pub fn new(interval: Duration) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            inner: Arc::new(Inner {
                interval,
                state,
                ticks: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Ticks fired so far.
    pub fn ticks(&self) -> u64 {
        self.inner.ticks.load(Ordering::SeqCst)
    }

    /// Begin firing `cycle` every interval on the current Tokio runtime.
    ///
    /// Only valid from `Idle`; a stopped scheduler stays stopped.
    pub fn start<F, Fut>(&self, cycle: F) -> SessionResult<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| {
            SessionError::state(
                self.state().as_str(),
                "start",
                "sampling requires a running Tokio runtime",
            )
        })?;

        let mut previous = SchedulerState::Idle;
        let started = self.inner.state.send_if_modified(|state| {
            previous = *state;
            if *state == SchedulerState::Idle {
                *state = SchedulerState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(SessionError::state(
                previous.as_str(),
                "start",
                "a scheduler cannot be restarted",
            ));
        }

        let inner = Arc::clone(&self.inner);
        let mut state_rx = self.inner.state.subscribe();
        runtime.spawn(async move {
            let period = inner.interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if *state_rx.borrow() != SchedulerState::Running {
                            break;
                        }
                        let tick = inner.ticks.fetch_add(1, Ordering::SeqCst) + 1;
                        debug!(tick, "sampling tick");
                        tokio::spawn(cycle());
                    }
                    changed = state_rx.changed() => {
                        if changed.is_err() || *state_rx.borrow() != SchedulerState::Running {
                            break;
                        }
                    }
                }
            }
            debug!(ticks = inner.ticks.load(Ordering::SeqCst), "ticker exited");
        });

        info!(interval_ms = period_ms(self.inner.interval), "sampling scheduler started");
        Ok(())
    }

    /// Stop firing. Valid from any state and idempotent; returns whether this
    /// call made the transition. Cycles already in flight are not cancelled.
    pub fn stop(&self) -> bool {
        let stopped = self.inner.state.send_if_modified(|state| {
            if *state == SchedulerState::Stopped {
                false
            } else {
                *state = SchedulerState::Stopped;
                true
            }
        });
        if stopped {
            info!(ticks = self.ticks(), "sampling scheduler stopped");
        }
        stopped
    }

    /// Resolves once the scheduler reaches `Stopped`, whoever stopped it.
    pub async fn wait_stopped(&self) {
        let mut state_rx = self.inner.state.subscribe();
        let _ = state_rx
            .wait_for(|state| *state == SchedulerState::Stopped)
            .await;
    }
}

impl std::fmt::Debug for SamplingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingScheduler")
            .field("interval", &self.inner.interval)
            .field("state", &self.state())
            .field("ticks", &self.ticks())
            .finish()
    }
}

fn period_ms(period: Duration) -> u64 {
    u64::try_from(period.as_millis()).unwrap_or(u64::MAX)
}
