//! # Live Session Management
//!
//! Orchestrates one attendance session from camera acquisition to the final
//! remote `end` call.
//!
//! ## Lifecycle
//!
//! 1. **Validate**: the [`SessionContext`] must name group, subgroup and
//!    course, otherwise nothing is acquired and nothing is sent.
//! 2. **Acquire**: the capture source is opened. Failure aborts the start
//!    before any remote call.
//! 3. **Sample and begin**: the [`SamplingScheduler`] starts, and the remote
//!    begin runs as a background task. `start` returns without waiting for
//!    it. A failed or unanswered begin is reported as an event and does not
//!    stop sampling.
//! 4. **Stop**: scheduler stop, then remote end, then capture release. The
//!    release happens even when end fails.
//!
//! Opening and releasing the device may block, so both run on Tokio's
//! blocking pool.
//!
//! Each sampling cycle encodes the current preview, dispatches it, and merges
//! the reported identities into the [`SeenSet`]. Results that arrive after
//! the scheduler has left `Running` are discarded.
//!
//! Progress events go through a bounded queue of [`EVENT_BUFFER`] entries.
//! When nobody drains it, newer events are dropped.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use attend_api::{AttendanceService, HttpAttendanceService};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureHandle, CaptureManager, CaptureSource};
use crate::config::{SessionConfig, SessionContext};
use crate::error::{LifecyclePhase, SessionError, SessionResult};
use crate::processing::{CycleResult, DetectionDispatcher, FrameEncoder};

pub mod events;
pub mod lifecycle;
pub mod scheduler;
pub mod seen;

pub use events::SessionEvent;
pub use lifecycle::LifecycleController;
pub use scheduler::{SamplingScheduler, SchedulerState};
pub use seen::SeenSet;

/// Capacity of the progress event queue.
pub const EVENT_BUFFER: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A configured session that has not started yet.
pub struct LiveSession {
    service: Arc<dyn AttendanceService>,
    capture_source: Box<dyn CaptureSource>,
    config: SessionConfig,
}

impl LiveSession {
    pub fn builder() -> LiveSessionBuilder {
        LiveSessionBuilder::new()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Acquire the camera, start sampling and notify the service.
    ///
    /// Returns as soon as sampling is running. The begin call proceeds in
    /// the background; its outcome arrives as [`SessionEvent::Began`] or
    /// [`SessionEvent::LifecycleFailed`].
    pub async fn start(self, context: SessionContext) -> SessionResult<ActiveSession> {
        context.validate()?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let source = self.capture_source;
        // If this future is dropped mid-open, the manager is dropped with the
        // task output and releases the device.
        let (capture, acquired) = tokio::task::spawn_blocking(move || {
            let mut capture = CaptureManager::new();
            let acquired = capture.acquire(source);
            (capture, acquired)
        })
        .await
        .map_err(|e| SessionError::external("tokio", e).with_operation("acquire"))?;
        let handle = acquired?;
        let _ = events_tx.try_send(SessionEvent::CaptureReady {
            device: handle.description().to_string(),
        });

        let scheduler = SamplingScheduler::new(self.config.interval());
        let lifecycle = Arc::new(LifecycleController::new(Arc::clone(&self.service)));
        let shared = Arc::new(CycleShared {
            context: context.clone(),
            capture: handle,
            encoder: Mutex::new(FrameEncoder::new(self.config.jpeg_quality)),
            dispatcher: DetectionDispatcher::new(self.service),
            scheduler: scheduler.clone(),
            seen: Mutex::new(SeenSet::new()),
            latest_preview: Mutex::new(None),
            failure_threshold: self.config.failure_threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            cycles: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            halted: AtomicBool::new(false),
            events: events_tx,
        });

        let cycle_shared = Arc::clone(&shared);
        // On error the manager releases the camera as it drops.
        scheduler.start(move || Arc::clone(&cycle_shared).run_cycle())?;
        info!(session = %context, interval_ms = self.config.interval_ms, "live session started");

        // Nothing below awaits, so the caller always receives the handle
        // that owns the running scheduler.
        let begin_task = tokio::spawn(begin_in_background(
            Arc::clone(&lifecycle),
            Arc::clone(&shared),
        ));

        Ok(ActiveSession {
            context,
            shared,
            scheduler,
            lifecycle,
            begin_task: Some(begin_task),
            capture,
            events: Some(events_rx),
            outcome: None,
        })
    }
}

async fn begin_in_background(lifecycle: Arc<LifecycleController>, shared: Arc<CycleShared>) {
    match lifecycle.begin(&shared.context).await {
        Ok(()) => shared.emit(SessionEvent::Began),
        Err(e) => {
            warn!(session = %shared.context, error = %e, "begin failed; sampling continues");
            shared.emit(SessionEvent::LifecycleFailed {
                phase: LifecyclePhase::Begin,
                message: e.to_string(),
            });
        }
    }
}

/// Builder for [`LiveSession`].
pub struct LiveSessionBuilder {
    service: Option<Arc<dyn AttendanceService>>,
    capture_source: Option<Box<dyn CaptureSource>>,
    config: SessionConfig,
}

impl LiveSessionBuilder {
    pub fn new() -> Self {
        Self {
            service: None,
            capture_source: None,
            config: SessionConfig::default(),
        }
    }

    /// Use `service` instead of an HTTP client built from the config.
    pub fn with_service(mut self, service: Arc<dyn AttendanceService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_capture_source<S: CaptureSource + 'static>(mut self, source: S) -> Self {
        self.capture_source = Some(Box::new(source));
        self
    }

    pub fn with_boxed_capture_source(mut self, source: Box<dyn CaptureSource>) -> Self {
        self.capture_source = Some(source);
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SessionResult<LiveSession> {
        self.config
            .validate()
            .map_err(|reason| SessionError::config("session", "", reason))?;

        let capture_source = self.capture_source.ok_or_else(|| {
            SessionError::config("capture_source", "", "no capture source specified")
        })?;

        let service = match self.service {
            Some(service) => service,
            None => {
                let client = HttpAttendanceService::with_timeout(
                    &self.config.service_url,
                    self.config.request_timeout(),
                )
                .map_err(|e| SessionError::from_api("connect", e))?;
                Arc::new(client) as Arc<dyn AttendanceService>
            }
        };

        Ok(LiveSession {
            service,
            capture_source,
            config: self.config,
        })
    }
}

impl Default for LiveSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the session handle and in-flight cycles.
struct CycleShared {
    context: SessionContext,
    capture: Arc<CaptureHandle>,
    encoder: Mutex<FrameEncoder>,
    dispatcher: DetectionDispatcher,
    scheduler: SamplingScheduler,
    seen: Mutex<SeenSet>,
    latest_preview: Mutex<Option<Arc<Vec<u8>>>>,
    failure_threshold: u32,
    consecutive_failures: AtomicU32,
    cycles: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    halted: AtomicBool,
    events: mpsc::Sender<SessionEvent>,
}

impl CycleShared {
    fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(?event, "event queue full; dropping event");
            }
            // Nobody listening is fine.
            Err(TrySendError::Closed(_)) => {}
        }
    }

    async fn run_cycle(self: Arc<Self>) {
        if !self.scheduler.is_running() {
            return;
        }
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;

        let frame = {
            let mut encoder = lock(&self.encoder);
            encoder.capture(&self.capture)
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(cycle, error = %e, "no frame this cycle");
                self.emit(SessionEvent::CycleSkipped {
                    cycle,
                    reason: e.to_string(),
                });
                return;
            }
        };

        let outcome = self.dispatcher.dispatch(&frame, &self.context).await;
        if !self.scheduler.is_running() {
            debug!(cycle, "discarding result that arrived after sampling stopped");
            self.emit(SessionEvent::StaleResultDiscarded { cycle });
            return;
        }

        match outcome {
            Ok(result) => self.apply(cycle, result),
            Err(e) => self.record_failure(cycle, e),
        }
    }

    fn apply(&self, cycle: u64, result: CycleResult) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.applied.fetch_add(1, Ordering::SeqCst);

        let (new_identities, attendance) = {
            let mut seen = lock(&self.seen);
            let added = seen.extend_new(result.new_detections);
            (added, seen.len())
        };
        if let Some(image) = result.processed_image {
            *lock(&self.latest_preview) = Some(Arc::new(image));
        }

        if new_identities.is_empty() {
            debug!(cycle, attendance, "cycle applied");
        } else {
            info!(cycle, attendance, new = ?new_identities, "new attendees recognised");
        }
        self.emit(SessionEvent::CycleApplied {
            cycle,
            new_identities,
            attendance,
        });
    }

    fn record_failure(&self, cycle: u64, e: SessionError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let consecutive = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(cycle, consecutive, error = %e, "frame dispatch failed");
        self.emit(SessionEvent::CycleFailed {
            cycle,
            consecutive,
            message: e.to_string(),
        });

        if consecutive >= self.failure_threshold && !self.halted.swap(true, Ordering::SeqCst) {
            self.scheduler.stop();
            error!(
                consecutive,
                threshold = self.failure_threshold,
                "sampling halted after repeated dispatch failures"
            );
            self.emit(SessionEvent::Halted {
                consecutive_failures: consecutive,
                message: e.to_string(),
            });
        }
    }
}

/// Final tally of a stopped session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub context: SessionContext,
    /// Every recognised identity, sorted.
    pub attendees: Vec<String>,
    pub cycles_started: u64,
    pub cycles_applied: u64,
    pub cycles_failed: u64,
    /// Sampling stopped itself after too many consecutive failures.
    pub halted: bool,
    pub begin_confirmed: bool,
}

impl SessionSummary {
    pub fn attendance_count(&self) -> usize {
        self.attendees.len()
    }
}

/// A running session. Call [`ActiveSession::stop`] to end it cleanly;
/// dropping it stops sampling and releases the camera without telling the
/// service.
pub struct ActiveSession {
    context: SessionContext,
    shared: Arc<CycleShared>,
    scheduler: SamplingScheduler,
    lifecycle: Arc<LifecycleController>,
    begin_task: Option<JoinHandle<()>>,
    capture: CaptureManager,
    events: Option<mpsc::Receiver<SessionEvent>>,
    outcome: Option<(SessionSummary, Option<String>)>,
}

impl ActiveSession {
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn attendance_count(&self) -> usize {
        lock(&self.shared.seen).len()
    }

    /// Identities recognised so far, sorted.
    pub fn attendees(&self) -> Vec<String> {
        lock(&self.shared.seen).to_sorted_vec()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.outcome.is_some()
    }

    /// Most recent annotated preview returned by the service, as JPEG.
    pub fn latest_processed_frame(&self) -> Option<Arc<Vec<u8>>> {
        lock(&self.shared.latest_preview).clone()
    }

    /// The raw live feed, while the camera is held.
    pub fn capture(&self) -> Option<&Arc<CaptureHandle>> {
        self.capture.handle()
    }

    /// Take the event stream. Only the first call returns it.
    ///
    /// The queue holds at most [`EVENT_BUFFER`] undrained events.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    /// Resolves once sampling stops, including a self-halt.
    pub async fn wait_halted(&self) {
        self.scheduler.wait_stopped().await;
    }

    /// Stop sampling, end the remote session and release the camera.
    ///
    /// Repeat calls return the first call's outcome without touching the
    /// service or the camera again.
    pub async fn stop(&mut self) -> SessionResult<SessionSummary> {
        if self.outcome.is_none() {
            self.scheduler.stop();
            self.abort_begin();

            let end_error = match self.lifecycle.end(&self.context).await {
                Ok(()) => {
                    self.shared.emit(SessionEvent::Ended);
                    None
                }
                Err(e) => {
                    warn!(session = %self.context, error = %e, "end failed; releasing capture anyway");
                    self.shared.emit(SessionEvent::LifecycleFailed {
                        phase: LifecyclePhase::End,
                        message: e.to_string(),
                    });
                    Some(e.to_string())
                }
            };

            let mut capture = std::mem::take(&mut self.capture);
            if let Err(e) = tokio::task::spawn_blocking(move || capture.release()).await {
                warn!(session = %self.context, error = %e, "capture release task failed");
            }
            self.shared.emit(SessionEvent::CaptureReleased);

            let summary = self.summarize();
            info!(
                session = %self.context,
                attendance = summary.attendance_count(),
                cycles = summary.cycles_started,
                "live session stopped"
            );
            self.outcome = Some((summary, end_error));
        }

        match &self.outcome {
            Some((summary, None)) => Ok(summary.clone()),
            Some((_, Some(reason))) => Err(SessionError::lifecycle(LifecyclePhase::End, reason)),
            None => Err(SessionError::state("stopping", "stop", "session outcome missing")),
        }
    }

    /// An unanswered begin must not outlive the session.
    fn abort_begin(&mut self) {
        if let Some(task) = self.begin_task.take() {
            if !task.is_finished() {
                debug!(session = %self.context, "begin still pending; abandoning it");
                task.abort();
            }
        }
    }

    fn summarize(&self) -> SessionSummary {
        SessionSummary {
            context: self.context.clone(),
            attendees: self.attendees(),
            cycles_started: self.shared.cycles.load(Ordering::SeqCst),
            cycles_applied: self.shared.applied.load(Ordering::SeqCst),
            cycles_failed: self.shared.failed.load(Ordering::SeqCst),
            halted: self.is_halted(),
            begin_confirmed: self.lifecycle.was_begun(),
        }
    }

    /// Tally so far, or the final one after `stop`.
    pub fn summary(&self) -> SessionSummary {
        match &self.outcome {
            Some((summary, _)) => summary.clone(),
            None => self.summarize(),
        }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            warn!(session = %self.context, "session dropped without stop; remote session left open");
            self.scheduler.stop();
            self.abort_begin();
            // Drop cannot await; release on this thread.
            self.capture.release();
        }
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("context", &self.context)
            .field("scheduler", &self.scheduler.state())
            .field("attendance", &self.attendance_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
