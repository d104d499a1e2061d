//! Shared mocks for the session integration tests.
//!
//! Every mock writes to one [`CallLog`] so tests can assert ordering across
//! the service and the capture device.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use live_attendance::SessionContext;
use live_attendance::attend_api::{
    ApiError, ApiResult, AttendanceService, FrameRequest, FrameResponse, SessionKey,
};
use live_attendance::capture::{CaptureSource, PreviewSurface};
use live_attendance::error::SessionResult;
use live_attendance::SessionError;

pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &CallLog) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

pub fn context() -> SessionContext {
    SessionContext::new("Computer Science", "A", "Data Structures").unwrap()
}

/// What the mock service answers to one `process_frame`.
#[derive(Debug, Clone)]
pub enum Reply {
    Detect(Vec<&'static str>),
    Fail,
}

/// Scripted recognition service.
pub struct MockService {
    log: CallLog,
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    delay: Duration,
    preview: Option<String>,
    begin_fails: bool,
    begin_hangs: bool,
    end_fails: bool,
    pub begins: AtomicUsize,
    pub frames: AtomicUsize,
    pub ends: AtomicUsize,
    pub last_frame: Mutex<Option<String>>,
}

impl MockService {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: Arc::clone(log),
            script: Mutex::new(VecDeque::new()),
            fallback: Reply::Detect(Vec::new()),
            delay: Duration::ZERO,
            preview: None,
            begin_fails: false,
            begin_hangs: false,
            end_fails: false,
            begins: AtomicUsize::new(0),
            frames: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
            last_frame: Mutex::new(None),
        }
    }

    /// Replies for the first cycles, in order.
    pub fn with_script(self, replies: Vec<Reply>) -> Self {
        *self.script.lock().unwrap() = replies.into();
        self
    }

    /// Reply once the script runs out.
    pub fn with_fallback(mut self, reply: Reply) -> Self {
        self.fallback = reply;
        self
    }

    /// Simulated round-trip time of `process_frame`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Annotated frame (base64) attached to every successful reply.
    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    pub fn failing_begin(mut self) -> Self {
        self.begin_fails = true;
        self
    }

    /// `begin_session` never answers.
    pub fn hanging_begin(mut self) -> Self {
        self.begin_hangs = true;
        self
    }

    pub fn failing_end(mut self) -> Self {
        self.end_fails = true;
        self
    }

    pub fn begin_calls(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn frame_calls(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn end_calls(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }

    fn record(&self, entry: &'static str) {
        self.log.lock().unwrap().push(entry);
    }
}

fn unavailable(endpoint: &'static str) -> ApiError {
    ApiError::Status {
        endpoint,
        status: 503,
        body: "recognition backend unavailable".to_string(),
    }
}

#[async_trait]
impl AttendanceService for MockService {
    async fn courses(&self, _group: &str, _subgroup: &str) -> ApiResult<Vec<String>> {
        self.record("courses");
        Ok(vec!["Data Structures".to_string()])
    }

    async fn begin_session(&self, _key: SessionKey<'_>) -> ApiResult<()> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.record("begin");
        if self.begin_hangs {
            std::future::pending::<()>().await;
        }
        if self.begin_fails {
            return Err(unavailable("start_attendance"));
        }
        Ok(())
    }

    async fn process_frame(&self, request: &FrameRequest<'_>) -> ApiResult<FrameResponse> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        self.record("frame");
        *self.last_frame.lock().unwrap() = Some(request.frame.to_string());

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match reply {
            Reply::Detect(names) => Ok(FrameResponse {
                processed_frame: self.preview.clone(),
                detected_students: Some(names.into_iter().map(String::from).collect()),
            }),
            Reply::Fail => Err(unavailable("process_frame")),
        }
    }

    async fn end_session(&self, _key: SessionKey<'_>) -> ApiResult<()> {
        self.ends.fetch_add(1, Ordering::SeqCst);
        self.record("end");
        if self.end_fails {
            return Err(unavailable("stop_attendance"));
        }
        Ok(())
    }

    async fn download_record(&self, _key: SessionKey<'_>) -> ApiResult<Vec<u8>> {
        self.record("download");
        Ok(b"PK".to_vec())
    }
}

/// Counters shared between a [`MockCamera`] and the test.
#[derive(Debug, Default)]
pub struct CameraTracks {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl CameraTracks {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Presents one solid frame on open; no background thread.
pub struct MockCamera {
    log: CallLog,
    tracks: Arc<CameraTracks>,
    fail_open: bool,
    live: bool,
    gate: Option<mpsc::Receiver<()>>,
}

/// How long a gated camera blocks before giving up.
const GATE_TIMEOUT: Duration = Duration::from_secs(2);

impl MockCamera {
    pub fn new(log: &CallLog, tracks: &Arc<CameraTracks>) -> Self {
        Self {
            log: Arc::clone(log),
            tracks: Arc::clone(tracks),
            fail_open: false,
            live: false,
            gate: None,
        }
    }

    /// `open` and `close` each block the calling thread until a signal
    /// arrives on `gate`, like a driver waiting on hardware.
    pub fn gated(log: &CallLog, tracks: &Arc<CameraTracks>, gate: mpsc::Receiver<()>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(log, tracks)
        }
    }

    /// False when the gate stayed shut.
    fn wait_for_gate(&self) -> bool {
        match &self.gate {
            Some(gate) => gate.recv_timeout(GATE_TIMEOUT).is_ok(),
            None => true,
        }
    }

    pub fn denied(log: &CallLog, tracks: &Arc<CameraTracks>) -> Self {
        Self {
            fail_open: true,
            ..Self::new(log, tracks)
        }
    }
}

impl CaptureSource for MockCamera {
    fn open(&mut self, surface: PreviewSurface) -> SessionResult<()> {
        self.log.lock().unwrap().push("acquire");
        if !self.wait_for_gate() {
            return Err(SessionError::camera_unavailable(
                self.describe(),
                "device never answered",
            ));
        }
        if self.fail_open {
            return Err(SessionError::camera_unavailable(
                self.describe(),
                "permission denied",
            ));
        }
        self.tracks.opened.fetch_add(1, Ordering::SeqCst);
        surface.present(RgbImage::from_pixel(32, 24, Rgb([200, 120, 40])));
        self.live = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.live {
            self.live = false;
            self.tracks.closed.fetch_add(1, Ordering::SeqCst);
            let entry = if self.wait_for_gate() { "release" } else { "release stalled" };
            self.log.lock().unwrap().push(entry);
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn describe(&self) -> String {
        "mock camera".to_string()
    }
}
