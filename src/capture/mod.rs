//! # Capture Module
//!
//! Ownership of the live video source for one session.
//!
//! ```text
//! ┌─────────────────┐  open()  ┌─────────────────┐  current()  ┌─────────────────┐
//! │  CaptureSource  │─────────▶│ PreviewSurface  │────────────▶│  FrameEncoder   │
//! │ (camera/pattern)│  frames  │ (latest frame)  │             │  (per cycle)    │
//! └─────────────────┘          └─────────────────┘             └─────────────────┘
//! ```
//!
//! A source starts painting the [`PreviewSurface`] as soon as it is opened,
//! so a raw preview exists before the first processed frame comes back.
//! [`CaptureHandle::release`] stops every underlying track; it runs at most
//! once no matter how often it is called, and again from `Drop` so an early
//! exit cannot leak the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use image::RgbImage;
use tracing::{debug, info};

use crate::error::{SessionError, SessionResult};

#[cfg(feature = "camera")]
pub mod camera;
pub mod pattern;

#[cfg(feature = "camera")]
pub use camera::CameraSource;
pub use pattern::TestPatternSource;

/// A live video source that paints frames onto a preview surface.
pub trait CaptureSource: Send {
    /// Acquire the device and start presenting frames to `surface`.
    ///
    /// Fails with `CameraUnavailable` when the device is missing, busy or
    /// not permitted. May block until the device answers.
    fn open(&mut self, surface: PreviewSurface) -> SessionResult<()>;

    /// Stop every underlying track. Must be safe to call repeatedly and on a
    /// source that was never opened. May block while a worker shuts down.
    fn close(&mut self);

    /// Whether frames are still being produced.
    fn is_live(&self) -> bool;

    /// Human-readable device name for logs and errors.
    fn describe(&self) -> String;
}

#[derive(Debug, Default)]
struct SurfaceState {
    frame: Option<Arc<RgbImage>>,
    presented: u64,
}

/// Latest raw frame of the live feed, shared between the source thread and
/// the encoder.
#[derive(Debug, Clone, Default)]
pub struct PreviewSurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl PreviewSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the displayed frame.
    pub fn present(&self, frame: RgbImage) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.frame = Some(Arc::new(frame));
        state.presented += 1;
    }

    /// The frame currently on screen, if any.
    pub fn current(&self) -> Option<Arc<RgbImage>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frame
            .clone()
    }

    /// Total frames presented since the surface was bound.
    pub fn frames_presented(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .presented
    }

    fn clear(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frame = None;
    }
}

/// Exclusively owned live source bound to one preview surface.
pub struct CaptureHandle {
    source: Mutex<Box<dyn CaptureSource>>,
    surface: PreviewSurface,
    description: String,
    released: AtomicBool,
}

impl CaptureHandle {
    pub fn surface(&self) -> &PreviewSurface {
        &self.surface
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// True while the device is open and producing frames.
    pub fn is_live(&self) -> bool {
        !self.is_released()
            && self
                .source
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_live()
    }

    /// Frame to encode for the current cycle.
    pub fn current_frame(&self) -> SessionResult<Arc<RgbImage>> {
        if self.is_released() {
            return Err(SessionError::camera_unavailable(
                &self.description,
                "capture already released",
            ));
        }
        self.surface
            .current()
            .ok_or_else(|| SessionError::encoding_unavailable("no frame presented yet"))
    }

    /// Stop all tracks. Later calls are no-ops.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
        self.surface.clear();
        info!(device = %self.description, "capture released");
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("description", &self.description)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Acquires and releases the session's capture handle.
#[derive(Debug, Default)]
pub struct CaptureManager {
    handle: Option<Arc<CaptureHandle>>,
}

impl CaptureManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `source` and bind it to a fresh preview surface.
    pub fn acquire(
        &mut self,
        mut source: Box<dyn CaptureSource>,
    ) -> SessionResult<Arc<CaptureHandle>> {
        if self.handle.as_ref().is_some_and(|h| !h.is_released()) {
            return Err(SessionError::state(
                "acquired",
                "acquire",
                "a capture handle is already held",
            ));
        }

        let description = source.describe();
        let surface = PreviewSurface::new();
        if let Err(e) = source.open(surface.clone()) {
            // A half-opened device may still hold tracks.
            source.close();
            return Err(e);
        }
        info!(device = %description, "capture acquired");

        let handle = Arc::new(CaptureHandle {
            source: Mutex::new(source),
            surface,
            description,
            released: AtomicBool::new(false),
        });
        self.handle = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Release the held handle, if any. Safe to call any number of times.
    pub fn release(&mut self) {
        match self.handle.take() {
            Some(handle) => handle.release(),
            None => debug!("release with no capture held"),
        }
    }

    pub fn handle(&self) -> Option<&Arc<CaptureHandle>> {
        self.handle.as_ref()
    }

    pub fn is_holding(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_released())
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.release();
    }
}
