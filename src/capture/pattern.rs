//! Synthetic capture source.
//!
//! Paints a drifting gradient at a fixed frame rate. Used for demos without
//! a webcam and for exercising the pipeline end to end.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::{Rgb, RgbImage};
use tracing::{debug, warn};

use super::{CaptureSource, PreviewSurface};
use crate::error::{SessionError, SessionResult};

/// Gradient test-pattern source.
#[derive(Debug)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    fps: u32,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Render frame number `tick` of the pattern.
    pub fn render(width: u32, height: u32, tick: u64) -> RgbImage {
        let shift = (tick % 256) as u32;
        RgbImage::from_fn(width, height, |x, y| {
            let r = ((x * 255 / width.max(1)) + shift) % 256;
            let g = (y * 255 / height.max(1)) as u8;
            Rgb([r as u8, g, 128])
        })
    }
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self::new(640, 480, 15)
    }
}

impl CaptureSource for TestPatternSource {
    fn open(&mut self, surface: PreviewSurface) -> SessionResult<()> {
        if self.worker.is_some() {
            return Err(SessionError::state("open", "open", "test pattern already running"));
        }
        if self.width == 0 || self.height == 0 || self.fps == 0 {
            return Err(SessionError::camera_unavailable(
                self.describe(),
                "width, height and fps must be non-zero",
            ));
        }

        // First frame goes up before returning so the preview is never blank.
        surface.present(Self::render(self.width, self.height, 0));
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let (width, height) = (self.width, self.height);
        let frame_time = Duration::from_millis(1000 / u64::from(self.fps).max(1));
        let worker = thread::Builder::new()
            .name("test-pattern".to_string())
            .spawn(move || {
                let mut tick = 1u64;
                while running.load(Ordering::SeqCst) {
                    thread::sleep(frame_time);
                    surface.present(Self::render(width, height, tick));
                    tick += 1;
                }
                debug!(frames = tick, "test pattern stopped");
            })
            .map_err(|e| SessionError::io("spawn test pattern thread", None, e))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("test pattern thread panicked");
            }
        }
    }

    fn is_live(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        format!("test-pattern {}x{}@{}", self.width, self.height, self.fps)
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.close();
    }
}
