//! Webcam capture via `nokhwa`.
//!
//! `nokhwa::Camera` is `!Send`, so the device lives on its own thread for its
//! whole life. `open` waits for that thread to report whether the stream
//! started, which turns "no device" and "permission denied" into a
//! synchronous `CameraUnavailable`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::RgbImage;
use nokhwa::Camera;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use tracing::{info, warn};

use super::{CaptureSource, PreviewSurface};
use crate::error::{SessionError, SessionResult};

/// Physical camera selected by index (0 = default device).
#[derive(Debug)]
pub struct CameraSource {
    index: u32,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CameraSource {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn run(
        index: u32,
        surface: PreviewSurface,
        running: Arc<AtomicBool>,
        ready: mpsc::Sender<Result<(u32, u32), String>>,
    ) {
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = match Camera::new(CameraIndex::Index(index), requested) {
            Ok(camera) => camera,
            Err(e) => {
                let _ = ready.send(Err(format!("create camera: {e}")));
                return;
            }
        };
        if let Err(e) = camera.open_stream() {
            let _ = ready.send(Err(format!("open stream: {e}")));
            return;
        }

        let resolution = camera.resolution();
        let _ = ready.send(Ok((resolution.width(), resolution.height())));

        while running.load(Ordering::SeqCst) {
            match camera.frame() {
                Ok(buffer) => match buffer.decode_image::<RgbFormat>() {
                    Ok(decoded) => {
                        let (width, height) = decoded.dimensions();
                        match RgbImage::from_raw(width, height, decoded.into_raw()) {
                            Some(frame) => surface.present(frame),
                            None => warn!(width, height, "decoded frame has wrong length"),
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to decode camera frame"),
                },
                Err(e) => {
                    warn!(error = %e, "failed to read camera frame");
                    thread::sleep(Duration::from_millis(50));
                }
            }
        }

        if let Err(e) = camera.stop_stream() {
            warn!(device = index, error = %e, "failed to stop camera stream");
        }
    }
}

impl CaptureSource for CameraSource {
    fn open(&mut self, surface: PreviewSurface) -> SessionResult<()> {
        if self.worker.is_some() {
            return Err(SessionError::state("open", "open", "camera already running"));
        }

        let (ready_tx, ready_rx) = mpsc::channel();
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let index = self.index;
        let worker = thread::Builder::new()
            .name(format!("camera-{index}"))
            .spawn(move || Self::run(index, surface, running, ready_tx))
            .map_err(|e| SessionError::io("spawn camera thread", None, e))?;
        self.worker = Some(worker);

        match ready_rx.recv() {
            Ok(Ok((width, height))) => {
                info!(device = index, width, height, "camera stream started");
                Ok(())
            }
            Ok(Err(reason)) => {
                self.close();
                Err(SessionError::camera_unavailable(self.describe(), reason))
            }
            Err(_) => {
                self.close();
                Err(SessionError::camera_unavailable(
                    self.describe(),
                    "camera thread exited before the stream started",
                ))
            }
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(device = self.index, "camera thread panicked");
            }
        }
    }

    fn is_live(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn describe(&self) -> String {
        format!("camera {}", self.index)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}
