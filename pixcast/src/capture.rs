use std::sync::{atomic::AtomicBool, Arc};

use common::{atomic::EasyAtomic, Size};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture cannot be set up as requested (invalid display, camera
    /// not found...). Retrying will not help.
    #[error("capture configuration error: {0}")]
    Configuration(String),
    /// The source cannot be captured on this device.
    #[error("capture is not supported: {0}")]
    Unsupported(String),
    #[error("capture error: {0}")]
    Failed(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

type Interrupter = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ResetState {
    requested: AtomicBool,
    interrupter: Mutex<Option<Interrupter>>,
}

/// Invalidation of a running video capture.
///
/// The capture source requests a reset when its geometry changes (rotation,
/// display resized, camera restarted...). The request is recorded as a flag,
/// consumed by the encoding loop before it prepares the next session, and it
/// interrupts the session currently draining the encoder, if any.
#[derive(Clone, Default)]
pub struct CaptureReset(Arc<ResetState>);

impl CaptureReset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        log::debug!("capture reset requested");

        self.0.requested.set(true);
        if let Some(interrupt) = self.0.interrupter.lock().as_ref() {
            interrupt();
        }
    }

    /// Clear the request, returns whether one was pending.
    pub fn consume_reset(&self) -> bool {
        self.0.requested.replace(false)
    }

    pub fn is_reset_requested(&self) -> bool {
        self.0.requested.get()
    }

    /// Register the action interrupting the running encoder, `None` once the
    /// encoder stopped.
    pub(crate) fn set_interrupter(&self, interrupter: Option<Interrupter>) {
        *self.0.interrupter.lock() = interrupter;
    }
}

/// Video source rendering into the encoder input surface `S`.
///
/// The lifecycle is `init` once, then any number of `prepare` → `start` →
/// `stop` sessions, then `release` once.
pub trait SurfaceCapture<S>: Send + 'static {
    /// `reset` must be triggered whenever the capture needs to be restarted.
    fn init(&mut self, reset: CaptureReset) -> Result<(), CaptureError>;

    /// Compute the geometry of the next session.
    fn prepare(&mut self) -> Result<(), CaptureError>;

    /// Size of the frames of the prepared session.
    fn size(&self) -> Size;

    fn start(&mut self, surface: S) -> Result<(), CaptureError>;

    fn stop(&mut self);

    fn release(&mut self);

    /// Limit the major dimension of the frames for the next sessions.
    /// Returns `false` if the source does not support it.
    fn set_max_size(&mut self, max_size: u32) -> bool;

    /// The source is gone for good (e.g. camera disconnected).
    fn is_closed(&self) -> bool {
        false
    }
}

/// Audio source producing raw PCM chunks.
///
/// The capture is shared between the thread reading it and the thread
/// stopping it, `stop` is called while a `read` may be blocked and must make
/// it return.
pub trait AudioCapture: Send + Sync + 'static {
    fn start(&self) -> Result<(), CaptureError>;

    /// Read one chunk into `buffer`, returns its size and its presentation
    /// timestamp in microseconds. Blocks until audio is available.
    fn read(&self, buffer: &mut [u8]) -> Result<(usize, u64), CaptureError>;

    fn stop(&self);
}
