use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use parking_lot::RwLock;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;
use transport::{ControlError, StreamerError};

use crate::{capture::CaptureError, encoder::EncoderError};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    EncoderError(#[from] EncoderError),
    #[error(transparent)]
    CaptureError(#[from] CaptureError),
    #[error(transparent)]
    StreamerError(#[from] StreamerError),
    #[error(transparent)]
    ControlError(#[from] ControlError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("processor is already started")]
    AlreadyStarted,
}

impl ProcessorError {
    /// The viewer closed the connection: the processor ends cleanly.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            Self::StreamerError(e) => e.is_broken_pipe(),
            Self::IoError(e) => transport::is_broken_pipe(e),
            Self::EncoderError(EncoderError::IoError(e)) => transport::is_broken_pipe(e),
            Self::CaptureError(CaptureError::IoError(e)) => transport::is_broken_pipe(e),
            _ => false,
        }
    }
}

/// Notified when a processor terminates.
pub trait TerminationListener: Send + Sync {
    /// `fatal` requests the whole session to stop.
    fn on_terminated(&self, fatal: bool);
}

impl<F> TerminationListener for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_terminated(&self, fatal: bool) {
        self(fatal)
    }
}

/// Unit of work running on its own thread.
pub trait AsyncProcessor: Send {
    fn name(&self) -> &str;

    /// Spawn the processor thread. The listener is called exactly once, when
    /// the thread ends.
    fn start(&mut self, listener: Arc<dyn TerminationListener>) -> Result<(), ProcessorError>;

    /// Request the processor to end, does not wait.
    fn stop(&self);

    /// Wait for the processor thread, returns immediately if it was never
    /// started.
    fn join(&mut self);
}

/// State of a capture/encode orchestrator.
///
/// ```text
/// Idle -> Preparing -> Capturing -> Encoding <-> Draining -> Stopping -> Released
///            ^                                      |
///            +------------- Resetting <-------------+
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum OrchestratorState {
    #[default]
    Idle,
    Preparing,
    Capturing,
    Encoding,
    Draining,
    Resetting,
    Stopping,
    Released,
}

/// Shared view of an orchestrator state, transitions are logged.
#[derive(Debug, Clone)]
pub(crate) struct StateTracker {
    name: &'static str,
    state: Arc<RwLock<OrchestratorState>>,
}

impl StateTracker {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            state: Default::default(),
            name,
        }
    }

    pub(crate) fn get(&self) -> OrchestratorState {
        *self.state.read()
    }

    pub(crate) fn set(&self, next: OrchestratorState) {
        let mut state = self.state.write();
        if *state != next {
            log::debug!("{} state {:?} -> {:?}", self.name, *state, next);

            *state = next;
        }
    }
}

/// Spawn a named processor thread.
///
/// The body result decides whether the termination is fatal: a clean end
/// and a broken pipe are not, any other error (or a panic) is.
pub(crate) fn spawn<F>(
    name: &str,
    listener: Arc<dyn TerminationListener>,
    body: F,
) -> Result<JoinHandle<()>, ProcessorError>
where
    F: FnOnce() -> Result<(), ProcessorError> + Send + 'static,
{
    let name = name.to_string();
    Ok(thread::Builder::new().name(name.clone()).spawn(move || {
        let fatal = match catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(())) => {
                log::info!("{} processor stopped", name);

                false
            }
            Ok(Err(e)) if e.is_broken_pipe() => {
                log::info!("{} processor stopped, peer closed the connection", name);

                false
            }
            Ok(Err(e)) => {
                log::error!("{} processor error={:?}", name, e);

                true
            }
            Err(_) => {
                log::error!("{} processor panicked", name);

                true
            }
        };

        listener.on_terminated(fatal);
    })?)
}

/// Join a processor thread, if any.
pub(crate) fn join(name: &str, handle: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = handle.take() {
        if handle.join().is_err() {
            log::warn!("{} processor thread join failed", name);
        }
    }
}
