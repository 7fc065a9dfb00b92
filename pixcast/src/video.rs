use std::{
    io::Write,
    sync::{atomic::AtomicBool, Arc},
    thread::{self, JoinHandle},
    time::Duration,
};

use common::{atomic::EasyAtomic, codec::VideoCodec, Size};
use crossbeam::channel::{bounded, Receiver, Sender};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use transport::Streamer;

use crate::{
    capture::{CaptureError, CaptureReset, SurfaceCapture},
    encoder::{BufferInfo, Encoder, EncoderCallback, EncoderError, EncoderEvent, EncoderFormat},
    lifecycle::{
        self, AsyncProcessor, OrchestratorState, ProcessorError, StateTracker, TerminationListener,
    },
};

/// Major dimensions tried, in order, when the encoder fails before the first
/// frame.
pub const DEFAULT_MAX_SIZE_FALLBACK: [u32; 6] = [2560, 1920, 1600, 1280, 1024, 800];

/// Encoder failures tolerated in a row once frames were sent.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct SurfaceEncoderOptions {
    pub codec: VideoCodec,
    pub bit_rate: u32,
    pub max_fps: Option<f32>,
    /// Seconds between key frames.
    pub key_frame_interval: u32,
    pub repeat_previous_frame_after_us: u64,
    /// Retry with a smaller size when the encoder fails before the first
    /// frame.
    pub downsize_on_error: bool,
    pub max_size_fallback: Vec<u32>,
}

impl Default for SurfaceEncoderOptions {
    fn default() -> Self {
        Self {
            codec: VideoCodec::default(),
            bit_rate: 8_000_000,
            max_fps: None,
            key_frame_interval: 10,
            repeat_previous_frame_after_us: 100_000,
            downsize_on_error: true,
            max_size_fallback: DEFAULT_MAX_SIZE_FALLBACK.to_vec(),
        }
    }
}

/// Drives a video capture into an encoder and the encoder output into the
/// video stream.
///
/// Every time the capture is reset (rotation, resize...), the encoder is
/// stopped and configured again for the new geometry, the viewer only sees a
/// new config packet.
pub struct SurfaceEncoder<C, E, W> {
    parts: Option<(C, E, Streamer<W>)>,
    options: SurfaceEncoderOptions,
    stopped: Arc<AtomicBool>,
    events: (Sender<EncoderEvent>, Receiver<EncoderEvent>),
    reset: CaptureReset,
    state: StateTracker,
    handle: Option<JoinHandle<()>>,
}

impl<C, E, W> SurfaceEncoder<C, E, W>
where
    E: Encoder,
    C: SurfaceCapture<E::Surface>,
    W: Write + Send + 'static,
{
    pub fn new(capture: C, encoder: E, streamer: Streamer<W>, options: SurfaceEncoderOptions) -> Self {
        Self {
            events: bounded(EncoderCallback::QUEUE_CAPACITY),
            parts: Some((capture, encoder, streamer)),
            stopped: Default::default(),
            reset: CaptureReset::new(),
            state: StateTracker::new("video"),
            handle: None,
            options,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state.get()
    }

    /// The reset handed to the capture, also triggered by the viewer through
    /// [`crate::Controller::with_capture_reset`].
    pub fn capture_reset(&self) -> CaptureReset {
        self.reset.clone()
    }
}

impl<C, E, W> AsyncProcessor for SurfaceEncoder<C, E, W>
where
    E: Encoder,
    C: SurfaceCapture<E::Surface>,
    W: Write + Send + 'static,
{
    fn name(&self) -> &str {
        "video"
    }

    fn start(&mut self, listener: Arc<dyn TerminationListener>) -> Result<(), ProcessorError> {
        let (capture, encoder, streamer) = self.parts.take().ok_or(ProcessorError::AlreadyStarted)?;
        let worker = VideoWorker {
            options: self.options.clone(),
            stopped: self.stopped.clone(),
            sender: self.events.0.clone(),
            events: self.events.1.clone(),
            state: self.state.clone(),
            reset: self.reset.clone(),
            first_frame_sent: false,
            consecutive_errors: 0,
            capture,
            encoder,
            streamer,
        };

        self.handle = Some(lifecycle::spawn("video", listener, move || worker.run())?);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.set(true);

        // wake up the drain, if any
        let _ = self.events.0.try_send(EncoderEvent::Interrupted);
    }

    fn join(&mut self) {
        lifecycle::join("video", &mut self.handle);
    }
}

struct VideoWorker<C, E, W> {
    capture: C,
    encoder: E,
    streamer: Streamer<W>,
    options: SurfaceEncoderOptions,
    stopped: Arc<AtomicBool>,
    sender: Sender<EncoderEvent>,
    events: Receiver<EncoderEvent>,
    state: StateTracker,
    reset: CaptureReset,
    first_frame_sent: bool,
    consecutive_errors: u32,
}

impl<C, E, W> VideoWorker<C, E, W>
where
    E: Encoder,
    C: SurfaceCapture<E::Surface>,
    W: Write,
{
    fn run(mut self) -> Result<(), ProcessorError> {
        let reset = self.reset.clone();
        let result = self.stream(&reset);

        self.state.set(OrchestratorState::Stopping);
        if let Err(e) = &result {
            if is_configuration_error(e) && !self.streamer.header_written() {
                if let Err(e) = self.streamer.write_disable_stream(true) {
                    log::warn!("video failed to disable the stream, error={:?}", e);
                }
            }
        }

        self.encoder.release();
        self.capture.release();
        self.state.set(OrchestratorState::Released);

        result
    }

    fn stream(&mut self, reset: &CaptureReset) -> Result<(), ProcessorError> {
        self.capture.init(reset.clone())?;

        loop {
            if self.stopped.get() {
                return Ok(());
            }

            // events left over by the previous session
            while self.events.try_recv().is_ok() {}
            reset.consume_reset();

            self.state.set(OrchestratorState::Preparing);
            self.capture.prepare()?;

            let size = self.capture.size();
            if !self.streamer.header_written() {
                self.streamer.write_video_header(size)?;
            }

            log::info!("video session start, size={}", size);

            let alive = match self.run_session(size, reset) {
                Ok(alive) => alive,
                Err(e) if e.is_broken_pipe() || !is_transient(&e) => return Err(e),
                Err(e) => {
                    log::error!("video encoding error={:?}", e);

                    if !self.prepare_retry(size) {
                        return Err(e);
                    }

                    log::info!("video retrying");
                    true
                }
            };

            if !alive {
                return Ok(());
            }

            self.state.set(OrchestratorState::Resetting);
        }
    }

    fn run_session(&mut self, size: Size, reset: &CaptureReset) -> Result<bool, ProcessorError> {
        let mut capture_started = false;
        let mut encoder_started = false;
        let result = self.encode(size, reset, &mut capture_started, &mut encoder_started);

        reset.set_interrupter(None);
        if capture_started {
            self.capture.stop();
        }

        if encoder_started {
            if let Err(e) = self.encoder.stop() {
                log::warn!("video encoder stop error={:?}", e);
            }
        }

        self.encoder.reset();
        result
    }

    fn encode(
        &mut self,
        size: Size,
        reset: &CaptureReset,
        capture_started: &mut bool,
        encoder_started: &mut bool,
    ) -> Result<bool, ProcessorError> {
        let format = EncoderFormat::Video {
            codec: self.options.codec,
            bit_rate: self.options.bit_rate,
            max_fps: self.options.max_fps,
            key_frame_interval: self.options.key_frame_interval,
            repeat_previous_frame_after_us: self.options.repeat_previous_frame_after_us,
            size,
        };

        self.encoder.configure(
            &format,
            EncoderCallback::new(self.sender.clone(), self.sender.clone()),
        )?;

        let surface = self.encoder.create_input_surface()?;
        self.capture.start(surface)?;
        *capture_started = true;
        self.state.set(OrchestratorState::Capturing);

        self.encoder.start()?;
        *encoder_started = true;
        self.state.set(OrchestratorState::Encoding);

        let sender = self.sender.clone();
        reset.set_interrupter(Some(Box::new(move || {
            let _ = sender.try_send(EncoderEvent::Interrupted);
        })));

        if self.stopped.get() {
            return Ok(false);
        }

        // a reset requested while starting makes this session useless
        if !reset.consume_reset() {
            self.state.set(OrchestratorState::Draining);
            self.drain(reset)?;
        }

        Ok(!self.stopped.get() && !self.capture.is_closed())
    }

    fn drain(&mut self, reset: &CaptureReset) -> Result<(), ProcessorError> {
        loop {
            // the wake-up message is best effort, the queue may be full
            if self.stopped.get() || reset.is_reset_requested() {
                self.interrupt();
                return Ok(());
            }

            match self.events.recv() {
                Ok(EncoderEvent::OutputAvailable(index, info)) => {
                    let result = self.write_output(index, &info);
                    let released = self.encoder.release_output(index);
                    result?;
                    released?;

                    if info.is_end_of_stream() {
                        return Ok(());
                    }
                }
                Ok(EncoderEvent::Interrupted) => {
                    self.interrupt();
                    return Ok(());
                }
                Ok(EncoderEvent::Error(e)) => return Err(e.into()),
                Ok(EncoderEvent::OutputFormatChanged(format)) => {
                    log::info!("video encoder output format changed, format={:?}", format);
                }
                Ok(EncoderEvent::InputAvailable(_)) => (),
                Err(_) => return Ok(()),
            }
        }
    }

    fn interrupt(&mut self) {
        if let Err(e) = self.encoder.signal_end_of_input() {
            log::debug!("video signal end of input error={:?}", e);
        }
    }

    fn write_output(&mut self, index: usize, info: &BufferInfo) -> Result<(), ProcessorError> {
        if info.size == 0 {
            return Ok(());
        }

        let payload = self.encoder.output_buffer(index)?;
        if !info.is_config() {
            self.first_frame_sent = true;
            self.consecutive_errors = 0;
        }

        let size = info.size.min(payload.len());
        self.streamer
            .write_packet(&payload[..size], info.buffer_type(), info.pts)?;

        Ok(())
    }

    /// Decide whether the failed session may be started again, possibly with
    /// a smaller size.
    fn prepare_retry(&mut self, size: Size) -> bool {
        if self.first_frame_sent {
            self.consecutive_errors += 1;
            if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                log::error!(
                    "video too many consecutive errors, count={}",
                    self.consecutive_errors
                );

                return false;
            }

            thread::sleep(RETRY_DELAY);
            return true;
        }

        if !self.options.downsize_on_error {
            return false;
        }

        let current = size.max();
        let next = match self
            .options
            .max_size_fallback
            .iter()
            .copied()
            .find(|it| *it < current)
        {
            Some(it) => it,
            None => {
                log::error!("video no smaller size to try, size={}", size);

                return false;
            }
        };

        if !self.capture.set_max_size(next) {
            log::error!("video capture does not support resizing");

            return false;
        }

        log::warn!("video downsizing, max size={}", next);

        true
    }
}

fn is_configuration_error(error: &ProcessorError) -> bool {
    matches!(
        error,
        ProcessorError::EncoderError(EncoderError::Configuration(_))
            | ProcessorError::CaptureError(CaptureError::Configuration(_))
    )
}

/// Errors worth restarting the session for.
fn is_transient(error: &ProcessorError) -> bool {
    matches!(
        error,
        ProcessorError::EncoderError(EncoderError::Recoverable(_))
            | ProcessorError::CaptureError(CaptureError::Failed(_))
            | ProcessorError::CaptureError(CaptureError::IoError(_))
    )
}
