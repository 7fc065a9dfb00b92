use std::{
    io::Write,
    sync::{atomic::AtomicBool, Arc},
    thread::{self, JoinHandle},
};

use common::{atomic::EasyAtomic, codec::AudioCodec};
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use transport::{BufferType, Streamer};

use crate::{
    capture::{AudioCapture, CaptureError},
    encoder::{Encoder, EncoderCallback, EncoderError, EncoderEvent, EncoderFormat},
    lifecycle::{
        self, AsyncProcessor, OrchestratorState, ProcessorError, StateTracker, TerminationListener,
    },
};

pub const SAMPLE_RATE: u32 = 48000;
pub const CHANNELS: u8 = 2;
pub const BYTES_PER_SAMPLE: usize = 2;

/// Bytes read from the capture at once, 5 ms of audio.
pub const READ_SIZE: usize = SAMPLE_RATE as usize * CHANNELS as usize * BYTES_PER_SAMPLE / 200;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct AudioEncoderOptions {
    pub codec: AudioCodec,
    pub bit_rate: u32,
}

impl Default for AudioEncoderOptions {
    fn default() -> Self {
        Self {
            codec: AudioCodec::default(),
            bit_rate: 128_000,
        }
    }
}

/// Drives an audio capture into an encoder and the encoder output into the
/// audio stream.
///
/// The capture is read on "audio-in" as soon as the encoder offers an input
/// buffer, the encoded packets are written on "audio-out".
pub struct AudioEncoder<C, E, W> {
    parts: Option<(C, E, Streamer<W>)>,
    options: AudioEncoderOptions,
    ended: (Sender<()>, Receiver<()>),
    state: StateTracker,
    handle: Option<JoinHandle<()>>,
}

impl<C, E, W> AudioEncoder<C, E, W>
where
    C: AudioCapture,
    E: Encoder,
    W: Write + Send + 'static,
{
    pub fn new(capture: C, encoder: E, streamer: Streamer<W>, options: AudioEncoderOptions) -> Self {
        Self {
            parts: Some((capture, encoder, streamer)),
            state: StateTracker::new("audio"),
            ended: bounded(1),
            handle: None,
            options,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state.get()
    }
}

impl<C, E, W> AsyncProcessor for AudioEncoder<C, E, W>
where
    C: AudioCapture,
    E: Encoder,
    W: Write + Send + 'static,
{
    fn name(&self) -> &str {
        "audio-encoder"
    }

    fn start(&mut self, listener: Arc<dyn TerminationListener>) -> Result<(), ProcessorError> {
        let (capture, encoder, streamer) = self.parts.take().ok_or(ProcessorError::AlreadyStarted)?;
        let worker = AudioWorker {
            capture: Arc::new(capture),
            encoder: Arc::new(Mutex::new(encoder)),
            streamer: Arc::new(Mutex::new(streamer)),
            failure: Default::default(),
            stopping: Default::default(),
            options: self.options.clone(),
            ended: self.ended.clone(),
            state: self.state.clone(),
        };

        self.handle = Some(lifecycle::spawn("audio-encoder", listener, move || {
            worker.run()
        })?);

        Ok(())
    }

    fn stop(&self) {
        let _ = self.ended.0.try_send(());
    }

    fn join(&mut self) {
        lifecycle::join("audio-encoder", &mut self.handle);
    }
}

struct AudioWorker<C, E, W> {
    capture: Arc<C>,
    encoder: Arc<Mutex<E>>,
    streamer: Arc<Mutex<Streamer<W>>>,
    /// First error of the "audio-in" and "audio-out" threads.
    failure: Arc<Mutex<Option<ProcessorError>>>,
    /// Errors of the threads are expected once set.
    stopping: Arc<AtomicBool>,
    options: AudioEncoderOptions,
    ended: (Sender<()>, Receiver<()>),
    state: StateTracker,
}

impl<C, E, W> AudioWorker<C, E, W>
where
    C: AudioCapture,
    E: Encoder,
    W: Write + Send + 'static,
{
    fn run(self) -> Result<(), ProcessorError> {
        let (input_tx, input_rx) = bounded(EncoderCallback::QUEUE_CAPACITY);
        let (output_tx, output_rx) = bounded(EncoderCallback::QUEUE_CAPACITY);

        let mut threads = Vec::with_capacity(2);
        let mut encoder_started = false;
        let result = self.encode(
            EncoderCallback::new(input_tx.clone(), output_tx.clone()),
            (input_rx, output_rx),
            &mut threads,
            &mut encoder_started,
        );

        self.state.set(OrchestratorState::Stopping);
        self.stopping.set(true);

        // "audio-in" may be waiting for the capture
        self.capture.stop();

        // a queue whose thread is gone is disconnected, send does not block
        let _ = input_tx.send(EncoderEvent::Interrupted);
        let _ = output_tx.send(EncoderEvent::Interrupted);
        for handle in threads {
            if handle.join().is_err() {
                log::warn!("audio thread join failed");
            }
        }

        {
            let mut encoder = self.encoder.lock();
            if encoder_started {
                if let Err(e) = encoder.stop() {
                    log::warn!("audio encoder stop error={:?}", e);
                }
            }

            encoder.release();
        }

        self.state.set(OrchestratorState::Released);

        let result = result.and_then(|_| match self.failure.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        });

        finish(&mut self.streamer.lock(), result)
    }

    fn encode(
        &self,
        callback: EncoderCallback,
        queues: (Receiver<EncoderEvent>, Receiver<EncoderEvent>),
        threads: &mut Vec<JoinHandle<()>>,
        encoder_started: &mut bool,
    ) -> Result<(), ProcessorError> {
        let format = EncoderFormat::Audio {
            codec: self.options.codec,
            bit_rate: self.options.bit_rate,
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        };

        self.state.set(OrchestratorState::Preparing);
        self.encoder.lock().configure(&format, callback)?;

        self.capture.start()?;
        self.state.set(OrchestratorState::Capturing);

        self.encoder.lock().start()?;
        *encoder_started = true;
        self.state.set(OrchestratorState::Encoding);

        let (input, output) = queues;
        threads.push(self.spawn("audio-in", {
            let capture = self.capture.clone();
            let encoder = self.encoder.clone();
            move || read_input(capture, encoder, input)
        })?);

        threads.push(self.spawn("audio-out", {
            let streamer = self.streamer.clone();
            let encoder = self.encoder.clone();
            move || write_output(streamer, encoder, output)
        })?);

        self.state.set(OrchestratorState::Draining);

        // stop() or the end of one of the threads
        let _ = self.ended.1.recv();
        Ok(())
    }

    fn spawn<F>(&self, name: &str, body: F) -> Result<JoinHandle<()>, ProcessorError>
    where
        F: FnOnce() -> Result<(), ProcessorError> + Send + 'static,
    {
        let failure = self.failure.clone();
        let stopping = self.stopping.clone();
        let ended = self.ended.0.clone();
        let name = name.to_string();

        Ok(thread::Builder::new().name(name.clone()).spawn(move || {
            if let Err(e) = body() {
                log::debug!("{} thread error={:?}", name, e);

                if !stopping.get() {
                    failure.lock().get_or_insert(e);
                }
            }

            let _ = ended.try_send(());
        })?)
    }
}

fn read_input<C, E>(
    capture: Arc<C>,
    encoder: Arc<Mutex<E>>,
    queue: Receiver<EncoderEvent>,
) -> Result<(), ProcessorError>
where
    C: AudioCapture,
    E: Encoder,
{
    let mut chunk = vec![0u8; READ_SIZE];
    while let Ok(event) = queue.recv() {
        match event {
            EncoderEvent::InputAvailable(index) => {
                let (size, pts) = capture.read(&mut chunk)?;

                let mut encoder = encoder.lock();
                let buffer = encoder.input_buffer(index)?;
                let size = size.min(buffer.len()).min(chunk.len());
                buffer[..size].copy_from_slice(&chunk[..size]);
                encoder.queue_input(index, size, pts)?;
            }
            EncoderEvent::Interrupted => break,
            _ => (),
        }
    }

    Ok(())
}

fn write_output<E, W>(
    streamer: Arc<Mutex<Streamer<W>>>,
    encoder: Arc<Mutex<E>>,
    queue: Receiver<EncoderEvent>,
) -> Result<(), ProcessorError>
where
    E: Encoder,
    W: Write,
{
    streamer.lock().write_audio_header()?;

    while let Ok(event) = queue.recv() {
        match event {
            EncoderEvent::OutputAvailable(index, info) => {
                let result = if info.size > 0 {
                    encoder
                        .lock()
                        .output_buffer(index)
                        .map_err(ProcessorError::from)
                        .and_then(|payload| {
                            let size = info.size.min(payload.len());
                            Ok(streamer.lock().write_packet(
                                &payload[..size],
                                info.buffer_type(),
                                info.pts,
                            )?)
                        })
                } else {
                    Ok(())
                };

                let released = encoder.lock().release_output(index);
                result?;
                released?;

                if info.is_end_of_stream() {
                    break;
                }
            }
            EncoderEvent::Error(e) => return Err(e.into()),
            EncoderEvent::OutputFormatChanged(format) => {
                log::info!("audio encoder output format changed, format={:?}", format);
            }
            EncoderEvent::Interrupted => break,
            EncoderEvent::InputAvailable(_) => (),
        }
    }

    Ok(())
}

/// Apply the audio error policy: a missing or broken capture only disables
/// the audio stream, a configuration error disables it and ends the session.
fn finish<W: Write>(
    streamer: &mut Streamer<W>,
    result: Result<(), ProcessorError>,
) -> Result<(), ProcessorError> {
    let e = match result {
        Ok(()) => return Ok(()),
        Err(e) if e.is_broken_pipe() => return Err(e),
        Err(e) => e,
    };

    let (fatal, is_error) = match &e {
        ProcessorError::EncoderError(EncoderError::Configuration(_))
        | ProcessorError::CaptureError(CaptureError::Configuration(_)) => (true, true),
        ProcessorError::CaptureError(_) => (false, false),
        _ => (true, false),
    };

    if !streamer.header_written() {
        if let Err(e) = streamer.write_disable_stream(is_error) {
            log::warn!("audio failed to disable the stream, error={:?}", e);
        }
    }

    if fatal {
        Err(e)
    } else {
        log::warn!("audio capture disabled, error={:?}", e);

        Ok(())
    }
}

/// Forwards the raw PCM capture to the audio stream, without encoder.
pub struct AudioRawRecorder<C, W> {
    capture: Arc<C>,
    streamer: Option<Streamer<W>>,
    stopped: Arc<AtomicBool>,
    state: StateTracker,
    handle: Option<JoinHandle<()>>,
}

impl<C, W> AudioRawRecorder<C, W>
where
    C: AudioCapture,
    W: Write + Send + 'static,
{
    pub fn new(capture: C, streamer: Streamer<W>) -> Self {
        Self {
            capture: Arc::new(capture),
            streamer: Some(streamer),
            state: StateTracker::new("audio-raw"),
            stopped: Default::default(),
            handle: None,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state.get()
    }
}

impl<C, W> AsyncProcessor for AudioRawRecorder<C, W>
where
    C: AudioCapture,
    W: Write + Send + 'static,
{
    fn name(&self) -> &str {
        "audio-raw"
    }

    fn start(&mut self, listener: Arc<dyn TerminationListener>) -> Result<(), ProcessorError> {
        let streamer = self.streamer.take().ok_or(ProcessorError::AlreadyStarted)?;
        let capture = self.capture.clone();
        let stopped = self.stopped.clone();
        let state = self.state.clone();

        self.handle = Some(lifecycle::spawn("audio-raw", listener, move || {
            record(capture, streamer, stopped, state)
        })?);

        Ok(())
    }

    fn stop(&self) {
        // the recording thread may be blocked reading the capture
        if !self.stopped.replace(true) {
            self.capture.stop();
        }
    }

    fn join(&mut self) {
        lifecycle::join("audio-raw", &mut self.handle);
    }
}

fn record<C, W>(
    capture: Arc<C>,
    mut streamer: Streamer<W>,
    stopped: Arc<AtomicBool>,
    state: StateTracker,
) -> Result<(), ProcessorError>
where
    C: AudioCapture,
    W: Write,
{
    if stopped.get() {
        state.set(OrchestratorState::Released);
        return Ok(());
    }

    state.set(OrchestratorState::Preparing);
    let mut result = capture.start().map_err(ProcessorError::from);
    if result.is_ok() {
        state.set(OrchestratorState::Capturing);
        result = forward(capture.as_ref(), &mut streamer, &stopped);
        if stopped.get() {
            if let Err(e) = result {
                log::debug!("audio raw recorder stopped, error={:?}", e);
            }

            result = Ok(());
        }
    }

    state.set(OrchestratorState::Stopping);
    if !stopped.replace(true) {
        capture.stop();
    }

    state.set(OrchestratorState::Released);

    finish(&mut streamer, result)
}

fn forward<C, W>(
    capture: &C,
    streamer: &mut Streamer<W>,
    stopped: &AtomicBool,
) -> Result<(), ProcessorError>
where
    C: AudioCapture,
    W: Write,
{
    streamer.write_audio_header()?;

    let mut buffer = vec![0u8; READ_SIZE];
    while !stopped.get() {
        let (size, pts) = capture.read(&mut buffer)?;
        streamer.write_packet(&buffer[..size], BufferType::Partial, pts)?;
    }

    Ok(())
}
