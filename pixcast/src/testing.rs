//! Scripted capture and encoder doubles shared by the orchestrator tests.

use std::{
    collections::{HashMap, VecDeque},
    io::{Error, ErrorKind, Write},
    sync::{atomic::AtomicBool, Arc},
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use common::{atomic::EasyAtomic, Size};
use parking_lot::Mutex;

use crate::{
    capture::{AudioCapture, CaptureError, CaptureReset, SurfaceCapture},
    encoder::{BufferInfo, Encoder, EncoderCallback, EncoderError, EncoderFormat},
};

/// Ordered record of the calls made on the doubles.
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|it| *it == entry).count()
    }

    pub(crate) fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|it| it == entry)
    }
}

/// In-memory socket, cloned handles share the same bytes.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedSink {
    bytes: Arc<Mutex<Vec<u8>>>,
    broken: bool,
}

impl SharedSink {
    /// A sink whose peer is gone.
    pub(crate) fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }

    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.broken {
            return Err(Error::from(ErrorKind::BrokenPipe));
        }

        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Poll until `condition` holds, panics after a few seconds.
pub(crate) fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

/// What the encoder does when a session is started.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Fail `start` with a recoverable error.
    FailStart,
    /// Fail `configure` with a configuration error.
    FailConfigure,
    /// Emit these steps once started.
    Run(Vec<Step>),
}

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Output {
        payload: &'static [u8],
        pts: u64,
        flags: u32,
    },
    Error(&'static str),
    EndOfStream,
}

impl Step {
    pub(crate) fn config(payload: &'static [u8]) -> Self {
        Self::Output {
            flags: BufferInfo::FLAG_CODEC_CONFIG,
            pts: 0,
            payload,
        }
    }

    pub(crate) fn frame(payload: &'static [u8], pts: u64) -> Self {
        Self::Output {
            flags: 0,
            payload,
            pts,
        }
    }
}

enum Emission {
    Output(usize, BufferInfo),
    Error(&'static str),
}

/// Encoder replaying one [`Script`] per session. Without script left, a
/// session emits nothing until interrupted. Scripted steps are delivered from
/// a separate thread, like the callbacks of a hardware encoder.
///
/// With `echo`, every queued input is emitted back as an output buffer, the
/// way an audio encoder would.
pub(crate) struct MockEncoder {
    scripts: VecDeque<Script>,
    current: Option<Script>,
    callback: Option<EncoderCallback>,
    outputs: Arc<Mutex<HashMap<usize, Bytes>>>,
    inputs: HashMap<usize, Vec<u8>>,
    next_index: usize,
    echo: bool,
    journal: Journal,
}

impl MockEncoder {
    pub(crate) fn new(scripts: Vec<Script>, journal: Journal) -> Self {
        Self {
            scripts: scripts.into(),
            outputs: Default::default(),
            inputs: HashMap::new(),
            current: None,
            callback: None,
            next_index: 0,
            echo: false,
            journal,
        }
    }

    pub(crate) fn echo(journal: Journal) -> Self {
        Self {
            echo: true,
            ..Self::new(Vec::new(), journal)
        }
    }

    fn store(&mut self, payload: Bytes, pts: u64, flags: u32) -> (usize, BufferInfo) {
        let index = self.next_index;
        self.next_index += 1;

        let info = BufferInfo::new(pts, payload.len(), flags);
        self.outputs.lock().insert(index, payload);
        (index, info)
    }

    fn emit(&mut self, payload: Bytes, pts: u64, flags: u32) {
        let (index, info) = self.store(payload, pts, flags);
        if let Some(callback) = &self.callback {
            callback.on_output_available(index, info);
        }
    }
}

impl Encoder for MockEncoder {
    type Surface = ();

    fn configure(
        &mut self,
        format: &EncoderFormat,
        callback: EncoderCallback,
    ) -> Result<(), EncoderError> {
        self.current = self.scripts.pop_front();
        if let Some(Script::FailConfigure) = self.current {
            return Err(EncoderError::Configuration(format.mime_type().to_string()));
        }

        if let EncoderFormat::Video { size, .. } = format {
            self.journal
                .push(format!("encoder.configure {}x{}", size.width, size.height));
        } else {
            self.journal.push("encoder.configure");
        }

        self.callback = Some(callback);
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<Self::Surface, EncoderError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        self.journal.push("encoder.start");

        match self.current.take() {
            Some(Script::FailStart) => Err(EncoderError::Recoverable("start".to_string())),
            Some(Script::Run(steps)) => {
                let mut emissions = Vec::with_capacity(steps.len());
                for step in steps {
                    emissions.push(match step {
                        Step::Output {
                            payload,
                            pts,
                            flags,
                        } => {
                            let (index, info) = self.store(Bytes::from_static(payload), pts, flags);
                            Emission::Output(index, info)
                        }
                        Step::EndOfStream => {
                            let (index, info) =
                                self.store(Bytes::new(), 0, BufferInfo::FLAG_END_OF_STREAM);
                            Emission::Output(index, info)
                        }
                        Step::Error(message) => Emission::Error(message),
                    });
                }

                if let Some(callback) = self.callback.clone() {
                    thread::spawn(move || {
                        for emission in emissions {
                            match emission {
                                Emission::Output(index, info) => {
                                    callback.on_output_available(index, info)
                                }
                                Emission::Error(message) => callback
                                    .on_error(EncoderError::Recoverable(message.to_string())),
                            }
                        }
                    });
                }

                Ok(())
            }
            _ => {
                if self.echo {
                    if let Some(callback) = &self.callback {
                        for index in 0..2 {
                            callback.on_input_available(index);
                        }
                    }
                }

                Ok(())
            }
        }
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], EncoderError> {
        Ok(self
            .inputs
            .entry(index)
            .or_insert_with(|| vec![0; 4096])
            .as_mut_slice())
    }

    fn queue_input(&mut self, index: usize, size: usize, pts: u64) -> Result<(), EncoderError> {
        let payload = self
            .inputs
            .get(&index)
            .map(|it| Bytes::copy_from_slice(&it[..size]))
            .unwrap_or_default();

        self.emit(payload, pts, 0);
        if let Some(callback) = &self.callback {
            callback.on_input_available(index);
        }

        Ok(())
    }

    fn output_buffer(&mut self, index: usize) -> Result<Bytes, EncoderError> {
        self.outputs
            .lock()
            .get(&index)
            .cloned()
            .ok_or_else(|| EncoderError::Failed(format!("no output buffer {}", index)))
    }

    fn release_output(&mut self, index: usize) -> Result<(), EncoderError> {
        self.outputs.lock().remove(&index);
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> Result<(), EncoderError> {
        self.journal.push("encoder.signal_end_of_input");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EncoderError> {
        self.journal.push("encoder.stop");
        Ok(())
    }

    fn reset(&mut self) {
        self.journal.push("encoder.reset");
        self.callback = None;
    }

    fn release(&mut self) {
        self.journal.push("encoder.release");
    }
}

type StartHook = Box<dyn FnMut(usize) + Send>;

/// Display capture of a fixed size, honoring `set_max_size`.
pub(crate) struct MockSurfaceCapture {
    size: Size,
    max_size: u32,
    accepts_max_size: bool,
    /// Number of sessions after which the source disappears.
    sessions: Option<usize>,
    started: usize,
    pub(crate) init_error: Option<CaptureError>,
    /// Called with the session number (from 1) once a session started.
    on_start: Option<StartHook>,
    journal: Journal,
}

impl MockSurfaceCapture {
    pub(crate) fn new(size: Size, journal: Journal) -> Self {
        Self {
            accepts_max_size: true,
            init_error: None,
            on_start: None,
            sessions: None,
            max_size: 0,
            started: 0,
            journal,
            size,
        }
    }

    /// Close the source after `count` sessions.
    pub(crate) fn with_sessions(mut self, count: usize) -> Self {
        self.sessions = Some(count);
        self
    }

    pub(crate) fn on_start<F: FnMut(usize) + Send + 'static>(mut self, hook: F) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    pub(crate) fn rejecting_max_size(mut self) -> Self {
        self.accepts_max_size = false;
        self
    }
}

impl SurfaceCapture<()> for MockSurfaceCapture {
    fn init(&mut self, _: CaptureReset) -> Result<(), CaptureError> {
        if let Some(e) = self.init_error.take() {
            return Err(e);
        }

        self.journal.push("capture.init");
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), CaptureError> {
        self.journal.push("capture.prepare");
        Ok(())
    }

    fn size(&self) -> Size {
        self.size.limit(self.max_size)
    }

    fn start(&mut self, _: ()) -> Result<(), CaptureError> {
        self.journal.push("capture.start");
        self.started += 1;
        if let Some(hook) = self.on_start.as_mut() {
            hook(self.started);
        }

        Ok(())
    }

    fn stop(&mut self) {
        self.journal.push("capture.stop");
    }

    fn release(&mut self) {
        self.journal.push("capture.release");
    }

    fn set_max_size(&mut self, max_size: u32) -> bool {
        self.journal.push(format!("capture.set_max_size {}", max_size));
        if self.accepts_max_size {
            self.max_size = max_size;
        }

        self.accepts_max_size
    }

    fn is_closed(&self) -> bool {
        self.sessions.map(|it| self.started >= it).unwrap_or(false)
    }
}

/// Microphone replaying a list of chunks, then failing.
pub(crate) struct MockAudioCapture {
    chunks: Mutex<VecDeque<(&'static [u8], u64)>>,
    start_error: Mutex<Option<CaptureError>>,
    /// Wait for more audio once the chunks are consumed, until stopped.
    live: bool,
    stopped: AtomicBool,
    journal: Journal,
}

impl MockAudioCapture {
    pub(crate) fn new(chunks: Vec<(&'static [u8], u64)>, journal: Journal) -> Self {
        Self {
            chunks: Mutex::new(chunks.into()),
            start_error: Mutex::new(None),
            stopped: AtomicBool::new(false),
            live: false,
            journal,
        }
    }

    pub(crate) fn with_start_error(self, error: CaptureError) -> Self {
        self.start_error.lock().replace(error);
        self
    }

    pub(crate) fn live(mut self) -> Self {
        self.live = true;
        self
    }
}

impl AudioCapture for MockAudioCapture {
    fn start(&self) -> Result<(), CaptureError> {
        if let Some(e) = self.start_error.lock().take() {
            return Err(e);
        }

        self.journal.push("capture.start");
        Ok(())
    }

    fn read(&self, buffer: &mut [u8]) -> Result<(usize, u64), CaptureError> {
        loop {
            if self.stopped.get() {
                return Err(CaptureError::Failed("stopped".to_string()));
            }

            if let Some((chunk, pts)) = self.chunks.lock().pop_front() {
                buffer[..chunk.len()].copy_from_slice(chunk);
                return Ok((chunk.len(), pts));
            }

            if !self.live {
                return Err(CaptureError::Failed("end of recording".to_string()));
            }

            thread::sleep(Duration::from_millis(1));
        }
    }

    fn stop(&self) {
        self.stopped.set(true);
        self.journal.push("capture.stop");
    }
}
