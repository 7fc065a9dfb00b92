use bytes::Bytes;
use common::{
    codec::{AudioCodec, VideoCodec},
    Size,
};

use crossbeam::channel::Sender;
use thiserror::Error;
use transport::BufferType;

#[derive(Debug, Error)]
pub enum EncoderError {
    /// The encoder cannot be set up as requested (unsupported codec, invalid
    /// parameters). Retrying will not help.
    #[error("encoder configuration error: {0}")]
    Configuration(String),
    /// The encoder failed while running, restarting it may help (possibly
    /// with a smaller size).
    #[error("encoder error: {0}")]
    Recoverable(String),
    #[error("encoder failure: {0}")]
    Failed(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Parameters of an encoding session.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderFormat {
    Video {
        codec: VideoCodec,
        size: Size,
        bit_rate: u32,
        max_fps: Option<f32>,
        /// Seconds between key frames.
        key_frame_interval: u32,
        /// Re-emit the last frame when the source is idle for that long.
        repeat_previous_frame_after_us: u64,
    },
    Audio {
        codec: AudioCodec,
        bit_rate: u32,
        sample_rate: u32,
        channels: u8,
    },
}

impl EncoderFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Video { codec, .. } => codec.mime_type(),
            Self::Audio { codec, .. } => codec.mime_type(),
        }
    }
}

/// Metadata of an encoder buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Presentation timestamp, in microseconds.
    pub pts: u64,
    pub size: usize,
    pub flags: u32,
}

impl BufferInfo {
    pub const FLAG_KEY_FRAME: u32 = 1;
    pub const FLAG_CODEC_CONFIG: u32 = 2;
    pub const FLAG_END_OF_STREAM: u32 = 4;

    pub fn new(pts: u64, size: usize, flags: u32) -> Self {
        Self { pts, size, flags }
    }

    pub fn is_config(&self) -> bool {
        self.flags & Self::FLAG_CODEC_CONFIG != 0
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags & Self::FLAG_KEY_FRAME != 0
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags & Self::FLAG_END_OF_STREAM != 0
    }

    pub fn buffer_type(&self) -> BufferType {
        if self.is_config() {
            BufferType::Config
        } else if self.is_key_frame() {
            BufferType::KeyFrame
        } else {
            BufferType::Partial
        }
    }
}

/// Encoder notifications, as queued for the orchestrator threads.
#[derive(Debug)]
pub enum EncoderEvent {
    InputAvailable(usize),
    OutputAvailable(usize, BufferInfo),
    OutputFormatChanged(EncoderFormat),
    Error(EncoderError),
    /// Stop waiting for the encoder, sent on reset and on stop.
    Interrupted,
}

/// Turns the asynchronous encoder notifications into messages on the input
/// and output queues.
///
/// The queues are bounded: once one is full, the encoder thread waits for the
/// orchestrator to catch up. No event is ever dropped, a lost output buffer
/// would never be released and a lost end of stream would stall the drain.
#[derive(Debug, Clone)]
pub struct EncoderCallback {
    input: Sender<EncoderEvent>,
    output: Sender<EncoderEvent>,
}

impl EncoderCallback {
    pub const QUEUE_CAPACITY: usize = 64;

    pub fn new(input: Sender<EncoderEvent>, output: Sender<EncoderEvent>) -> Self {
        Self { input, output }
    }

    pub fn on_input_available(&self, index: usize) {
        push(&self.input, EncoderEvent::InputAvailable(index));
    }

    pub fn on_output_available(&self, index: usize, info: BufferInfo) {
        push(&self.output, EncoderEvent::OutputAvailable(index, info));
    }

    pub fn on_output_format_changed(&self, format: EncoderFormat) {
        push(&self.output, EncoderEvent::OutputFormatChanged(format));
    }

    pub fn on_error(&self, error: EncoderError) {
        push(&self.output, EncoderEvent::Error(error));
    }
}

fn push(queue: &Sender<EncoderEvent>, event: EncoderEvent) {
    // disconnected once the orchestrator is gone, nobody cares anymore
    if let Err(e) = queue.send(event) {
        log::debug!("encoder event queue is closed, event={:?}", e.into_inner());
    }
}

/// Hardware encoder.
///
/// Output is delivered asynchronously through the [`EncoderCallback`] given
/// to [`Encoder::configure`]: an output buffer is announced by its index,
/// read with [`Encoder::output_buffer`] and handed back with
/// [`Encoder::release_output`].
pub trait Encoder: Send + 'static {
    /// Input surface of a video encoder, rendered into by the capture.
    type Surface: Send;

    fn configure(
        &mut self,
        format: &EncoderFormat,
        callback: EncoderCallback,
    ) -> Result<(), EncoderError>;

    fn create_input_surface(&mut self) -> Result<Self::Surface, EncoderError>;

    fn start(&mut self) -> Result<(), EncoderError>;

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], EncoderError>;

    fn queue_input(&mut self, index: usize, size: usize, pts: u64) -> Result<(), EncoderError>;

    fn output_buffer(&mut self, index: usize) -> Result<Bytes, EncoderError>;

    fn release_output(&mut self, index: usize) -> Result<(), EncoderError>;

    /// The encoder emits an end-of-stream buffer once the pending input is
    /// encoded.
    fn signal_end_of_input(&mut self) -> Result<(), EncoderError>;

    fn stop(&mut self) -> Result<(), EncoderError>;

    /// Back to the unconfigured state, ready for another `configure`.
    fn reset(&mut self);

    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam::channel::bounded;

    #[test]
    fn buffer_types() {
        assert_eq!(BufferInfo::new(0, 1, 0).buffer_type(), BufferType::Partial);
        assert_eq!(
            BufferInfo::new(0, 1, BufferInfo::FLAG_KEY_FRAME).buffer_type(),
            BufferType::KeyFrame
        );
        assert_eq!(
            BufferInfo::new(0, 1, BufferInfo::FLAG_CODEC_CONFIG | BufferInfo::FLAG_KEY_FRAME)
                .buffer_type(),
            BufferType::Config
        );
        assert!(BufferInfo::new(0, 0, BufferInfo::FLAG_END_OF_STREAM).is_end_of_stream());
    }

    #[test]
    fn callback_routes_events() {
        let (input_tx, input_rx) = bounded(EncoderCallback::QUEUE_CAPACITY);
        let (output_tx, output_rx) = bounded(EncoderCallback::QUEUE_CAPACITY);
        let callback = EncoderCallback::new(input_tx, output_tx);

        callback.on_input_available(3);
        callback.on_output_available(4, BufferInfo::new(10, 2, 0));
        callback.on_error(EncoderError::Recoverable("lost".to_string()));

        assert!(matches!(input_rx.try_recv(), Ok(EncoderEvent::InputAvailable(3))));
        assert!(matches!(
            output_rx.try_recv(),
            Ok(EncoderEvent::OutputAvailable(4, BufferInfo { pts: 10, .. }))
        ));
        assert!(matches!(
            output_rx.try_recv(),
            Ok(EncoderEvent::Error(EncoderError::Recoverable(_)))
        ));
    }

    #[test]
    fn full_queue_waits_for_the_consumer() {
        let (tx, rx) = bounded(1);
        let callback = EncoderCallback::new(tx.clone(), tx);

        let producer = std::thread::spawn(move || {
            for index in 0..3 {
                callback.on_input_available(index);
            }
        });

        for index in 0..3 {
            assert!(matches!(rx.recv(), Ok(EncoderEvent::InputAvailable(it)) if it == index));
        }

        producer.join().unwrap();
    }

    #[test]
    fn closed_queue_does_not_block() {
        let (tx, rx) = bounded(1);
        drop(rx);

        let callback = EncoderCallback::new(tx.clone(), tx);
        callback.on_input_available(1);
        callback.on_input_available(2);
    }
}
