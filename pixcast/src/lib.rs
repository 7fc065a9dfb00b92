//! Core of a device mirroring server.
//!
//! The platform provides the capture sources, the hardware encoders and the
//! input injection (see [`SurfaceCapture`], [`AudioCapture`], [`Encoder`] and
//! [`InputInjector`]), this crate drives them: the video and audio streams are
//! captured, encoded and written to the viewer, and the control messages of
//! the viewer are applied to the device.
//!
//! ```no_run
//! use pixcast::{Options, Session};
//!
//! let options = Options::parse_pairs(std::env::args().skip(1)).unwrap();
//! options.init_logger().unwrap();
//!
//! let mut session = Session::new();
//!
//! // session.add(SurfaceEncoder::new(capture, encoder, streamer, options.video_encoder_options()));
//!
//! let fatal = session.run().unwrap();
//! std::process::exit(if fatal { 1 } else { 0 });
//! ```

mod audio;
mod capture;
mod controller;
mod encoder;
mod lifecycle;
mod options;
mod session;
mod video;

#[cfg(test)]
mod testing;

pub use self::{
    audio::{
        AudioEncoder, AudioEncoderOptions, AudioRawRecorder, BYTES_PER_SAMPLE, CHANNELS,
        READ_SIZE, SAMPLE_RATE,
    },
    capture::{AudioCapture, CaptureError, CaptureReset, SurfaceCapture},
    controller::{Controller, DeviceMessageSender, InputInjector, PositionMapperHandle},
    encoder::{BufferInfo, Encoder, EncoderCallback, EncoderError, EncoderEvent, EncoderFormat},
    lifecycle::{AsyncProcessor, OrchestratorState, ProcessorError, TerminationListener},
    options::{Options, OptionsError},
    session::Session,
    video::{
        SurfaceEncoder, SurfaceEncoderOptions, DEFAULT_MAX_SIZE_FALLBACK, MAX_CONSECUTIVE_ERRORS,
    },
};

pub use common;
pub use transport;
