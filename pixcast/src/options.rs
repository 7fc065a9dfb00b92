use std::io::{Error, ErrorKind, Write};

use clap::{ArgAction, Parser};
use common::{
    codec::{AudioCodec, Codec, VideoCodec},
    logger::{self, LoggerInitError},
    Orientation, Rect, ScreenInfo, Size,
};
use log::LevelFilter;
use thiserror::Error;
use transport::Streamer;

use crate::{
    audio::AudioEncoderOptions,
    video::{SurfaceEncoderOptions, DEFAULT_MAX_SIZE_FALLBACK},
};

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("invalid option, expected key=value: {0}")]
    InvalidPair(String),
    #[error(transparent)]
    ClapError(#[from] clap::Error),
}

/// Configuration of a mirroring session.
///
/// The server is started with `key=value` arguments, see
/// [`Options::parse_pairs`]. Long flags (`--video-codec=h265`) are accepted as
/// well.
///
/// `video`, `audio` and `control` tell the host which connections to open,
/// the sockets themselves belong to the host. The streams are framed with
/// [`Options::video_streamer`] and [`Options::audio_streamer`], the captured
/// geometry comes from [`Options::screen_info`].
#[derive(Debug, Clone, Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Options {
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub video: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub audio: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub control: bool,
    /// h264, h265, av1
    #[arg(
        long,
        value_parser = clap::value_parser!(VideoCodec),
        default_value_t = VideoCodec::H264,
    )]
    pub video_codec: VideoCodec,
    /// opus, aac, flac, raw
    #[arg(
        long,
        value_parser = clap::value_parser!(AudioCodec),
        default_value_t = AudioCodec::Opus,
    )]
    pub audio_codec: AudioCodec,
    #[arg(long, default_value_t = 8_000_000)]
    pub video_bit_rate: u32,
    #[arg(long, default_value_t = 128_000)]
    pub audio_bit_rate: u32,
    /// Limit of the major video dimension, 0 for unlimited.
    #[arg(long, default_value_t = 0)]
    pub max_size: u32,
    #[arg(long)]
    pub max_fps: Option<f32>,
    /// width:height:x:y, in the natural device orientation.
    #[arg(long, value_parser = parse_crop)]
    pub crop: Option<Rect>,
    /// unlocked, initial, 0, 1, 2 or 3
    #[arg(
        long,
        value_parser = clap::value_parser!(Orientation),
        default_value_t = Orientation::Unlocked,
    )]
    pub capture_orientation: Orientation,
    /// Seconds between key frames.
    #[arg(long, default_value_t = 10)]
    pub key_frame_interval: u32,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub send_codec_meta: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub send_frame_meta: bool,
    /// Retry with a smaller size when the encoder fails before the first
    /// frame.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub downsize_on_error: bool,
    #[arg(long, default_value_t = LevelFilter::Info)]
    pub log_level: LevelFilter,
    /// Directory of the log files, logs only go to stdout if unset.
    #[arg(long)]
    pub log_path: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self::parse_from(["pixcast"])
    }
}

impl Options {
    /// Parse the `key=value` server arguments, e.g. `video_codec=h265`.
    pub fn parse_pairs<I, T>(pairs: I) -> Result<Self, OptionsError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut args = vec!["pixcast".to_string()];
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| OptionsError::InvalidPair(pair.to_string()))?;

            args.push(format!("--{}={}", key.replace('_', "-"), value));
        }

        Ok(Self::try_parse_from(args)?)
    }

    /// Install the logger described by `log_level` and `log_path`.
    pub fn init_logger(&self) -> Result<(), LoggerInitError> {
        logger::init_logger(self.log_level, self.log_path.as_deref())?;
        logger::enable_panic_logger();

        Ok(())
    }

    /// Geometry of the captured screen, `device_size` being expressed in the
    /// current device `rotation`.
    pub fn screen_info(&self, rotation: u8, device_size: Size) -> ScreenInfo {
        ScreenInfo::compute(
            rotation,
            device_size,
            self.crop,
            self.max_size,
            self.capture_orientation,
        )
    }

    pub fn video_streamer<W: Write>(&self, sink: W) -> Streamer<W> {
        Streamer::new(
            sink,
            Codec::Video(self.video_codec),
            self.send_codec_meta,
            self.send_frame_meta,
        )
    }

    pub fn audio_streamer<W: Write>(&self, sink: W) -> Streamer<W> {
        Streamer::new(
            sink,
            Codec::Audio(self.audio_codec),
            self.send_codec_meta,
            self.send_frame_meta,
        )
    }

    pub fn video_encoder_options(&self) -> SurfaceEncoderOptions {
        SurfaceEncoderOptions {
            codec: self.video_codec,
            bit_rate: self.video_bit_rate,
            max_fps: self.max_fps,
            key_frame_interval: self.key_frame_interval,
            downsize_on_error: self.downsize_on_error,
            max_size_fallback: DEFAULT_MAX_SIZE_FALLBACK.to_vec(),
            ..Default::default()
        }
    }

    pub fn audio_encoder_options(&self) -> AudioEncoderOptions {
        AudioEncoderOptions {
            codec: self.audio_codec,
            bit_rate: self.audio_bit_rate,
        }
    }
}

fn parse_crop(value: &str) -> Result<Rect, Error> {
    let invalid = || Error::new(ErrorKind::InvalidInput, format!("invalid crop: {}", value));

    let fields = value
        .split(':')
        .map(|it| it.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;

    match fields[..] {
        [width, height, x, y] if width > 0 && height > 0 && x >= 0 && y >= 0 => {
            let right = x.checked_add(width).ok_or_else(invalid)?;
            let bottom = y.checked_add(height).ok_or_else(invalid)?;
            Ok(Rect::new(x, y, right, bottom))
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert!(options.video && options.audio && options.control);
        assert_eq!(options.video_codec, VideoCodec::H264);
        assert_eq!(options.audio_codec, AudioCodec::Opus);
        assert_eq!(options.video_bit_rate, 8_000_000);
        assert_eq!(options.max_size, 0);
        assert_eq!(options.crop, None);
        assert_eq!(options.capture_orientation, Orientation::Unlocked);
        assert!(options.send_frame_meta);
        assert_eq!(options.log_level, LevelFilter::Info);
    }

    #[test]
    fn parses_key_value_pairs() {
        let options = Options::parse_pairs([
            "video_codec=h265",
            "audio=false",
            "max_size=1920",
            "max_fps=30",
            "crop=1080:1080:0:420",
            "capture_orientation=initial",
            "send_frame_meta=false",
            "log_level=debug",
        ])
        .unwrap();

        assert_eq!(options.video_codec, VideoCodec::H265);
        assert!(!options.audio);
        assert_eq!(options.max_size, 1920);
        assert_eq!(options.max_fps, Some(30.0));
        assert_eq!(options.crop, Some(Rect::new(0, 420, 1080, 1500)));
        assert_eq!(options.capture_orientation, Orientation::Initial);
        assert!(!options.send_frame_meta);
        assert_eq!(options.log_level, LevelFilter::Debug);

        let video = options.video_encoder_options();
        assert_eq!(video.codec, VideoCodec::H265);
        assert_eq!(video.max_fps, Some(30.0));
    }

    #[test]
    fn rejects_invalid_options() {
        assert!(matches!(
            Options::parse_pairs(["video_codec"]),
            Err(OptionsError::InvalidPair(_))
        ));
        assert!(matches!(
            Options::parse_pairs(["video_codec=vp8"]),
            Err(OptionsError::ClapError(_))
        ));
        assert!(matches!(
            Options::parse_pairs(["unknown_key=1"]),
            Err(OptionsError::ClapError(_))
        ));
        assert!(Options::parse_pairs(["crop=10:10:0"]).is_err());
        assert!(Options::parse_pairs(["crop=0:10:0:0"]).is_err());
    }

    #[test]
    fn rejects_overflowing_crop() {
        assert!(parse_crop("2147483647:10:1:0").is_err());
        assert!(parse_crop("10:2147483647:0:1").is_err());
        assert_eq!(
            parse_crop("2147483646:1:1:0").unwrap(),
            Rect::new(1, 0, i32::MAX, 1)
        );
    }

    #[test]
    fn builds_screen_info_and_streamers() {
        let options = Options::parse_pairs([
            "crop=1080:1080:0:420",
            "video_codec=h265",
            "audio_codec=aac",
            "send_codec_meta=false",
        ])
        .unwrap();

        let screen = options.screen_info(0, Size::new(1080, 1920));
        assert_eq!(screen.content_rect(), Rect::new(0, 420, 1080, 1500));
        assert_eq!(screen.unlocked_video_size(), Size::new(1080, 1080));

        let mut video = options.video_streamer(Vec::new());
        assert_eq!(video.codec(), Codec::Video(VideoCodec::H265));
        video.write_video_header(Size::new(1080, 1080)).unwrap();
        assert!(video.header_written());
        assert!(video.get_ref().is_empty());

        let audio = Options::default().audio_streamer(Vec::new());
        assert_eq!(audio.codec(), Codec::Audio(AudioCodec::Opus));
    }
}
