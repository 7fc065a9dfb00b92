use std::{
    fmt,
    io::{Error, ErrorKind},
    str::FromStr,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Video codec of the mirrored stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum VideoCodec {
    /// [H.264 / AVC](https://en.wikipedia.org/wiki/Advanced_Video_Coding)
    #[default]
    H264,
    /// [H.265 / HEVC](https://en.wikipedia.org/wiki/High_Efficiency_Video_Coding)
    H265,
    /// [AV1](https://en.wikipedia.org/wiki/AV1)
    Av1,
}

impl VideoCodec {
    /// 4-byte ASCII tag identifying the codec on the wire.
    pub const fn id(&self) -> u32 {
        match self {
            Self::H264 => u32::from_be_bytes(*b"h264"),
            Self::H265 => u32::from_be_bytes(*b"h265"),
            Self::Av1 => u32::from_be_bytes(*b"\0av1"),
        }
    }

    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::H264 => "video/avc",
            Self::H265 => "video/hevc",
            Self::Av1 => "video/av01",
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Av1 => "av1",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VideoCodec {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "h264" => Self::H264,
            "h265" => Self::H265,
            "av1" => Self::Av1,
            _ => return Err(Error::new(ErrorKind::InvalidInput, value)),
        })
    }
}

/// Audio codec of the mirrored stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum AudioCodec {
    /// [Opus](https://opus-codec.org/)
    #[default]
    Opus,
    /// [AAC](https://en.wikipedia.org/wiki/Advanced_Audio_Coding)
    Aac,
    /// [FLAC](https://xiph.org/flac/)
    Flac,
    /// Raw PCM, 16-bit little-endian samples, no encoder involved.
    Raw,
}

impl AudioCodec {
    /// 4-byte ASCII tag identifying the codec on the wire.
    pub const fn id(&self) -> u32 {
        match self {
            Self::Opus => u32::from_be_bytes(*b"opus"),
            Self::Aac => u32::from_be_bytes(*b"\0aac"),
            Self::Flac => u32::from_be_bytes(*b"flac"),
            Self::Raw => u32::from_be_bytes(*b"\0raw"),
        }
    }

    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Opus => "audio/opus",
            Self::Aac => "audio/mp4a-latm",
            Self::Flac => "audio/flac",
            Self::Raw => "audio/raw",
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Flac => "flac",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AudioCodec {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "opus" => Self::Opus,
            "aac" => Self::Aac,
            "flac" => Self::Flac,
            "raw" => Self::Raw,
            _ => return Err(Error::new(ErrorKind::InvalidInput, value)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum Codec {
    Video(VideoCodec),
    Audio(AudioCodec),
}

impl Codec {
    pub const fn id(&self) -> u32 {
        match self {
            Self::Video(it) => it.id(),
            Self::Audio(it) => it.id(),
        }
    }

    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Video(it) => it.mime_type(),
            Self::Audio(it) => it.mime_type(),
        }
    }
}

impl From<VideoCodec> for Codec {
    fn from(value: VideoCodec) -> Self {
        Self::Video(value)
    }
}

impl From<AudioCodec> for Codec {
    fn from(value: AudioCodec) -> Self {
        Self::Audio(value)
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .parse::<VideoCodec>()
            .map(Self::Video)
            .or_else(|_| value.parse::<AudioCodec>().map(Self::Audio))
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video(it) => it.fmt(f),
            Self::Audio(it) => it.fmt(f),
        }
    }
}
