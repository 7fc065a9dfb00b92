use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use common::{
    codec::{AudioCodec, Codec},
    Size,
};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Error)]
pub enum StreamerError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("pts is too large for the packet header: {0}")]
    PtsOverflow(u64),
    #[error("invalid opus config packet: {0}")]
    InvalidOpusConfig(&'static str),
    #[error("invalid flac config packet: {0}")]
    InvalidFlacConfig(&'static str),
    #[error("packet header is truncated")]
    TruncatedHeader,
}

impl StreamerError {
    /// The viewer went away, the stream ends cleanly.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            Self::IoError(e) => crate::is_broken_pipe(e),
            _ => false,
        }
    }
}

/// Represents different types of encoded media packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum BufferType {
    /// Regular frame or audio chunk.
    Partial = 0,
    /// Frame decodable without any other frame.
    KeyFrame = 1,
    /// Codec configuration (SPS/PPS, OpusHead, STREAMINFO...), carries no
    /// timestamp.
    Config = 2,
}

/// Frame metadata sent in front of every packet.
///
/// ```text
/// [. . . . . . . .|. . . .]. . . . . . . . . . . . . . . ...
///  <-------------> <-----> <-----------------------------...
///        PTS        packet        raw packet
///                    size
/// ```
///
/// The most significant bit of the PTS is set for config packets (the rest
/// of the PTS is then meaningless), the second one for key frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct PacketHeader {
    pub ty: BufferType,
    pub pts: u64,
    pub size: u32,
}

impl PacketHeader {
    pub const SIZE: usize = 12;

    pub const CONFIG_FLAG: u64 = 1 << 63;
    pub const KEY_FRAME_FLAG: u64 = 1 << 62;

    /// Timestamps must stay below this value to leave room for the flags.
    pub const MAX_PTS: u64 = Self::KEY_FRAME_FLAG;

    pub fn new(ty: BufferType, pts: u64, size: u32) -> Result<Self, StreamerError> {
        if ty != BufferType::Config && pts >= Self::MAX_PTS {
            return Err(StreamerError::PtsOverflow(pts));
        }

        Ok(Self { ty, pts, size })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let pts_and_flags = match self.ty {
            BufferType::Config => Self::CONFIG_FLAG,
            BufferType::KeyFrame => self.pts | Self::KEY_FRAME_FLAG,
            BufferType::Partial => self.pts,
        };

        let mut bytes = [0u8; Self::SIZE];
        let mut buf = &mut bytes[..];
        buf.put_u64(pts_and_flags);
        buf.put_u32(self.size);
        bytes
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, StreamerError> {
        if bytes.len() < Self::SIZE {
            return Err(StreamerError::TruncatedHeader);
        }

        let pts_and_flags = bytes.get_u64();
        let size = bytes.get_u32();
        Ok(if pts_and_flags & Self::CONFIG_FLAG != 0 {
            Self {
                ty: BufferType::Config,
                pts: 0,
                size,
            }
        } else if pts_and_flags & Self::KEY_FRAME_FLAG != 0 {
            Self {
                ty: BufferType::KeyFrame,
                pts: pts_and_flags & !Self::KEY_FRAME_FLAG,
                size,
            }
        } else {
            Self {
                ty: BufferType::Partial,
                pts: pts_and_flags,
                size,
            }
        })
    }
}

/// Writes one media stream (video or audio) to the viewer.
///
/// The stream starts with a codec header (or a disable code when the stream
/// could not be started), followed by the encoded packets.
pub struct Streamer<W> {
    sink: W,
    codec: Codec,
    send_codec_meta: bool,
    send_frame_meta: bool,
    header_written: bool,
    buffer: BytesMut,
}

impl<W: Write> Streamer<W> {
    /// Code sent instead of the codec id when the stream is intentionally
    /// absent (e.g. audio capture not supported).
    pub const DISABLED: u32 = 0;

    /// Code sent instead of the codec id when the stream failed to start.
    pub const DISABLED_ON_ERROR: u32 = 1;

    pub fn new(sink: W, codec: Codec, send_codec_meta: bool, send_frame_meta: bool) -> Self {
        Self {
            buffer: BytesMut::with_capacity(PacketHeader::SIZE),
            header_written: false,
            send_codec_meta,
            send_frame_meta,
            codec,
            sink,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Whether a codec header or a disable code was already written.
    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    pub fn write_video_header(&mut self, size: Size) -> Result<(), StreamerError> {
        if self.send_codec_meta {
            self.buffer.clear();
            self.buffer.put_u32(self.codec.id());
            self.buffer.put_u32(size.width);
            self.buffer.put_u32(size.height);
            self.sink.write_all(&self.buffer)?;
            self.sink.flush()?;
        }

        self.header_written = true;
        Ok(())
    }

    pub fn write_audio_header(&mut self) -> Result<(), StreamerError> {
        if self.send_codec_meta {
            self.sink.write_all(&self.codec.id().to_be_bytes())?;
            self.sink.flush()?;
        }

        self.header_written = true;
        Ok(())
    }

    /// Tell the viewer the stream will not start. `is_error` distinguishes a
    /// failure from a stream that is simply not available.
    pub fn write_disable_stream(&mut self, is_error: bool) -> Result<(), StreamerError> {
        let code = if is_error {
            Self::DISABLED_ON_ERROR
        } else {
            Self::DISABLED
        };

        self.sink.write_all(&code.to_be_bytes())?;
        self.sink.flush()?;

        self.header_written = true;
        Ok(())
    }

    pub fn write_packet(
        &mut self,
        payload: &[u8],
        ty: BufferType,
        pts: u64,
    ) -> Result<(), StreamerError> {
        let payload = if ty == BufferType::Config {
            match self.codec {
                Codec::Audio(AudioCodec::Opus) => fix_opus_config_packet(payload)?,
                Codec::Audio(AudioCodec::Flac) => fix_flac_config_packet(payload)?,
                _ => payload,
            }
        } else {
            payload
        };

        if self.send_frame_meta {
            let size = u32::try_from(payload.len()).map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "packet too large")
            })?;

            self.sink
                .write_all(&PacketHeader::new(ty, pts, size)?.encode())?;
        } else if ty != BufferType::Config && pts >= PacketHeader::MAX_PTS {
            return Err(StreamerError::PtsOverflow(pts));
        }

        self.sink.write_all(payload)?;
        self.sink.flush()?;
        Ok(())
    }
}

const OPUS_HEADER_MAGIC: &[u8; 8] = b"AOPUSHDR";
const FLAC_MAGIC: &[u8; 4] = b"fLaC";

// The encoder outputs the OpusHead block wrapped in its own container:
//
// "AOPUSHDR" | u64 (little-endian) size | OpusHead block | other blocks...
fn fix_opus_config_packet(payload: &[u8]) -> Result<&[u8], StreamerError> {
    if payload.len() < 16 {
        return Err(StreamerError::InvalidOpusConfig("not enough data"));
    }

    if &payload[..8] != OPUS_HEADER_MAGIC {
        return Err(StreamerError::InvalidOpusConfig("opus header not found"));
    }

    let mut buf = &payload[8..];
    let size = buf.get_u64_le();
    if size >= 0x7FFF_FFFF {
        return Err(StreamerError::InvalidOpusConfig("invalid block size"));
    }

    let size = size as usize;
    if size > buf.len() {
        return Err(StreamerError::InvalidOpusConfig("not enough data in opus header"));
    }

    Ok(&buf[..size])
}

// "fLaC" | metadata block header (last flag, 7-bit type, 24-bit size) | STREAMINFO
fn fix_flac_config_packet(payload: &[u8]) -> Result<&[u8], StreamerError> {
    if payload.len() < 8 {
        return Err(StreamerError::InvalidFlacConfig("not enough data"));
    }

    if &payload[..4] != FLAC_MAGIC {
        return Err(StreamerError::InvalidFlacConfig("flac magic not found"));
    }

    let mut buf = &payload[4..];
    let size = (buf.get_u32() & 0x00FF_FFFF) as usize;
    if size > buf.len() {
        return Err(StreamerError::InvalidFlacConfig("not enough data in flac header"));
    }

    Ok(&buf[..size])
}

#[cfg(test)]
mod tests {
    use super::*;

    use common::codec::VideoCodec;
    use proptest::prelude::*;

    fn video_streamer(codec_meta: bool, frame_meta: bool) -> Streamer<Vec<u8>> {
        Streamer::new(
            Vec::new(),
            Codec::Video(VideoCodec::H264),
            codec_meta,
            frame_meta,
        )
    }

    fn audio_streamer(codec: AudioCodec) -> Streamer<Vec<u8>> {
        Streamer::new(Vec::new(), Codec::Audio(codec), true, true)
    }

    #[test]
    fn video_header() {
        let mut streamer = video_streamer(true, true);
        assert!(!streamer.header_written());

        streamer.write_video_header(Size::new(1280, 720)).unwrap();
        assert!(streamer.header_written());
        assert_eq!(
            streamer.into_inner(),
            [0x68, 0x32, 0x36, 0x34, 0, 0, 5, 0, 0, 0, 2, 0xD0]
        );
    }

    #[test]
    fn headers_are_omitted_without_codec_meta() {
        let mut streamer = video_streamer(false, true);
        streamer.write_video_header(Size::new(1280, 720)).unwrap();
        assert!(streamer.header_written());
        assert!(streamer.into_inner().is_empty());
    }

    #[test]
    fn audio_header() {
        let mut streamer = audio_streamer(AudioCodec::Opus);
        streamer.write_audio_header().unwrap();
        assert_eq!(streamer.into_inner(), b"opus");
    }

    #[test]
    fn disable_codes() {
        let mut streamer = audio_streamer(AudioCodec::Aac);
        streamer.write_disable_stream(false).unwrap();
        assert!(streamer.header_written());
        assert_eq!(streamer.into_inner(), [0, 0, 0, 0]);

        let mut streamer = audio_streamer(AudioCodec::Aac);
        streamer.write_disable_stream(true).unwrap();
        assert_eq!(streamer.into_inner(), [0, 0, 0, 1]);
    }

    #[test]
    fn packet_flags() {
        let mut streamer = video_streamer(true, true);
        streamer.write_packet(&[1, 2], BufferType::Config, 99).unwrap();
        streamer.write_packet(&[3], BufferType::KeyFrame, 5).unwrap();
        streamer.write_packet(&[], BufferType::Partial, 6).unwrap();

        let bytes = streamer.into_inner();
        assert_eq!(
            bytes,
            [
                0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 1, 2, //
                0x40, 0, 0, 0, 0, 0, 0, 5, 0, 0, 0, 1, 3, //
                0, 0, 0, 0, 0, 0, 0, 6, 0, 0, 0, 0,
            ]
        );
    }

    #[test]
    fn raw_stream_without_frame_meta() {
        let mut streamer = video_streamer(false, false);
        streamer.write_packet(&[1, 2, 3], BufferType::Partial, 1).unwrap();
        assert_eq!(streamer.into_inner(), [1, 2, 3]);
    }

    #[test]
    fn pts_overflow_is_rejected() {
        let mut streamer = video_streamer(true, true);
        let result = streamer.write_packet(&[1], BufferType::Partial, 1 << 62);
        assert!(matches!(result, Err(StreamerError::PtsOverflow(_))));
        assert!(streamer.into_inner().is_empty());

        // the pts of config packets is not transmitted
        let mut streamer = video_streamer(true, true);
        assert!(streamer.write_packet(&[1], BufferType::Config, u64::MAX).is_ok());
    }

    #[test]
    fn opus_config_is_unwrapped() {
        let mut payload = OPUS_HEADER_MAGIC.to_vec();
        payload.extend_from_slice(&4u64.to_le_bytes());
        payload.extend_from_slice(b"Opus");
        payload.extend_from_slice(b"AOPUSDLY trailing block");

        let mut streamer = audio_streamer(AudioCodec::Opus);
        streamer.write_packet(&payload, BufferType::Config, 0).unwrap();
        let bytes = streamer.into_inner();
        assert_eq!(&bytes[..PacketHeader::SIZE], &PacketHeader::new(BufferType::Config, 0, 4).unwrap().encode());
        assert_eq!(&bytes[PacketHeader::SIZE..], b"Opus");
    }

    #[test]
    fn invalid_opus_config() {
        let mut streamer = audio_streamer(AudioCodec::Opus);
        assert!(matches!(
            streamer.write_packet(b"AOPUSHDR", BufferType::Config, 0),
            Err(StreamerError::InvalidOpusConfig(_))
        ));

        let mut payload = b"XOPUSHDR".to_vec();
        payload.extend_from_slice(&0u64.to_le_bytes());
        assert!(streamer.write_packet(&payload, BufferType::Config, 0).is_err());

        let mut payload = OPUS_HEADER_MAGIC.to_vec();
        payload.extend_from_slice(&0x7FFF_FFFFu64.to_le_bytes());
        assert!(streamer.write_packet(&payload, BufferType::Config, 0).is_err());

        let mut payload = OPUS_HEADER_MAGIC.to_vec();
        payload.extend_from_slice(&10u64.to_le_bytes());
        payload.extend_from_slice(b"Opus");
        assert!(streamer.write_packet(&payload, BufferType::Config, 0).is_err());

        // only config packets are inspected
        assert!(streamer.write_packet(b"xx", BufferType::Partial, 0).is_ok());
    }

    #[test]
    fn flac_config_is_unwrapped() {
        let mut payload = FLAC_MAGIC.to_vec();
        payload.extend_from_slice(&[0x80, 0, 0, 3]);
        payload.extend_from_slice(&[7, 8, 9, 10]);

        let mut streamer = audio_streamer(AudioCodec::Flac);
        streamer.write_packet(&payload, BufferType::Config, 0).unwrap();
        let bytes = streamer.into_inner();
        assert_eq!(&bytes[PacketHeader::SIZE..], &[7, 8, 9]);

        let mut streamer = audio_streamer(AudioCodec::Flac);
        assert!(streamer.write_packet(b"fLaC", BufferType::Config, 0).is_err());
        assert!(streamer
            .write_packet(&[b'f', b'L', b'a', b'C', 0, 0, 0, 5, 1], BufferType::Config, 0)
            .is_err());
        assert!(streamer
            .write_packet(&[b'O', b'g', b'g', b'S', 0, 0, 0, 0], BufferType::Config, 0)
            .is_err());
    }

    #[test]
    fn broken_pipe_is_detected() {
        struct Closed;

        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::ErrorKind::BrokenPipe.into())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut streamer = Streamer::new(Closed, Codec::Video(VideoCodec::H265), true, true);
        let error = streamer.write_packet(&[1], BufferType::Partial, 0).unwrap_err();
        assert!(error.is_broken_pipe());
        assert!(!StreamerError::PtsOverflow(0).is_broken_pipe());
    }

    fn buffer_type() -> impl Strategy<Value = BufferType> {
        prop_oneof![
            Just(BufferType::Partial),
            Just(BufferType::KeyFrame),
            Just(BufferType::Config),
        ]
    }

    proptest! {
        #[test]
        fn framing_round_trip(
            packets in prop::collection::vec(
                (buffer_type(), 0u64..PacketHeader::MAX_PTS, prop::collection::vec(any::<u8>(), 0..64)),
                0..16,
            )
        ) {
            let mut streamer = video_streamer(true, true);
            for (ty, pts, payload) in &packets {
                streamer.write_packet(payload, *ty, *pts).unwrap();
            }

            let bytes = streamer.into_inner();
            let mut buf = &bytes[..];
            for (ty, pts, payload) in &packets {
                let header = PacketHeader::decode(buf).unwrap();
                buf.advance(PacketHeader::SIZE);

                prop_assert_eq!(header.ty, *ty);
                prop_assert_eq!(header.size as usize, payload.len());
                if *ty != BufferType::Config {
                    prop_assert_eq!(header.pts, *pts);
                }

                prop_assert_eq!(&buf[..payload.len()], &payload[..]);
                buf.advance(payload.len());
            }

            prop_assert!(buf.is_empty());
        }
    }
}
