use std::io::Write;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{control::CONTROL_BUFFER_SIZE, decode_utf8, truncate_utf8};

/// Largest clipboard text sent to the viewer: a whole message buffer minus
/// the message header (type and length).
pub const DEVICE_CLIPBOARD_TEXT_MAX_LENGTH: usize = CONTROL_BUFFER_SIZE - 5;

/// Message sent by the device to the viewer, on the control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMessage {
    Clipboard(String),
    AckClipboard(u64),
    UhidOutput { id: u16, data: Bytes },
}

impl DeviceMessage {
    pub const TYPE_CLIPBOARD: u8 = 0;
    pub const TYPE_ACK_CLIPBOARD: u8 = 1;
    pub const TYPE_UHID_OUTPUT: u8 = 2;

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Self::Clipboard(text) => {
                let text = truncate_utf8(text, DEVICE_CLIPBOARD_TEXT_MAX_LENGTH);

                buf.put_u8(Self::TYPE_CLIPBOARD);
                buf.put_u32(text.len() as u32);
                buf.put_slice(text.as_bytes());
            }
            Self::AckClipboard(sequence) => {
                buf.put_u8(Self::TYPE_ACK_CLIPBOARD);
                buf.put_u64(*sequence);
            }
            Self::UhidOutput { id, data } => {
                let data = &data[..data.len().min(u16::MAX as usize)];

                buf.put_u8(Self::TYPE_UHID_OUTPUT);
                buf.put_u16(*id);
                buf.put_u16(data.len() as u16);
                buf.put_slice(data);
            }
        }
    }

    /// Parse one message, the way the viewer does. `None` if the buffer does
    /// not hold a complete known message.
    pub fn decode(buf: &mut &[u8]) -> Option<Self> {
        if buf.remaining() < 1 {
            return None;
        }

        let mut cursor = *buf;
        let message = match cursor.get_u8() {
            Self::TYPE_CLIPBOARD => {
                if cursor.remaining() < 4 {
                    return None;
                }

                let size = cursor.get_u32() as usize;
                if cursor.remaining() < size {
                    return None;
                }

                let text = decode_utf8(&cursor[..size]);
                cursor.advance(size);
                Self::Clipboard(text)
            }
            Self::TYPE_ACK_CLIPBOARD => {
                if cursor.remaining() < 8 {
                    return None;
                }

                Self::AckClipboard(cursor.get_u64())
            }
            Self::TYPE_UHID_OUTPUT => {
                if cursor.remaining() < 4 {
                    return None;
                }

                let id = cursor.get_u16();
                let size = cursor.get_u16() as usize;
                if cursor.remaining() < size {
                    return None;
                }

                Self::UhidOutput {
                    data: cursor.copy_to_bytes(size),
                    id,
                }
            }
            _ => return None,
        };

        *buf = cursor;
        Some(message)
    }
}

/// Writes device messages to the viewer.
pub struct DeviceMessageWriter<W> {
    sink: W,
    buffer: BytesMut,
}

impl<W: Write> DeviceMessageWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            sink,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    pub fn write(&mut self, message: &DeviceMessage) -> std::io::Result<()> {
        self.buffer.clear();
        message.encode(&mut self.buffer);

        self.sink.write_all(&self.buffer)?;
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_messages() {
        let mut writer = DeviceMessageWriter::new(Vec::new());
        writer
            .write(&DeviceMessage::Clipboard("abc".to_string()))
            .unwrap();
        writer.write(&DeviceMessage::AckClipboard(0x0102)).unwrap();
        writer
            .write(&DeviceMessage::UhidOutput {
                id: 7,
                data: Bytes::from_static(&[1, 2]),
            })
            .unwrap();

        assert_eq!(
            writer.into_inner(),
            [
                0, 0, 0, 0, 3, b'a', b'b', b'c', //
                1, 0, 0, 0, 0, 0, 0, 1, 2, //
                2, 0, 7, 0, 2, 1, 2,
            ]
        );
    }

    #[test]
    fn long_clipboard_is_truncated() {
        let text = "€".repeat(DEVICE_CLIPBOARD_TEXT_MAX_LENGTH / 3 + 10);
        let mut writer = DeviceMessageWriter::new(Vec::new());
        writer.write(&DeviceMessage::Clipboard(text)).unwrap();

        let bytes = writer.into_inner();
        assert!(bytes.len() <= CONTROL_BUFFER_SIZE);

        let mut buf = &bytes[..];
        match DeviceMessage::decode(&mut buf) {
            Some(DeviceMessage::Clipboard(text)) => {
                assert!(text.len() <= DEVICE_CLIPBOARD_TEXT_MAX_LENGTH);
                assert!(text.chars().all(|it| it == '€'));
            }
            message => panic!("unexpected message: {:?}", message),
        }

        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_message_is_not_consumed() {
        let mut bytes = BytesMut::new();
        DeviceMessage::AckClipboard(5).encode(&mut bytes);

        let mut buf = &bytes[..bytes.len() - 1];
        assert_eq!(DeviceMessage::decode(&mut buf), None);
        assert_eq!(buf.len(), 8);

        let mut buf = &bytes[..];
        assert_eq!(
            DeviceMessage::decode(&mut buf),
            Some(DeviceMessage::AckClipboard(5))
        );
    }
}
