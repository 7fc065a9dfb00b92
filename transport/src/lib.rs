mod control;
mod device;
mod streamer;

use std::io::{Error, ErrorKind};

pub use self::{
    control::{
        ControlError, ControlMessage, ControlMessageReader, CopyKey, CLIPBOARD_TEXT_MAX_LENGTH,
        CONTROL_BUFFER_SIZE, INJECT_TEXT_MAX_LENGTH,
    },
    device::{DeviceMessage, DeviceMessageWriter, DEVICE_CLIPBOARD_TEXT_MAX_LENGTH},
    streamer::{BufferType, PacketHeader, Streamer, StreamerError},
};

/// Whether the error means the peer went away.
///
/// The viewer closing the connection is the normal way a session ends, it is
/// not reported as a failure.
pub fn is_broken_pipe(error: &Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}

/// Longest prefix of `value` that fits in `max` bytes without splitting a
/// character.
pub(crate) fn truncate_utf8(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }

    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }

    &value[..end]
}

/// Decode text read from the wire. A character cut by a truncation at the end
/// is dropped, other invalid sequences are replaced.
pub(crate) fn decode_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(it) => it.to_string(),
        Err(e) if e.error_len().is_none() => {
            String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned()
        }
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}
