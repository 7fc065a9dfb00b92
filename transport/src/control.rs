use std::io::{ErrorKind, Read};

use bytes::{Buf, BufMut, Bytes};
use common::Position;
use thiserror::Error;

use crate::{decode_utf8, truncate_utf8};

/// Capacity of the control message buffer, no message can be larger.
pub const CONTROL_BUFFER_SIZE: usize = 1 << 18;

pub const INJECT_TEXT_MAX_LENGTH: usize = 300;

/// Whole buffer minus the set clipboard header (type, sequence, paste flag
/// and length).
pub const CLIPBOARD_TEXT_MAX_LENGTH: usize = CONTROL_BUFFER_SIZE - 14;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    /// Message lengths are not self-describing, the stream cannot be
    /// resynchronized after an unknown type.
    #[error("unknown control message type: {0}")]
    UnknownType(u8),
    #[error("invalid copy key: {0}")]
    InvalidCopyKey(u8),
}

/// Whether the clipboard content should be copied or cut before it is sent
/// to the viewer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKey {
    None = 0,
    Copy = 1,
    Cut = 2,
}

impl TryFrom<u8> for CopyKey {
    type Error = ControlError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::None,
            1 => Self::Copy,
            2 => Self::Cut,
            _ => return Err(ControlError::InvalidCopyKey(value)),
        })
    }
}

/// Message sent by the viewer to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    InjectKeycode {
        action: u8,
        keycode: i32,
        repeat: i32,
        metastate: i32,
    },
    InjectText(String),
    InjectTouchEvent {
        action: u8,
        pointer_id: i64,
        position: Position,
        /// 0.0 to 1.0
        pressure: f32,
        action_button: i32,
        buttons: i32,
    },
    InjectScrollEvent {
        position: Position,
        /// -16.0 to 16.0
        hscroll: f32,
        /// -16.0 to 16.0
        vscroll: f32,
        buttons: i32,
    },
    BackOrScreenOn {
        action: u8,
    },
    ExpandNotificationPanel,
    ExpandSettingsPanel,
    CollapsePanels,
    GetClipboard {
        copy_key: CopyKey,
    },
    SetClipboard {
        /// 0 when the viewer does not expect an acknowledgement.
        sequence: u64,
        text: String,
        paste: bool,
    },
    SetDisplayPower {
        on: bool,
    },
    RotateDevice,
    UhidCreate {
        id: u16,
        vendor_id: u16,
        product_id: u16,
        name: String,
        report_descriptor: Bytes,
    },
    UhidInput {
        id: u16,
        data: Bytes,
    },
    UhidDestroy {
        id: u16,
    },
    OpenHardKeyboardSettings,
    StartApp {
        name: String,
    },
    ResetVideo,
}

impl ControlMessage {
    pub const TYPE_INJECT_KEYCODE: u8 = 0;
    pub const TYPE_INJECT_TEXT: u8 = 1;
    pub const TYPE_INJECT_TOUCH_EVENT: u8 = 2;
    pub const TYPE_INJECT_SCROLL_EVENT: u8 = 3;
    pub const TYPE_BACK_OR_SCREEN_ON: u8 = 4;
    pub const TYPE_EXPAND_NOTIFICATION_PANEL: u8 = 5;
    pub const TYPE_EXPAND_SETTINGS_PANEL: u8 = 6;
    pub const TYPE_COLLAPSE_PANELS: u8 = 7;
    pub const TYPE_GET_CLIPBOARD: u8 = 8;
    pub const TYPE_SET_CLIPBOARD: u8 = 9;
    pub const TYPE_SET_DISPLAY_POWER: u8 = 10;
    pub const TYPE_ROTATE_DEVICE: u8 = 11;
    pub const TYPE_UHID_CREATE: u8 = 12;
    pub const TYPE_UHID_INPUT: u8 = 13;
    pub const TYPE_UHID_DESTROY: u8 = 14;
    pub const TYPE_OPEN_HARD_KEYBOARD_SETTINGS: u8 = 15;
    pub const TYPE_START_APP: u8 = 16;
    pub const TYPE_RESET_VIDEO: u8 = 17;

    pub fn kind(&self) -> u8 {
        match self {
            Self::InjectKeycode { .. } => Self::TYPE_INJECT_KEYCODE,
            Self::InjectText(_) => Self::TYPE_INJECT_TEXT,
            Self::InjectTouchEvent { .. } => Self::TYPE_INJECT_TOUCH_EVENT,
            Self::InjectScrollEvent { .. } => Self::TYPE_INJECT_SCROLL_EVENT,
            Self::BackOrScreenOn { .. } => Self::TYPE_BACK_OR_SCREEN_ON,
            Self::ExpandNotificationPanel => Self::TYPE_EXPAND_NOTIFICATION_PANEL,
            Self::ExpandSettingsPanel => Self::TYPE_EXPAND_SETTINGS_PANEL,
            Self::CollapsePanels => Self::TYPE_COLLAPSE_PANELS,
            Self::GetClipboard { .. } => Self::TYPE_GET_CLIPBOARD,
            Self::SetClipboard { .. } => Self::TYPE_SET_CLIPBOARD,
            Self::SetDisplayPower { .. } => Self::TYPE_SET_DISPLAY_POWER,
            Self::RotateDevice => Self::TYPE_ROTATE_DEVICE,
            Self::UhidCreate { .. } => Self::TYPE_UHID_CREATE,
            Self::UhidInput { .. } => Self::TYPE_UHID_INPUT,
            Self::UhidDestroy { .. } => Self::TYPE_UHID_DESTROY,
            Self::OpenHardKeyboardSettings => Self::TYPE_OPEN_HARD_KEYBOARD_SETTINGS,
            Self::StartApp { .. } => Self::TYPE_START_APP,
            Self::ResetVideo => Self::TYPE_RESET_VIDEO,
        }
    }

    /// Serialize the message the way the viewer sends it.
    ///
    /// Texts are written in full, even when they exceed what the device
    /// accepts. Name and HID payload lengths are limited by their length
    /// prefix and are cut to fit.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.kind());

        match self {
            Self::InjectKeycode {
                action,
                keycode,
                repeat,
                metastate,
            } => {
                buf.put_u8(*action);
                buf.put_i32(*keycode);
                buf.put_i32(*repeat);
                buf.put_i32(*metastate);
            }
            Self::InjectText(text) => {
                buf.put_u32(text.len() as u32);
                buf.put_slice(text.as_bytes());
            }
            Self::InjectTouchEvent {
                action,
                pointer_id,
                position,
                pressure,
                action_button,
                buttons,
            } => {
                buf.put_u8(*action);
                buf.put_i64(*pointer_id);
                put_position(buf, position);
                buf.put_u16(float_to_u16_fixed_point(*pressure));
                buf.put_i32(*action_button);
                buf.put_i32(*buttons);
            }
            Self::InjectScrollEvent {
                position,
                hscroll,
                vscroll,
                buttons,
            } => {
                put_position(buf, position);
                buf.put_i16(float_to_i16_fixed_point(hscroll / 16.0));
                buf.put_i16(float_to_i16_fixed_point(vscroll / 16.0));
                buf.put_i32(*buttons);
            }
            Self::BackOrScreenOn { action } => buf.put_u8(*action),
            Self::GetClipboard { copy_key } => buf.put_u8(*copy_key as u8),
            Self::SetClipboard {
                sequence,
                text,
                paste,
            } => {
                buf.put_u64(*sequence);
                buf.put_u8(*paste as u8);
                buf.put_u32(text.len() as u32);
                buf.put_slice(text.as_bytes());
            }
            Self::SetDisplayPower { on } => buf.put_u8(*on as u8),
            Self::UhidCreate {
                id,
                vendor_id,
                product_id,
                name,
                report_descriptor,
            } => {
                let name = truncate_utf8(name, u8::MAX as usize);
                let descriptor =
                    &report_descriptor[..report_descriptor.len().min(u16::MAX as usize)];

                buf.put_u16(*id);
                buf.put_u16(*vendor_id);
                buf.put_u16(*product_id);
                buf.put_u8(name.len() as u8);
                buf.put_slice(name.as_bytes());
                buf.put_u16(descriptor.len() as u16);
                buf.put_slice(descriptor);
            }
            Self::UhidInput { id, data } => {
                let data = &data[..data.len().min(u16::MAX as usize)];

                buf.put_u16(*id);
                buf.put_u16(data.len() as u16);
                buf.put_slice(data);
            }
            Self::UhidDestroy { id } => buf.put_u16(*id),
            Self::StartApp { name } => {
                let name = truncate_utf8(name, u8::MAX as usize);

                buf.put_u8(name.len() as u8);
                buf.put_slice(name.as_bytes());
            }
            Self::ExpandNotificationPanel
            | Self::ExpandSettingsPanel
            | Self::CollapsePanels
            | Self::RotateDevice
            | Self::OpenHardKeyboardSettings
            | Self::ResetVideo => (),
        }
    }
}

fn put_position<B: BufMut>(buf: &mut B, position: &Position) {
    buf.put_i32(position.point.x);
    buf.put_i32(position.point.y);
    buf.put_u16(position.screen_size.width as u16);
    buf.put_u16(position.screen_size.height as u16);
}

fn get_position(buf: &mut &[u8]) -> Position {
    let x = buf.get_i32();
    let y = buf.get_i32();
    let width = buf.get_u16();
    let height = buf.get_u16();
    Position::new(x, y, width as u32, height as u32)
}

// 0xffff is 1.0, everything else is value / 2^16
fn u16_fixed_point_to_float(value: u16) -> f32 {
    if value == u16::MAX {
        1.0
    } else {
        value as f32 / 65536.0
    }
}

fn float_to_u16_fixed_point(value: f32) -> u16 {
    let value = (value.clamp(0.0, 1.0) * 65536.0) as u32;
    value.min(u16::MAX as u32) as u16
}

// 0x7fff is 1.0, everything else is value / 2^15
fn i16_fixed_point_to_float(value: i16) -> f32 {
    if value == i16::MAX {
        1.0
    } else {
        value as f32 / 32768.0
    }
}

fn float_to_i16_fixed_point(value: f32) -> i16 {
    let value = (value.clamp(-1.0, 1.0) * 32768.0) as i32;
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Incremental decoder of the control stream.
///
/// Bytes are appended with [`ControlMessageReader::feed`] and messages are
/// taken one at a time with [`ControlMessageReader::next`]. A message split
/// across reads stays in the buffer until it is complete.
pub struct ControlMessageReader {
    buffer: Box<[u8]>,
    head: usize,
    tail: usize,
    // bytes of a truncated message still to be dropped
    skip: usize,
}

impl Default for ControlMessageReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlMessageReader {
    pub fn new() -> Self {
        Self {
            buffer: vec![0u8; CONTROL_BUFFER_SIZE].into_boxed_slice(),
            head: 0,
            tail: 0,
            skip: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.tail - self.head == self.buffer.len()
    }

    /// Number of buffered bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.tail - self.head
    }

    /// Read once from `source`. Returns `false` at the end of the stream.
    ///
    /// # Panics
    ///
    /// The buffer must not be full: every message fits in the buffer, so a
    /// full buffer always contains a complete message that must be taken
    /// first.
    pub fn feed<R: Read>(&mut self, source: &mut R) -> std::io::Result<bool> {
        assert!(!self.is_full(), "control message buffer is full");

        if self.head > 0 {
            self.buffer.copy_within(self.head..self.tail, 0);
            self.tail -= self.head;
            self.head = 0;
        }

        loop {
            match source.read(&mut self.buffer[self.tail..]) {
                Ok(0) => return Ok(false),
                Ok(size) => {
                    self.tail += size;
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Take the next complete message, `None` if more bytes are needed.
    ///
    /// An error means the stream cannot be decoded any further.
    pub fn next(&mut self) -> Result<Option<ControlMessage>, ControlError> {
        self.discard();
        if self.skip > 0 {
            return Ok(None);
        }

        let mut buf = &self.buffer[self.head..self.tail];
        let available = buf.len();
        let Some((message, skip)) = decode(&mut buf)? else {
            return Ok(None);
        };

        self.head += available - buf.len();
        if skip > 0 {
            log::debug!(
                "control message truncated, type={}, dropped={}",
                message.kind(),
                skip
            );

            self.skip = skip;
            self.discard();
        }

        Ok(Some(message))
    }

    fn discard(&mut self) {
        let size = self.skip.min(self.tail - self.head);
        self.head += size;
        self.skip -= size;
    }
}

// Returns the message and the number of trailing bytes of the message that
// were not kept, or `None` if the message is not complete yet.
fn decode(buf: &mut &[u8]) -> Result<Option<(ControlMessage, usize)>, ControlError> {
    macro_rules! need {
        ($size:expr) => {
            if buf.remaining() < $size {
                return Ok(None);
            }
        };
    }

    need!(1);

    let mut skip = 0;
    let message = match buf.get_u8() {
        ControlMessage::TYPE_INJECT_KEYCODE => {
            need!(13);
            ControlMessage::InjectKeycode {
                action: buf.get_u8(),
                keycode: buf.get_i32(),
                repeat: buf.get_i32(),
                metastate: buf.get_i32(),
            }
        }
        ControlMessage::TYPE_INJECT_TEXT => {
            need!(4);
            let size = buf.get_u32() as usize;
            let keep = size.min(INJECT_TEXT_MAX_LENGTH);
            need!(keep);

            skip = size - keep;
            ControlMessage::InjectText(take_text(buf, keep))
        }
        ControlMessage::TYPE_INJECT_TOUCH_EVENT => {
            need!(31);
            ControlMessage::InjectTouchEvent {
                action: buf.get_u8(),
                pointer_id: buf.get_i64(),
                position: get_position(buf),
                pressure: u16_fixed_point_to_float(buf.get_u16()),
                action_button: buf.get_i32(),
                buttons: buf.get_i32(),
            }
        }
        ControlMessage::TYPE_INJECT_SCROLL_EVENT => {
            need!(20);
            ControlMessage::InjectScrollEvent {
                position: get_position(buf),
                hscroll: i16_fixed_point_to_float(buf.get_i16()) * 16.0,
                vscroll: i16_fixed_point_to_float(buf.get_i16()) * 16.0,
                buttons: buf.get_i32(),
            }
        }
        ControlMessage::TYPE_BACK_OR_SCREEN_ON => {
            need!(1);
            ControlMessage::BackOrScreenOn {
                action: buf.get_u8(),
            }
        }
        ControlMessage::TYPE_EXPAND_NOTIFICATION_PANEL => ControlMessage::ExpandNotificationPanel,
        ControlMessage::TYPE_EXPAND_SETTINGS_PANEL => ControlMessage::ExpandSettingsPanel,
        ControlMessage::TYPE_COLLAPSE_PANELS => ControlMessage::CollapsePanels,
        ControlMessage::TYPE_GET_CLIPBOARD => {
            need!(1);
            ControlMessage::GetClipboard {
                copy_key: CopyKey::try_from(buf.get_u8())?,
            }
        }
        ControlMessage::TYPE_SET_CLIPBOARD => {
            need!(13);
            let sequence = buf.get_u64();
            let paste = buf.get_u8() != 0;
            let size = buf.get_u32() as usize;
            let keep = size.min(CLIPBOARD_TEXT_MAX_LENGTH);
            need!(keep);

            skip = size - keep;
            ControlMessage::SetClipboard {
                text: take_text(buf, keep),
                sequence,
                paste,
            }
        }
        ControlMessage::TYPE_SET_DISPLAY_POWER => {
            need!(1);
            ControlMessage::SetDisplayPower {
                on: buf.get_u8() != 0,
            }
        }
        ControlMessage::TYPE_ROTATE_DEVICE => ControlMessage::RotateDevice,
        ControlMessage::TYPE_UHID_CREATE => {
            need!(7);
            let id = buf.get_u16();
            let vendor_id = buf.get_u16();
            let product_id = buf.get_u16();
            let name_size = buf.get_u8() as usize;
            need!(name_size);

            let name = take_text(buf, name_size);
            need!(2);

            let descriptor_size = buf.get_u16() as usize;
            need!(descriptor_size);

            ControlMessage::UhidCreate {
                report_descriptor: buf.copy_to_bytes(descriptor_size),
                id,
                vendor_id,
                product_id,
                name,
            }
        }
        ControlMessage::TYPE_UHID_INPUT => {
            need!(4);
            let id = buf.get_u16();
            let size = buf.get_u16() as usize;
            need!(size);

            ControlMessage::UhidInput {
                data: buf.copy_to_bytes(size),
                id,
            }
        }
        ControlMessage::TYPE_UHID_DESTROY => {
            need!(2);
            ControlMessage::UhidDestroy { id: buf.get_u16() }
        }
        ControlMessage::TYPE_OPEN_HARD_KEYBOARD_SETTINGS => ControlMessage::OpenHardKeyboardSettings,
        ControlMessage::TYPE_START_APP => {
            need!(1);
            let size = buf.get_u8() as usize;
            need!(size);

            ControlMessage::StartApp {
                name: take_text(buf, size),
            }
        }
        ControlMessage::TYPE_RESET_VIDEO => ControlMessage::ResetVideo,
        kind => return Err(ControlError::UnknownType(kind)),
    };

    Ok(Some((message, skip)))
}

fn take_text(buf: &mut &[u8], size: usize) -> String {
    let text = decode_utf8(&buf[..size]);
    buf.advance(size);
    text
}
