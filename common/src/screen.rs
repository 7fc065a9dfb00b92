use std::{
    fmt,
    io::{Error, ErrorKind},
    str::FromStr,
};

use crate::{AffineMatrix, Point, Position, Rect, Size};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Requested orientation lock of the video stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum Orientation {
    /// The video follows the device rotation.
    #[default]
    Unlocked,
    /// Locked to the device rotation at the time the screen info is computed.
    Initial,
    /// Locked to the given counter-clockwise quarter turns (0-3).
    Locked(u8),
}

impl Orientation {
    fn resolve(&self, device_rotation: u8) -> Option<u8> {
        match self {
            Self::Unlocked => None,
            Self::Initial => Some(device_rotation),
            Self::Locked(it) => Some(it % 4),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::Initial => write!(f, "initial"),
            Self::Locked(it) => write!(f, "{}", it),
        }
    }
}

impl FromStr for Orientation {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "unlocked" | "-1" => Self::Unlocked,
            "initial" | "-2" => Self::Initial,
            "0" => Self::Locked(0),
            "1" => Self::Locked(1),
            "2" => Self::Locked(2),
            "3" => Self::Locked(3),
            _ => return Err(Error::new(ErrorKind::InvalidInput, value)),
        })
    }
}

/// Geometry of the mirrored screen for one device rotation.
///
/// A screen info is never modified: when the device rotates, a new instance
/// is derived with [`ScreenInfo::with_device_rotation`] and replaces the old
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct ScreenInfo {
    content_rect: Rect,
    unlocked_video_size: Size,
    device_rotation: u8,
    locked_video_orientation: Option<u8>,
}

impl ScreenInfo {
    /// Compute the screen info of a device screen of `device_size` (already
    /// expressed in the current `rotation`).
    ///
    /// `crop` is expressed in the natural orientation of the device, it is
    /// flipped when the device is rotated by an odd number of quarter turns.
    /// A `max_size` of 0 means unlimited.
    pub fn compute(
        rotation: u8,
        device_size: Size,
        crop: Option<Rect>,
        max_size: u32,
        orientation: Orientation,
    ) -> Self {
        let rotation = rotation % 4;
        let mut content_rect = device_size.to_rect();
        if let Some(crop) = crop {
            let crop = if rotation % 2 == 1 { crop.flip() } else { crop };
            content_rect = match content_rect.intersect(&crop) {
                Some(it) => it,
                None => {
                    log::warn!(
                        "crop rectangle does not intersect the device screen, crop={}, device={}",
                        crop,
                        device_size
                    );

                    Rect::default()
                }
            };
        }

        Self {
            unlocked_video_size: compute_video_size(content_rect.size(), max_size),
            locked_video_orientation: orientation.resolve(rotation),
            device_rotation: rotation,
            content_rect,
        }
    }

    pub fn content_rect(&self) -> Rect {
        self.content_rect
    }

    /// Video size as if the orientation was unlocked.
    pub fn unlocked_video_size(&self) -> Size {
        self.unlocked_video_size
    }

    pub fn device_rotation(&self) -> u8 {
        self.device_rotation
    }

    pub fn locked_video_orientation(&self) -> Option<u8> {
        self.locked_video_orientation
    }

    /// Return a screen info for the new device rotation.
    pub fn with_device_rotation(&self, rotation: u8) -> Self {
        let rotation = rotation % 4;
        if rotation == self.device_rotation {
            return *self;
        }

        let mut info = *self;
        info.device_rotation = rotation;
        if (self.device_rotation + rotation) % 2 != 0 {
            info.content_rect = self.content_rect.flip();
            info.unlocked_video_size = self.unlocked_video_size.rotate();
        }

        info
    }

    /// Rotation to apply to the device content to get the video, in
    /// counter-clockwise quarter turns.
    pub fn video_rotation(&self) -> u8 {
        match self.locked_video_orientation {
            Some(locked) => (self.device_rotation + 4 - locked) % 4,
            None => 0,
        }
    }

    /// Rotation to apply to the video to get back to the device orientation.
    pub fn reverse_video_rotation(&self) -> u8 {
        match self.locked_video_orientation {
            Some(locked) => (locked + 4 - self.device_rotation) % 4,
            None => 0,
        }
    }

    /// Size of the video actually sent to the viewer.
    pub fn video_size(&self) -> Size {
        if self.video_rotation() % 2 == 0 {
            self.unlocked_video_size
        } else {
            self.unlocked_video_size.rotate()
        }
    }

    pub fn position_mapper(&self) -> PositionMapper {
        PositionMapper::new(
            self.video_size(),
            self.unlocked_video_size,
            self.content_rect,
            self.reverse_video_rotation(),
        )
    }
}

fn compute_video_size(size: Size, max_size: u32) -> Size {
    // both dimensions are truncated, only the scaled minor one is rounded
    let width = size.width & !7;
    let height = size.height & !7;
    let max_size = max_size & !7;

    let portrait = height > width;
    let (mut major, mut minor) = if portrait {
        (height, width)
    } else {
        (width, height)
    };

    if max_size > 0 && major > max_size {
        let exact = (minor as u64 * max_size as u64 / major as u64) as u32;
        minor = (exact + 4) & !7;
        major = max_size;
    }

    if portrait {
        Size::new(minor, major)
    } else {
        Size::new(major, minor)
    }
}

/// Maps positions in video frame space to device screen points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionMapper {
    video_size: Size,
    transform: AffineMatrix,
}

impl PositionMapper {
    /// `video_size` is the size of the frames sent to the viewer, the content
    /// is recovered by rotating video positions by `reverse_rotation` quarter
    /// turns (giving `unlocked_video_size` frames) and then scaling them onto
    /// `content_rect`.
    pub fn new(
        video_size: Size,
        unlocked_video_size: Size,
        content_rect: Rect,
        reverse_rotation: u8,
    ) -> Self {
        let w = video_size.width as f64;
        let h = video_size.height as f64;
        let rotation = match reverse_rotation % 4 {
            1 => AffineMatrix::translate(h, 0.0),
            2 => AffineMatrix::translate(w, h),
            3 => AffineMatrix::translate(0.0, w),
            _ => AffineMatrix::IDENTITY,
        }
        .multiply(&AffineMatrix::rotate_quarter_turns(reverse_rotation));

        let transform = AffineMatrix::multiply_all(&[
            AffineMatrix::translate(content_rect.left as f64, content_rect.top as f64),
            AffineMatrix::scale_size(unlocked_video_size, content_rect.size()),
            rotation,
        ]);

        Self {
            video_size,
            transform,
        }
    }

    pub fn video_size(&self) -> Size {
        self.video_size
    }

    pub fn transform(&self) -> &AffineMatrix {
        &self.transform
    }

    /// `None` if the position refers to a frame of another size, which
    /// happens for events generated before the last device rotation.
    pub fn map(&self, position: &Position) -> Option<Point> {
        if position.screen_size != self.video_size || !self.video_size.is_valid() {
            return None;
        }

        let (x, y) = self
            .transform
            .apply(position.point.x as f64, position.point.y as f64);

        Some(Point::new(floor(x), floor(y)))
    }
}

// Floor, absorbing the rounding error of the scale factors so that exact
// integer results are not truncated to the integer below.
fn floor(value: f64) -> i32 {
    let rounded = value.round();
    if (value - rounded).abs() < 1e-6 {
        rounded as i32
    } else {
        value.floor() as i32
    }
}
