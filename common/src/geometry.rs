use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Dimensions of a frame or a screen, in pixels.
///
/// Hardware encoders generally require both dimensions to be multiples of 8,
/// see [`Size::round8`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }

    /// The greatest dimension.
    pub fn max(&self) -> u32 {
        self.width.max(self.height)
    }

    /// The smallest dimension.
    pub fn min(&self) -> u32 {
        self.width.min(self.height)
    }

    pub fn rotate(&self) -> Self {
        Self::new(self.height, self.width)
    }

    pub fn is_multiple_of_8(&self) -> bool {
        self.width % 8 == 0 && self.height % 8 == 0
    }

    /// Scale down so that the major dimension does not exceed `max_size`,
    /// preserving the aspect ratio. A `max_size` of 0 means unlimited.
    pub fn limit(&self, max_size: u32) -> Self {
        if max_size == 0 {
            return *self;
        }

        let portrait = self.is_portrait();
        let (major, minor) = self.major_minor();
        if major <= max_size {
            return *self;
        }

        let minor = ((minor as u64 * max_size as u64) / major as u64) as u32;
        Self::from_major_minor(portrait, max_size, minor.max(1))
    }

    /// Round both dimensions to multiples of 8.
    ///
    /// The major dimension is rounded down so the result never exceeds the
    /// original size, the minor one is rounded to the nearest multiple to keep
    /// the aspect ratio as close as possible. Dimensions below 8 become 8.
    pub fn round8(&self) -> Self {
        if self.is_multiple_of_8() && self.is_valid() {
            return *self;
        }

        let portrait = self.is_portrait();
        let (major, minor) = self.major_minor();
        let major = (major & !7).max(8);
        let minor = (minor.saturating_add(4) & !7).clamp(8, major);
        Self::from_major_minor(portrait, major, minor)
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    fn major_minor(&self) -> (u32, u32) {
        if self.is_portrait() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    fn from_major_minor(portrait: bool, major: u32, minor: u32) -> Self {
        if portrait {
            Self::new(minor, major)
        } else {
            Self::new(major, minor)
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A point expressed relative to a frame of `screen_size`.
///
/// Pointer events coming from the viewer carry the size of the video frame
/// they were generated against, so that the device can detect events that
/// refer to a stale geometry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Position {
    pub point: Point,
    pub screen_size: Size,
}

impl Position {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            point: Point::new(x, y),
            screen_size: Size::new(width, height),
        }
    }

    /// Rotate by `rotation` counter-clockwise quarter turns.
    pub fn rotate(&self, rotation: u8) -> Self {
        let Point { x, y } = self.point;
        let w = self.screen_size.width as i32;
        let h = self.screen_size.height as i32;

        match rotation % 4 {
            1 => Self {
                point: Point::new(h - y, x),
                screen_size: self.screen_size.rotate(),
            },
            2 => Self {
                point: Point::new(w - x, h - y),
                screen_size: self.screen_size,
            },
            3 => Self {
                point: Point::new(y, w - x),
                screen_size: self.screen_size.rotate(),
            },
            _ => *self,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn size(&self) -> Size {
        Size::new(self.width().max(0) as u32, self.height().max(0) as u32)
    }

    /// Swap the horizontal and vertical axes.
    pub fn flip(&self) -> Self {
        Self::new(self.top, self.left, self.bottom, self.right)
    }

    /// Intersection of both rectangles, `None` if they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let rect = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );

        if rect.is_empty() {
            None
        } else {
            Some(rect)
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.width(),
            self.height(),
            self.left,
            self.top
        )
    }
}
