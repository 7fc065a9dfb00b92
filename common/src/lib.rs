pub mod affine;
pub mod atomic;
pub mod codec;
pub mod logger;
pub mod screen;

mod geometry;

pub use self::{
    affine::AffineMatrix,
    geometry::{Point, Position, Rect, Size},
    screen::{Orientation, PositionMapper, ScreenInfo},
};
