use crate::{Point, Size};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AffineError {
    #[error("cannot reframe to an empty area: {0}x{1}")]
    EmptyArea(f64, f64),
}

/// Affine transform of the 2D plane.
///
/// ```text
/// [ a b c ]
/// [ d e f ]
/// [ 0 0 1 ]
/// ```
///
/// Transforms are usually expressed in normalized coordinates (`0..1` on both
/// axes), see [`AffineMatrix::reframe`] and [`AffineMatrix::from_center`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for AffineMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl AffineMatrix {
    pub const IDENTITY: Self = Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0);

    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(x: f64, y: f64) -> Self {
        Self::new(1.0, 0.0, x, 0.0, 1.0, y)
    }

    pub fn scale(x: f64, y: f64) -> Self {
        Self::new(x, 0.0, 0.0, 0.0, y, 0.0)
    }

    /// Scale mapping a frame of size `from` onto a frame of size `to`.
    pub fn scale_size(from: Size, to: Size) -> Self {
        Self::scale(
            to.width as f64 / from.width as f64,
            to.height as f64 / from.height as f64,
        )
    }

    /// Map the area `(x, y, w, h)` onto the unit square.
    pub fn reframe(x: f64, y: f64, w: f64, h: f64) -> Result<Self, AffineError> {
        if w == 0.0 || h == 0.0 {
            return Err(AffineError::EmptyArea(w, h));
        }

        Ok(Self::scale(1.0 / w, 1.0 / h).multiply(&Self::translate(-x, -y)))
    }

    /// Counter-clockwise rotation around the origin.
    pub fn rotate(ccw_degrees: f64) -> Self {
        let (sin, cos) = ccw_degrees.to_radians().sin_cos();
        Self::new(cos, -sin, 0.0, sin, cos, 0.0)
    }

    /// Counter-clockwise rotation by quarter turns, exact (no trigonometry
    /// rounding errors).
    pub fn rotate_quarter_turns(turns: u8) -> Self {
        match turns % 4 {
            1 => Self::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0),
            2 => Self::new(-1.0, 0.0, 0.0, 0.0, -1.0, 0.0),
            3 => Self::new(0.0, 1.0, 0.0, -1.0, 0.0, 0.0),
            _ => Self::IDENTITY,
        }
    }

    /// Horizontal flip in normalized coordinates.
    pub fn hflip() -> Self {
        Self::new(-1.0, 0.0, 1.0, 0.0, 1.0, 0.0)
    }

    /// Vertical flip in normalized coordinates.
    pub fn vflip() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, -1.0, 1.0)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// `self * rhs`: the resulting transform applies `rhs` first.
    pub fn multiply(&self, rhs: &Self) -> Self {
        Self::new(
            self.a * rhs.a + self.b * rhs.d,
            self.a * rhs.b + self.b * rhs.e,
            self.a * rhs.c + self.b * rhs.f + self.c,
            self.d * rhs.a + self.e * rhs.d,
            self.d * rhs.b + self.e * rhs.e,
            self.d * rhs.c + self.e * rhs.f + self.f,
        )
    }

    /// Product of all matrices, in order (the last one is applied first).
    pub fn multiply_all<'a, I>(matrices: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
    {
        matrices
            .into_iter()
            .fold(Self::IDENTITY, |acc, it| acc.multiply(it))
    }

    /// Inverse transform, `None` if the matrix is singular.
    pub fn invert(&self) -> Option<Self> {
        // M = T * L where T is the translation (c, f) and L the linear part,
        // so M⁻¹ = L⁻¹ * T⁻¹.
        let det = self.determinant();
        if det == 0.0 {
            return None;
        }

        let a = self.e / det;
        let b = -self.b / det;
        let d = -self.d / det;
        let e = self.a / det;
        Some(Self::new(
            a,
            b,
            -(a * self.c + b * self.f),
            d,
            e,
            -(d * self.c + e * self.f),
        ))
    }

    /// Conjugate the transform so it applies to a frame of the given aspect
    /// ratio instead of a square one.
    pub fn with_aspect_ratio(&self, size: Size) -> Self {
        let ar = size.width as f64 / size.height as f64;
        Self::scale(1.0 / ar, 1.0)
            .multiply(self)
            .multiply(&Self::scale(ar, 1.0))
    }

    /// Conjugate the transform so it applies around the center of the unit
    /// square instead of the origin.
    pub fn from_center(&self) -> Self {
        Self::translate(0.5, 0.5)
            .multiply(self)
            .multiply(&Self::translate(-0.5, -0.5))
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.b * y + self.c,
            self.d * x + self.e * y + self.f,
        )
    }

    /// Apply to an integer point, the result is floored.
    pub fn apply_point(&self, point: Point) -> Point {
        let (x, y) = self.apply(point.x as f64, point.y as f64);
        Point::new(x.floor() as i32, y.floor() as i32)
    }

    /// Export as a 4x4 column-major matrix (the layout expected by GPU
    /// shaders), acting on the xy plane.
    pub fn to_4x4(&self) -> [f32; 16] {
        [
            // column 0
            self.a as f32,
            self.d as f32,
            0.0,
            0.0,
            // column 1
            self.b as f32,
            self.e as f32,
            0.0,
            0.0,
            // column 2
            0.0,
            0.0,
            1.0,
            0.0,
            // column 3
            self.c as f32,
            self.f as f32,
            0.0,
            1.0,
        ]
    }
}
