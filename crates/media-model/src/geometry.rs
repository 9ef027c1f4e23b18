//! Display geometry: sizes, rectangles and 2D affine transforms.
//!
//! Transforms follow the row-vector convention used by ISO base media track
//! headers:
//!
//! ```text
//! x' = a*x + c*y + tx
//! y' = b*x + d*y + ty
//! ```
//!
//! A track's *natural* size is its encoded pixel grid. Its *displayed* size is
//! the bounding box of the natural rectangle after the track transform; a
//! 90° rotation swaps the axes, a mirror leaves them alone, an arbitrary angle
//! grows the box.

use serde::{Deserialize, Serialize};

/// Width/height pair in pixels (fractional while computing layouts).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    /// Sentinel for "no visual content".
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn from_pixels(width: u32, height: u32) -> Self {
        Self::new(width as f64, height as f64)
    }

    /// True when either side is empty.
    pub fn is_zero(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Width divided by height (0 for empty sizes).
    pub fn aspect_ratio(&self) -> f64 {
        if self.is_zero() {
            0.0
        } else {
            self.width / self.height
        }
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Round to whole pixels.
    pub fn to_pixels(&self) -> (u32, u32) {
        (
            self.width.max(0.0).round() as u32,
            self.height.max(0.0).round() as u32,
        )
    }
}

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle at the origin with the given size.
    pub fn from_size(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// True when the two rectangles share interior area.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// True when `other` lies entirely inside `self` (with a small tolerance).
    pub fn contains_rect(&self, other: &Rect) -> bool {
        const EPS: f64 = 1e-6;
        other.x >= self.x - EPS
            && other.y >= self.y - EPS
            && other.right() <= self.right() + EPS
            && other.bottom() <= self.bottom() + EPS
    }

    /// Snap edges to whole pixels, returning `(x, y, width, height)`.
    pub fn to_pixels(&self) -> (u32, u32, u32, u32) {
        let x0 = self.x.max(0.0).round();
        let y0 = self.y.max(0.0).round();
        let x1 = self.right().max(0.0).round();
        let y1 = self.bottom().max(0.0).round();
        (
            x0 as u32,
            y0 as u32,
            (x1 - x0).max(0.0) as u32,
            (y1 - y0).max(0.0) as u32,
        )
    }
}

/// 2D affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn new(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    /// Rotation by `degrees` (clockwise on a y-down raster).
    ///
    /// Multiples of 90° produce exact 0/±1 coefficients.
    pub fn rotation(degrees: f64) -> Self {
        let normalized = degrees.rem_euclid(360.0);
        let (sin, cos) = if normalized.fract() == 0.0 && normalized as u32 % 90 == 0 {
            match normalized as u32 {
                0 => (0.0, 1.0),
                90 => (1.0, 0.0),
                180 => (0.0, -1.0),
                _ => (-1.0, 0.0),
            }
        } else {
            normalized.to_radians().sin_cos()
        };
        Self::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// Left/right mirror.
    pub fn mirror_horizontal() -> Self {
        Self::scale(-1.0, 1.0)
    }

    /// Top/bottom mirror.
    pub fn mirror_vertical() -> Self {
        Self::scale(1.0, -1.0)
    }

    /// `self` followed by `then`.
    pub fn concat(&self, then: &AffineTransform) -> Self {
        Self {
            a: self.a * then.a + self.b * then.c,
            b: self.a * then.b + self.b * then.d,
            c: self.c * then.a + self.d * then.c,
            d: self.c * then.b + self.d * then.d,
            tx: self.tx * then.a + self.ty * then.c + then.tx,
            ty: self.tx * then.b + self.ty * then.d + then.ty,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    /// Bounding box of `rect` after the transform.
    pub fn apply_to_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.apply(rect.x, rect.y),
            self.apply(rect.right(), rect.y),
            self.apply(rect.x, rect.bottom()),
            self.apply(rect.right(), rect.bottom()),
        ];
        let min_x = corners.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        let min_y = corners.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max_y = corners.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn invert(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() < 1e-12 {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Self {
            a,
            b,
            c,
            d,
            tx: -(self.tx * a + self.ty * c),
            ty: -(self.tx * b + self.ty * d),
        })
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// True when the transform maps axes onto axes (quarter turns, mirrors,
    /// scales), ignoring translation.
    pub fn is_axis_aligned(&self) -> bool {
        (self.b == 0.0 && self.c == 0.0) || (self.a == 0.0 && self.d == 0.0)
    }
}

/// Displayed size of a track: the natural rectangle's bounding box under
/// `transform`. Translation never changes the result.
pub fn displayed_size(natural: Size, transform: &AffineTransform) -> Size {
    if natural.is_zero() {
        return Size::ZERO;
    }
    transform.apply_to_rect(&Rect::from_size(natural)).size()
}

/// Largest rectangle with `content`'s aspect ratio that fits in `cell`,
/// centered. Empty content yields an empty rectangle at the cell center.
pub fn fit_rect(content: Size, cell: &Rect) -> Rect {
    if content.is_zero() || cell.width <= 0.0 || cell.height <= 0.0 {
        return Rect::new(cell.x + cell.width / 2.0, cell.y + cell.height / 2.0, 0.0, 0.0);
    }
    let scale = (cell.width / content.width).min(cell.height / content.height);
    let width = content.width * scale;
    let height = content.height * scale;
    Rect::new(
        cell.x + (cell.width - width) / 2.0,
        cell.y + (cell.height - height) / 2.0,
        width,
        height,
    )
}
