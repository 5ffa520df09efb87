//! Math utilities
//!
//! Re-exports from glam plus the integer rectangle and UV helpers used by
//! page tables and tile atlases.

pub use glam::{IVec2, Mat4, UVec2, Vec2, Vec3, Vec4};

/// Wrap `value` into `[0, extent)`.
///
/// Works for negative values, which is what toroidal addressing needs when a
/// view scrolls backwards.
#[inline]
pub fn wrap(value: i32, extent: i32) -> i32 {
    debug_assert!(extent > 0);
    value.rem_euclid(extent)
}

/// Wrap both components of `value` into `[0, extent)`.
#[inline]
pub fn wrap_ivec2(value: IVec2, extent: i32) -> IVec2 {
    IVec2::new(wrap(value.x, extent), wrap(value.y, extent))
}

/// Integer axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IRect {
    /// Minimum x
    pub x: i32,
    /// Minimum y
    pub y: i32,
    /// Width
    pub width: i32,
    /// Height
    pub height: i32,
}

impl IRect {
    /// Create a rectangle from its minimum corner and size
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Create a square rectangle
    pub const fn square(x: i32, y: i32, size: i32) -> Self {
        Self::new(x, y, size, size)
    }

    /// Minimum corner
    pub fn min(&self) -> IVec2 {
        IVec2::new(self.x, self.y)
    }

    /// Exclusive maximum corner
    pub fn max(&self) -> IVec2 {
        IVec2::new(self.x + self.width, self.y + self.height)
    }

    /// Size of the rectangle
    pub fn size(&self) -> IVec2 {
        IVec2::new(self.width, self.height)
    }

    /// Number of integer cells covered
    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// Check if a point lies inside (max edge exclusive)
    pub fn contains(&self, point: IVec2) -> bool {
        point.x >= self.x
            && point.y >= self.y
            && point.x < self.x + self.width
            && point.y < self.y + self.height
    }

    /// Check if `other` lies completely inside this rectangle
    pub fn contains_rect(&self, other: &IRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }

    /// Move the rectangle by `delta`
    pub fn translate(&self, delta: IVec2) -> IRect {
        IRect::new(self.x + delta.x, self.y + delta.y, self.width, self.height)
    }

    /// Wrap the minimum corner into `[0, extent)`, keeping the size.
    pub fn wrapped(&self, extent: i32) -> IRect {
        let min = wrap_ivec2(self.min(), extent);
        IRect::new(min.x, min.y, self.width, self.height)
    }

    /// Transform mapping the unit quad `[0, 1]²` onto this rectangle
    /// normalized by `extent`.
    pub fn unit_quad_transform(&self, extent: i32) -> Mat4 {
        let inv = 1.0 / extent as f32;
        Mat4::from_scale_rotation_translation(
            Vec3::new(self.width as f32 * inv, self.height as f32 * inv, 1.0),
            glam::Quat::IDENTITY,
            Vec3::new(self.x as f32 * inv, self.y as f32 * inv, 0.0),
        )
    }
}

/// Scale and offset applied to a normalized UV
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UvTransform {
    /// Scale applied first
    pub scale: Vec2,
    /// Offset applied after scaling
    pub offset: Vec2,
}

impl UvTransform {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        scale: Vec2::ONE,
        offset: Vec2::ZERO,
    };

    /// Transform mapping `[0, 1]²` onto `rect` inside a texture of `extent` texels
    pub fn from_rect(rect: &IRect, extent: UVec2) -> Self {
        let extent = extent.as_vec2();
        Self {
            scale: rect.size().as_vec2() / extent,
            offset: rect.min().as_vec2() / extent,
        }
    }

    /// Apply the transform
    pub fn apply(&self, uv: Vec2) -> Vec2 {
        uv * self.scale + self.offset
    }

    /// Pack as `(scale.x, scale.y, offset.x, offset.y)` for shader upload
    pub fn to_vec4(&self) -> Vec4 {
        Vec4::new(self.scale.x, self.scale.y, self.offset.x, self.offset.y)
    }
}
