//! Plain value types shared between the renderer and the driver backends.

use bytemuck::{Pod, Zeroable};

/// One entry of the immediate-mode scratch buffer, ready for the GPU.
///
/// The layout is fixed: position at offset 0, color at 12, texcoord at 16,
/// for a 24 byte stride.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [u8; 4],
    pub texcoord: [f32; 2],
}

impl Vertex {
    /// Byte stride of one vertex.
    #[expect(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub const STRIDE: i32 = std::mem::size_of::<Self>() as i32;
    /// Byte offset of [`color`](Self::color).
    pub const COLOR_OFFSET: i32 = 12;
    /// Byte offset of [`texcoord`](Self::texcoord).
    pub const TEXCOORD_OFFSET: i32 = 16;
}

/// An integer rectangle in window coordinates, bottom-left origin.
///
/// `right` and `top` are exclusive, so the width is `right - left`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// The empty rectangle at the origin.
    pub const NULL: Self = Self {
        left: 0,
        top: 0,
        right: 0,
        bottom: 0,
    };

    /// Build from left/top/right/bottom edges.
    #[must_use]
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Build from an origin and extent, the way `glViewport` takes them.
    #[must_use]
    pub const fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            left: x,
            bottom: y,
            right: x + width,
            top: y + height,
        }
    }

    #[must_use]
    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    #[must_use]
    pub const fn height(&self) -> i32 {
        self.top - self.bottom
    }

    /// Whether the rectangle covers no area.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.right <= self.left || self.top <= self.bottom
    }

    /// Clip to `other`. The result may be empty.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            left: self.left.max(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.min(other.right),
            top: self.top.min(other.top),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_packed() {
        assert_eq!(Vertex::STRIDE, 24);
        let v = Vertex {
            position: [1.0, 2.0, 3.0],
            color: [10, 20, 30, 40],
            texcoord: [0.5, 0.25],
        };
        let bytes: &[u8] = bytemuck::bytes_of(&v);
        let color_at = usize::try_from(Vertex::COLOR_OFFSET).unwrap_or_default();
        assert_eq!(&bytes[color_at..color_at + 4], &[10, 20, 30, 40]);
    }

    #[test]
    fn rect_intersection_and_emptiness() {
        let a = Rect::from_xywh(0, 0, 100, 50);
        let b = Rect::from_xywh(80, 40, 50, 50);
        let c = a.intersect(&b);
        assert_eq!(c, Rect::new(80, 50, 100, 40));
        assert_eq!(c.width(), 20);
        assert_eq!(c.height(), 10);
        assert!(!c.is_empty());

        let far = Rect::from_xywh(500, 500, 10, 10);
        assert!(a.intersect(&far).is_empty());
    }
}
