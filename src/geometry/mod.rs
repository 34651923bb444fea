//! Geometric primitives in PDF user space.

use serde::{Deserialize, Serialize};

use crate::object::Object;

/// A rectangle in PDF user space (origin at the lower-left corner of the page).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// X coordinate of the lower-left corner
    pub x: f32,
    /// Y coordinate of the lower-left corner
    pub y: f32,
    /// Width of rectangle
    pub width: f32,
    /// Height of rectangle
    pub height: f32,
}

impl Rect {
    /// Create a new rectangle from position and dimensions.
    ///
    /// ```
    /// use pdf_seal::geometry::Rect;
    ///
    /// let rect = Rect::new(36.0, 648.0, 200.0, 100.0);
    /// assert_eq!(rect.right(), 236.0);
    /// ```
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from two corner points, in any order.
    pub fn from_points(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }

    /// Right edge.
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Top edge.
    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    /// A zero-area rectangle marks an invisible signature widget.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// `[llx lly urx ury]` as a PDF array.
    pub fn to_pdf_array(&self) -> Object {
        Object::Array(vec![
            Object::Real(self.x as f64),
            Object::Real(self.y as f64),
            Object::Real(self.right() as f64),
            Object::Real(self.top() as f64),
        ])
    }

    /// Read a `/Rect` or `/MediaBox` style array.
    pub fn from_pdf_array(obj: &Object) -> Option<Self> {
        let arr = obj.as_array()?;
        if arr.len() != 4 {
            return None;
        }
        let mut values = [0f32; 4];
        for (slot, item) in values.iter_mut().zip(arr) {
            *slot = item.as_number()? as f32;
        }
        Some(Self::from_points(values[0], values[1], values[2], values[3]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points_normalizes() {
        let rect = Rect::from_points(110.0, 70.0, 10.0, 20.0);
        assert_eq!(rect, Rect::new(10.0, 20.0, 100.0, 50.0));
    }

    #[test]
    fn test_pdf_array_roundtrip() {
        let rect = Rect::new(36.0, 648.0, 200.0, 100.0);
        assert_eq!(Rect::from_pdf_array(&rect.to_pdf_array()), Some(rect));
    }

    #[test]
    fn test_integer_array() {
        let obj = Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(612),
            Object::Integer(792),
        ]);
        let rect = Rect::from_pdf_array(&obj).unwrap();
        assert_eq!(rect.width, 612.0);
        assert!(!rect.is_empty());
        assert!(Rect::default().is_empty());
    }
}
