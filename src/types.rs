use serde::{Deserialize, Serialize};

/// A face candidate reported by the cascade scan.
///
/// `row` and `col` are the window center in source pixel coordinates and
/// `scale` is the window side length. Cluster representatives use the same
/// shape, with `confidence` summed over the merged members.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub row: u32,
    pub col: u32,
    pub scale: u32,
    pub confidence: f32,
}

impl Detection {
    pub const fn new(row: u32, col: u32, scale: u32, confidence: f32) -> Self {
        Self {
            row,
            col,
            scale,
            confidence,
        }
    }

    /// The square window this detection was scored on.
    pub fn bbox(&self) -> BoundingBox {
        let half = self.scale as f32 / 2.0;
        BoundingBox::new(
            self.col as f32 - half,
            self.row as f32 - half,
            self.scale as f32,
            self.scale as f32,
        )
    }
}

/// A bounding box defined by top-left corner, width, and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Area shared with `other`; zero when the boxes only touch or are apart.
    pub fn intersection(&self, other: &BoundingBox) -> f32 {
        let overlap_x =
            ((self.x + self.width).min(other.x + other.width) - self.x.max(other.x)).max(0.0);
        let overlap_y =
            ((self.y + self.height).min(other.y + other.height) - self.y.max(other.y)).max(0.0);
        overlap_x * overlap_y
    }

    /// Intersection over union in `[0, 1]`.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}
