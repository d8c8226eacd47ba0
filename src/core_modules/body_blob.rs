// THEORY:
// A `Blob` is one spatially connected patch of above-threshold heat in a single
// difference frame: a candidate body. Like the frame containers it is "dumb": it
// records which pixels belong to it and a few summary numbers, and has no memory
// of earlier frames. Blobs live for one cycle; the tracker never sees them, only
// the `Detection` the location estimator derives from each one.

use crate::core_modules::thermal_frame::DifferenceFrame;
use image::{GrayImage, Luma};

const MEMBER: Luma<u8> = Luma([255]);

/// A grid coordinate; `x` is the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// A connected region of a difference frame that may be a person.
#[derive(Debug, Clone)]
pub struct Blob {
    /// Membership grid, 255 for pixels of this blob and 0 elsewhere.
    pub mask: GrayImage,
    /// Member pixels in row-major order.
    pub pixels: Vec<Point>,
    /// Highest difference (°C) inside the blob.
    pub peak_diff: f32,
    /// Number of member pixels.
    pub area: usize,
}

impl Blob {
    /// Builds a blob from its member pixels. Returns `None` for an empty set.
    pub fn from_pixels(pixels: Vec<Point>, diff: &DifferenceFrame) -> Option<Self> {
        if pixels.is_empty() {
            return None;
        }
        let mut mask = GrayImage::new(diff.width(), diff.height());
        let mut peak_diff = f32::NEG_INFINITY;

        for point in &pixels {
            mask.put_pixel(point.x, point.y, MEMBER);
            peak_diff = peak_diff.max(diff.value(point.x, point.y));
        }

        Some(Self {
            mask,
            area: pixels.len(),
            pixels,
            peak_diff,
        })
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.mask.width() && y < self.mask.height() && self.mask.get_pixel(x, y)[0] != 0
    }

    /// Share of the grid this blob covers, in [0, 1].
    pub fn coverage(&self) -> f32 {
        let total = (self.mask.width() * self.mask.height()).max(1);
        self.area as f32 / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pixels_summarises_region() {
        let mut values = vec![0.0; 16];
        values[5] = 2.0; // (1, 1)
        values[6] = 3.5; // (2, 1)
        let diff = DifferenceFrame::from_values(4, 4, values).unwrap();
        let blob = Blob::from_pixels(vec![Point { x: 1, y: 1 }, Point { x: 2, y: 1 }], &diff).unwrap();

        assert_eq!(blob.area, 2);
        assert_eq!(blob.peak_diff, 3.5);
        assert!(blob.contains(2, 1));
        assert!(!blob.contains(0, 0));
        assert!(!blob.contains(9, 9));
        assert_eq!(blob.coverage(), 2.0 / 16.0);
    }

    #[test]
    fn empty_region_is_skipped() {
        let diff = DifferenceFrame::from_values(2, 2, vec![0.0; 4]).unwrap();
        assert!(Blob::from_pixels(Vec::new(), &diff).is_none());
    }
}
