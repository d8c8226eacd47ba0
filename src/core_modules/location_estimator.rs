// THEORY:
// An 8x8 grid is too coarse for a trustworthy 2-D centroid, and for a doorway the
// only motion that matters is across it. The location estimator therefore collapses
// each blob to one horizontal feature: the column carrying the most heat inside the
// blob. The blob's peak temperature rides along as a second, thermal feature the
// tracker uses to tell two people apart.

use crate::config::CounterConfig;
use crate::core_modules::body_blob::Blob;
use crate::core_modules::thermal_frame::DifferenceFrame;

/// What the tracker sees of a body in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Detection {
    /// Column index of the hottest column of the body.
    pub location: f32,
    /// Peak temperature of the body in °C.
    pub temperature: f32,
}

impl Detection {
    pub fn new(location: f32, temperature: f32) -> Self {
        Self { location, temperature }
    }

    /// Shifts the temperature by a baseline, turning a peak difference into an
    /// absolute peak temperature.
    pub fn with_baseline(self, baseline: f32) -> Self {
        Self {
            temperature: self.temperature + baseline,
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationEstimator {
    grid_width: u32,
}

impl LocationEstimator {
    pub fn new(config: &CounterConfig) -> Self {
        Self {
            grid_width: config.grid_width,
        }
    }

    /// Column with the largest masked heat sum, lowest column on ties.
    /// The temperature is the blob's peak difference.
    pub fn locate(&self, diff: &DifferenceFrame, blob: &Blob) -> Detection {
        let sums = self.column_sums(diff, blob);
        let mut best_column = 0usize;
        for (column, sum) in sums.iter().enumerate() {
            if *sum > sums[best_column] {
                best_column = column;
            }
        }
        Detection::new(best_column as f32, blob.peak_diff)
    }

    /// Sum of `diff * mask` down each column.
    pub fn column_sums(&self, diff: &DifferenceFrame, blob: &Blob) -> Vec<f32> {
        let width = self.grid_width.min(diff.width()) as usize;
        let mut sums = vec![0.0_f32; width.max(1)];
        for point in &blob.pixels {
            if let Some(sum) = sums.get_mut(point.x as usize) {
                *sum += diff.value(point.x, point.y);
            }
        }
        sums
    }
}
