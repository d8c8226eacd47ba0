// THEORY:
// The `presence_filter` is the cheap gate in front of body extraction. Most frames
// of a doorway are empty, and an empty frame still differs from the background by
// sensor noise and slow drift. The filter answers one question, "could there be a
// person in this frame?", with two tests that must both pass:
//
// 1.  **Mean Gate**: The mean difference over the whole grid must reach
//     `min_temp_filter`. A person covers enough of an 8x8 array to lift the mean;
//     drift and noise do not.
// 2.  **Class Separation Gate**: The difference frame is stretched to 8 bits and
//     split in two with Otsu's method. A real body gives two well-separated heat
//     populations; noise gives one population that Otsu cuts arbitrarily. The
//     gap between the class means (in °C, on the raw values) must reach
//     `otsu_diff_threshold`. An empty class means there was nothing to separate.
//
// Frames the filter rejects are background-only and become eligible for the
// adaptive background blend.

use crate::config::CounterConfig;
use crate::core_modules::thermal_frame::DifferenceFrame;
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;

/// Why a frame was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresenceVerdict {
    Present { mean: f32, separation: f32 },
    /// The grid-wide mean difference stayed below the mean gate.
    BelowMeanGate { mean: f32 },
    /// The binarisation put every pixel in one class.
    DegenerateSplit,
    /// Two classes exist but their means are too close together.
    WeakSeparation { separation: f32 },
}

impl PresenceVerdict {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }
}

/// The two gates with their thresholds.
#[derive(Debug, Clone)]
pub struct PresenceFilter {
    min_temp_filter: f32,
    otsu_diff_threshold: f32,
}

impl PresenceFilter {
    pub fn new(config: &CounterConfig) -> Self {
        Self {
            min_temp_filter: config.min_temp_filter,
            otsu_diff_threshold: config.otsu_diff_threshold,
        }
    }

    pub fn has_presence(&self, diff: &DifferenceFrame) -> bool {
        self.assess(diff).is_present()
    }

    pub fn assess(&self, diff: &DifferenceFrame) -> PresenceVerdict {
        let mean = diff.mean();
        // negated so a NaN mean fails the gate
        if !(mean >= self.min_temp_filter) {
            return PresenceVerdict::BelowMeanGate { mean };
        }

        let Some(separation) = class_separation(diff) else {
            return PresenceVerdict::DegenerateSplit;
        };
        if !(separation >= self.otsu_diff_threshold) {
            return PresenceVerdict::WeakSeparation { separation };
        }
        PresenceVerdict::Present { mean, separation }
    }
}

/// Stretches the difference frame onto 0..=255 by its own min and max.
fn normalize_to_gray(diff: &DifferenceFrame) -> Option<GrayImage> {
    let (lo, hi) = diff.min_max()?;
    let span = hi - lo;
    if span <= f32::EPSILON {
        return None;
    }
    Some(GrayImage::from_fn(diff.width(), diff.height(), |x, y| {
        let scaled = (diff.value(x, y) - lo) / span * 255.0;
        Luma([scaled.round().clamp(0.0, 255.0) as u8])
    }))
}

/// |mean(hot) - mean(cold)| in °C after an Otsu split, or `None` when either
/// class is empty.
pub fn class_separation(diff: &DifferenceFrame) -> Option<f32> {
    let gray = normalize_to_gray(diff)?;
    let level = otsu_level(&gray);

    let (mut hot_sum, mut hot_count) = (0.0_f32, 0usize);
    let (mut cold_sum, mut cold_count) = (0.0_f32, 0usize);
    for (gray_pixel, value) in gray.pixels().zip(diff.values()) {
        if gray_pixel[0] > level {
            hot_sum += value;
            hot_count += 1;
        } else {
            cold_sum += value;
            cold_count += 1;
        }
    }
    if hot_count == 0 || cold_count == 0 {
        return None;
    }
    Some((hot_sum / hot_count as f32 - cold_sum / cold_count as f32).abs())
}
