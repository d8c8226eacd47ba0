// THEORY:
// Every tunable constant of the counter lives in one value, `CounterConfig`, which
// is handed to each component when it is constructed. Components copy the fields
// they need; nothing reads a global. The defaults describe an 8x8 Grid-EYE style
// array sampled at 10 Hz above a doorway, with people entering from the low-column
// side of the grid.

use crate::error::{CounterError, Result};
use std::time::Duration;

/// Largest accepted grid side, in pixels.
pub const MAX_GRID_SIDE: u32 = 1024;
/// Longest accepted track history, in frames.
pub const MAX_TEMPORAL_WINDOW: usize = 10_000;

/// How the calibration frames are reduced to a single background grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BackgroundMethod {
    /// Pixel-wise arithmetic mean.
    #[default]
    Mean,
    /// Pixel-wise median, robust to a person briefly crossing during calibration.
    Median,
}

/// Configuration for the whole counter, allowing for tunable behavior.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct CounterConfig {
    /// Number of sensor columns. Tracking runs along this axis.
    pub grid_width: u32,
    /// Number of sensor rows.
    pub grid_height: u32,
    /// Nominal time between two frames.
    pub frame_period: Duration,

    /// Frames averaged to build the initial background.
    pub background_frames: usize,
    pub background_method: BackgroundMethod,
    /// Weight of a background-only frame in the exponential blend, in (0, 1].
    pub adaptive_rate: f32,

    /// Minimum mean difference (°C) for a frame to possibly hold a person. Also the
    /// base segmentation threshold.
    pub min_temp_filter: f32,
    /// Minimum separation (°C) between the Otsu classes.
    pub otsu_diff_threshold: f32,

    /// Components smaller than this many pixels are dropped.
    pub min_pixel_area: usize,
    /// Fraction of the grid at or above which a component is suspected to hold two bodies.
    pub large_blob_fraction: f32,
    /// Fraction of the grid each half of a successful split must reach.
    pub small_body_fraction: f32,
    /// Offsets (°C above `min_temp_filter`) tried, in order, when splitting a large blob.
    pub split_ladder: Vec<f32>,

    /// A detection must land strictly closer than this (columns) to match a track.
    pub spatial_threshold: f32,
    /// A detection must be strictly closer than this (°C) to match a track.
    pub temp_threshold: f32,
    /// Capacity of a track's location history, in frames. Also scales the stale timeout.
    pub temporal_window: usize,
    /// Columns strictly below this are the outside zone.
    pub entry_zone_low: f32,
    /// Columns strictly above this are the inside zone.
    pub entry_zone_high: f32,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            grid_width: 8,
            grid_height: 8,
            frame_period: Duration::from_millis(100),
            background_frames: 250,
            background_method: BackgroundMethod::Mean,
            adaptive_rate: 0.001,
            min_temp_filter: 0.25,
            otsu_diff_threshold: 0.75,
            min_pixel_area: 1,
            large_blob_fraction: 0.3,
            small_body_fraction: 0.1,
            split_ladder: vec![0.5, 0.75, 1.0],
            spatial_threshold: 2.5,
            temp_threshold: 1.0,
            temporal_window: 5,
            entry_zone_low: 2.0,
            entry_zone_high: 5.0,
        }
    }
}

impl CounterConfig {
    pub fn total_pixels(&self) -> usize {
        self.grid_width as usize * self.grid_height as usize
    }

    pub fn grid_shape(&self) -> (u32, u32) {
        (self.grid_width, self.grid_height)
    }

    /// Area (pixels) at or above which a component is a split candidate.
    pub fn large_blob_area(&self) -> f32 {
        self.large_blob_fraction * self.total_pixels() as f32
    }

    /// Area (pixels) each half of a split must reach.
    pub fn small_body_area(&self) -> f32 {
        self.small_body_fraction * self.total_pixels() as f32
    }

    /// How long a track may go unmatched before it is dropped.
    pub fn stale_timeout(&self) -> Duration {
        u32::try_from(self.temporal_window)
            .ok()
            .and_then(|window| self.frame_period.checked_mul(window))
            .unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(CounterError::invalid_config("grid dimensions must be non-zero"));
        }
        if self.grid_width > MAX_GRID_SIDE || self.grid_height > MAX_GRID_SIDE {
            return Err(CounterError::invalid_config(format!(
                "grid dimensions {}x{} exceed {} per side",
                self.grid_width, self.grid_height, MAX_GRID_SIDE
            )));
        }
        if !(self.adaptive_rate > 0.0 && self.adaptive_rate <= 1.0) {
            return Err(CounterError::invalid_config(format!(
                "adaptive_rate must be in (0, 1], got {}",
                self.adaptive_rate
            )));
        }
        if self.background_frames == 0 {
            return Err(CounterError::invalid_config("background_frames must be at least 1"));
        }
        if self.temporal_window == 0 {
            return Err(CounterError::invalid_config("temporal_window must be at least 1"));
        }
        if self.temporal_window > MAX_TEMPORAL_WINDOW {
            return Err(CounterError::invalid_config(format!(
                "temporal_window must be at most {}, got {}",
                MAX_TEMPORAL_WINDOW, self.temporal_window
            )));
        }
        if self.frame_period.is_zero() || self.frame_period > Duration::from_secs(60) {
            return Err(CounterError::invalid_config(format!(
                "frame_period must be in (0, 60s], got {:?}",
                self.frame_period
            )));
        }
        if self.spatial_threshold <= 0.0 || self.temp_threshold <= 0.0 {
            return Err(CounterError::invalid_config("matching thresholds must be positive"));
        }
        if self.entry_zone_low > self.entry_zone_high {
            return Err(CounterError::invalid_config(format!(
                "entry_zone_low ({}) is above entry_zone_high ({})",
                self.entry_zone_low, self.entry_zone_high
            )));
        }
        if self.split_ladder.iter().any(|step| *step <= 0.0) {
            return Err(CounterError::invalid_config("split_ladder steps must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CounterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.total_pixels(), 64);
        assert_eq!(config.stale_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn derived_areas_follow_grid_size() {
        let config = CounterConfig::default();
        assert!((config.large_blob_area() - 19.2).abs() < 1e-4);
        assert!((config.small_body_area() - 6.4).abs() < 1e-4);
    }

    #[test]
    fn rejects_out_of_range_rate() {
        let config = CounterConfig {
            adaptive_rate: 0.0,
            ..CounterConfig::default()
        };
        assert!(matches!(config.validate(), Err(CounterError::InvalidConfig(_))));

        let config = CounterConfig {
            adaptive_rate: 1.5,
            ..CounterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_entry_zones() {
        let config = CounterConfig {
            entry_zone_low: 6.0,
            entry_zone_high: 1.0,
            ..CounterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_grid() {
        let config = CounterConfig {
            grid_width: 100_000,
            grid_height: 100_000,
            ..CounterConfig::default()
        };
        assert!(matches!(config.validate(), Err(CounterError::InvalidConfig(_))));
    }

    #[test]
    fn huge_window_is_rejected_without_overflow() {
        let config = CounterConfig {
            temporal_window: usize::MAX,
            ..CounterConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.stale_timeout(), Duration::MAX);

        let config = CounterConfig {
            temporal_window: MAX_TEMPORAL_WINDOW,
            ..CounterConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.stale_timeout(), Duration::from_secs(1000));
    }
}
