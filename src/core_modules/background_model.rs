// THEORY:
// The `background_model` module owns the reference picture of the empty doorway.
// Everything the counter knows about people comes from how far a frame rises
// above this reference, so the reference has to be both accurate and slow to move.
//
// Key architectural principles:
// 1.  **Batch Calibration**: The reference is first built from a fixed number of
//     frames of the empty scene, reduced pixel by pixel with a mean (default) or a
//     median. Too few frames is an error the caller can recover from by collecting
//     more; the model never guesses from a partial batch.
// 2.  **Slow Adaptation**: After calibration the reference follows ambient drift
//     with an exponential blend, `new = (1 - rate) * old + rate * frame`. Only frames
//     the presence filter rejected are blended, so a person standing in the doorway
//     never gets absorbed into the background.
// 3.  **Value Semantics**: `BackgroundMatrix` is a value. Blending returns a new
//     matrix; `BackgroundModel` is the single owner that swaps it in.

use crate::config::{BackgroundMethod, CounterConfig};
use crate::core_modules::thermal_frame::{
    ensure_same_shape, grid_from_values, uniform_grid, DifferenceFrame, Frame, ThermalGrid,
};
use crate::error::{CounterError, Result};
use image::{ImageBuffer, Luma};

/// The reference temperature of every pixel of the empty scene.
#[derive(Debug, Clone)]
pub struct BackgroundMatrix {
    grid: ThermalGrid,
    /// Per-pixel spread of the calibration frames. Zero when unknown.
    std_dev: ThermalGrid,
}

impl BackgroundMatrix {
    pub fn from_grid(grid: ThermalGrid) -> Self {
        let (width, height) = grid.dimensions();
        Self {
            grid,
            std_dev: uniform_grid(width, height, 0.0),
        }
    }

    pub fn from_values(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        Ok(Self::from_grid(grid_from_values(width, height, values)?))
    }

    /// Attaches a per-pixel standard deviation, e.g. one restored from storage.
    pub fn with_std_dev(mut self, std_dev: ThermalGrid) -> Result<Self> {
        ensure_same_shape(self.shape(), std_dev.dimensions())?;
        self.std_dev = std_dev;
        Ok(self)
    }

    /// Reduces the first `required` frames to a background, pixel by pixel.
    pub fn initialize(frames: &[Frame], required: usize, method: BackgroundMethod) -> Result<Self> {
        let required = required.max(1);
        if frames.len() < required {
            return Err(CounterError::InsufficientData {
                required,
                supplied: frames.len(),
            });
        }
        let batch = &frames[..required];
        let shape = batch[0].shape();
        for frame in batch {
            ensure_same_shape(shape, frame.shape())?;
        }

        let (width, height) = shape;
        let pixel_count = (width * height) as usize;
        let mut center = Vec::with_capacity(pixel_count);
        let mut spread = Vec::with_capacity(pixel_count);
        let mut samples: Vec<f32> = Vec::with_capacity(required);

        for index in 0..pixel_count {
            samples.clear();
            samples.extend(batch.iter().map(|frame| frame.values()[index]));

            let mean = samples.iter().sum::<f32>() / required as f32;
            let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / required as f32;
            spread.push(variance.sqrt());
            center.push(match method {
                BackgroundMethod::Mean => mean,
                BackgroundMethod::Median => median(&mut samples),
            });
        }

        let background = Self::from_values(width, height, center)?
            .with_std_dev(grid_from_values(width, height, spread)?)?;
        log::info!(
            "Background calibrated from {} frames ({:?}), mean {:.2}°C",
            required,
            method,
            background.mean()
        );
        Ok(background)
    }

    /// Exponential blend toward `frame`. Non-finite readings leave their pixel
    /// unchanged. The spread is carried over unchanged.
    pub fn blend(&self, frame: &Frame, rate: f32) -> Result<Self> {
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(CounterError::invalid_config(format!(
                "blend rate must be in (0, 1], got {rate}"
            )));
        }
        ensure_same_shape(self.shape(), frame.shape())?;
        let grid = ImageBuffer::from_fn(self.grid.width(), self.grid.height(), |x, y| {
            let old = self.grid.get_pixel(x, y)[0];
            let reading = frame.value(x, y);
            if reading.is_finite() {
                Luma([(1.0 - rate) * old + rate * reading])
            } else {
                Luma([old])
            }
        });
        Ok(Self {
            grid,
            std_dev: self.std_dev.clone(),
        })
    }

    /// `frame - background`, pixel by pixel.
    pub fn difference(&self, frame: &Frame) -> Result<DifferenceFrame> {
        ensure_same_shape(self.shape(), frame.shape())?;
        let grid = ImageBuffer::from_fn(self.grid.width(), self.grid.height(), |x, y| {
            Luma([frame.value(x, y) - self.grid.get_pixel(x, y)[0]])
        });
        Ok(DifferenceFrame::new(grid))
    }

    pub fn grid(&self) -> &ThermalGrid {
        &self.grid
    }

    pub fn std_dev(&self) -> &ThermalGrid {
        &self.std_dev
    }

    pub fn values(&self) -> &[f32] {
        self.grid.as_raw()
    }

    pub fn shape(&self) -> (u32, u32) {
        self.grid.dimensions()
    }

    /// Mean reference temperature over the grid.
    pub fn mean(&self) -> f32 {
        let values = self.values();
        values.iter().sum::<f32>() / values.len().max(1) as f32
    }
}

fn median(samples: &mut [f32]) -> f32 {
    samples.sort_by(|a, b| a.total_cmp(b));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        (samples[mid - 1] + samples[mid]) / 2.0
    } else {
        samples[mid]
    }
}

/// Single owner of the live background.
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    background: BackgroundMatrix,
    rate: f32,
}

impl BackgroundModel {
    pub fn new(background: BackgroundMatrix, config: &CounterConfig) -> Result<Self> {
        ensure_same_shape(config.grid_shape(), background.shape())?;
        Ok(Self {
            background,
            rate: config.adaptive_rate,
        })
    }

    /// Batch-initializes from calibration frames of the empty scene.
    pub fn calibrate(frames: &[Frame], config: &CounterConfig) -> Result<Self> {
        let background =
            BackgroundMatrix::initialize(frames, config.background_frames, config.background_method)?;
        Self::new(background, config)
    }

    /// Blends a background-only frame into the reference.
    pub fn update(&mut self, frame: &Frame) -> Result<()> {
        self.background = self.background.blend(frame, self.rate)?;
        Ok(())
    }

    pub fn difference(&self, frame: &Frame) -> Result<DifferenceFrame> {
        self.background.difference(frame)
    }

    pub fn background(&self) -> &BackgroundMatrix {
        &self.background
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::time::Duration;

    fn frame(values: Vec<f32>) -> Frame {
        Frame::from_values(2, 2, values, Duration::ZERO).unwrap()
    }

    #[test]
    fn initialize_requires_enough_frames() {
        let frames = vec![frame(vec![20.0; 4]); 3];
        let err = BackgroundMatrix::initialize(&frames, 5, BackgroundMethod::Mean).unwrap_err();
        assert_eq!(
            err,
            CounterError::InsufficientData {
                required: 5,
                supplied: 3
            }
        );
    }

    #[test]
    fn initialize_mean_and_spread() {
        let frames = vec![
            frame(vec![20.0, 21.0, 22.0, 23.0]),
            frame(vec![22.0, 21.0, 22.0, 25.0]),
        ];
        let bg = BackgroundMatrix::initialize(&frames, 2, BackgroundMethod::Mean).unwrap();
        assert_eq!(bg.values(), &[21.0, 21.0, 22.0, 24.0]);
        assert_abs_diff_eq!(bg.std_dev().as_raw()[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bg.std_dev().as_raw()[1], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bg.mean(), 22.0, epsilon = 1e-6);
    }

    #[test]
    fn initialize_median_ignores_outlier_frame() {
        let frames = vec![
            frame(vec![20.0; 4]),
            frame(vec![20.0; 4]),
            frame(vec![30.0; 4]),
        ];
        let bg = BackgroundMatrix::initialize(&frames, 3, BackgroundMethod::Median).unwrap();
        assert_eq!(bg.values(), &[20.0; 4]);
    }

    #[test]
    fn initialize_uses_only_required_prefix() {
        let frames = vec![frame(vec![20.0; 4]), frame(vec![24.0; 4]), frame(vec![99.0; 4])];
        let bg = BackgroundMatrix::initialize(&frames, 2, BackgroundMethod::Mean).unwrap();
        assert_eq!(bg.values(), &[22.0; 4]);
    }

    #[test]
    fn initialize_rejects_mixed_shapes() {
        let frames = vec![
            frame(vec![20.0; 4]),
            Frame::uniform(3, 1, 20.0, Duration::ZERO),
        ];
        let err = BackgroundMatrix::initialize(&frames, 2, BackgroundMethod::Mean).unwrap_err();
        assert!(matches!(err, CounterError::ShapeMismatch { .. }));
    }

    #[test]
    fn blend_is_a_convex_combination() {
        let bg = BackgroundMatrix::from_values(2, 2, vec![20.0, 25.0, -3.0, 0.0]).unwrap();
        let current = frame(vec![30.0, 18.0, -3.0, 7.5]);
        for rate in [0.001_f32, 0.3, 0.5, 1.0] {
            let blended = bg.blend(&current, rate).unwrap();
            for ((new, old), seen) in blended.values().iter().zip(bg.values()).zip(current.values()) {
                let lo = old.min(*seen) - 1e-5;
                let hi = old.max(*seen) + 1e-5;
                assert!(*new >= lo && *new <= hi, "{new} outside [{old}, {seen}]");
            }
        }
        let full = bg.blend(&current, 1.0).unwrap();
        assert_eq!(full.values(), current.values());
    }

    #[test]
    fn blend_rejects_bad_rate() {
        let bg = BackgroundMatrix::from_values(2, 2, vec![20.0; 4]).unwrap();
        assert!(bg.blend(&frame(vec![21.0; 4]), 0.0).is_err());
        assert!(bg.blend(&frame(vec![21.0; 4]), 1.01).is_err());
    }

    #[test]
    fn difference_is_pure_subtraction() {
        let bg = BackgroundMatrix::from_values(2, 2, vec![20.0, 20.0, 21.0, 19.5]).unwrap();
        let current = frame(vec![20.0, 26.0, 20.0, 19.5]);
        let first = bg.difference(&current).unwrap();
        let second = bg.difference(&current).unwrap();
        assert_eq!(first.values(), &[0.0, 6.0, -1.0, 0.0]);
        assert_eq!(first.values(), second.values());
    }

    #[test]
    fn difference_rejects_shape_mismatch() {
        let bg = BackgroundMatrix::from_values(2, 2, vec![20.0; 4]).unwrap();
        let wrong = Frame::uniform(8, 8, 20.0, Duration::ZERO);
        let err = bg.difference(&wrong).unwrap_err();
        assert_eq!(
            err,
            CounterError::ShapeMismatch {
                expected: (2, 2),
                actual: (8, 8)
            }
        );
    }

    #[test]
    fn model_blends_at_configured_rate() {
        let config = CounterConfig {
            grid_width: 2,
            grid_height: 2,
            adaptive_rate: 0.5,
            ..CounterConfig::default()
        };
        let bg = BackgroundMatrix::from_values(2, 2, vec![20.0; 4]).unwrap();
        let mut model = BackgroundModel::new(bg, &config).unwrap();
        model.update(&frame(vec![22.0; 4])).unwrap();
        assert_eq!(model.background().values(), &[21.0; 4]);
    }

    #[test]
    fn blend_skips_dead_pixels() {
        let bg = BackgroundMatrix::from_values(2, 2, vec![20.0; 4]).unwrap();
        let blended = bg.blend(&frame(vec![f32::NAN, 22.0, f32::INFINITY, 20.0]), 0.5).unwrap();
        assert_eq!(blended.values(), &[20.0, 21.0, 20.0, 20.0]);
    }

    #[test]
    fn model_rejects_background_of_wrong_size() {
        let bg = BackgroundMatrix::from_values(2, 2, vec![20.0; 4]).unwrap();
        assert!(BackgroundModel::new(bg, &CounterConfig::default()).is_err());
    }
}
