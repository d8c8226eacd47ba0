// THEORY:
// The `thermal_frame` module holds the "dumb" data containers every other layer
// works on. A thermal frame is a small grid of °C readings (8x8 for a Grid-EYE),
// stored as an `image::ImageBuffer` of single-channel `f32` pixels so the grid can
// be handed straight to `imageproc` for labelling and to `image` for rendering.
//
// Key architectural principles:
// 1.  **Immutability**: A `Frame` never changes after the sensor hands it over.
//     Background subtraction produces a new `DifferenceFrame` instead of editing
//     the frame in place.
// 2.  **Shape Discipline**: Grid shape is checked once, at construction or at
//     subtraction time, and reported as `ShapeMismatch`. Below this layer every
//     grid is assumed to be the configured size.
// 3.  **No Analysis**: Containers know how to summarise themselves (mean, max,
//     column sums) but know nothing about people, thresholds or tracks.

use crate::error::{CounterError, Result};
use image::{ImageBuffer, Luma};
use std::time::Duration;

/// A single-channel grid of temperatures in °C.
pub type ThermalGrid = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Builds a grid of the given shape filled with one value.
pub fn uniform_grid(width: u32, height: u32, value: f32) -> ThermalGrid {
    ImageBuffer::from_pixel(width, height, Luma([value]))
}

/// Builds a grid from row-major values, rejecting a buffer of the wrong length.
pub fn grid_from_values(width: u32, height: u32, values: Vec<f32>) -> Result<ThermalGrid> {
    let expected = (width as usize) * (height as usize);
    if values.len() != expected {
        return Err(CounterError::ShapeMismatch {
            expected: (width, height),
            actual: (values.len() as u32, 1),
        });
    }
    ImageBuffer::from_raw(width, height, values).ok_or(CounterError::ShapeMismatch {
        expected: (width, height),
        actual: (0, 0),
    })
}

pub(crate) fn ensure_same_shape(expected: (u32, u32), actual: (u32, u32)) -> Result<()> {
    if expected != actual {
        return Err(CounterError::ShapeMismatch { expected, actual });
    }
    Ok(())
}

/// One reading of the whole sensor array.
#[derive(Debug, Clone)]
pub struct Frame {
    grid: ThermalGrid,
    /// Time since the start of the stream at which the frame was captured.
    timestamp: Duration,
}

impl Frame {
    pub fn new(grid: ThermalGrid, timestamp: Duration) -> Self {
        Self { grid, timestamp }
    }

    pub fn from_values(width: u32, height: u32, values: Vec<f32>, timestamp: Duration) -> Result<Self> {
        Ok(Self::new(grid_from_values(width, height, values)?, timestamp))
    }

    pub fn uniform(width: u32, height: u32, value: f32, timestamp: Duration) -> Self {
        Self::new(uniform_grid(width, height, value), timestamp)
    }

    pub fn grid(&self) -> &ThermalGrid {
        &self.grid
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// (width, height)
    pub fn shape(&self) -> (u32, u32) {
        self.grid.dimensions()
    }

    pub fn value(&self, x: u32, y: u32) -> f32 {
        self.grid.get_pixel(x, y)[0]
    }

    /// Row-major readings.
    pub fn values(&self) -> &[f32] {
        self.grid.as_raw()
    }
}

/// The per-pixel excess of a frame over the background, in °C.
#[derive(Debug, Clone)]
pub struct DifferenceFrame {
    grid: ThermalGrid,
}

impl DifferenceFrame {
    pub fn new(grid: ThermalGrid) -> Self {
        Self { grid }
    }

    pub fn from_values(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        Ok(Self::new(grid_from_values(width, height, values)?))
    }

    pub fn grid(&self) -> &ThermalGrid {
        &self.grid
    }

    pub fn width(&self) -> u32 {
        self.grid.width()
    }

    pub fn height(&self) -> u32 {
        self.grid.height()
    }

    pub fn value(&self, x: u32, y: u32) -> f32 {
        self.grid.get_pixel(x, y)[0]
    }

    pub fn values(&self) -> &[f32] {
        self.grid.as_raw()
    }

    pub fn mean(&self) -> f32 {
        let values = self.values();
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f32>() / values.len() as f32
    }

    /// (min, max) over the grid, or `None` for an empty grid.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let mut values = self.values().iter().copied();
        let first = values.next()?;
        Some(values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}
