// THEORY:
// The `BodyExtractor` is the engine of the segmentation layer. It turns a
// difference frame that passed the presence gate into a list of candidate bodies
// ("blobs"), and it has to cope with the one failure mode that matters on an 8x8
// array: two people walking close together show up as a single warm region.
//
// Algorithm steps:
// 1.  **Base Segmentation**: Pixels warmer than the base threshold
//     (`min_temp_filter`) form the foreground. 4-connected components of the
//     foreground are candidate bodies; components below `min_pixel_area` are noise.
// 2.  **Merged-Body Suspicion**: A component covering `large_blob_fraction` of the
//     grid or more is too big for one person at doorway height.
// 3.  **Threshold Ladder**: Inside such a component the extractor re-labels at
//     successively hotter thresholds (base + 0.5, + 0.75, + 1.0 °C by default). The
//     cooler bridge between two bodies drops out first, so the first rung that
//     leaves exactly two components of at least `small_body_fraction` of the grid
//     wins, and those two become the blobs.
// 4.  **Conservative Fallback**: If no rung produces a clean pair, the whole region
//     is kept as one blob. Under-counting one cycle is cheaper than inventing a
//     second person.
// 5.  **Determinism**: Components are always reported in raster order of their
//     first pixel, so identical frames give identical blob lists.

use crate::config::CounterConfig;
use crate::core_modules::body_blob::{Blob, Point};
use crate::core_modules::thermal_frame::DifferenceFrame;
use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

/// How a single large component was resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitOutcome {
    /// Split into two bodies at this ladder rung (0-based) and absolute threshold.
    Split { step: usize, threshold: f32 },
    /// No rung produced exactly two bodies; the region was kept whole.
    Unsplit,
}

/// Stateless segmentation of difference frames into candidate bodies.
#[derive(Debug, Clone)]
pub struct BodyExtractor {
    base_threshold: f32,
    min_pixel_area: usize,
    large_blob_area: f32,
    small_body_area: f32,
    split_ladder: Vec<f32>,
}

impl BodyExtractor {
    pub fn new(config: &CounterConfig) -> Self {
        Self {
            base_threshold: config.min_temp_filter,
            min_pixel_area: config.min_pixel_area,
            large_blob_area: config.large_blob_area(),
            small_body_area: config.small_body_area(),
            split_ladder: config.split_ladder.clone(),
        }
    }

    /// Segments a difference frame into blobs, splitting merged bodies.
    pub fn extract(&self, diff: &DifferenceFrame) -> Vec<Blob> {
        let mut blobs = Vec::new();

        for component in label_components(diff, self.base_threshold, None) {
            if component.len() < self.min_pixel_area {
                continue;
            }
            let Some(region) = Blob::from_pixels(component, diff) else {
                continue;
            };

            if (region.area as f32) < self.large_blob_area {
                blobs.push(region);
                continue;
            }

            match self.split(diff, &region) {
                (SplitOutcome::Split { step, threshold }, bodies) => {
                    log::debug!(
                        "Split {}-pixel region into {} bodies at ladder step {} ({:.2}°C)",
                        region.area,
                        bodies.len(),
                        step + 1,
                        threshold
                    );
                    blobs.extend(bodies);
                }
                (SplitOutcome::Unsplit, _) => {
                    log::debug!("Kept {}-pixel region whole; no ladder step separated it", region.area);
                    blobs.push(region);
                }
            }
        }

        blobs
    }

    /// Walks the threshold ladder inside `region`.
    pub fn split(&self, diff: &DifferenceFrame, region: &Blob) -> (SplitOutcome, Vec<Blob>) {
        for (step, offset) in self.split_ladder.iter().enumerate() {
            let threshold = self.base_threshold + offset;
            let bodies: Vec<Vec<Point>> = label_components(diff, threshold, Some(region))
                .into_iter()
                .filter(|component| component.len() as f32 >= self.small_body_area)
                .collect();

            if bodies.len() == 2 {
                let blobs: Vec<Blob> = bodies
                    .into_iter()
                    .filter_map(|pixels| Blob::from_pixels(pixels, diff))
                    .collect();
                return (SplitOutcome::Split { step, threshold }, blobs);
            }
        }
        (SplitOutcome::Unsplit, Vec::new())
    }
}

/// 4-connected components of `diff > threshold`, optionally restricted to a
/// region, each as a row-major pixel list, in raster order of first pixel.
fn label_components(diff: &DifferenceFrame, threshold: f32, region: Option<&Blob>) -> Vec<Vec<Point>> {
    let foreground = GrayImage::from_fn(diff.width(), diff.height(), |x, y| {
        let inside = region.is_none_or(|r| r.contains(x, y));
        if inside && diff.value(x, y) > threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });

    let labels = connected_components(&foreground, Connectivity::Four, Luma([0u8]));
    let label_count = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;

    let mut components: Vec<Vec<Point>> = vec![Vec::new(); label_count];
    for (x, y, label) in labels.enumerate_pixels() {
        if label[0] != 0 {
            components[label[0] as usize - 1].push(Point { x, y });
        }
    }

    components.retain(|component| !component.is_empty());
    components.sort_by_key(|component| component.first().map(|p| (p.y, p.x)));
    components
}
