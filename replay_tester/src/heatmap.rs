//! Renders one snapshot as a PNG: difference cells colored on a blue, yellow, red
//! ramp, quiet frames dimmed, and a white marker under every tracked column.

use image::{ImageEncoder, Rgba, RgbaImage};
use std::path::Path;
use thermal_occupancy::{CounterConfig, Snapshot};

const CELL: u32 = 32;
const MARKER: u32 = 6;
/// Difference (°C) at which the ramp saturates to red.
const FULL_SCALE: f32 = 6.0;

/// Maps a temperature difference onto the heat ramp.
pub fn heat_color(diff: f32) -> Rgba<u8> {
    let score = (diff / FULL_SCALE).clamp(0.0, 1.0) * 10.0;
    let (r, g, b) = if score <= 5.0 {
        // Blue to Yellow
        let ratio = score / 5.0;
        (255.0 * ratio, 255.0 * ratio, 255.0 * (1.0 - ratio))
    } else {
        // Yellow to Red
        let ratio = (score - 5.0) / 5.0;
        (255.0, 255.0 * (1.0 - ratio), 0.0)
    };
    Rgba([r as u8, g as u8, b as u8, 255])
}

pub fn render(snapshot: &Snapshot, config: &CounterConfig) -> RgbaImage {
    let diff = &snapshot.diff_frame;
    let (width, height) = (diff.width(), diff.height());
    let mut image = RgbaImage::new(width * CELL, height * CELL + MARKER);

    for y in 0..height {
        for x in 0..width {
            let mut color = heat_color(diff.value(x, y));
            if !snapshot.presence {
                // dim frames the presence gate rejected
                for channel in color.0.iter_mut().take(3) {
                    *channel = (*channel as f32 * 0.4) as u8;
                }
            }
            fill(&mut image, x * CELL, y * CELL, CELL, CELL, color);
        }
    }

    let zone_color = Rgba([90, 90, 90, 255]);
    for boundary in [config.entry_zone_low, config.entry_zone_high] {
        let x = ((boundary + 0.5) * CELL as f32) as u32;
        if x < image.width() {
            fill(&mut image, x, 0, 1, height * CELL, zone_color);
        }
    }

    for track in &snapshot.tracks {
        let column = track.location.round().clamp(0.0, (width - 1) as f32) as u32;
        let color = if track.counted {
            Rgba([0, 255, 0, 255])
        } else {
            Rgba([255, 255, 255, 255])
        };
        fill(&mut image, column * CELL, height * CELL, CELL, MARKER, color);
    }
    image
}

pub fn save(path: &Path, image: &RgbaImage) -> Result<(), image::error::ImageError> {
    let output = std::io::BufWriter::new(std::fs::File::create(path)?);
    let encoder = image::codecs::png::PngEncoder::new(output);
    encoder.write_image(image.as_raw(), image.width(), image.height(), image::ExtendedColorType::Rgba8)?;
    Ok(())
}

fn fill(image: &mut RgbaImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgba<u8>) {
    for y in y0..(y0 + h).min(image.height()) {
        for x in x0..(x0 + w).min(image.width()) {
            image.put_pixel(x, y, color);
        }
    }
}
