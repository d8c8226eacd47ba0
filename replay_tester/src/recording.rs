//! Reads the CSV logs written by the sensor logger:
//! `Timestamp_ms, Occupancy, Pixel_0 .. Pixel_{N-1}`, one row per frame.

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::time::Duration;
use thermal_occupancy::Frame;

/// One logged frame together with the occupancy the logger reported for it.
#[derive(Debug, Clone)]
pub struct RecordedFrame {
    pub frame: Frame,
    pub recorded_occupancy: i64,
}

pub fn read_recording<R: Read>(input: R, width: u32, height: u32) -> Result<Vec<RecordedFrame>> {
    let pixels = (width * height) as usize;
    let mut reader = csv::ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(input);

    let headers = reader.headers().context("recording has no header row")?;
    if headers.len() != pixels + 2 {
        bail!(
            "recording has {} pixel columns, the grid needs {}",
            headers.len().saturating_sub(2),
            pixels
        );
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let line = index + 2;
        let record = record.with_context(|| format!("unreadable row at line {line}"))?;

        let millis: f64 = record[0]
            .parse()
            .with_context(|| format!("bad timestamp {:?} at line {line}", &record[0]))?;
        if !millis.is_finite() || millis < 0.0 {
            bail!("timestamp {millis} at line {line} is not a time");
        }
        let recorded_occupancy: i64 = record[1]
            .parse()
            .with_context(|| format!("bad occupancy {:?} at line {line}", &record[1]))?;

        let values = record
            .iter()
            .skip(2)
            .map(|field| field.parse::<f32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("bad pixel value at line {line}"))?;

        let Ok(timestamp) = Duration::try_from_secs_f64(millis / 1000.0) else {
            bail!("timestamp {millis} at line {line} is out of range");
        };
        let frame = Frame::from_values(width, height, values, timestamp)
            .with_context(|| format!("row at line {line} does not fit the grid"))?;
        rows.push(RecordedFrame {
            frame,
            recorded_occupancy,
        });
    }
    Ok(rows)
}
