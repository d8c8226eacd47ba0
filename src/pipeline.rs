// THEORY:
// The `pipeline` module is the top-level API of the counter. It wires the layers
// into the single `step` the rest of the world calls once per frame:
//
//     frame -> difference -> presence gate -> extract -> locate -> track
//
// and returns a read-only `Snapshot` that is enough to render an overlay or log a
// count without reaching into internal state. The pipeline is synchronous and
// owns all mutable state, so processing one frame completes before the next one is
// accepted. Frames the presence gate rejects are blended into the background;
// frames it accepts never are. The tracker runs on every frame, with no detections
// when the gate says the doorway is empty, so stale tracks keep expiring.

use crate::acquisition::BackgroundStore;
use crate::config::CounterConfig;
use crate::core_modules::background_model::{BackgroundMatrix, BackgroundModel};
use crate::core_modules::body_extractor::BodyExtractor;
use crate::core_modules::location_estimator::LocationEstimator;
use crate::core_modules::presence_filter::{PresenceFilter, PresenceVerdict};
use crate::core_modules::thermal_frame::{DifferenceFrame, Frame};
use crate::core_modules::tracker::{GreedyMatcher, Matcher, Track, Tracker};
use crate::error::Result;
use std::time::Duration;

// Re-export key data structures for the public API.
pub use crate::core_modules::location_estimator::Detection;
pub use crate::core_modules::occupancy::{CrossingDirection, CrossingEvent, OccupancyCounter};
pub use crate::core_modules::tracker::TrackState;

/// What a presentation layer needs to know about one track.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackSummary {
    pub id: u64,
    pub location: f32,
    pub temperature: f32,
    pub counted: bool,
    pub state: TrackState,
}

impl From<&Track> for TrackSummary {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id,
            location: track.last_location,
            temperature: track.last_temperature,
            counted: track.counted,
            state: track.state(),
        }
    }
}

/// The output of the pipeline for a single frame.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub timestamp: Duration,
    pub occupancy: u32,
    pub entrances: u64,
    pub exits: u64,
    /// Whether the presence gate let this frame through to extraction.
    pub presence: bool,
    pub detections: Vec<Detection>,
    pub tracks: Vec<TrackSummary>,
    /// Crossings counted on this frame.
    pub events: Vec<CrossingEvent>,
    pub diff_frame: DifferenceFrame,
}

/// The main, top-level struct for the counter.
pub struct OccupancyPipeline<M: Matcher = GreedyMatcher> {
    config: CounterConfig,
    background: BackgroundModel,
    presence_filter: PresenceFilter,
    extractor: BodyExtractor,
    locator: LocationEstimator,
    tracker: Tracker<M>,
    frames_processed: u64,
}

impl OccupancyPipeline<GreedyMatcher> {
    pub fn new(config: CounterConfig, background: BackgroundMatrix) -> Result<Self> {
        Self::with_matcher(config, background, GreedyMatcher)
    }

    /// Builds the background from calibration frames of the empty doorway.
    pub fn calibrate(config: CounterConfig, frames: &[Frame]) -> Result<Self> {
        config.validate()?;
        let background = BackgroundModel::calibrate(frames, &config)?;
        Ok(Self::from_model(config, background, GreedyMatcher))
    }

    /// Uses the stored background when there is one, otherwise calibrates from
    /// `calibration` and stores the result.
    pub fn bootstrap<S: BackgroundStore + ?Sized>(
        config: CounterConfig,
        store: &mut S,
        calibration: &[Frame],
    ) -> Result<Self> {
        if let Some(background) = store.load_background() {
            log::info!("Using stored background (mean {:.2}°C)", background.mean());
            return Self::new(config, background);
        }
        log::info!("No stored background; calibrating from {} frames", calibration.len());
        let pipeline = Self::calibrate(config, calibration)?;
        store.save_background(pipeline.background())?;
        Ok(pipeline)
    }
}

impl<M: Matcher> OccupancyPipeline<M> {
    pub fn with_matcher(config: CounterConfig, background: BackgroundMatrix, matcher: M) -> Result<Self> {
        config.validate()?;
        let background = BackgroundModel::new(background, &config)?;
        Ok(Self::from_model(config, background, matcher))
    }

    fn from_model(config: CounterConfig, background: BackgroundModel, matcher: M) -> Self {
        Self {
            background,
            presence_filter: PresenceFilter::new(&config),
            extractor: BodyExtractor::new(&config),
            locator: LocationEstimator::new(&config),
            tracker: Tracker::with_matcher(&config, matcher),
            frames_processed: 0,
            config,
        }
    }

    /// Runs one frame through every stage and reports the result.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<Snapshot> {
        // Stage 1: Background subtraction
        let diff = self.background.difference(frame)?;

        // Stage 2: Presence gate
        let verdict = self.presence_filter.assess(&diff);
        log::trace!("Frame at {:?}: {:?}", frame.timestamp(), verdict);

        // Stage 3: Segmentation and location, or background adaptation
        let detections = if verdict.is_present() {
            self.detect(&diff)
        } else {
            self.background.update(frame)?;
            Vec::new()
        };

        // Stage 4: Tracking and counting
        let events = self.tracker.update(&detections, frame.timestamp());
        self.frames_processed += 1;

        let counter = self.tracker.counter();
        Ok(Snapshot {
            timestamp: frame.timestamp(),
            occupancy: counter.occupancy(),
            entrances: counter.entrances(),
            exits: counter.exits(),
            presence: matches!(verdict, PresenceVerdict::Present { .. }),
            detections,
            tracks: self.tracker.tracks().map(TrackSummary::from).collect(),
            events,
            diff_frame: diff,
        })
    }

    /// Blobs of a difference frame as detections, with absolute peak temperatures.
    pub fn detect(&self, diff: &DifferenceFrame) -> Vec<Detection> {
        let baseline = self.background.background().mean();
        self.extractor
            .extract(diff)
            .iter()
            .map(|blob| self.locator.locate(diff, blob).with_baseline(baseline))
            .collect()
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    pub fn background(&self) -> &BackgroundMatrix {
        self.background.background()
    }

    pub fn tracker(&self) -> &Tracker<M> {
        &self.tracker
    }

    pub fn occupancy(&self) -> u32 {
        self.tracker.occupancy()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn reset_counts(&mut self) {
        self.tracker.reset_counts();
    }
}
