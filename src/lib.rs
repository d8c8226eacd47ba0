// THEORY:
// This file is the main entry point for the `thermal_occupancy` library crate.
// It exports the `OccupancyPipeline` and its associated data structures
// (`CounterConfig`, `Snapshot`, `CrossingEvent`, ...) as the high-level interface
// of the counter, together with the acquisition seam (`FrameSource`,
// `BackgroundStore`, `FrameFeed`) used by callers that run frame capture as a
// separate producer. The layered internals live in `core_modules`:
//
//     background_model -> presence_filter -> body_extractor
//         -> location_estimator -> tracker (+ occupancy)

pub mod acquisition;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use acquisition::{run_feed, BackgroundStore, FrameFeed, FrameSource, MemoryStore, ReplaySource};
pub use config::{BackgroundMethod, CounterConfig};
pub use core_modules::background_model::BackgroundMatrix;
pub use core_modules::thermal_frame::{DifferenceFrame, Frame, ThermalGrid};
pub use error::{CounterError, Result};
pub use pipeline::{
    CrossingDirection, CrossingEvent, Detection, OccupancyCounter, OccupancyPipeline, Snapshot,
    TrackState, TrackSummary,
};
