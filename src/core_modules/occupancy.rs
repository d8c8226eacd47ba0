// THEORY:
// The `occupancy` module is the narrative end of the pipeline: it turns a track's
// crossing into a discrete event and keeps the running head count. The tracker is
// the only writer. The count is unsigned and exits saturate at zero, so a missed
// entrance followed by a seen exit can never drive the room negative.

use std::time::Duration;

/// Which way a track crossed the doorway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CrossingDirection {
    /// From the low-column zone to the high-column zone.
    Entrance,
    /// From the high-column zone to the low-column zone.
    Exit,
}

/// A single counted crossing.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CrossingEvent {
    pub track_id: u64,
    pub direction: CrossingDirection,
    /// Occupancy right after this event was applied.
    pub occupancy: u32,
    pub timestamp: Duration,
}

/// Running head count plus lifetime entrance and exit totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OccupancyCounter {
    occupancy: u32,
    entrances: u64,
    exits: u64,
}

impl OccupancyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a known head count, e.g. restored after a restart.
    pub fn starting_at(occupancy: u32) -> Self {
        Self {
            occupancy,
            ..Self::default()
        }
    }

    /// Applies a crossing and returns the new occupancy.
    pub fn record(&mut self, direction: CrossingDirection) -> u32 {
        match direction {
            CrossingDirection::Entrance => {
                self.entrances += 1;
                self.occupancy = self.occupancy.saturating_add(1);
            }
            CrossingDirection::Exit => {
                self.exits += 1;
                self.occupancy = self.occupancy.saturating_sub(1);
            }
        }
        self.occupancy
    }

    pub fn occupancy(&self) -> u32 {
        self.occupancy
    }

    pub fn entrances(&self) -> u64 {
        self.entrances
    }

    pub fn exits(&self) -> u64 {
        self.exits
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
