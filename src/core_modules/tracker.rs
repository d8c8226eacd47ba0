// THEORY:
// The `tracker` module adds memory to the counter. Detections are stateless
// snapshots of one frame; a `Track` is one person's existence over time. The
// `Tracker` solves the data association problem frame by frame and owns the only
// mutable state of the whole core: the tracks, the id counter and the occupancy.
//
// Key architectural principles:
// 1.  **Gated Association**: A track is a candidate for a detection only if the
//     detection is close in column AND in temperature. Among candidates the
//     smallest `spatial + thermal` distance wins. Association runs behind the
//     `Matcher` trait; the default `GreedyMatcher` walks detections in extraction
//     order, which is enough for the one or two people a doorway sees at once.
// 2.  **Lifecycle Management**:
//     - **Birth**: An unmatched detection starts a track with a fresh id. Ids
//       increase monotonically and are never reused.
//     - **Tracking**: A matched track appends the column to a bounded history and
//       refreshes its last-seen time.
//     - **Death**: A track unmatched for longer than the stale timeout is removed.
//       Removal never touches the count; someone who vanished mid-doorway is not
//       guessed to have left.
// 3.  **One-Shot Counting**: Once a track's history starts in one zone and ends in
//     the other it fires exactly one entrance or exit and latches `counted`. The
//     latch never resets for the life of the track.
// 4.  **Arena by Id**: Tracks live in an ordered map keyed by id, so iteration
//     order (and therefore tie-breaking) is stable.

use crate::config::CounterConfig;
use crate::core_modules::location_estimator::Detection;
use crate::core_modules::occupancy::{CrossingDirection, CrossingEvent, OccupancyCounter};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

/// A track needs this many observations before it can count.
const MIN_CROSSING_HISTORY: usize = 3;

/// Where a track is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackState {
    /// Seen once.
    New,
    /// Matched at least once after birth, not yet counted.
    Active,
    /// Has fired its crossing. Stays tracked until stale.
    Counted,
}

/// One person followed across frames.
#[derive(Debug, Clone)]
pub struct Track {
    /// A unique and persistent id, never reused.
    pub id: u64,
    pub last_location: f32,
    pub last_temperature: f32,
    pub last_seen: Duration,
    /// Most recent locations, oldest first, at most `temporal_window` long.
    pub history: VecDeque<f32>,
    /// Latched once the track has fired a crossing.
    pub counted: bool,
    /// Matched during the latest update.
    pub active: bool,
    /// Total observations since birth.
    pub observations: u32,
    capacity: usize,
}

impl Track {
    fn new(id: u64, detection: &Detection, now: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut history = VecDeque::with_capacity(capacity);
        history.push_back(detection.location);
        Self {
            id,
            last_location: detection.location,
            last_temperature: detection.temperature,
            last_seen: now,
            history,
            counted: false,
            active: true,
            observations: 1,
            capacity,
        }
    }

    fn observe(&mut self, detection: &Detection, now: Duration) {
        self.last_location = detection.location;
        self.last_temperature = detection.temperature;
        self.last_seen = now;
        self.active = true;
        self.observations += 1;
        self.history.push_back(detection.location);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    pub fn state(&self) -> TrackState {
        if self.counted {
            TrackState::Counted
        } else if self.observations > 1 {
            TrackState::Active
        } else {
            TrackState::New
        }
    }

    /// The crossing this track's history describes, if it has not counted yet.
    pub fn crossing(&self, entry_zone_low: f32, entry_zone_high: f32) -> Option<CrossingDirection> {
        if self.counted || self.history.len() < MIN_CROSSING_HISTORY {
            return None;
        }
        let first = *self.history.front()?;
        let last = *self.history.back()?;
        if first < entry_zone_low && last > entry_zone_high {
            Some(CrossingDirection::Entrance)
        } else if first > entry_zone_high && last < entry_zone_low {
            Some(CrossingDirection::Exit)
        } else {
            None
        }
    }

    pub fn is_stale(&self, now: Duration, timeout: Duration) -> bool {
        now.saturating_sub(self.last_seen) > timeout
    }
}

/// Acceptance gates for pairing a detection with a track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchGates {
    /// Strict upper bound on |Δlocation|, in columns.
    pub spatial_threshold: f32,
    /// Strict upper bound on |Δtemperature|, in °C.
    pub temp_threshold: f32,
}

impl MatchGates {
    /// Combined distance if the pair passes both gates.
    pub fn cost(&self, track: &Track, detection: &Detection) -> Option<f32> {
        let spatial = (detection.location - track.last_location).abs();
        let thermal = (detection.temperature - track.last_temperature).abs();
        (spatial < self.spatial_threshold && thermal < self.temp_threshold).then_some(spatial + thermal)
    }
}

/// Associates the detections of one frame with existing tracks.
///
/// Implementations return one entry per detection, in detection order: the id of
/// the track it continues, or `None` to start a new track. No track id may appear
/// twice.
pub trait Matcher: Send {
    fn assign(&self, tracks: &BTreeMap<u64, Track>, detections: &[Detection], gates: &MatchGates) -> Vec<Option<u64>>;
}

/// Nearest-neighbour association in detection order.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyMatcher;

impl Matcher for GreedyMatcher {
    fn assign(&self, tracks: &BTreeMap<u64, Track>, detections: &[Detection], gates: &MatchGates) -> Vec<Option<u64>> {
        let mut claimed: HashSet<u64> = HashSet::new();
        detections
            .iter()
            .map(|detection| {
                let mut best: Option<(u64, f32)> = None;
                for (id, track) in tracks {
                    if claimed.contains(id) {
                        continue;
                    }
                    if let Some(cost) = gates.cost(track, detection) {
                        if best.is_none_or(|(_, best_cost)| cost < best_cost) {
                            best = Some((*id, cost));
                        }
                    }
                }
                let id = best.map(|(id, _)| id);
                if let Some(id) = id {
                    claimed.insert(id);
                }
                id
            })
            .collect()
    }
}

/// Manages the tracks from one frame to the next and counts crossings.
pub struct Tracker<M: Matcher = GreedyMatcher> {
    /// The tracks currently alive, keyed by id.
    tracks: BTreeMap<u64, Track>,
    /// Id handed to the next new track.
    next_id: u64,
    counter: OccupancyCounter,
    matcher: M,
    gates: MatchGates,
    temporal_window: usize,
    entry_zone_low: f32,
    entry_zone_high: f32,
    stale_timeout: Duration,
}

impl Tracker<GreedyMatcher> {
    pub fn new(config: &CounterConfig) -> Self {
        Self::with_matcher(config, GreedyMatcher)
    }
}

impl<M: Matcher> Tracker<M> {
    pub fn with_matcher(config: &CounterConfig, matcher: M) -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            counter: OccupancyCounter::new(),
            matcher,
            gates: MatchGates {
                spatial_threshold: config.spatial_threshold,
                temp_threshold: config.temp_threshold,
            },
            temporal_window: config.temporal_window,
            entry_zone_low: config.entry_zone_low,
            entry_zone_high: config.entry_zone_high,
            stale_timeout: config.stale_timeout(),
        }
    }

    /// Runs one association cycle. Call it every frame, with an empty slice when
    /// nothing was detected, so stale tracks keep getting cleaned up.
    pub fn update(&mut self, detections: &[Detection], now: Duration) -> Vec<CrossingEvent> {
        for track in self.tracks.values_mut() {
            track.active = false;
        }

        // --- 1. Association ---
        let assignments = self.matcher.assign(&self.tracks, detections, &self.gates);
        let mut events = Vec::new();
        let mut consumed: HashSet<u64> = HashSet::new();

        // --- 2. State Updating ---
        // a missing entry means unmatched
        for (index, detection) in detections.iter().enumerate() {
            let assignment = assignments.get(index).copied().flatten();
            let matched = assignment.filter(|id| self.tracks.contains_key(id) && consumed.insert(*id));
            let Some(id) = matched else {
                self.spawn(detection, now);
                continue;
            };

            let Some(track) = self.tracks.get_mut(&id) else {
                continue;
            };
            track.observe(detection, now);

            if let Some(direction) = track.crossing(self.entry_zone_low, self.entry_zone_high) {
                track.counted = true;
                let occupancy = self.counter.record(direction);
                log::info!(
                    "[{}] {:?} detected at {:?}. Occupancy: {}",
                    track.id,
                    direction,
                    now,
                    occupancy
                );
                events.push(CrossingEvent {
                    track_id: track.id,
                    direction,
                    occupancy,
                    timestamp: now,
                });
            }
        }

        // --- 3. Death ---
        let timeout = self.stale_timeout;
        self.tracks.retain(|id, track| {
            let stale = track.is_stale(now, timeout);
            if stale {
                log::debug!("Removing stale track {} (counted: {})", id, track.counted);
            }
            !stale
        });

        events
    }

    fn spawn(&mut self, detection: &Detection, now: Duration) {
        let id = self.next_id;
        self.next_id += 1;
        log::debug!(
            "New track {} at column {:.1}, {:.1}°C",
            id,
            detection.location,
            detection.temperature
        );
        self.tracks
            .insert(id, Track::new(id, detection, now, self.temporal_window));
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn track(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn occupancy(&self) -> u32 {
        self.counter.occupancy()
    }

    pub fn counter(&self) -> &OccupancyCounter {
        &self.counter
    }

    /// Zeroes occupancy and the entrance and exit totals. Tracks are kept.
    pub fn reset_counts(&mut self) {
        self.counter.reset();
        log::info!("Counts reset");
    }

    /// Drops every track. Ids keep increasing.
    pub fn clear_tracks(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn wide_config() -> CounterConfig {
        CounterConfig {
            spatial_threshold: 5.0,
            ..CounterConfig::default()
        }
    }

    fn track_with_history(history: &[f32]) -> Track {
        let mut track = Track::new(1, &Detection::new(history[0], 30.0), ms(0), 5);
        for (i, location) in history.iter().enumerate().skip(1) {
            track.observe(&Detection::new(*location, 30.0), ms(100 * i as u64));
        }
        track
    }

    #[test]
    fn history_left_to_right_is_an_entrance() {
        let track = track_with_history(&[0.0, 1.0, 2.0, 6.0, 7.0]);
        assert_eq!(track.history, VecDeque::from(vec![0.0, 1.0, 2.0, 6.0, 7.0]));
        assert_eq!(track.crossing(2.0, 5.0), Some(CrossingDirection::Entrance));
    }

    #[test]
    fn history_right_to_left_is_an_exit() {
        let track = track_with_history(&[7.0, 6.0, 1.0]);
        assert_eq!(track.crossing(2.0, 5.0), Some(CrossingDirection::Exit));
    }

    #[test]
    fn short_or_counted_history_never_crosses() {
        let track = track_with_history(&[0.0, 7.0]);
        assert_eq!(track.crossing(2.0, 5.0), None);

        let mut track = track_with_history(&[0.0, 3.0, 7.0]);
        track.counted = true;
        assert_eq!(track.crossing(2.0, 5.0), None);
    }

    #[test]
    fn history_is_bounded_by_window() {
        let track = track_with_history(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(track.history.len(), 5);
        assert_eq!(track.history.front(), Some(&2.0));
    }

    #[test]
    fn walk_in_counts_once() {
        let mut tracker = Tracker::new(&wide_config());
        let mut events = Vec::new();
        for (i, column) in [0.0, 1.0, 2.0, 6.0, 7.0, 7.0, 7.0].iter().enumerate() {
            events.extend(tracker.update(&[Detection::new(*column, 30.0)], ms(100 * i as u64)));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, CrossingDirection::Entrance);
        assert_eq!(events[0].track_id, 1);
        assert_eq!(tracker.occupancy(), 1);
        let track = tracker.track(1).unwrap();
        assert!(track.counted);
        assert_eq!(track.state(), TrackState::Counted);
    }

    #[test]
    fn counted_track_walking_back_does_not_count_again() {
        let mut tracker = Tracker::new(&wide_config());
        let path = [0.0, 1.0, 4.0, 7.0, 4.0, 1.0, 0.0, 0.0];
        for (i, column) in path.iter().enumerate() {
            tracker.update(&[Detection::new(*column, 30.0)], ms(100 * i as u64));
        }
        assert_eq!(tracker.num_tracks(), 1);
        assert_eq!(tracker.occupancy(), 1);
        assert_eq!(tracker.counter().exits(), 0);
    }

    #[test]
    fn stale_track_is_removed_without_changing_occupancy() {
        let mut tracker = Tracker::new(&wide_config());
        for (i, column) in [0.0, 1.0, 2.0, 6.0, 7.0].iter().enumerate() {
            tracker.update(&[Detection::new(*column, 30.0)], ms(100 * i as u64));
        }
        assert_eq!(tracker.occupancy(), 1);

        // last seen at 400 ms; timeout is 500 ms
        tracker.update(&[], ms(900));
        assert_eq!(tracker.num_tracks(), 1);
        tracker.update(&[], ms(901));
        assert_eq!(tracker.num_tracks(), 0);
        assert_eq!(tracker.occupancy(), 1);
    }

    #[test]
    fn exit_on_empty_room_stays_at_zero() {
        let mut tracker = Tracker::new(&wide_config());
        let mut events = Vec::new();
        for (i, column) in [7.0, 6.0, 4.0, 1.0].iter().enumerate() {
            events.extend(tracker.update(&[Detection::new(*column, 30.0)], ms(100 * i as u64)));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, CrossingDirection::Exit);
        assert_eq!(events[0].occupancy, 0);
        assert_eq!(tracker.occupancy(), 0);
        assert_eq!(tracker.counter().exits(), 1);
    }

    #[test]
    fn thermal_gate_blocks_match() {
        let mut tracker = Tracker::new(&CounterConfig::default());
        tracker.update(&[Detection::new(3.0, 30.0)], ms(0));
        tracker.update(&[Detection::new(3.0, 31.5)], ms(100));
        assert_eq!(tracker.num_tracks(), 2);
        assert_eq!(tracker.track(1).unwrap().observations, 1);
    }

    #[test]
    fn spatial_gate_is_strict() {
        let config = CounterConfig {
            spatial_threshold: 2.0,
            ..CounterConfig::default()
        };
        let mut tracker = Tracker::new(&config);
        tracker.update(&[Detection::new(1.0, 30.0)], ms(0));
        tracker.update(&[Detection::new(3.0, 30.0)], ms(100));
        assert_eq!(tracker.num_tracks(), 2);
    }

    #[test]
    fn each_track_takes_at_most_one_detection() {
        let mut tracker = Tracker::new(&CounterConfig::default());
        tracker.update(&[Detection::new(3.0, 30.0)], ms(0));
        let detections = [Detection::new(3.0, 30.0), Detection::new(3.0, 30.1)];
        tracker.update(&detections, ms(100));

        assert_eq!(tracker.num_tracks(), 2);
        // the first detection in extraction order wins the existing track
        assert_eq!(tracker.track(1).unwrap().last_temperature, 30.0);
        assert_eq!(tracker.track(2).unwrap().last_temperature, 30.1);
    }

    #[test]
    fn nearest_candidate_wins() {
        let mut tracker = Tracker::new(&CounterConfig::default());
        tracker.update(&[Detection::new(2.0, 30.0), Detection::new(4.0, 30.0)], ms(0));
        tracker.update(&[Detection::new(3.5, 30.0)], ms(100));
        assert_eq!(tracker.track(2).unwrap().observations, 2);
        assert_eq!(tracker.track(1).unwrap().observations, 1);
        assert!(!tracker.track(1).unwrap().active);
    }

    #[test]
    fn exact_tie_goes_to_lowest_track_id() {
        let mut tracker = Tracker::new(&CounterConfig::default());
        tracker.update(&[Detection::new(2.0, 30.0), Detection::new(4.0, 30.0)], ms(0));
        tracker.update(&[Detection::new(3.0, 30.0)], ms(100));
        assert_eq!(tracker.track(1).unwrap().observations, 2);
        assert_eq!(tracker.track(2).unwrap().observations, 1);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut tracker = Tracker::new(&CounterConfig::default());
        tracker.update(&[Detection::new(3.0, 30.0)], ms(0));
        tracker.update(&[], ms(1_000));
        assert_eq!(tracker.num_tracks(), 0);
        tracker.update(&[Detection::new(3.0, 30.0)], ms(1_100));
        assert!(tracker.track(1).is_none());
        assert!(tracker.track(2).is_some());

        tracker.clear_tracks();
        tracker.update(&[Detection::new(3.0, 30.0)], ms(1_200));
        assert!(tracker.track(3).is_some());
    }

    #[test]
    fn occupancy_never_negative_over_mixed_traffic() {
        let mut tracker = Tracker::new(&wide_config());
        let mut now = 0;
        // three exits and one entrance, separated by gaps that expire the tracks
        for path in [[7.0, 4.0, 1.0], [7.0, 4.0, 1.0], [0.0, 3.0, 6.0], [7.0, 4.0, 1.0]] {
            for column in path {
                tracker.update(&[Detection::new(column, 30.0)], ms(now));
                now += 100;
            }
            now += 1_000;
            tracker.update(&[], ms(now));
        }
        assert_eq!(tracker.occupancy(), 0);
        assert_eq!(tracker.counter().entrances(), 1);
        assert_eq!(tracker.counter().exits(), 3);
    }

    #[test]
    fn reset_counts_keeps_tracks() {
        let mut tracker = Tracker::new(&wide_config());
        for (i, column) in [0.0, 3.0, 6.0].iter().enumerate() {
            tracker.update(&[Detection::new(*column, 30.0)], ms(100 * i as u64));
        }
        assert_eq!(tracker.occupancy(), 1);
        tracker.reset_counts();
        assert_eq!(tracker.occupancy(), 0);
        assert_eq!(tracker.num_tracks(), 1);
    }

    struct NeverMatch;

    impl Matcher for NeverMatch {
        fn assign(&self, _: &BTreeMap<u64, Track>, detections: &[Detection], _: &MatchGates) -> Vec<Option<u64>> {
            vec![None; detections.len()]
        }
    }

    #[test]
    fn matcher_is_pluggable() {
        let mut tracker = Tracker::with_matcher(&CounterConfig::default(), NeverMatch);
        tracker.update(&[Detection::new(3.0, 30.0)], ms(0));
        tracker.update(&[Detection::new(3.0, 30.0)], ms(100));
        assert_eq!(tracker.num_tracks(), 2);
    }

    /// Reports matches only, so it returns nothing when there are none.
    struct MatchesOnly;

    impl Matcher for MatchesOnly {
        fn assign(&self, _: &BTreeMap<u64, Track>, _: &[Detection], _: &MatchGates) -> Vec<Option<u64>> {
            Vec::new()
        }
    }

    #[test]
    fn short_assignment_still_spawns_every_detection() {
        let mut tracker = Tracker::with_matcher(&CounterConfig::default(), MatchesOnly);
        tracker.update(&[Detection::new(1.0, 30.0), Detection::new(6.0, 31.0)], ms(0));
        assert_eq!(tracker.num_tracks(), 2);
        assert_eq!(tracker.tracks().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
    }
}
