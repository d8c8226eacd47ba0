// THEORY:
// The `acquisition` module is the seam between the synchronous core and the
// outside world. It defines the two collaborators the core depends on, a frame
// source and a background store, and a small tokio-based feed that lets frame
// acquisition run as its own producer task.
//
// Key architectural principles:
// 1.  **Non-Blocking Poll**: A `FrameSource` is polled; it answers `None` when no
//     frame is ready and never sleeps on the core's behalf. Pacing is the
//     producer's job, not the pipeline's.
// 2.  **Bounded Hand-Off**: The producer pushes into a bounded channel. When the
//     consumer falls behind, the producer waits instead of queueing without limit.
// 3.  **Single Consumer**: Exactly one consumer drains the feed and owns the
//     `OccupancyPipeline`, so tracker updates are serialized by construction.

use crate::core_modules::background_model::BackgroundMatrix;
use crate::core_modules::thermal_frame::Frame;
use crate::core_modules::tracker::Matcher;
use crate::error::Result;
use crate::pipeline::{OccupancyPipeline, Snapshot};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Anything that can hand over thermal frames.
pub trait FrameSource: Send {
    /// The next frame if one is ready. Must not block.
    fn next_frame(&mut self) -> Option<Frame>;

    /// True once the source will never produce another frame.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Where the background survives restarts.
pub trait BackgroundStore {
    /// A previously saved background. `None` is not an error; it means "calibrate".
    fn load_background(&mut self) -> Option<BackgroundMatrix>;

    fn save_background(&mut self, background: &BackgroundMatrix) -> Result<()>;
}

/// Keeps the background in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    background: Option<BackgroundMatrix>,
}

impl MemoryStore {
    pub fn with_background(background: BackgroundMatrix) -> Self {
        Self {
            background: Some(background),
        }
    }
}

impl BackgroundStore for MemoryStore {
    fn load_background(&mut self) -> Option<BackgroundMatrix> {
        self.background.clone()
    }

    fn save_background(&mut self, background: &BackgroundMatrix) -> Result<()> {
        self.background = Some(background.clone());
        Ok(())
    }
}

/// Plays back frames recorded earlier, in order.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    frames: VecDeque<Frame>,
}

impl ReplaySource {
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl From<Vec<Frame>> for ReplaySource {
    fn from(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    fn is_exhausted(&self) -> bool {
        self.frames.is_empty()
    }
}

/// A producer task polling a `FrameSource` into a bounded channel.
pub struct FrameFeed {
    receiver: mpsc::Receiver<Frame>,
    producer: JoinHandle<u64>,
}

impl FrameFeed {
    /// Spawns the producer on the current tokio runtime. `idle_interval` is how
    /// long the producer waits after the source reports no frame ready.
    pub fn spawn<S>(mut source: S, capacity: usize, idle_interval: Duration) -> Self
    where
        S: FrameSource + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Frame>(capacity.max(1));
        let producer = tokio::spawn(async move {
            let mut produced = 0u64;
            loop {
                match source.next_frame() {
                    Some(frame) => {
                        if sender.send(frame).await.is_err() {
                            log::debug!("Frame feed consumer went away after {} frames", produced);
                            break;
                        }
                        produced += 1;
                    }
                    None if source.is_exhausted() => break,
                    None => tokio::time::sleep(idle_interval).await,
                }
            }
            produced
        });
        Self { receiver, producer }
    }

    /// The next frame, or `None` once the producer has finished and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Stops accepting frames and waits for the producer. Returns how many frames it produced.
    pub async fn shutdown(mut self) -> u64 {
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
        match self.producer.await {
            Ok(produced) => produced,
            Err(err) => {
                log::warn!("Frame producer task failed: {}", err);
                0
            }
        }
    }
}

/// Drains the feed through the pipeline, one frame at a time, handing every
/// snapshot to `on_snapshot`. Returns the number of frames processed.
pub async fn run_feed<M, F>(pipeline: &mut OccupancyPipeline<M>, feed: &mut FrameFeed, mut on_snapshot: F) -> Result<u64>
where
    M: Matcher,
    F: FnMut(&Snapshot),
{
    let mut processed = 0u64;
    while let Some(frame) = feed.recv().await {
        let snapshot = pipeline.process_frame(&frame)?;
        on_snapshot(&snapshot);
        processed += 1;
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CounterConfig;

    fn frame(millis: u64) -> Frame {
        Frame::uniform(8, 8, 20.0, Duration::from_millis(millis))
    }

    /// Answers "not ready" between frames.
    struct SlowSource {
        script: VecDeque<Option<Frame>>,
    }

    impl FrameSource for SlowSource {
        fn next_frame(&mut self) -> Option<Frame> {
            self.script.pop_front().flatten()
        }

        fn is_exhausted(&self) -> bool {
            self.script.is_empty()
        }
    }

    #[tokio::test]
    async fn feed_delivers_frames_in_order() {
        let source = ReplaySource::from((0..10).map(|i| frame(i * 100)).collect::<Vec<_>>());
        let mut feed = FrameFeed::spawn(source, 2, Duration::from_millis(1));
        let mut seen = Vec::new();
        while let Some(frame) = feed.recv().await {
            seen.push(frame.timestamp().as_millis() as u64);
        }
        assert_eq!(seen, (0..10).map(|i| i * 100).collect::<Vec<_>>());
        assert_eq!(feed.shutdown().await, 10);
    }

    #[tokio::test]
    async fn feed_waits_through_idle_polls() {
        let script = vec![None, Some(frame(0)), None, None, Some(frame(100))];
        let source = SlowSource {
            script: script.into(),
        };
        let mut feed = FrameFeed::spawn(source, 1, Duration::from_millis(1));
        assert_eq!(feed.recv().await.map(|f| f.timestamp()), Some(Duration::ZERO));
        assert_eq!(feed.recv().await.map(|f| f.timestamp()), Some(Duration::from_millis(100)));
        assert!(feed.recv().await.is_none());
    }

    #[tokio::test]
    async fn run_feed_processes_every_frame() {
        let config = CounterConfig::default();
        let background = BackgroundMatrix::from_values(8, 8, vec![20.0; 64]).unwrap();
        let mut pipeline = OccupancyPipeline::new(config, background).unwrap();
        let source = ReplaySource::from((0..5).map(|i| frame(i * 100)).collect::<Vec<_>>());
        let mut feed = FrameFeed::spawn(source, 4, Duration::from_millis(1));

        let mut snapshots = 0;
        let processed = run_feed(&mut pipeline, &mut feed, |_| snapshots += 1).await.unwrap();
        assert_eq!(processed, 5);
        assert_eq!(snapshots, 5);
        assert_eq!(pipeline.frames_processed(), 5);
    }

    #[tokio::test]
    async fn run_feed_stops_on_shape_mismatch() {
        let background = BackgroundMatrix::from_values(8, 8, vec![20.0; 64]).unwrap();
        let mut pipeline = OccupancyPipeline::new(CounterConfig::default(), background).unwrap();
        let source = ReplaySource::from(vec![Frame::uniform(4, 4, 20.0, Duration::ZERO)]);
        let mut feed = FrameFeed::spawn(source, 1, Duration::from_millis(1));
        assert!(run_feed(&mut pipeline, &mut feed, |_| {}).await.is_err());
    }

    #[test]
    fn memory_store_round_trips() {
        let mut store = MemoryStore::default();
        assert!(store.load_background().is_none());
        let background = BackgroundMatrix::from_values(8, 8, vec![21.0; 64]).unwrap();
        store.save_background(&background).unwrap();
        assert_eq!(store.load_background().unwrap().values(), background.values());
    }
}
