//! Fixed-rate driver standing in for a display refresh loop.

use std::ops::ControlFlow;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::features::AudioAnalysis;
use crate::clock::Clock;
use crate::config::PumpConfig;
use crate::session::SessionHandle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Ticks that produced features.
    pub frames: u64,
    /// Ticks with nothing to report yet.
    pub skipped: u64,
    pub beats: u64,
}

pub struct FramePump {
    interval: Duration,
    limit: Option<Duration>,
}

impl FramePump {
    pub fn new(fps: u32) -> Self {
        Self::from_config(&PumpConfig { fps })
    }

    pub fn from_config(config: &PumpConfig) -> Self {
        Self {
            interval: config.frame_interval(),
            limit: None,
        }
    }

    /// Stop after `limit` of wall time, whether or not frames arrived.
    pub fn with_limit(mut self, limit: Option<Duration>) -> Self {
        self.limit = limit;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Tick `handle` once per interval on the calling thread.
    ///
    /// Returns when `on_frame` breaks, the session is disposed, its playable
    /// source has ended, or the time limit has passed. Late frames are not
    /// made up for.
    pub fn run<C, F>(&self, handle: &SessionHandle<C>, mut on_frame: F) -> PumpStats
    where
        C: Clock,
        F: FnMut(&AudioAnalysis) -> ControlFlow<()>,
    {
        let mut stats = PumpStats::default();
        let started = Instant::now();
        let mut deadline = started;

        while !handle.is_disposed() && !handle.is_ended() {
            if self.limit.is_some_and(|limit| started.elapsed() >= limit) {
                break;
            }
            match handle.tick() {
                Some(frame) => {
                    stats.frames += 1;
                    if frame.beat {
                        stats.beats += 1;
                    }
                    if on_frame(&frame).is_break() {
                        break;
                    }
                }
                None => stats.skipped += 1,
            }

            deadline += self.interval;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                deadline = now;
            }
        }

        log::debug!(
            "Frame pump stopped: {} frames, {} skipped, {} beats",
            stats.frames,
            stats.skipped,
            stats.beats
        );
        stats
    }
}
