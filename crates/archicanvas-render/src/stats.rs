#![forbid(unsafe_code)]

//! Per-frame virtualization statistics and a frame-rate meter.

use std::time::{Duration, Instant};

use archicanvas_core::ring::RingBuffer;
use serde::{Deserialize, Serialize};

use crate::lod::LodLevel;

/// Frames the meter averages over.
pub const FPS_WINDOW: usize = 60;

/// Statistics handed to the rendering layer after each frame.
///
/// Times are milliseconds; memory is bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualizationStats {
    pub visible_components: usize,
    pub visible_connections: usize,
    pub total_components: usize,
    pub total_connections: usize,
    pub query_time: f64,
    pub render_time: f64,
    pub memory_usage: u64,
    pub fps: f64,
    pub quality_level: LodLevel,
}

impl Default for VirtualizationStats {
    fn default() -> Self {
        Self {
            visible_components: 0,
            visible_connections: 0,
            total_components: 0,
            total_connections: 0,
            query_time: 0.0,
            render_time: 0.0,
            memory_usage: 0,
            fps: 0.0,
            quality_level: LodLevel::High,
        }
    }
}

impl VirtualizationStats {
    /// Fraction of components culled this frame (0.0 when there are none).
    pub fn culled_ratio(&self) -> f64 {
        if self.total_components == 0 {
            return 0.0;
        }
        1.0 - self.visible_components as f64 / self.total_components as f64
    }

    /// One-line summary for a debug overlay.
    #[must_use]
    pub fn summary_short(&self) -> String {
        format!(
            "{}/{} nodes · {}/{} edges · q {:.2}ms · r {:.2}ms · {:.0} fps · {}",
            self.visible_components,
            self.total_components,
            self.visible_connections,
            self.total_connections,
            self.query_time,
            self.render_time,
            self.fps,
            self.quality_level.as_str(),
        )
    }
}

/// Convert a duration to fractional milliseconds.
#[inline]
pub fn duration_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Frames-per-second estimate over the last [`FPS_WINDOW`] frame timestamps.
#[derive(Debug, Clone)]
pub struct FrameRateMeter {
    frames: RingBuffer<Instant>,
}

impl Default for FrameRateMeter {
    fn default() -> Self {
        Self::new(FPS_WINDOW)
    }
}

impl FrameRateMeter {
    pub fn new(window: usize) -> Self {
        Self {
            frames: RingBuffer::new(window.max(2)),
        }
    }

    /// Record a frame presented at `now`.
    pub fn record_frame_at(&mut self, now: Instant) {
        self.frames.push(now);
    }

    /// Record a frame presented now.
    pub fn record_frame(&mut self) {
        self.record_frame_at(Instant::now());
    }

    /// Average frames per second across the window; 0.0 until two frames exist.
    pub fn fps(&self) -> f64 {
        let (Some(oldest), Some(newest)) = (self.frames.oldest(), self.frames.newest()) else {
            return 0.0;
        };
        let span = newest.saturating_duration_since(*oldest).as_secs_f64();
        if self.frames.len() < 2 || span <= 0.0 {
            return 0.0;
        }
        (self.frames.len() - 1) as f64 / span
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }
}
