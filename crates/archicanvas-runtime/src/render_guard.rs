#![forbid(unsafe_code)]

//! Per-layer render guards.
//!
//! Each logical canvas layer renders at its own natural cadence, so each gets
//! its own threshold record. A [`RenderGuard`] owns the timing bookkeeping for
//! one component, turns every commit into a [`RenderSample`], and opens the
//! component's breaker when the detector recommends it.

use std::time::{Duration, Instant};

use crate::render_loop::{DetectorHandle, RenderSample, RenderVerdict};

/// Thresholds applied to one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardThresholds {
    /// Trailing window for the frequency signal.
    pub window: Duration,
    /// Renders allowed inside `window`.
    pub max_renders_in_window: usize,
    /// Consecutive identical snapshots allowed.
    pub max_identical_renders: usize,
    /// Cooldown recorded on the breaker when it opens.
    pub cooldown: Duration,
}

/// Named threshold presets, one per canvas layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderGuardPreset {
    #[default]
    General,
    CanvasController,
    NodeLayer,
    EdgeLayer,
    LayoutEngine,
    Virtualization,
    Interactions,
}

impl RenderGuardPreset {
    pub const ALL: [RenderGuardPreset; 7] = [
        Self::General,
        Self::CanvasController,
        Self::NodeLayer,
        Self::EdgeLayer,
        Self::LayoutEngine,
        Self::Virtualization,
        Self::Interactions,
    ];

    pub const fn thresholds(self) -> GuardThresholds {
        const fn t(window_ms: u64, renders: usize, identical: usize, cooldown_ms: u64) -> GuardThresholds {
            GuardThresholds {
                window: Duration::from_millis(window_ms),
                max_renders_in_window: renders,
                max_identical_renders: identical,
                cooldown: Duration::from_millis(cooldown_ms),
            }
        }
        match self {
            Self::General => t(300, 40, 25, 5_000),
            Self::CanvasController => t(300, 30, 20, 5_000),
            Self::NodeLayer => t(300, 50, 25, 3_000),
            Self::EdgeLayer => t(300, 50, 25, 3_000),
            Self::LayoutEngine => t(500, 20, 12, 10_000),
            Self::Virtualization => t(300, 60, 30, 3_000),
            Self::Interactions => t(200, 45, 25, 2_000),
        }
    }

    /// Component name a layer is tracked under by default.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "General",
            Self::CanvasController => "CanvasController",
            Self::NodeLayer => "NodeLayer",
            Self::EdgeLayer => "EdgeLayer",
            Self::LayoutEngine => "LayoutEngine",
            Self::Virtualization => "Virtualization",
            Self::Interactions => "Interactions",
        }
    }
}

/// Outcome of one guarded commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardOutcome {
    pub verdict: RenderVerdict,
    /// This commit opened the breaker.
    pub tripped: bool,
    /// The breaker is open after this commit.
    pub flagged: bool,
}

/// Tracks commits of one component and feeds them to the shared detector.
#[derive(Debug, Clone)]
pub struct RenderGuard {
    name: String,
    preset: RenderGuardPreset,
    handle: DetectorHandle,
    render_count: u64,
    first_at: Option<Instant>,
    last_at: Option<Instant>,
}

impl RenderGuard {
    pub fn new(name: impl Into<String>, preset: RenderGuardPreset, handle: DetectorHandle) -> Self {
        let name = name.into();
        handle.register(&name);
        Self {
            name,
            preset,
            handle,
            render_count: 0,
            first_at: None,
            last_at: None,
        }
    }

    /// Guard named after its preset.
    pub fn for_layer(preset: RenderGuardPreset, handle: DetectorHandle) -> Self {
        Self::new(preset.as_str(), preset, handle)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn preset(&self) -> RenderGuardPreset {
        self.preset
    }

    pub fn render_count(&self) -> u64 {
        self.render_count
    }

    /// Record a commit now.
    pub fn commit(&mut self, snapshot_hash: Option<&str>) -> GuardOutcome {
        self.commit_at(Instant::now(), snapshot_hash)
    }

    /// Record a commit at a specific time (for testing).
    pub fn commit_at(&mut self, now: Instant, snapshot_hash: Option<&str>) -> GuardOutcome {
        self.render_count += 1;
        let first = *self.first_at.get_or_insert(now);
        let since_first_ms = elapsed_ms(now, first);
        let since_previous_ms = self.last_at.map_or(0.0, |prev| elapsed_ms(now, prev));
        self.last_at = Some(now);

        let mut sample = RenderSample::new(self.name.clone(), now)
            .with_render_count(self.render_count)
            .with_timing(since_first_ms, since_previous_ms)
            .with_preset(self.preset);
        if let Some(hash) = snapshot_hash {
            sample = sample.with_snapshot_hash(hash);
        }
        let verdict = self.handle.record_render(sample);

        let mut tripped = false;
        if verdict.should_open_circuit_breaker && !self.handle.is_component_flagged(&self.name) {
            let thresholds = self.preset.thresholds();
            let reason = format!(
                "{} renders in {}ms with {} identical snapshots",
                verdict.renders_in_window,
                thresholds.window.as_millis(),
                verdict.identical_run
            );
            tripped = self
                .handle
                .mark_circuit_breaker_open_at(&self.name, now, thresholds.cooldown, reason);
        }
        let flagged = self.handle.is_component_flagged_at(&self.name, now);
        GuardOutcome {
            verdict,
            tripped,
            flagged,
        }
    }

    /// Whether this component's breaker is open.
    pub fn is_flagged(&self) -> bool {
        self.handle.is_component_flagged(&self.name)
    }

    /// Acknowledge recovery and restart timing from scratch.
    pub fn recover(&mut self) -> bool {
        self.render_count = 0;
        self.first_at = None;
        self.last_at = None;
        let was_open = self.handle.acknowledge_recovery(&self.name);
        self.handle.register(&self.name);
        was_open
    }
}

fn elapsed_ms(now: Instant, earlier: Instant) -> f64 {
    let nanos = now.checked_duration_since(earlier).unwrap_or(Duration::ZERO).as_nanos();
    nanos as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn presets_have_distinct_cadence() {
        let node = RenderGuardPreset::NodeLayer.thresholds();
        let layout = RenderGuardPreset::LayoutEngine.thresholds();
        assert!(layout.window > node.window);
        assert!(layout.max_renders_in_window < node.max_renders_in_window);
        for preset in RenderGuardPreset::ALL {
            let t = preset.thresholds();
            assert!(t.max_identical_renders <= t.max_renders_in_window, "{preset:?}");
        }
    }

    #[test]
    fn runaway_commits_trip_once() {
        let handle = DetectorHandle::default();
        let mut guard = RenderGuard::for_layer(RenderGuardPreset::CanvasController, handle.clone());
        let start = Instant::now();
        let mut trips = 0;
        for i in 0..80u64 {
            let outcome = guard.commit_at(start + ms(i * 5), Some("same"));
            if outcome.tripped {
                trips += 1;
            }
        }
        assert_eq!(trips, 1);
        assert!(guard.is_flagged());
        let breaker = handle.circuit_breaker("CanvasController").unwrap();
        assert!(breaker.reason.contains("identical"));
        assert_eq!(breaker.cooldown, RenderGuardPreset::CanvasController.thresholds().cooldown);
    }

    #[test]
    fn first_commit_has_zero_timing() {
        let handle = DetectorHandle::default();
        let mut guard = RenderGuard::new("X", RenderGuardPreset::General, handle.clone());
        let start = Instant::now();
        guard.commit_at(start, None);
        guard.commit_at(start + ms(16), None);
        let samples = handle.with_detector(|d| d.samples("X").into_iter().cloned().collect::<Vec<_>>());
        assert_eq!(samples[0].since_previous_ms, 0.0);
        assert_eq!(samples[1].since_previous_ms, 16.0);
        assert_eq!(samples[1].since_first_ms, 16.0);
        assert_eq!(samples[1].render_count, 2);
        assert_eq!(samples[1].preset, RenderGuardPreset::General);
    }

    #[test]
    fn recover_clears_flag_and_can_trip_again() {
        let handle = DetectorHandle::default();
        let mut guard = RenderGuard::for_layer(RenderGuardPreset::General, handle);
        let start = Instant::now();
        for i in 0..70u64 {
            guard.commit_at(start + ms(i * 5), Some("h"));
        }
        assert!(guard.is_flagged());
        assert!(guard.recover());
        assert!(!guard.is_flagged());
        assert_eq!(guard.render_count(), 0);

        let restart = start + Duration::from_secs(10);
        let tripped = (0..70u64)
            .map(|i| guard.commit_at(restart + ms(i * 5), Some("h")))
            .any(|o| o.tripped);
        assert!(tripped);
    }

    #[test]
    fn steady_cadence_never_trips() {
        let handle = DetectorHandle::default();
        let mut guard = RenderGuard::for_layer(RenderGuardPreset::NodeLayer, handle);
        let start = Instant::now();
        for i in 0..500u64 {
            let outcome = guard.commit_at(start + ms(i * 16), Some(format!("frame-{i}").as_str()));
            assert!(!outcome.verdict.is_oscillating);
        }
    }
}
