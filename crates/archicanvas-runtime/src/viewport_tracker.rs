#![forbid(unsafe_code)]

//! Debounced viewport tracking.
//!
//! Converts the live pan/zoom transform into a world-space visible rectangle
//! and rate-limits how often that rectangle is recomputed during continuous
//! gestures.
//!
//! # Usage
//!
//! ```ignore
//! use archicanvas_runtime::viewport_tracker::{Viewport, ViewportConfig, ViewportTracker};
//!
//! let mut tracker = ViewportTracker::new(ViewportConfig::default(), container);
//!
//! // On every pan/zoom event
//! tracker.handle_viewport(Viewport::new(-120.0, 40.0, 1.5));
//!
//! // Once per frame
//! if let Some(bounds) = tracker.tick() {
//!     // resolve the visible set against `bounds`
//! }
//! ```
//!
//! # Coordinate convention
//!
//! `screen = world * zoom + pan`. The buffer zone is given in screen pixels
//! and divided by zoom, so the prefetch margin looks the same size on screen
//! at every zoom level.
//!
//! # Invariants
//!
//! - **Latest-wins**: a newer viewport replaces the pending one; the final
//!   viewport of a gesture is always delivered once the quiet period elapses.
//! - **Trailing only**: nothing is emitted while updates keep arriving faster
//!   than `debounce`, unless `max_wait` is set and has elapsed.
//! - **Stale timers**: a generation tag that no longer matches the pending
//!   update makes [`ViewportTracker::fire_at`] a no-op.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | `debounce = 0` | Apply on every update |
//! | `zoom <= 0` or non-finite | Bounds are non-finite; the resolver rejects them |
//! | No pending update | `tick_at` returns `None` |

use std::time::{Duration, Instant};

use archicanvas_core::geometry::{AxisAlignedBox, Size};
use archicanvas_render::VisibleBounds;
use serde::{Deserialize, Serialize};

/// Pan translation and zoom factor of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }
}

impl Viewport {
    pub const fn new(x: f64, y: f64, zoom: f64) -> Self {
        Self { x, y, zoom }
    }
}

/// Visible world rectangle for `viewport` over a container of `container`
/// pixels, expanded by `buffer_zone` screen pixels on each side.
pub fn compute_visible_bounds(viewport: Viewport, container: Size, buffer_zone: f64) -> VisibleBounds {
    let zoom = viewport.zoom;
    let rect = AxisAlignedBox::new(
        -viewport.x / zoom,
        -viewport.y / zoom,
        container.width / zoom,
        container.height / zoom,
    );
    VisibleBounds::new(rect.expand(buffer_zone / zoom), zoom)
}

fn duration_since_or_zero(now: Instant, earlier: Instant) -> Duration {
    now.checked_duration_since(earlier).unwrap_or(Duration::ZERO)
}

/// Configuration for the viewport tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportConfig {
    /// Quiet period before a pending viewport is applied (default: 50ms).
    pub debounce: Duration,
    /// Upper bound on how long a continuous gesture can defer an update
    /// (default: none).
    pub max_wait: Option<Duration>,
    /// Prefetch margin in screen pixels (default: 200).
    pub buffer_zone: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            max_wait: None,
            buffer_zone: 200.0,
        }
    }
}

impl ViewportConfig {
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    #[must_use]
    pub fn with_buffer_zone(mut self, px: f64) -> Self {
        self.buffer_zone = px;
        self
    }
}

/// Action returned when a viewport update is handled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewportAction {
    /// Same as the pending or settled viewport; nothing to do.
    None,
    /// Update deferred; fire the tagged generation after the quiet period.
    Deferred {
        generation: u64,
        /// Time until the update would apply if nothing else arrives.
        after: Duration,
    },
    /// New bounds were computed immediately.
    Apply(VisibleBounds),
}

#[derive(Debug, Clone, Copy)]
struct PendingUpdate {
    generation: u64,
    first_at: Instant,
    last_at: Instant,
}

/// Tracks the live viewport and publishes debounced visible bounds.
#[derive(Debug)]
pub struct ViewportTracker {
    config: ViewportConfig,
    container: Size,
    live: Viewport,
    pending: Option<PendingUpdate>,
    generation: u64,
    settled: Option<VisibleBounds>,
    settled_viewport: Option<Viewport>,
    computations: u64,
    superseded: u64,
}

impl ViewportTracker {
    pub fn new(config: ViewportConfig, container: Size) -> Self {
        Self {
            config,
            container,
            live: Viewport::default(),
            pending: None,
            generation: 0,
            settled: None,
            settled_viewport: None,
            computations: 0,
            superseded: 0,
        }
    }

    /// Start from an initial viewport, with bounds already computed.
    #[must_use]
    pub fn with_initial_viewport(mut self, viewport: Viewport) -> Self {
        self.live = viewport;
        self.apply(viewport);
        self
    }

    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    /// Handle a raw viewport change.
    pub fn handle_viewport(&mut self, viewport: Viewport) -> ViewportAction {
        self.handle_viewport_at(viewport, Instant::now())
    }

    /// Handle a raw viewport change at a specific time (for testing).
    pub fn handle_viewport_at(&mut self, viewport: Viewport, now: Instant) -> ViewportAction {
        if self.pending.is_none() && self.settled_viewport == Some(viewport) {
            self.live = viewport;
            return ViewportAction::None;
        }
        if self.pending.is_some() && self.live == viewport {
            return ViewportAction::None;
        }
        self.live = viewport;
        self.enqueue(now)
    }

    /// Handle a container resize (pixels).
    pub fn set_container_size_at(&mut self, container: Size, now: Instant) -> ViewportAction {
        if container == self.container {
            return ViewportAction::None;
        }
        self.container = container;
        self.enqueue(now)
    }

    /// Apply the pending update if the quiet period (or `max_wait`) elapsed.
    pub fn tick(&mut self) -> Option<VisibleBounds> {
        self.tick_at(Instant::now())
    }

    /// Tick at a specific time (for testing).
    pub fn tick_at(&mut self, now: Instant) -> Option<VisibleBounds> {
        let pending = self.pending?;
        if self.due(pending, now) {
            return Some(self.apply_pending());
        }
        None
    }

    /// Timer callback for a [`ViewportAction::Deferred`] generation.
    ///
    /// Returns `None` when the generation has been superseded or the quiet
    /// period has not elapsed yet.
    pub fn fire_at(&mut self, generation: u64, now: Instant) -> Option<VisibleBounds> {
        let pending = self.pending?;
        if pending.generation != generation {
            tracing::trace!(
                target: "archicanvas.viewport",
                stale = generation,
                current = pending.generation,
                "superseded viewport timer ignored"
            );
            return None;
        }
        self.tick_at(now)
    }

    /// Apply the pending update immediately.
    pub fn flush(&mut self) -> Option<VisibleBounds> {
        self.pending?;
        Some(self.apply_pending())
    }

    /// Time until the pending update applies, if any.
    pub fn time_until_apply(&self, now: Instant) -> Option<Duration> {
        let pending = self.pending?;
        let mut remaining = self
            .config
            .debounce
            .saturating_sub(duration_since_or_zero(now, pending.last_at));
        if let Some(max_wait) = self.config.max_wait {
            remaining = remaining.min(max_wait.saturating_sub(duration_since_or_zero(now, pending.first_at)));
        }
        Some(remaining)
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Most recent raw viewport, for latency-sensitive consumers like drag.
    pub fn live_viewport(&self) -> Viewport {
        self.live
    }

    /// Bounds for the live viewport, computed now without debouncing.
    pub fn live_bounds(&self) -> VisibleBounds {
        compute_visible_bounds(self.live, self.container, self.config.buffer_zone)
    }

    /// Last published (settled) bounds.
    pub fn visible_bounds(&self) -> Option<VisibleBounds> {
        self.settled
    }

    pub fn container_size(&self) -> Size {
        self.container
    }

    /// Number of times bounds were actually computed and published.
    pub fn computations(&self) -> u64 {
        self.computations
    }

    /// Number of pending updates replaced before they applied.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    fn enqueue(&mut self, now: Instant) -> ViewportAction {
        self.generation += 1;
        let first_at = match self.pending {
            Some(prev) => {
                self.superseded += 1;
                prev.first_at
            }
            None => now,
        };
        let pending = PendingUpdate {
            generation: self.generation,
            first_at,
            last_at: now,
        };
        self.pending = Some(pending);

        if self.config.debounce.is_zero() || self.max_wait_elapsed(pending, now) {
            return ViewportAction::Apply(self.apply_pending());
        }
        ViewportAction::Deferred {
            generation: self.generation,
            after: self.time_until_apply(now).unwrap_or(self.config.debounce),
        }
    }

    fn due(&self, pending: PendingUpdate, now: Instant) -> bool {
        duration_since_or_zero(now, pending.last_at) >= self.config.debounce
            || self.max_wait_elapsed(pending, now)
    }

    fn max_wait_elapsed(&self, pending: PendingUpdate, now: Instant) -> bool {
        self.config
            .max_wait
            .is_some_and(|max| duration_since_or_zero(now, pending.first_at) >= max)
    }

    fn apply_pending(&mut self) -> VisibleBounds {
        self.pending = None;
        self.apply(self.live)
    }

    fn apply(&mut self, viewport: Viewport) -> VisibleBounds {
        let bounds = compute_visible_bounds(viewport, self.container, self.config.buffer_zone);
        self.settled = Some(bounds);
        self.settled_viewport = Some(viewport);
        self.computations += 1;
        tracing::trace!(
            target: "archicanvas.viewport",
            x = viewport.x,
            y = viewport.y,
            zoom = viewport.zoom,
            computations = self.computations,
            "visible bounds settled"
        );
        bounds
    }
}
