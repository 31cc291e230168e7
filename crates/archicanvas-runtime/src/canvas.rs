#![forbid(unsafe_code)]

//! Per-frame virtualization pipeline.
//!
//! [`VirtualizedCanvas`] owns the spatial index and the viewport tracker of
//! one canvas instance. Each frame it:
//!
//! 1. Synchronizes the diagram's components and connections into the index.
//! 2. Advances the chunked index rebuild by one step.
//! 3. Feeds the viewport through the debounce and picks the visible bounds.
//! 4. Resolves the bounded visible set and assembles [`VirtualizationStats`].
//!
//! # Fallback
//!
//! Virtualization is an optimization, never a correctness requirement. Any
//! error in steps 1–4 moves the [`VirtualizationBoundary`] to `Fallback`,
//! and the frame is rendered from the full, unfiltered input instead.
//! While in fallback the pipeline does not retry for an identical attempt;
//! it retries as soon as the diagram, the query bounds (viewport, zoom or
//! container), or the configuration change.

use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::{Duration, Instant};

use archicanvas_core::geometry::{AxisAlignedBox, Size};
use archicanvas_render::lod;
use archicanvas_render::stats::duration_ms;
use archicanvas_render::{
    FrameRateMeter, ItemKind, SpatialIndex, SpatialIndexConfig, SpatialIndexError, SpatialItem,
    VirtualizationConfig, VirtualizationError, VirtualizationStats, VisibleBounds, VisibleSet,
    resolve,
};

use crate::viewport_tracker::{Viewport, ViewportConfig, ViewportTracker};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// A diagram component as supplied by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentInput {
    pub id: String,
    pub bounds: AxisAlignedBox,
}

impl ComponentInput {
    pub fn new(id: impl Into<String>, bounds: AxisAlignedBox) -> Self {
        Self {
            id: id.into(),
            bounds,
        }
    }
}

/// A connection between two component ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInput {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl ConnectionInput {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Everything the rendering layer hands the pipeline for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub components: &'a [ComponentInput],
    pub connections: &'a [ConnectionInput],
    pub viewport: Viewport,
    /// Container size in screen pixels.
    pub container: Size,
}

/// What changed during [`VirtualizedCanvas::sync_items`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Connections skipped because an endpoint is missing.
    pub skipped_connections: usize,
}

/// Result of one frame.
#[derive(Debug, Clone)]
pub struct CanvasOutput {
    pub visible: VisibleSet,
    pub stats: VirtualizationStats,
    /// Bounds used for the query (`None` on the fallback path).
    pub bounds: Option<VisibleBounds>,
    /// Whether the set came from the virtualized path.
    pub virtualized: bool,
}

// ---------------------------------------------------------------------------
// Boundary
// ---------------------------------------------------------------------------

/// Fallback state for the virtualized path.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum VirtualizationBoundary {
    /// Virtualization is working.
    #[default]
    Healthy,
    /// Virtualization failed; rendering the full set until the attempt key changes.
    Fallback {
        error: VirtualizationError,
        /// Attempt key of the frame that failed (see [`attempt_key`]).
        input_fingerprint: u64,
        since: Instant,
        /// Consecutive failed attempts.
        failures: u32,
    },
}

impl VirtualizationBoundary {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn error(&self) -> Option<&VirtualizationError> {
        match self {
            Self::Healthy => None,
            Self::Fallback { error, .. } => Some(error),
        }
    }

    /// Whether virtualization should be attempted for this attempt key.
    pub fn should_attempt(&self, fingerprint: u64) -> bool {
        match self {
            Self::Healthy => true,
            Self::Fallback {
                input_fingerprint, ..
            } => *input_fingerprint != fingerprint,
        }
    }

    fn fail(&mut self, error: VirtualizationError, fingerprint: u64, now: Instant) {
        let failures = match self {
            Self::Healthy => 1,
            Self::Fallback { failures, .. } => failures.saturating_add(1),
        };
        *self = Self::Fallback {
            error,
            input_fingerprint: fingerprint,
            since: now,
            failures,
        };
    }

    /// Return to healthy. Returns whether it was in fallback.
    fn recover(&mut self) -> bool {
        let was = self.is_fallback();
        *self = Self::Healthy;
        was
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Padding around connection segments, in world units.
const CONNECTION_PADDING: f64 = 8.0;

/// Virtualization pipeline for one canvas instance.
#[derive(Debug)]
pub struct VirtualizedCanvas {
    config: VirtualizationConfig,
    index: SpatialIndex,
    tracker: ViewportTracker,
    boundary: VirtualizationBoundary,
    fps: FrameRateMeter,
    last_render_time: Duration,
    last_stats: VirtualizationStats,
    frames: u64,
    /// Bumped by [`VirtualizedCanvas::replace_config`].
    config_generation: u64,
    /// Diagram fingerprint the index was last synchronized to.
    synced: Option<u64>,
    syncs: u64,
}

impl VirtualizedCanvas {
    pub fn new(config: VirtualizationConfig, container: Size) -> Self {
        Self::with_parts(config, SpatialIndexConfig::default(), ViewportConfig::default(), container)
    }

    /// Build with explicit index and viewport settings. The viewport buffer
    /// zone always comes from `config`.
    pub fn with_parts(
        config: VirtualizationConfig,
        index: SpatialIndexConfig,
        viewport: ViewportConfig,
        container: Size,
    ) -> Self {
        let viewport = viewport.with_buffer_zone(config.buffer_zone());
        Self {
            config,
            index: SpatialIndex::new(index),
            tracker: ViewportTracker::new(viewport, container),
            boundary: VirtualizationBoundary::Healthy,
            fps: FrameRateMeter::default(),
            last_render_time: Duration::ZERO,
            last_stats: VirtualizationStats::default(),
            frames: 0,
            config_generation: 0,
            synced: None,
            syncs: 0,
        }
    }

    pub fn config(&self) -> &VirtualizationConfig {
        &self.config
    }

    /// Replace the configuration wholesale.
    pub fn replace_config(&mut self, config: VirtualizationConfig) {
        let viewport = self
            .tracker
            .config()
            .clone()
            .with_buffer_zone(config.buffer_zone());
        let container = self.tracker.container_size();
        let live = self.tracker.live_viewport();
        self.tracker = ViewportTracker::new(viewport, container).with_initial_viewport(live);
        self.config = config;
        self.config_generation += 1;
        tracing::debug!(target: "archicanvas.canvas", summary = %self.config.summary_short(), "config replaced");
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn viewport_tracker(&self) -> &ViewportTracker {
        &self.tracker
    }

    pub fn boundary(&self) -> &VirtualizationBoundary {
        &self.boundary
    }

    pub fn last_stats(&self) -> &VirtualizationStats {
        &self.last_stats
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Number of times the index was synchronized to a new diagram.
    pub fn syncs(&self) -> u64 {
        self.syncs
    }

    /// Report how long the host spent drawing the previous frame.
    pub fn record_render_time(&mut self, elapsed: Duration) {
        self.last_render_time = elapsed;
    }

    /// Bring the index in line with the current diagram.
    ///
    /// Unchanged items are left alone; moved items are updated in place. An
    /// id used twice in one diagram (a component and a connection included)
    /// is rejected with [`SpatialIndexError::DuplicateId`].
    pub fn sync_items(
        &mut self,
        components: &[ComponentInput],
        connections: &[ConnectionInput],
    ) -> Result<SyncReport, SpatialIndexError> {
        self.synced = None;
        let mut report = SyncReport::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(components.len() + connections.len());
        let by_id: HashMap<&str, AxisAlignedBox> =
            components.iter().map(|c| (c.id.as_str(), c.bounds)).collect();

        for c in components {
            if !seen.insert(c.id.as_str()) {
                return Err(SpatialIndexError::DuplicateId(c.id.clone()));
            }
            self.upsert(SpatialItem::component(c.id.clone(), c.bounds), &mut report)?;
        }

        for e in connections {
            let (Some(a), Some(b)) = (by_id.get(e.source.as_str()), by_id.get(e.target.as_str())) else {
                report.skipped_connections += 1;
                continue;
            };
            if !seen.insert(e.id.as_str()) {
                return Err(SpatialIndexError::DuplicateId(e.id.clone()));
            }
            let bounds = AxisAlignedBox::from_segment(a.center(), b.center(), CONNECTION_PADDING);
            let item = SpatialItem::connection(e.id.clone(), e.source.clone(), e.target.clone(), bounds);
            self.upsert(item, &mut report)?;
        }

        let stale: Vec<String> = self
            .index
            .items()
            .filter(|item| !seen.contains(item.id.as_str()))
            .map(|item| item.id.clone())
            .collect();
        for id in stale {
            if self.index.remove(&id).is_some() {
                report.removed += 1;
            }
        }
        Ok(report)
    }

    fn upsert(&mut self, item: SpatialItem, report: &mut SyncReport) -> Result<(), SpatialIndexError> {
        let same_kind = self.index.get(&item.id).map(|existing| existing.kind == item.kind);
        match same_kind {
            None => {
                self.index.insert(item)?;
                report.inserted += 1;
            }
            Some(false) => {
                self.index.remove(&item.id);
                self.index.insert(item)?;
                report.updated += 1;
            }
            Some(true) => {
                if self.index.update(&item.id, item.bounds)? {
                    report.updated += 1;
                } else {
                    report.unchanged += 1;
                }
            }
        }
        Ok(())
    }

    /// Run the pipeline for one frame now.
    pub fn frame(&mut self, input: FrameInput<'_>) -> CanvasOutput {
        self.frame_at(input, Instant::now())
    }

    /// Run the pipeline for one frame at a specific time (for testing).
    pub fn frame_at(&mut self, input: FrameInput<'_>, now: Instant) -> CanvasOutput {
        self.frames += 1;
        self.fps.record_frame_at(now);

        let _ = self.tracker.set_container_size_at(input.container, now);
        let _ = self.tracker.handle_viewport_at(input.viewport, now);
        let _ = self.tracker.tick_at(now);
        if self.tracker.visible_bounds().is_none() {
            // Nothing settled yet: the first viewport applies immediately.
            let _ = self.tracker.flush();
        }

        let fingerprint = input_fingerprint(input.components, input.connections);
        let bounds = self
            .tracker
            .visible_bounds()
            .unwrap_or_else(|| self.tracker.live_bounds());
        let key = attempt_key(fingerprint, bounds, self.config_generation);
        let mut output = None;
        if self.boundary.should_attempt(key) {
            match self.virtualized(input, fingerprint, bounds) {
                Ok(out) => {
                    if self.boundary.recover() {
                        tracing::info!(target: "archicanvas.canvas", "virtualization recovered");
                    }
                    output = Some(out);
                }
                Err(error) => {
                    tracing::warn!(
                        target: "archicanvas.canvas",
                        %error,
                        "virtualization failed, rendering full set"
                    );
                    self.boundary.fail(error, key, now);
                }
            }
        }
        let output = output.unwrap_or_else(|| self.full_set(input));

        let stats = self.stats_for(&output.0, input);
        self.last_stats = stats;
        if self.config.enable_performance_monitoring() {
            tracing::debug!(
                target: "archicanvas.canvas",
                visible = stats.visible_components,
                total = stats.total_components,
                query_ms = stats.query_time,
                fps = stats.fps,
                "frame stats"
            );
        }
        if self.config.debug_mode() {
            tracing::info!(target: "archicanvas.canvas", summary = %stats.summary_short(), "frame");
        }

        CanvasOutput {
            virtualized: output.1.is_some(),
            bounds: output.1,
            visible: output.0,
            stats,
        }
    }

    fn virtualized(
        &mut self,
        input: FrameInput<'_>,
        fingerprint: u64,
        bounds: VisibleBounds,
    ) -> Result<(VisibleSet, Option<VisibleBounds>), VirtualizationError> {
        if self.synced != Some(fingerprint) {
            self.synced = None;
            self.sync_items(input.components, input.connections)?;
            self.synced = Some(fingerprint);
            self.syncs += 1;
        }
        self.index.tick();
        let set = resolve(&mut self.index, bounds, &self.config)?;
        Ok((set, Some(bounds)))
    }

    /// Unfiltered set built straight from the input.
    fn full_set(&self, input: FrameInput<'_>) -> (VisibleSet, Option<VisibleBounds>) {
        let started = Instant::now();
        let by_id: HashMap<&str, AxisAlignedBox> = input
            .components
            .iter()
            .map(|c| (c.id.as_str(), c.bounds))
            .collect();
        let components: Vec<SpatialItem> = input
            .components
            .iter()
            .map(|c| SpatialItem::component(c.id.clone(), c.bounds))
            .collect();
        let connections: Vec<SpatialItem> = input
            .connections
            .iter()
            .filter_map(|e| {
                let a = by_id.get(e.source.as_str())?;
                let b = by_id.get(e.target.as_str())?;
                let bounds = AxisAlignedBox::from_segment(a.center(), b.center(), CONNECTION_PADDING);
                Some(SpatialItem::connection(e.id.clone(), e.source.clone(), e.target.clone(), bounds))
            })
            .collect();
        let lod = lod::select(input.viewport.zoom, self.config.lod_thresholds());
        let set = VisibleSet {
            total_visible: components.len() + connections.len(),
            candidate_components: components.len(),
            components,
            connections,
            is_limited: false,
            lod: Some(lod),
            query_time: started.elapsed(),
        };
        (set, None)
    }

    fn stats_for(&self, set: &VisibleSet, input: FrameInput<'_>) -> VirtualizationStats {
        let ids: HashSet<&str> = input.components.iter().map(|c| c.id.as_str()).collect();
        let total_connections = input
            .connections
            .iter()
            .filter(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str()))
            .count();
        VirtualizationStats {
            visible_components: set.components.len(),
            visible_connections: set.connections.len(),
            total_components: input.components.len(),
            total_connections,
            query_time: duration_ms(set.query_time),
            render_time: duration_ms(self.last_render_time),
            memory_usage: self.index.approx_memory_bytes() as u64,
            fps: self.fps.fps(),
            quality_level: set
                .lod
                .map(|l| l.level)
                .unwrap_or(archicanvas_render::LodLevel::High),
        }
    }
}

/// Order-sensitive hash of the diagram input.
pub fn input_fingerprint(components: &[ComponentInput], connections: &[ConnectionInput]) -> u64 {
    let mut h = DefaultHasher::new();
    components.len().hash(&mut h);
    for c in components {
        c.id.hash(&mut h);
        for v in [c.bounds.x, c.bounds.y, c.bounds.width, c.bounds.height] {
            v.to_bits().hash(&mut h);
        }
    }
    connections.len().hash(&mut h);
    for e in connections {
        e.id.hash(&mut h);
        e.source.hash(&mut h);
        e.target.hash(&mut h);
    }
    h.finish()
}

/// Retry key for the fallback boundary: the diagram plus everything that
/// shapes the query.
pub fn attempt_key(fingerprint: u64, bounds: VisibleBounds, config_generation: u64) -> u64 {
    let mut h = DefaultHasher::new();
    fingerprint.hash(&mut h);
    let r = bounds.rect;
    for v in [r.x, r.y, r.width, r.height, bounds.zoom] {
        v.to_bits().hash(&mut h);
    }
    config_generation.hash(&mut h);
    h.finish()
}

/// Whether an item in a visible set is a connection with the given endpoints.
pub fn connects(item: &SpatialItem, source: &str, target: &str) -> bool {
    matches!(&item.kind, ItemKind::Connection { source: s, target: t } if s == source && t == target)
}
