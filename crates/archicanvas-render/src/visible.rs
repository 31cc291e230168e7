#![forbid(unsafe_code)]

//! Visible-set resolution.
//!
//! Turns a world-space visible rectangle into the bounded working set of
//! components and connections that the renderer materializes this frame.
//!
//! # Algorithm
//!
//! 1. With virtualization disabled, every indexed item is returned.
//! 2. Otherwise the index (or a linear scan, if the index is switched off)
//!    yields every item intersecting the rectangle.
//! 3. When more components than `max_visible_items` intersect, components are
//!    ordered by distance from the viewport center (ties by id) and truncated.
//! 4. A connection survives only if both endpoints survived step 3.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use archicanvas_core::geometry::{AxisAlignedBox, Point};

use crate::config::VirtualizationConfig;
use crate::lod::{self, LodThreshold};
use crate::spatial_index::{ItemKind, SpatialIndex, SpatialIndexError, SpatialItem};

/// World-space rectangle the viewport covers, buffer zone included.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleBounds {
    pub rect: AxisAlignedBox,
    /// Zoom factor the rectangle was computed at.
    pub zoom: f64,
}

impl VisibleBounds {
    pub const fn new(rect: AxisAlignedBox, zoom: f64) -> Self {
        Self { rect, zoom }
    }

    /// Center of the visible rectangle.
    #[inline]
    pub fn center(&self) -> Point {
        self.rect.center()
    }

    pub fn is_finite(&self) -> bool {
        self.rect.is_valid() && self.zoom.is_finite()
    }
}

/// Failure while resolving the visible set.
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualizationError {
    /// The visible rectangle or zoom was NaN/infinite or had negative extent.
    NonFiniteBounds(VisibleBounds),
    /// Synchronizing items into the index failed.
    Index(SpatialIndexError),
}

impl fmt::Display for VirtualizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFiniteBounds(b) => write!(
                f,
                "visible bounds are not finite: ({}, {}, {}, {}) at zoom {}",
                b.rect.x, b.rect.y, b.rect.width, b.rect.height, b.zoom
            ),
            Self::Index(err) => write!(f, "spatial index error: {err}"),
        }
    }
}

impl std::error::Error for VirtualizationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Index(err) => Some(err),
            Self::NonFiniteBounds(_) => None,
        }
    }
}

impl From<SpatialIndexError> for VirtualizationError {
    fn from(err: SpatialIndexError) -> Self {
        Self::Index(err)
    }
}

/// The per-frame working set.
#[derive(Debug, Clone, Default)]
pub struct VisibleSet {
    pub components: Vec<SpatialItem>,
    pub connections: Vec<SpatialItem>,
    /// `components.len() + connections.len()`.
    pub total_visible: usize,
    /// Whether the component cap removed any candidate.
    pub is_limited: bool,
    /// Components intersecting the rectangle before the cap.
    pub candidate_components: usize,
    /// Level of detail for the zoom the bounds were computed at.
    pub lod: Option<LodThreshold>,
    /// Wall time spent querying and filtering.
    pub query_time: Duration,
}

impl VisibleSet {
    fn finish(mut self, started: Instant) -> Self {
        self.total_visible = self.components.len() + self.connections.len();
        self.query_time = started.elapsed();
        self
    }
}

/// Resolve the bounded visible set for one frame.
///
/// Takes the index mutably only to schedule a rebuild when it fails
/// validation; the query itself still answers through the linear fallback.
pub fn resolve(
    index: &mut SpatialIndex,
    bounds: VisibleBounds,
    config: &VirtualizationConfig,
) -> Result<VisibleSet, VirtualizationError> {
    if !bounds.is_finite() {
        return Err(VirtualizationError::NonFiniteBounds(bounds));
    }
    let started = Instant::now();
    let lod = Some(lod::select(bounds.zoom, config.lod_thresholds()));

    if !config.enabled() {
        let (components, connections): (Vec<SpatialItem>, Vec<SpatialItem>) =
            index.items().cloned().partition(SpatialItem::is_component);
        let candidate_components = components.len();
        return Ok(VisibleSet {
            components,
            connections,
            candidate_components,
            lod,
            ..VisibleSet::default()
        }
        .finish(started));
    }

    if index.validate().is_err() && !index.rebuild_pending() {
        index.schedule_rebuild();
    }

    let hits = if config.enable_spatial_index() {
        index.query(bounds.rect)
    } else {
        index.query_linear(bounds.rect)
    };
    let (mut components, connections): (Vec<&SpatialItem>, Vec<&SpatialItem>) =
        hits.into_iter().partition(|item| item.is_component());

    let candidate_components = components.len();
    let cap = config.max_visible_items();
    let is_limited = candidate_components > cap;
    if is_limited {
        let center = bounds.center();
        components.sort_by(|a, b| {
            let da = a.bounds.center().distance(center);
            let db = b.bounds.center().distance(center);
            da.total_cmp(&db).then_with(|| a.id.cmp(&b.id))
        });
        components.truncate(cap);
    }

    let visible_ids: HashSet<&str> = components.iter().map(|c| c.id.as_str()).collect();
    let connections: Vec<SpatialItem> = connections
        .into_iter()
        .filter(|item| match &item.kind {
            ItemKind::Connection { source, target } => {
                visible_ids.contains(source.as_str()) && visible_ids.contains(target.as_str())
            }
            ItemKind::Component => false,
        })
        .cloned()
        .collect();
    let components: Vec<SpatialItem> = components.into_iter().cloned().collect();

    if is_limited {
        archicanvas_core::debug!(
            candidates = candidate_components,
            cap,
            "visible components capped by distance"
        );
    }

    Ok(VisibleSet {
        components,
        connections,
        is_limited,
        candidate_components,
        lod,
        ..VisibleSet::default()
    }
    .finish(started))
}
