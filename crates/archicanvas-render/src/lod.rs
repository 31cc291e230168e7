#![forbid(unsafe_code)]

//! Zoom-driven level-of-detail selection.
//!
//! The canvas draws fewer decorations as the user zooms out: labels vanish
//! first, then details, and edges fall back to straight segments. Selection
//! is a pure function of the zoom factor and an ordered threshold table.
//!
//! # Invariants
//!
//! 1. Thresholds are sorted ascending by `zoom_ceiling` and their levels are
//!    non-decreasing (checked by `VirtualizationConfig::validate`).
//! 2. Given (1), increasing zoom never selects a lower level.
//! 3. A zoom above every ceiling (or a NaN zoom) selects the last threshold.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Discrete rendering quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LodLevel {
    /// Zoomed far out: shapes only.
    Low,
    /// Labels, no details.
    Medium,
    /// Everything.
    High,
}

impl LodLevel {
    /// Scale factor for optional visual work (glow, shadows, animation).
    #[inline]
    pub const fn quality_multiplier(self) -> f64 {
        match self {
            Self::Low => 0.3,
            Self::Medium => 0.7,
            Self::High => 1.0,
        }
    }

    /// Stable lowercase name for stats and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Next higher level, saturating at `High`.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }

    /// Next lower level, saturating at `Low`.
    #[must_use]
    pub fn prev(self) -> Self {
        match self {
            Self::Low | Self::Medium => Self::Low,
            Self::High => Self::Medium,
        }
    }
}

bitflags! {
    /// Decorations a renderer may draw at the selected level.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DetailFlags: u8 {
        const LABELS = 0b0000_0001;
        const DETAILS = 0b0000_0010;
        const EFFECTS = 0b0000_0100;
    }
}

/// How connection paths should be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePath {
    /// Straight segment between endpoints.
    Straight,
    /// Smoothed bezier path.
    Smooth,
}

/// One row of the level-of-detail table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LodThreshold {
    /// Largest zoom factor this row applies to.
    pub zoom_ceiling: f64,
    pub level: LodLevel,
    pub show_labels: bool,
    pub show_details: bool,
}

impl LodThreshold {
    pub const fn new(zoom_ceiling: f64, level: LodLevel, show_labels: bool, show_details: bool) -> Self {
        Self {
            zoom_ceiling,
            level,
            show_labels,
            show_details,
        }
    }

    /// Row used when the table is empty.
    pub const fn full_detail() -> Self {
        Self::new(f64::INFINITY, LodLevel::High, true, true)
    }

    #[inline]
    pub fn quality_multiplier(&self) -> f64 {
        self.level.quality_multiplier()
    }

    /// Straight edges at low detail, smooth otherwise.
    pub fn edge_path(&self) -> EdgePath {
        match self.level {
            LodLevel::Low => EdgePath::Straight,
            LodLevel::Medium | LodLevel::High => EdgePath::Smooth,
        }
    }

    /// Whether glow filters and similar effects should be drawn.
    #[inline]
    pub fn allows_effects(&self) -> bool {
        self.level == LodLevel::High
    }

    pub fn flags(&self) -> DetailFlags {
        let mut flags = DetailFlags::empty();
        flags.set(DetailFlags::LABELS, self.show_labels);
        flags.set(DetailFlags::DETAILS, self.show_details);
        flags.set(DetailFlags::EFFECTS, self.allows_effects());
        flags
    }
}

/// Default three-tier table: low up to 0.5x, medium up to 1.0x, high above.
pub fn default_thresholds() -> Vec<LodThreshold> {
    vec![
        LodThreshold::new(0.5, LodLevel::Low, false, false),
        LodThreshold::new(1.0, LodLevel::Medium, true, false),
        LodThreshold::new(2.0, LodLevel::High, true, true),
    ]
}

/// Pick the first threshold whose ceiling is at least `zoom`, else the last.
pub fn select(zoom: f64, thresholds: &[LodThreshold]) -> LodThreshold {
    thresholds
        .iter()
        .find(|t| t.zoom_ceiling >= zoom)
        .or_else(|| thresholds.last())
        .copied()
        .unwrap_or_else(LodThreshold::full_detail)
}
