#![forbid(unsafe_code)]

//! ArchiCanvas public facade crate.
//!
//! Re-exports the types a host needs to drive the canvas engine and offers a
//! prelude for day-to-day usage.

use std::fmt;

// --- Core re-exports -------------------------------------------------------

pub use archicanvas_core::geometry::{AxisAlignedBox, Point, Size};
pub use archicanvas_core::ring::RingBuffer;

// --- Render re-exports -----------------------------------------------------

pub use archicanvas_render::{
    ConfigError, DetailFlags, EdgePath, FrameRateMeter, IndexCorruption, ItemKind, LodLevel,
    LodThreshold, SpatialIndex, SpatialIndexConfig, SpatialIndexError, SpatialItem,
    VirtualizationConfig, VirtualizationConfigBuilder, VirtualizationError, VirtualizationStats,
    VisibleBounds, VisibleSet, resolve,
};

// --- Runtime re-exports ----------------------------------------------------

#[cfg(feature = "runtime")]
pub use archicanvas_runtime::{
    CanvasCallbacks, CanvasController, CanvasFrame, ComponentInput, ConnectionInput,
    ControllerConfig, ControllerHooks, DetectorConfig, DetectorHandle, DiagnosticKind,
    DiagnosticsLog, FrameInput, RenderGuard, RenderGuardPreset, StabilitySnapshot,
    StabilityTracker, Viewport, ViewportConfig, ViewportTracker, VirtualizedCanvas,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for the canvas engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Inserting or updating an item failed.
    Index(SpatialIndexError),
    /// The index bookkeeping is inconsistent.
    Corruption(IndexCorruption),
    /// A configuration value was rejected.
    Config(ConfigError),
    /// Resolving the visible set failed.
    Virtualization(VirtualizationError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(err) => write!(f, "{err}"),
            Self::Corruption(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Virtualization(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Index(err) => Some(err),
            Self::Corruption(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Virtualization(err) => Some(err),
        }
    }
}

impl From<SpatialIndexError> for Error {
    fn from(err: SpatialIndexError) -> Self {
        Self::Index(err)
    }
}

impl From<IndexCorruption> for Error {
    fn from(err: IndexCorruption) -> Self {
        Self::Corruption(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<VirtualizationError> for Error {
    fn from(err: VirtualizationError) -> Self {
        Self::Virtualization(err)
    }
}

/// Standard result type for archicanvas APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        AxisAlignedBox, Error, LodLevel, Point, Result, Size, SpatialIndex, SpatialItem,
        VirtualizationConfig, VirtualizationStats, VisibleBounds,
    };

    #[cfg(feature = "runtime")]
    pub use crate::{
        CanvasController, CanvasFrame, ComponentInput, ConnectionInput, DetectorHandle, FrameInput,
        Viewport,
    };

    pub use crate::{core, render};

    #[cfg(feature = "runtime")]
    pub use crate::runtime;
}

pub use archicanvas_core as core;
pub use archicanvas_render as render;
#[cfg(feature = "runtime")]
pub use archicanvas_runtime as runtime;
