#![forbid(unsafe_code)]

//! Render-side virtualization: spatial index, level of detail, and the
//! visible-set resolver.

pub mod config;
pub mod lod;
pub mod spatial_index;
pub mod stats;
pub mod visible;

pub use config::{ConfigError, VirtualizationConfig, VirtualizationConfigBuilder};
pub use lod::{DetailFlags, EdgePath, LodLevel, LodThreshold};
pub use spatial_index::{
    IndexCorruption, ItemKind, RebuildProgress, RebuildTicket, SpatialIndex, SpatialIndexConfig,
    SpatialIndexError, SpatialIndexStats, SpatialItem,
};
pub use stats::{FrameRateMeter, VirtualizationStats};
pub use visible::{VirtualizationError, VisibleBounds, VisibleSet, resolve};
