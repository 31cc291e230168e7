#![forbid(unsafe_code)]

//! ArchiCanvas Runtime
//!
//! Frame-driven orchestration on top of `archicanvas-render`.
//!
//! # Key Components
//!
//! - [`ViewportTracker`] - Debounced viewport to visible-bounds conversion
//! - [`DetectorHandle`] - Shared render-loop detector with circuit breakers
//! - [`RenderGuard`] - Per-layer commit tracking with threshold presets
//! - [`StabilityTracker`] - Prop/state oscillation detection
//! - [`VirtualizedCanvas`] - Per-frame virtualization pipeline with fallback
//! - [`CanvasController`] - Emergency pause and manual resume
//! - [`DiagnosticsLog`] - Typed in-memory event log
//!
//! # How it fits in the system
//! The host calls [`CanvasController::frame_at`] once per frame with the
//! diagram and viewport, renders the returned [`CanvasFrame`], and reports
//! each commit back through the controller's guards. Everything runs on the
//! host's thread; only the detector is shared.

pub mod canvas;
pub mod controller;
pub mod diagnostics;
pub mod render_guard;
pub mod render_loop;
pub mod stability;
pub mod viewport_tracker;

pub use canvas::{
    CanvasOutput, ComponentInput, ConnectionInput, FrameInput, SyncReport, VirtualizationBoundary,
    VirtualizedCanvas,
};
pub use controller::{
    CanvasCallbacks, CanvasController, CanvasFrame, ComponentDrop, ComponentMove, ControllerConfig,
    ControllerHooks, ControllerState, InfoCard, PauseReason, PausedPlaceholder, ResumeSource,
    StableCallback, UpdateDisposition,
};
pub use diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticsLog};
pub use render_guard::{GuardOutcome, GuardThresholds, RenderGuard, RenderGuardPreset};
pub use render_loop::{
    BreakerEvent, BreakerListener, CircuitBreakerState, DetectorConfig, DetectorHandle,
    DetectorStats, ListenerId, RenderLoopDetector, RenderSample, RenderVerdict,
};
pub use stability::{StabilityConfig, StabilityReport, StabilitySnapshot, StabilityTracker};
pub use viewport_tracker::{
    Viewport, ViewportAction, ViewportConfig, ViewportTracker, compute_visible_bounds,
};
