#![forbid(unsafe_code)]

//! Canvas controller with emergency pause.
//!
//! The controller sits between the rendering host and the virtualization
//! pipeline. It owns the render guards of the canvas layers, feeds the
//! stability tracker, and flips into a paused state when any of them reports
//! runaway rendering.
//!
//! # State Machine
//!
//! ```text
//!            guard trip / breaker event / own name flagged / freeze
//!   Running ───────────────────────────────────────────────────────▶ Paused
//!      ▲                                                               │
//!      └───────────── resume() or breaker acknowledged ────────────────┘
//! ```
//!
//! # Invariants
//!
//! 1. While paused, [`CanvasController::forward_update`] never forwards and
//!    [`CanvasController::frame_at`] never runs the pipeline.
//! 2. Resuming re-registers every guard, so a fresh oscillation pauses again.
//! 3. Callback identities in [`CanvasCallbacks`] only change through
//!    `replace_*`.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Breaker opened before the controller subscribed | Caught by polling the own name each frame |
//! | Breaker acknowledged elsewhere | Controller resumes on the next frame |
//! | Stability freeze | Paused until an explicit `resume()` |

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use archicanvas_core::geometry::{Point, Size};
use archicanvas_render::VirtualizationConfig;
use serde_json::{Value, json};

use crate::canvas::{CanvasOutput, ConnectionInput, FrameInput, VirtualizedCanvas};
use crate::diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticsLog};
use crate::render_guard::{GuardOutcome, RenderGuard, RenderGuardPreset};
use crate::render_loop::{BreakerEvent, DetectorHandle, ListenerId};
use crate::stability::{StabilityConfig, StabilityReport, StabilitySnapshot, StabilityTracker};

/// Title of the paused placeholder.
pub const PAUSED_TITLE: &str = "Canvas Paused";
/// Label of the resume action on the paused placeholder.
pub const RESUME_LABEL: &str = "Resume Canvas";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for [`CanvasController`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Component name the controller's own guard is tracked under
    /// (default: `"CanvasController"`).
    pub name: String,
    /// Growth factor between frames that counts as a memory spike
    /// (default: 2.0).
    pub memory_spike_factor: f64,
    /// Minimum absolute growth in bytes for a memory spike (default: 64 KiB).
    pub memory_spike_min_bytes: u64,
    /// Stability tracker settings.
    pub stability: StabilityConfig,
    /// Diagnostics log capacity (default: 512).
    pub diagnostics_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: RenderGuardPreset::CanvasController.as_str().to_string(),
            memory_spike_factor: 2.0,
            memory_spike_min_bytes: 64 * 1024,
            stability: StabilityConfig::default(),
            diagnostics_capacity: 512,
        }
    }
}

impl ControllerConfig {
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_memory_spike(mut self, factor: f64, min_bytes: u64) -> Self {
        self.memory_spike_factor = factor;
        self.memory_spike_min_bytes = min_bytes;
        self
    }

    #[must_use]
    pub fn with_stability(mut self, stability: StabilityConfig) -> Self {
        self.stability = stability;
        self
    }

    #[must_use]
    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity;
        self
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Why the controller paused.
#[derive(Debug, Clone, PartialEq)]
pub enum PauseReason {
    /// A circuit breaker opened for a component the controller guards.
    BreakerOpened { component: String, reason: String },
    /// The stability tracker recommended a freeze.
    StabilityFreeze { component: String, reason: String },
}

impl PauseReason {
    pub fn component(&self) -> &str {
        match self {
            Self::BreakerOpened { component, .. } | Self::StabilityFreeze { component, .. } => component,
        }
    }
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BreakerOpened { component, reason } => {
                write!(f, "render loop in {component}: {reason}")
            }
            Self::StabilityFreeze { component, reason } => {
                write!(f, "unstable props in {component}: {reason}")
            }
        }
    }
}

/// Controller state.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    Running,
    Paused { reason: PauseReason, since: Instant },
}

/// How the controller left the paused state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSource {
    /// `resume()` was called (the placeholder's button).
    Manual,
    /// The breaker was acknowledged or expired outside the controller.
    Acknowledged,
}

impl ResumeSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Acknowledged => "acknowledged",
        }
    }
}

/// Placeholder rendered instead of the canvas while paused.
#[derive(Debug, Clone, PartialEq)]
pub struct PausedPlaceholder {
    pub title: &'static str,
    pub message: String,
    pub action_label: &'static str,
}

/// What the host renders for one frame.
#[derive(Debug, Clone)]
pub enum CanvasFrame {
    Canvas(CanvasOutput),
    Paused(PausedPlaceholder),
}

impl CanvasFrame {
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused(_))
    }

    pub fn canvas(&self) -> Option<&CanvasOutput> {
        match self {
            Self::Canvas(out) => Some(out),
            Self::Paused(_) => None,
        }
    }
}

/// Whether an update reached the rendering tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDisposition<T> {
    Forwarded(T),
    Suppressed,
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

type OnPause = Box<dyn Fn(&PauseReason) + Send + Sync>;
type OnResume = Box<dyn Fn(ResumeSource) + Send + Sync>;
type OnDiagnostic = Box<dyn Fn(&DiagnosticEvent) + Send + Sync>;

/// Observability callbacks for the controller.
pub struct ControllerHooks {
    on_pause: Option<OnPause>,
    on_resume: Option<OnResume>,
    on_diagnostic: Option<OnDiagnostic>,
}

impl Default for ControllerHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ControllerHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHooks")
            .field("on_pause", &self.on_pause.is_some())
            .field("on_resume", &self.on_resume.is_some())
            .field("on_diagnostic", &self.on_diagnostic.is_some())
            .finish()
    }
}

impl ControllerHooks {
    #[must_use]
    pub fn new() -> Self {
        Self {
            on_pause: None,
            on_resume: None,
            on_diagnostic: None,
        }
    }

    #[must_use]
    pub fn on_pause<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PauseReason) + Send + Sync + 'static,
    {
        self.on_pause = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_resume<F>(mut self, callback: F) -> Self
    where
        F: Fn(ResumeSource) + Send + Sync + 'static,
    {
        self.on_resume = Some(Box::new(callback));
        self
    }

    /// Called for every diagnostics event the controller records.
    #[must_use]
    pub fn on_diagnostic<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.on_diagnostic = Some(Box::new(callback));
        self
    }

    fn fire_pause(&self, reason: &PauseReason) {
        if let Some(ref cb) = self.on_pause {
            cb(reason);
        }
    }

    fn fire_resume(&self, source: ResumeSource) {
        if let Some(ref cb) = self.on_resume {
            cb(source);
        }
    }

    fn fire_diagnostic(&self, event: &DiagnosticEvent) {
        if let Some(ref cb) = self.on_diagnostic {
            cb(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Stable callbacks
// ---------------------------------------------------------------------------

/// Callback whose identity survives clones.
///
/// Two handles are the same callback iff they share the allocation, which is
/// what children compare to decide whether a prop changed.
pub struct StableCallback<A> {
    inner: Arc<dyn Fn(A) + Send + Sync>,
}

impl<A> Clone for StableCallback<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for StableCallback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StableCallback")
            .field(&Arc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}

impl<A> PartialEq for StableCallback<A> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<A: 'static> StableCallback<A> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// A callback that ignores its argument.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }
}

impl<A> StableCallback<A> {
    pub fn call(&self, arg: A) {
        (self.inner)(arg);
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A component dropped from the palette.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDrop {
    pub kind: String,
    pub position: Point,
}

/// A component moved by dragging.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentMove {
    pub id: String,
    pub position: Point,
}

/// An annotation card attached to a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoCard {
    pub id: String,
    pub component_id: String,
    pub text: String,
}

macro_rules! canvas_callbacks {
    ($($field:ident, $replace:ident: $arg:ty;)*) => {
        /// Callbacks the controller forwards to the canvas layers.
        #[derive(Debug, Clone)]
        pub struct CanvasCallbacks {
            $(pub $field: StableCallback<$arg>,)*
        }

        impl Default for CanvasCallbacks {
            fn default() -> Self {
                Self {
                    $($field: StableCallback::noop(),)*
                }
            }
        }

        impl CanvasCallbacks {
            $(
                pub fn $replace<F>(&mut self, f: F)
                where
                    F: Fn($arg) + Send + Sync + 'static,
                {
                    self.$field = StableCallback::new(f);
                }
            )*
        }
    };
}

canvas_callbacks! {
    on_select, replace_on_select: Option<String>;
    on_drop, replace_on_drop: ComponentDrop;
    on_move, replace_on_move: ComponentMove;
    on_delete, replace_on_delete: String;
    on_connection_create, replace_on_connection_create: ConnectionInput;
    on_connection_update, replace_on_connection_update: ConnectionInput;
    on_connection_delete, replace_on_connection_delete: String;
    on_info_card_create, replace_on_info_card_create: InfoCard;
    on_info_card_update, replace_on_info_card_update: InfoCard;
    on_info_card_delete, replace_on_info_card_delete: String;
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

type EventQueue = Arc<Mutex<VecDeque<BreakerEvent>>>;

/// Orchestrates virtualization, render guards, and the pause state.
#[derive(Debug)]
pub struct CanvasController {
    config: ControllerConfig,
    state: ControllerState,
    canvas: VirtualizedCanvas,
    detector: DetectorHandle,
    listener: ListenerId,
    events: EventQueue,
    guard: RenderGuard,
    layers: HashMap<RenderGuardPreset, RenderGuard>,
    stability: StabilityTracker,
    diagnostics: DiagnosticsLog,
    callbacks: CanvasCallbacks,
    hooks: ControllerHooks,
    last_memory: Option<u64>,
    suppressed: u64,
}

impl CanvasController {
    pub fn new(
        config: ControllerConfig,
        virtualization: VirtualizationConfig,
        container: Size,
        detector: DetectorHandle,
    ) -> Self {
        let events: EventQueue = Arc::default();
        let queue = Arc::clone(&events);
        let listener = detector.subscribe(move |event| {
            queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(event.clone());
        });
        let guard = RenderGuard::new(config.name.clone(), RenderGuardPreset::CanvasController, detector.clone());
        Self {
            state: ControllerState::Running,
            canvas: VirtualizedCanvas::new(virtualization, container),
            listener,
            events,
            guard,
            layers: HashMap::new(),
            stability: StabilityTracker::new(config.stability.clone()),
            diagnostics: DiagnosticsLog::new(config.diagnostics_capacity),
            callbacks: CanvasCallbacks::default(),
            hooks: ControllerHooks::default(),
            last_memory: None,
            suppressed: 0,
            detector,
            config,
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: ControllerHooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_callbacks(mut self, callbacks: CanvasCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, ControllerState::Paused { .. })
    }

    pub fn canvas(&self) -> &VirtualizedCanvas {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut VirtualizedCanvas {
        &mut self.canvas
    }

    pub fn detector(&self) -> &DetectorHandle {
        &self.detector
    }

    pub fn diagnostics(&self) -> &DiagnosticsLog {
        &self.diagnostics
    }

    pub fn callbacks(&self) -> &CanvasCallbacks {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut CanvasCallbacks {
        &mut self.callbacks
    }

    /// Updates dropped while paused.
    pub fn suppressed_updates(&self) -> u64 {
        self.suppressed
    }

    // --- frames -------------------------------------------------------------

    /// Produce the frame for `input` now.
    pub fn frame(&mut self, input: FrameInput<'_>) -> CanvasFrame {
        self.frame_at(input, Instant::now())
    }

    /// Produce the frame for `input` at a specific time (for testing).
    pub fn frame_at(&mut self, input: FrameInput<'_>, now: Instant) -> CanvasFrame {
        if let Some(reason) = self.drain_breaker_events() {
            self.pause(reason, now);
        }
        if !self.is_paused() && self.detector.is_component_flagged_at(&self.config.name, now) {
            let reason = self
                .detector
                .circuit_breaker(&self.config.name)
                .map(|b| b.reason)
                .unwrap_or_default();
            self.pause(
                PauseReason::BreakerOpened {
                    component: self.config.name.clone(),
                    reason,
                },
                now,
            );
        }
        self.resume_if_acknowledged(now);

        if let ControllerState::Paused { reason, .. } = &self.state {
            return CanvasFrame::Paused(PausedPlaceholder {
                title: PAUSED_TITLE,
                message: reason.to_string(),
                action_label: RESUME_LABEL,
            });
        }

        let output = self.canvas.frame_at(input, now);
        self.check_memory(output.stats.memory_usage);
        CanvasFrame::Canvas(output)
    }

    /// Pass `update` through unless paused.
    pub fn forward_update<T>(&mut self, update: T) -> UpdateDisposition<T> {
        if self.is_paused() {
            self.suppressed += 1;
            return UpdateDisposition::Suppressed;
        }
        UpdateDisposition::Forwarded(update)
    }

    // --- guards -------------------------------------------------------------

    /// Record a commit of the controller itself.
    pub fn commit_at(&mut self, now: Instant, snapshot_hash: Option<&str>) -> GuardOutcome {
        let outcome = self.guard.commit_at(now, snapshot_hash);
        self.after_commit(outcome, self.config.name.clone(), now);
        outcome
    }

    /// Record a commit of one canvas layer.
    pub fn commit_layer_at(
        &mut self,
        preset: RenderGuardPreset,
        now: Instant,
        snapshot_hash: Option<&str>,
    ) -> GuardOutcome {
        if preset == RenderGuardPreset::CanvasController {
            return self.commit_at(now, snapshot_hash);
        }
        let detector = self.detector.clone();
        let guard = self
            .layers
            .entry(preset)
            .or_insert_with(|| RenderGuard::for_layer(preset, detector));
        let outcome = guard.commit_at(now, snapshot_hash);
        let name = guard.name().to_string();
        self.after_commit(outcome, name, now);
        outcome
    }

    fn after_commit(&mut self, outcome: GuardOutcome, component: String, now: Instant) {
        // Our own trip is handled directly; its queued event is redundant.
        let queued = self.drain_breaker_events();
        if outcome.tripped {
            let reason = self
                .detector
                .circuit_breaker(&component)
                .map(|b| b.reason)
                .unwrap_or_default();
            self.pause(PauseReason::BreakerOpened { component, reason }, now);
        } else if let Some(reason) = queued {
            self.pause(reason, now);
        }
    }

    /// Feed a props/state snapshot to the stability tracker.
    pub fn track_stability_at(
        &mut self,
        component: &str,
        snapshot: &StabilitySnapshot,
        now: Instant,
    ) -> StabilityReport {
        let report = self.stability.track(component, snapshot);
        if report.should_freeze && !self.is_paused() {
            let reason = report.freeze_reason.clone().unwrap_or_default();
            self.record(
                DiagnosticKind::StabilityWarning,
                json!({
                    "component": component,
                    "unstableProps": report.unstable_props,
                    "reason": reason,
                }),
            );
            self.pause(
                PauseReason::StabilityFreeze {
                    component: component.to_string(),
                    reason,
                },
                now,
            );
        }
        report
    }

    // --- resume -------------------------------------------------------------

    /// Resume now. Returns false if the controller was not paused.
    pub fn resume(&mut self) -> bool {
        self.resume_at(Instant::now())
    }

    /// Resume at a specific time (for testing).
    pub fn resume_at(&mut self, now: Instant) -> bool {
        self.resume_with(ResumeSource::Manual, now)
    }

    fn resume_if_acknowledged(&mut self, now: Instant) {
        let ControllerState::Paused {
            reason: PauseReason::BreakerOpened { component, .. },
            ..
        } = &self.state
        else {
            return;
        };
        if !self.detector.is_component_flagged_at(component, now) {
            self.resume_with(ResumeSource::Acknowledged, now);
        }
    }

    fn resume_with(&mut self, source: ResumeSource, now: Instant) -> bool {
        let ControllerState::Paused { reason, since } =
            std::mem::replace(&mut self.state, ControllerState::Running)
        else {
            return false;
        };

        // Breaker events for what we are recovering from are stale now.
        let _ = self.drain_breaker_events();
        self.guard.recover();
        for guard in self.layers.values_mut() {
            guard.recover();
        }
        self.stability.reset_all();

        let paused_for = now.checked_duration_since(since).unwrap_or(Duration::ZERO);
        tracing::info!(
            target: "archicanvas.controller",
            controller = %self.config.name,
            source = source.as_str(),
            paused_ms = paused_for.as_millis() as u64,
            "canvas resumed"
        );
        if source == ResumeSource::Manual {
            self.record(
                DiagnosticKind::ManualResume,
                json!({
                    "controller": self.config.name,
                    "source": source.as_str(),
                    "reason": reason.to_string(),
                    "pausedMs": paused_for.as_millis() as u64,
                }),
            );
        }
        self.hooks.fire_resume(source);
        true
    }

    // --- diagnostics --------------------------------------------------------

    /// Log a user interaction on a canvas layer.
    pub fn record_interaction(&mut self, kind: &str, payload: Value) -> u64 {
        self.record(
            DiagnosticKind::CanvasLayerInteraction,
            json!({ "kind": kind, "detail": payload }),
        )
    }

    fn record(&mut self, kind: DiagnosticKind, payload: Value) -> u64 {
        let seq = self.diagnostics.record(kind, payload);
        if let Some(event) = self.diagnostics.last() {
            self.hooks.fire_diagnostic(event);
        }
        seq
    }

    fn check_memory(&mut self, current: u64) {
        let previous = self.last_memory.replace(current);
        let Some(previous) = previous else {
            return;
        };
        let growth = current.saturating_sub(previous);
        if previous > 0
            && growth >= self.config.memory_spike_min_bytes
            && current as f64 >= previous as f64 * self.config.memory_spike_factor
        {
            tracing::warn!(
                target: "archicanvas.controller",
                previous,
                current,
                "memory spike"
            );
            self.record(
                DiagnosticKind::MemorySpike,
                json!({
                    "previousBytes": previous,
                    "currentBytes": current,
                    "factor": current as f64 / previous as f64,
                }),
            );
        }
    }

    // --- internals ----------------------------------------------------------

    fn owns(&self, component: &str) -> bool {
        component == self.config.name || self.layers.values().any(|g| g.name() == component)
    }

    /// Process queued breaker events. Returns a pause reason if one of them
    /// concerns a component this controller guards.
    fn drain_breaker_events(&mut self) -> Option<PauseReason> {
        let events: Vec<BreakerEvent> = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let mut pause = None;
        for event in events {
            if !event.correlated.is_empty() {
                self.record(
                    DiagnosticKind::CanvasLayerCorrelation,
                    json!({
                        "component": event.component,
                        "correlated": event.correlated,
                        "reason": event.reason,
                    }),
                );
            }
            if pause.is_none() && self.owns(&event.component) {
                pause = Some(PauseReason::BreakerOpened {
                    component: event.component,
                    reason: event.reason,
                });
            }
        }
        pause
    }

    fn pause(&mut self, reason: PauseReason, now: Instant) {
        if self.is_paused() {
            return;
        }
        tracing::warn!(
            target: "archicanvas.controller",
            controller = %self.config.name,
            component = reason.component(),
            reason = %reason,
            "canvas paused"
        );
        self.hooks.fire_pause(&reason);
        self.state = ControllerState::Paused { reason, since: now };
    }
}

impl Drop for CanvasController {
    fn drop(&mut self) {
        self.detector.unsubscribe(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ComponentInput;
    use crate::viewport_tracker::Viewport;
    use archicanvas_core::geometry::AxisAlignedBox;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn controller(detector: DetectorHandle) -> CanvasController {
        CanvasController::new(
            ControllerConfig::default(),
            VirtualizationConfig::default(),
            Size::new(800.0, 600.0),
            detector,
        )
    }

    fn frame<'a>(components: &'a [ComponentInput]) -> FrameInput<'a> {
        FrameInput {
            components,
            connections: &[],
            viewport: Viewport::default(),
            container: Size::new(800.0, 600.0),
        }
    }

    fn components(n: usize) -> Vec<ComponentInput> {
        (0..n)
            .map(|i| ComponentInput::new(format!("c{i}"), AxisAlignedBox::new(i as f64 * 10.0, 0.0, 8.0, 8.0)))
            .collect()
    }

    fn trip_own_guard(c: &mut CanvasController, start: Instant) {
        for i in 0..40u64 {
            c.commit_at(start + ms(i * 5), Some("same"));
        }
    }

    #[test]
    fn guard_trip_pauses_and_suppresses_updates() {
        let mut c = controller(DetectorHandle::default());
        let start = Instant::now();
        assert_eq!(c.forward_update(1), UpdateDisposition::Forwarded(1));

        trip_own_guard(&mut c, start);
        assert!(c.is_paused());
        assert_eq!(c.forward_update(2), UpdateDisposition::Suppressed);
        assert_eq!(c.suppressed_updates(), 1);

        let items = components(3);
        let out = c.frame_at(frame(&items), start + ms(300));
        let CanvasFrame::Paused(placeholder) = out else {
            panic!("expected paused frame");
        };
        assert_eq!(placeholder.title, "Canvas Paused");
        assert_eq!(placeholder.action_label, "Resume Canvas");
        assert!(placeholder.message.contains("CanvasController"));
    }

    #[test]
    fn resume_reregisters_and_logs() {
        let detector = DetectorHandle::default();
        let mut c = controller(detector.clone());
        let start = Instant::now();
        trip_own_guard(&mut c, start);
        assert!(c.resume_at(start + ms(1000)));
        assert!(!c.is_paused());
        assert!(!detector.is_component_flagged("CanvasController"));
        assert_eq!(c.diagnostics().count(DiagnosticKind::ManualResume), 1);
        assert!(!c.resume_at(start + ms(1001)));

        // A fresh oscillation pauses again.
        trip_own_guard(&mut c, start + ms(5000));
        assert!(c.is_paused());
    }

    #[test]
    fn external_breaker_on_own_name_pauses_next_frame() {
        let detector = DetectorHandle::default();
        let mut c = controller(detector.clone());
        let start = Instant::now();
        detector.mark_circuit_breaker_open_at("CanvasController", start, ms(5000), "external");
        let items = components(2);
        assert!(c.frame_at(frame(&items), start).is_paused());
    }

    #[test]
    fn acknowledged_breaker_resumes() {
        let detector = DetectorHandle::default();
        let mut c = controller(detector.clone());
        let start = Instant::now();
        detector.mark_circuit_breaker_open_at("CanvasController", start, ms(5000), "external");
        let items = components(2);
        assert!(c.frame_at(frame(&items), start).is_paused());

        detector.acknowledge_recovery("CanvasController");
        let out = c.frame_at(frame(&items), start + ms(16));
        assert!(!out.is_paused());
        assert_eq!(c.diagnostics().count(DiagnosticKind::ManualResume), 0);

        // A user-driven resume after the next pause is still logged.
        detector.mark_circuit_breaker_open_at("CanvasController", start + ms(32), ms(5000), "again");
        assert!(c.frame_at(frame(&items), start + ms(32)).is_paused());
        assert!(c.resume_at(start + ms(48)));
        let resume = c.diagnostics().of_kind(DiagnosticKind::ManualResume);
        assert_eq!(resume.len(), 1);
        assert_eq!(resume[0].payload["source"], "manual");
    }

    #[test]
    fn unrelated_breakers_do_not_pause() {
        let detector = DetectorHandle::default();
        let mut c = controller(detector.clone());
        let start = Instant::now();
        detector.mark_circuit_breaker_open_at("SomethingElse", start, ms(5000), "elsewhere");
        let items = components(2);
        assert!(!c.frame_at(frame(&items), start).is_paused());
    }

    #[test]
    fn layer_trip_pauses() {
        let mut c = controller(DetectorHandle::default());
        let start = Instant::now();
        let tripped = (0..60u64)
            .map(|i| c.commit_layer_at(RenderGuardPreset::LayoutEngine, start + ms(i * 5), Some("h")))
            .any(|o| o.tripped);
        assert!(tripped);
        match c.state() {
            ControllerState::Paused { reason, .. } => assert_eq!(reason.component(), "LayoutEngine"),
            ControllerState::Running => panic!("expected pause"),
        }
    }

    #[test]
    fn stability_freeze_pauses_and_logs_warning() {
        let mut c = controller(DetectorHandle::default());
        let start = Instant::now();
        let mut report = StabilityReport::default();
        for (value, ms_) in [("A", 9.0), ("B", 3.0), ("A", 3.0), ("B", 4.0), ("A", 2.0)] {
            let snapshot = StabilitySnapshot::new()
                .with_prop("layout", json!(value))
                .with_interval_ms(ms_);
            report = c.track_stability_at("CanvasController", &snapshot, start);
        }
        assert!(report.should_freeze);
        assert!(c.is_paused());
        let warnings = c.diagnostics().of_kind(DiagnosticKind::StabilityWarning);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].payload["unstableProps"][0], "layout");

        // Freezes are not tied to a breaker, so frames stay paused.
        let items = components(1);
        assert!(c.frame_at(frame(&items), start + ms(100)).is_paused());
        assert!(c.resume_at(start + ms(200)));
    }

    #[test]
    fn correlated_layers_are_logged() {
        let detector = DetectorHandle::default();
        let mut c = controller(detector.clone());
        let start = Instant::now();
        detector.mark_circuit_breaker_open_at("NodeLayer", start, ms(3000), "a");
        detector.mark_circuit_breaker_open_at("EdgeLayer", start + ms(200), ms(3000), "b");
        let items = components(1);
        c.frame_at(frame(&items), start + ms(300));
        let events = c.diagnostics().of_kind(DiagnosticKind::CanvasLayerCorrelation);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["component"], "EdgeLayer");
        assert_eq!(events[0].payload["correlated"][0], "NodeLayer");
    }

    #[test]
    fn memory_spike_is_logged() {
        let config = ControllerConfig::default().with_memory_spike(1.5, 1);
        let mut c = CanvasController::new(
            config,
            VirtualizationConfig::default(),
            Size::new(800.0, 600.0),
            DetectorHandle::default(),
        );
        let start = Instant::now();
        let small = components(2);
        c.frame_at(frame(&small), start);
        let large = components(1000);
        c.frame_at(frame(&large), start + ms(16));
        let spikes = c.diagnostics().of_kind(DiagnosticKind::MemorySpike);
        assert_eq!(spikes.len(), 1);
        assert!(spikes[0].payload["currentBytes"].as_u64() > spikes[0].payload["previousBytes"].as_u64());
    }

    #[test]
    fn interactions_are_logged() {
        let mut c = controller(DetectorHandle::default());
        c.record_interaction("drag", json!({"id": "c1"}));
        let last = c.diagnostics().last().unwrap();
        assert_eq!(last.kind, DiagnosticKind::CanvasLayerInteraction);
        assert_eq!(last.payload["kind"], "drag");
        assert_eq!(last.payload["detail"]["id"], "c1");
    }

    #[test]
    fn callbacks_keep_identity_until_replaced() {
        let mut c = controller(DetectorHandle::default());
        let before = c.callbacks().clone();
        let items = components(2);
        c.frame_at(frame(&items), Instant::now());
        assert!(c.callbacks().on_select.ptr_eq(&before.on_select));
        assert!(c.callbacks().on_move.ptr_eq(&before.on_move));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        c.callbacks_mut().replace_on_move(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!c.callbacks().on_move.ptr_eq(&before.on_move));
        assert!(c.callbacks().on_select.ptr_eq(&before.on_select));

        let on_move = c.callbacks().on_move.clone();
        on_move.call(ComponentMove {
            id: "c1".into(),
            position: Point::new(1.0, 2.0),
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hooks_fire_on_pause_and_resume() {
        let pauses = Arc::new(AtomicUsize::new(0));
        let resumes = Arc::new(AtomicUsize::new(0));
        let (p, r) = (Arc::clone(&pauses), Arc::clone(&resumes));
        let hooks = ControllerHooks::new()
            .on_pause(move |_| {
                p.fetch_add(1, Ordering::SeqCst);
            })
            .on_resume(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            });
        let mut c = controller(DetectorHandle::default()).with_hooks(hooks);
        let start = Instant::now();
        trip_own_guard(&mut c, start);
        c.resume_at(start + ms(500));
        assert_eq!(pauses.load(Ordering::SeqCst), 1);
        assert_eq!(resumes.load(Ordering::SeqCst), 1);
        assert!(format!("{:?}", c.hooks).contains("on_pause: true"));
    }

    #[test]
    fn dropping_unsubscribes() {
        let detector = DetectorHandle::default();
        {
            let _c = controller(detector.clone());
            assert!(format!("{detector:?}").contains("listeners: 1"));
        }
        assert!(format!("{detector:?}").contains("listeners: 0"));
    }
}
