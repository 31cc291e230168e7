#![forbid(unsafe_code)]

//! Render-loop detection with a per-component circuit breaker.
//!
//! Every committed render of a tracked component is recorded as a
//! [`RenderSample`]. Two signals are computed over the component's recent
//! history:
//!
//! - **Frequency**: renders inside the trailing window of its preset,
//!   measured by summing `since_previous_ms` backwards from the newest sample.
//! - **Identity**: length of the run of consecutive samples, ending at the
//!   newest, that carry the same snapshot hash.
//!
//! Either signal over its threshold marks the component as oscillating;
//! both together recommend opening the circuit breaker.
//!
//! # Invariants
//!
//! 1. History per component is bounded by `DetectorConfig::buffer_capacity`.
//! 2. Components are isolated: one component's samples never affect another.
//! 3. An open breaker stays open until [`RenderLoopDetector::acknowledge_recovery`],
//!    unless `auto_expire` is enabled and its cooldown has elapsed.
//!
//! # Sharing
//!
//! [`DetectorHandle`] wraps the detector in `Arc<Mutex<_>>`. Listeners run
//! after the lock is released, so they may call back into the handle.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use archicanvas_core::ring::RingBuffer;

use crate::render_guard::RenderGuardPreset;

// ---------------------------------------------------------------------------
// Samples and verdicts
// ---------------------------------------------------------------------------

/// One committed render of a tracked component.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSample {
    pub component_name: String,
    pub timestamp: Instant,
    /// 1-based render ordinal for this component.
    pub render_count: u64,
    pub since_first_ms: f64,
    pub since_previous_ms: f64,
    /// Caller-supplied fingerprint of the rendered output.
    pub snapshot_hash: Option<String>,
    /// Threshold record to judge this component by.
    pub preset: RenderGuardPreset,
}

impl RenderSample {
    pub fn new(component_name: impl Into<String>, timestamp: Instant) -> Self {
        Self {
            component_name: component_name.into(),
            timestamp,
            render_count: 1,
            since_first_ms: 0.0,
            since_previous_ms: 0.0,
            snapshot_hash: None,
            preset: RenderGuardPreset::General,
        }
    }

    #[must_use]
    pub fn with_render_count(mut self, count: u64) -> Self {
        self.render_count = count;
        self
    }

    #[must_use]
    pub fn with_timing(mut self, since_first_ms: f64, since_previous_ms: f64) -> Self {
        self.since_first_ms = since_first_ms;
        self.since_previous_ms = since_previous_ms;
        self
    }

    #[must_use]
    pub fn with_snapshot_hash(mut self, hash: impl Into<String>) -> Self {
        self.snapshot_hash = Some(hash.into());
        self
    }

    #[must_use]
    pub fn with_preset(mut self, preset: RenderGuardPreset) -> Self {
        self.preset = preset;
        self
    }
}

/// Result of recording one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderVerdict {
    pub is_oscillating: bool,
    pub should_open_circuit_breaker: bool,
    /// Renders counted inside the trailing window.
    pub renders_in_window: usize,
    /// Consecutive identical snapshots ending at this render.
    pub identical_run: usize,
}

/// Breaker state for one component.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub opened_at: Instant,
    pub reason: String,
    pub cooldown: Duration,
}

impl CircuitBreakerState {
    /// Whether the cooldown has elapsed at `now`.
    pub fn cooldown_elapsed(&self, now: Instant) -> bool {
        now.checked_duration_since(self.opened_at)
            .is_some_and(|d| d >= self.cooldown)
    }
}

/// Notification sent to listeners when a breaker opens.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerEvent {
    pub component: String,
    pub reason: String,
    pub opened_at: Instant,
    pub cooldown: Duration,
    /// Other components whose breakers opened within the correlation window.
    pub correlated: Vec<String>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the render-loop detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Samples kept per component (default: 70).
    pub buffer_capacity: usize,
    /// Treat breakers whose cooldown elapsed as recovered (default: false).
    pub auto_expire: bool,
    /// Breakers opening this close together are reported as correlated
    /// (default: 1s).
    pub correlation_window: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 70,
            auto_expire: false,
            correlation_window: Duration::from_secs(1),
        }
    }
}

impl DetectorConfig {
    #[must_use]
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_auto_expire(mut self, enabled: bool) -> Self {
        self.auto_expire = enabled;
        self
    }

    #[must_use]
    pub fn with_correlation_window(mut self, window: Duration) -> Self {
        self.correlation_window = window;
        self
    }
}

/// Detector-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub tracked_components: usize,
    pub open_breakers: usize,
    pub total_renders: u64,
    pub breakers_opened: u64,
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Per-component render history and circuit breakers.
#[derive(Debug)]
pub struct RenderLoopDetector {
    config: DetectorConfig,
    history: HashMap<String, RingBuffer<RenderSample>>,
    breakers: HashMap<String, CircuitBreakerState>,
    total_renders: u64,
    breakers_opened: u64,
}

impl Default for RenderLoopDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl RenderLoopDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
            breakers: HashMap::new(),
            total_renders: 0,
            breakers_opened: 0,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Start tracking a component with an empty history.
    pub fn register(&mut self, name: &str) {
        let capacity = self.config.buffer_capacity;
        self.history
            .entry(name.to_string())
            .or_insert_with(|| RingBuffer::new(capacity));
    }

    /// Record one render and evaluate both signals.
    pub fn record_render(&mut self, sample: RenderSample) -> RenderVerdict {
        self.total_renders += 1;
        let thresholds = sample.preset.thresholds();
        let capacity = self.config.buffer_capacity;
        let ring = self
            .history
            .entry(sample.component_name.clone())
            .or_insert_with(|| RingBuffer::new(capacity));
        ring.push(sample);

        let window_ms = thresholds.window.as_secs_f64() * 1000.0;
        let renders_in_window = renders_in_window(ring, window_ms);
        let identical_run = identical_run(ring);

        let frequency = renders_in_window > thresholds.max_renders_in_window;
        let identity = identical_run > thresholds.max_identical_renders;
        RenderVerdict {
            is_oscillating: frequency || identity,
            should_open_circuit_breaker: frequency && identity,
            renders_in_window,
            identical_run,
        }
    }

    /// Open the breaker for `name`. Returns the correlated components when
    /// the breaker was newly opened, `None` when it was already open.
    pub fn mark_circuit_breaker_open(
        &mut self,
        name: &str,
        opened_at: Instant,
        cooldown: Duration,
        reason: impl Into<String>,
    ) -> Option<Vec<String>> {
        if self.breakers.get(name).is_some_and(|b| b.is_open) {
            return None;
        }
        let window = self.config.correlation_window;
        let mut correlated: Vec<String> = self
            .breakers
            .iter()
            .filter(|(other, b)| {
                other.as_str() != name
                    && b.is_open
                    && opened_at
                        .checked_duration_since(b.opened_at)
                        .or_else(|| b.opened_at.checked_duration_since(opened_at))
                        .is_some_and(|d| d <= window)
            })
            .map(|(other, _)| other.clone())
            .collect();
        correlated.sort();

        self.breakers.insert(
            name.to_string(),
            CircuitBreakerState {
                is_open: true,
                opened_at,
                reason: reason.into(),
                cooldown,
            },
        );
        self.breakers_opened += 1;
        Some(correlated)
    }

    /// Close the breaker for `name` and clear its history.
    ///
    /// Returns whether a breaker was open.
    pub fn acknowledge_recovery(&mut self, name: &str) -> bool {
        if let Some(ring) = self.history.get_mut(name) {
            ring.clear();
        }
        self.breakers.remove(name).is_some_and(|b| b.is_open)
    }

    /// Whether the component's breaker is open.
    pub fn is_component_flagged(&self, name: &str) -> bool {
        self.breakers.get(name).is_some_and(|b| b.is_open)
    }

    /// Like [`Self::is_component_flagged`], but with `auto_expire` enabled a
    /// breaker whose cooldown elapsed is cleared and reported as recovered.
    pub fn is_component_flagged_at(&mut self, name: &str, now: Instant) -> bool {
        let Some((is_open, expired)) = self
            .breakers
            .get(name)
            .map(|b| (b.is_open, b.cooldown_elapsed(now)))
        else {
            return false;
        };
        if self.config.auto_expire && expired {
            self.acknowledge_recovery(name);
            return false;
        }
        is_open
    }

    pub fn circuit_breaker(&self, name: &str) -> Option<&CircuitBreakerState> {
        self.breakers.get(name)
    }

    /// Names of components with an open breaker, sorted.
    pub fn flagged_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .iter()
            .filter(|(_, b)| b.is_open)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Samples currently retained for `name`, oldest first.
    pub fn samples(&self, name: &str) -> Vec<&RenderSample> {
        self.history
            .get(name)
            .map(|ring| ring.iter().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            tracked_components: self.history.len(),
            open_breakers: self.breakers.values().filter(|b| b.is_open).count(),
            total_renders: self.total_renders,
            breakers_opened: self.breakers_opened,
        }
    }

    /// Drop all history and breakers.
    pub fn reset(&mut self) {
        self.history.clear();
        self.breakers.clear();
        self.total_renders = 0;
        self.breakers_opened = 0;
    }
}

fn renders_in_window(ring: &RingBuffer<RenderSample>, window_ms: f64) -> usize {
    let mut count = 0;
    let mut elapsed = 0.0;
    for sample in ring.iter_newest() {
        count += 1;
        elapsed += sample.since_previous_ms;
        if elapsed > window_ms {
            break;
        }
    }
    count
}

fn identical_run(ring: &RingBuffer<RenderSample>) -> usize {
    let Some(hash) = ring.newest().and_then(|s| s.snapshot_hash.as_deref()) else {
        return 0;
    };
    ring.iter_newest()
        .take_while(|s| s.snapshot_hash.as_deref() == Some(hash))
        .count()
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Callback invoked when a breaker opens.
pub type BreakerListener = Arc<dyn Fn(&BreakerEvent) + Send + Sync>;

/// Identifies a subscribed listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Shared {
    detector: RenderLoopDetector,
    listeners: Vec<(ListenerId, BreakerListener)>,
    next_listener: u64,
}

/// Cloneable, thread-safe handle to one shared detector.
#[derive(Clone)]
pub struct DetectorHandle {
    inner: Arc<Mutex<Shared>>,
}

impl fmt::Debug for DetectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.lock();
        f.debug_struct("DetectorHandle")
            .field("stats", &shared.detector.stats())
            .field("listeners", &shared.listeners.len())
            .finish()
    }
}

impl Default for DetectorHandle {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl DetectorHandle {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Shared {
                detector: RenderLoopDetector::new(config),
                listeners: Vec::new(),
                next_listener: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a closure against the detector while holding the lock.
    pub fn with_detector<R>(&self, f: impl FnOnce(&RenderLoopDetector) -> R) -> R {
        f(&self.lock().detector)
    }

    pub fn register(&self, name: &str) {
        self.lock().detector.register(name);
    }

    pub fn record_render(&self, sample: RenderSample) -> RenderVerdict {
        self.lock().detector.record_render(sample)
    }

    /// Open a breaker and notify listeners. Returns false if it was already open.
    pub fn mark_circuit_breaker_open_at(
        &self,
        name: &str,
        opened_at: Instant,
        cooldown: Duration,
        reason: impl Into<String>,
    ) -> bool {
        let reason = reason.into();
        let (correlated, listeners) = {
            let mut shared = self.lock();
            let Some(correlated) =
                shared
                    .detector
                    .mark_circuit_breaker_open(name, opened_at, cooldown, reason.clone())
            else {
                return false;
            };
            let listeners: Vec<BreakerListener> =
                shared.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            (correlated, listeners)
        };

        tracing::warn!(
            target: "archicanvas.detector",
            component = name,
            reason = %reason,
            cooldown_ms = cooldown.as_millis() as u64,
            correlated = correlated.len(),
            "circuit breaker opened"
        );

        let event = BreakerEvent {
            component: name.to_string(),
            reason,
            opened_at,
            cooldown,
            correlated,
        };
        for listener in listeners {
            listener(&event);
        }
        true
    }

    pub fn mark_circuit_breaker_open(&self, name: &str, cooldown: Duration, reason: impl Into<String>) -> bool {
        self.mark_circuit_breaker_open_at(name, Instant::now(), cooldown, reason)
    }

    pub fn acknowledge_recovery(&self, name: &str) -> bool {
        let was_open = self.lock().detector.acknowledge_recovery(name);
        if was_open {
            tracing::info!(target: "archicanvas.detector", component = name, "circuit breaker recovered");
        }
        was_open
    }

    pub fn is_component_flagged(&self, name: &str) -> bool {
        self.lock().detector.is_component_flagged(name)
    }

    pub fn is_component_flagged_at(&self, name: &str, now: Instant) -> bool {
        self.lock().detector.is_component_flagged_at(name, now)
    }

    pub fn circuit_breaker(&self, name: &str) -> Option<CircuitBreakerState> {
        self.lock().detector.circuit_breaker(name).cloned()
    }

    pub fn flagged_components(&self) -> Vec<String> {
        self.lock().detector.flagged_components()
    }

    pub fn stats(&self) -> DetectorStats {
        self.lock().detector.stats()
    }

    pub fn reset(&self) {
        self.lock().detector.reset();
    }

    /// Subscribe to breaker-open events.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&BreakerEvent) + Send + Sync + 'static,
    {
        let mut shared = self.lock();
        let id = ListenerId(shared.next_listener);
        shared.next_listener += 1;
        shared.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut shared = self.lock();
        let before = shared.listeners.len();
        shared.listeners.retain(|(lid, _)| *lid != id);
        shared.listeners.len() != before
    }
}
