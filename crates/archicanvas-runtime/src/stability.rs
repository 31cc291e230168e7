#![forbid(unsafe_code)]

//! Prop/state oscillation tracking.
//!
//! Complements the render-loop detector: instead of counting renders it
//! compares successive prop and state snapshots field by field and looks for
//! values that keep toggling within a small set.
//!
//! A field is **unstable** when, over its last `window` values:
//! - it changed at least `min_changes` times,
//! - it took at most `max_distinct` distinct values, and
//! - it returned to a value it had already left (a toggle, not a convergence).
//!
//! A freeze is recommended when some field is unstable and the mean interval
//! between the component's recent renders is at most `max_mean_interval`.

use std::collections::HashMap;
use std::time::Duration;

use archicanvas_core::ring::RingBuffer;
use serde::Serialize;
use serde_json::{Map, Value};

/// Configuration for the stability tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilityConfig {
    /// Samples inspected per field (default: 6).
    pub window: usize,
    /// Changes needed within the window (default: 3).
    pub min_changes: usize,
    /// Largest value set still considered oscillation (default: 3).
    pub max_distinct: usize,
    /// Mean render interval at or below which a freeze is recommended
    /// (default: 16ms).
    pub max_mean_interval: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            window: 6,
            min_changes: 3,
            max_distinct: 3,
            max_mean_interval: Duration::from_millis(16),
        }
    }
}

impl StabilityConfig {
    #[must_use]
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_min_changes(mut self, changes: usize) -> Self {
        self.min_changes = changes;
        self
    }

    #[must_use]
    pub fn with_max_distinct(mut self, distinct: usize) -> Self {
        self.max_distinct = distinct;
        self
    }

    #[must_use]
    pub fn with_max_mean_interval(mut self, interval: Duration) -> Self {
        self.max_mean_interval = interval;
        self
    }
}

/// Props, state, and timing of one render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StabilitySnapshot {
    pub props: Map<String, Value>,
    pub state: Map<String, Value>,
    /// Milliseconds since the component's previous render.
    pub since_previous_ms: f64,
}

impl StabilitySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_prop(mut self, name: impl Into<String>, value: Value) -> Self {
        self.props.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_state(mut self, name: impl Into<String>, value: Value) -> Self {
        self.state.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_interval_ms(mut self, ms: f64) -> Self {
        self.since_previous_ms = ms;
        self
    }
}

/// Verdict for the latest snapshot of a component.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityReport {
    /// Unstable field names, sorted; state fields carry a `state.` prefix.
    pub unstable_props: Vec<String>,
    pub should_freeze: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeze_reason: Option<String>,
}

#[derive(Debug)]
struct ComponentStability {
    fields: HashMap<String, RingBuffer<Value>>,
    intervals: RingBuffer<f64>,
    last_report: StabilityReport,
}

/// Tracks field oscillation for any number of components.
#[derive(Debug, Default)]
pub struct StabilityTracker {
    config: StabilityConfig,
    components: HashMap<String, ComponentStability>,
}

impl StabilityTracker {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            components: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// Record a snapshot for `component` and judge its stability.
    pub fn track(&mut self, component: &str, snapshot: &StabilitySnapshot) -> StabilityReport {
        let window = self.config.window.max(2);
        let entry = self
            .components
            .entry(component.to_string())
            .or_insert_with(|| ComponentStability {
                fields: HashMap::new(),
                intervals: RingBuffer::new(window),
                last_report: StabilityReport::default(),
            });

        entry.intervals.push(snapshot.since_previous_ms.max(0.0));
        let named = snapshot
            .props
            .iter()
            .map(|(k, v)| (k.clone(), v))
            .chain(snapshot.state.iter().map(|(k, v)| (format!("state.{k}"), v)));
        for (name, value) in named {
            entry
                .fields
                .entry(name)
                .or_insert_with(|| RingBuffer::new(window))
                .push(value.clone());
        }

        let mut unstable_props: Vec<String> = entry
            .fields
            .iter()
            .filter(|(_, history)| is_oscillating(history, &self.config))
            .map(|(name, _)| name.clone())
            .collect();
        unstable_props.sort();

        let mean_interval = mean(&entry.intervals);
        let limit_ms = self.config.max_mean_interval.as_secs_f64() * 1000.0;
        let should_freeze = !unstable_props.is_empty() && mean_interval <= limit_ms;
        let freeze_reason = should_freeze.then(|| {
            format!(
                "{} oscillating at a mean interval of {:.1}ms",
                unstable_props.join(", "),
                mean_interval
            )
        });

        let report = StabilityReport {
            unstable_props,
            should_freeze,
            freeze_reason,
        };
        if report.should_freeze {
            tracing::debug!(
                target: "archicanvas.stability",
                component,
                fields = ?report.unstable_props,
                mean_interval_ms = mean_interval,
                "freeze recommended"
            );
        }
        entry.last_report = report.clone();
        report
    }

    /// Latest report for `component`, if it was tracked.
    pub fn last_report(&self, component: &str) -> Option<&StabilityReport> {
        self.components.get(component).map(|c| &c.last_report)
    }

    /// Forget one component.
    pub fn reset(&mut self, component: &str) {
        self.components.remove(component);
    }

    /// Forget every component.
    pub fn reset_all(&mut self) {
        self.components.clear();
    }

    pub fn tracked_components(&self) -> usize {
        self.components.len()
    }
}

fn is_oscillating(history: &RingBuffer<Value>, config: &StabilityConfig) -> bool {
    let values: Vec<&Value> = history.iter().collect();
    let changes = values.windows(2).filter(|w| w[0] != w[1]).count();
    if changes < config.min_changes {
        return false;
    }

    let mut distinct: Vec<&Value> = Vec::new();
    for v in &values {
        if !distinct.contains(v) {
            distinct.push(v);
        }
    }
    if distinct.len() > config.max_distinct {
        return false;
    }

    // More runs than distinct values means some value came back.
    let runs = changes + 1;
    runs > distinct.len()
}

fn mean(values: &RingBuffer<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
