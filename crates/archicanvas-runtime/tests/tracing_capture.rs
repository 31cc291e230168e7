#![forbid(unsafe_code)]

//! Structured logging integration tests.
//!
//! Installs a capturing `tracing_subscriber` layer and checks that the
//! runtime emits events on its documented targets:
//!
//!   cargo test -p archicanvas-runtime --test tracing_capture

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use archicanvas_core::geometry::{AxisAlignedBox, Size};
use archicanvas_render::VirtualizationConfig;
use archicanvas_runtime::{
    CanvasController, ComponentInput, ControllerConfig, DetectorHandle, FrameInput, Viewport,
    ViewportConfig, ViewportTracker, VirtualizedCanvas,
};

use tracing_subscriber::layer::SubscriberExt;

// ============================================================================
// Test Infrastructure
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    target: String,
    level: tracing::Level,
    fields: HashMap<String, String>,
}

impl CapturedEvent {
    fn message(&self) -> &str {
        self.fields.get("message").map(String::as_str).unwrap_or("")
    }
}

struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

struct FieldVisitor(Vec<(String, String)>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor(Vec::new());
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            target: event.metadata().target().to_string(),
            level: *event.metadata().level(),
            fields: visitor.0.into_iter().collect(),
        });
    }
}

fn with_captured_events<F: FnOnce()>(f: F) -> Vec<CapturedEvent> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let layer = EventCapture {
        events: Arc::clone(&events),
    };
    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::with_default(subscriber, f);
    let captured = events.lock().unwrap().clone();
    captured
}

fn on_target<'a>(events: &'a [CapturedEvent], target: &str) -> Vec<&'a CapturedEvent> {
    events.iter().filter(|e| e.target == target).collect()
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn breaker_open_is_a_warning_on_detector_target() {
    let events = with_captured_events(|| {
        let detector = DetectorHandle::default();
        detector.mark_circuit_breaker_open_at("NodeLayer", Instant::now(), ms(3000), "loop");
    });
    let detector = on_target(&events, "archicanvas.detector");
    assert_eq!(detector.len(), 1);
    assert_eq!(detector[0].level, tracing::Level::WARN);
    assert_eq!(detector[0].fields["component"], "NodeLayer");
    assert_eq!(detector[0].message(), "circuit breaker opened");
}

#[test]
fn controller_pause_and_resume_are_logged() {
    let events = with_captured_events(|| {
        let detector = DetectorHandle::default();
        let mut controller = CanvasController::new(
            ControllerConfig::default(),
            VirtualizationConfig::default(),
            Size::new(800.0, 600.0),
            detector,
        );
        let start = Instant::now();
        for i in 0..40u64 {
            controller.commit_at(start + ms(i * 5), Some("same"));
        }
        assert!(controller.is_paused());
        controller.resume_at(start + ms(1000));
    });
    let messages: Vec<&str> = on_target(&events, "archicanvas.controller")
        .iter()
        .map(|e| e.message())
        .collect();
    assert_eq!(messages, vec!["canvas paused", "canvas resumed"]);
}

#[test]
fn fallback_is_logged_on_canvas_target() {
    let events = with_captured_events(|| {
        let mut canvas = VirtualizedCanvas::new(VirtualizationConfig::default(), Size::new(800.0, 600.0));
        let components = [ComponentInput::new(
            "broken",
            AxisAlignedBox::new(0.0, f64::INFINITY, 10.0, 10.0),
        )];
        let out = canvas.frame_at(
            FrameInput {
                components: &components,
                connections: &[],
                viewport: Viewport::default(),
                container: Size::new(800.0, 600.0),
            },
            Instant::now(),
        );
        assert!(!out.virtualized);
    });
    let canvas = on_target(&events, "archicanvas.canvas");
    assert!(
        canvas
            .iter()
            .any(|e| e.level == tracing::Level::WARN && e.fields.contains_key("error")),
        "{canvas:?}"
    );
}

#[test]
fn stale_viewport_timer_is_traced() {
    let events = with_captured_events(|| {
        let mut tracker = ViewportTracker::new(ViewportConfig::default(), Size::new(800.0, 600.0));
        let start = Instant::now();
        tracker.handle_viewport_at(Viewport::new(10.0, 0.0, 1.0), start);
        tracker.handle_viewport_at(Viewport::new(20.0, 0.0, 1.0), start + ms(5));
        assert!(tracker.fire_at(1, start + ms(100)).is_none());
    });
    let viewport = on_target(&events, "archicanvas.viewport");
    assert!(viewport.iter().any(|e| e.fields.contains_key("stale")));
}

#[test]
fn no_events_without_activity() {
    let events = with_captured_events(|| {
        let _ = DetectorHandle::default();
    });
    assert!(events.is_empty());
}
