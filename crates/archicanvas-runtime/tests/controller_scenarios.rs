#![forbid(unsafe_code)]

//! End-to-end scenarios: a host driving the controller frame by frame.

use std::time::{Duration, Instant};

use archicanvas_core::geometry::{AxisAlignedBox, Size};
use archicanvas_render::VirtualizationConfig;
use archicanvas_runtime::{
    CanvasController, CanvasFrame, ComponentInput, ConnectionInput, ControllerConfig, DetectorHandle,
    DiagnosticKind, FrameInput, RenderGuardPreset, RenderSample, RenderVerdict, UpdateDisposition, Viewport,
    ViewportAction, ViewportConfig, ViewportTracker,
};

const CONTAINER: Size = Size::new(800.0, 600.0);

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// A grid of `n * n` components, 150 units apart, each connected to its
/// right-hand neighbour.
fn grid(n: usize) -> (Vec<ComponentInput>, Vec<ConnectionInput>) {
    let mut components = Vec::with_capacity(n * n);
    let mut connections = Vec::new();
    for row in 0..n {
        for col in 0..n {
            let id = format!("n{row}_{col}");
            components.push(ComponentInput::new(
                id.clone(),
                AxisAlignedBox::new(col as f64 * 150.0, row as f64 * 150.0, 100.0, 60.0),
            ));
            if col + 1 < n {
                connections.push(ConnectionInput::new(
                    format!("e{row}_{col}"),
                    id,
                    format!("n{row}_{}", col + 1),
                ));
            }
        }
    }
    (components, connections)
}

fn controller(detector: DetectorHandle) -> CanvasController {
    let config = VirtualizationConfig::builder()
        .with_buffer_zone(0.0)
        .with_max_visible_items(40)
        .build()
        .unwrap();
    CanvasController::new(ControllerConfig::default(), config, CONTAINER, detector)
}

fn input<'a>(
    components: &'a [ComponentInput],
    connections: &'a [ConnectionInput],
    viewport: Viewport,
) -> FrameInput<'a> {
    FrameInput {
        components,
        connections,
        viewport,
        container: CONTAINER,
    }
}

#[test]
fn large_diagram_is_culled_and_capped() {
    let (components, connections) = grid(30);
    let mut c = controller(DetectorHandle::default());
    let frame = c.frame_at(input(&components, &connections, Viewport::default()), Instant::now());
    let out = frame.canvas().expect("running");

    assert!(out.virtualized);
    assert_eq!(out.stats.total_components, 900);
    assert!(out.visible.components.len() <= 40);
    assert!(out.visible.connections.iter().all(|e| e.is_connection()));

    let visible: std::collections::HashSet<&str> =
        out.visible.components.iter().map(|i| i.id.as_str()).collect();
    for edge in &out.visible.connections {
        if let archicanvas_render::ItemKind::Connection { source, target } = &edge.kind {
            assert!(visible.contains(source.as_str()) && visible.contains(target.as_str()));
        }
    }
}

#[test]
fn runaway_render_pauses_then_resume_restores_canvas() {
    let (components, connections) = grid(5);
    let detector = DetectorHandle::default();
    let mut c = controller(detector.clone());
    let start = Instant::now();

    assert!(!c.frame_at(input(&components, &connections, Viewport::default()), start).is_paused());

    // The node layer re-renders every 5ms with no visible change.
    let mut t = start;
    for _ in 0..80 {
        t += ms(5);
        c.commit_layer_at(RenderGuardPreset::NodeLayer, t, Some("unchanged"));
    }
    assert!(c.is_paused());
    assert!(detector.is_component_flagged("NodeLayer"));
    assert!(matches!(
        c.forward_update("select n0_0"),
        UpdateDisposition::Suppressed
    ));

    let frame = c.frame_at(input(&components, &connections, Viewport::default()), t + ms(16));
    match frame {
        CanvasFrame::Paused(p) => {
            assert_eq!(p.title, "Canvas Paused");
            assert!(p.message.contains("NodeLayer"));
        }
        CanvasFrame::Canvas(_) => panic!("expected the paused placeholder"),
    }

    assert!(c.resume_at(t + ms(2000)));
    assert!(!detector.is_component_flagged("NodeLayer"));
    let frame = c.frame_at(input(&components, &connections, Viewport::default()), t + ms(2016));
    assert!(!frame.is_paused());
    assert_eq!(c.diagnostics().count(DiagnosticKind::ManualResume), 1);
}

#[test]
fn oscillating_renders_open_the_breaker() {
    let detector = DetectorHandle::default();
    detector.register("X");
    let start = Instant::now();
    let mut verdict = RenderVerdict::default();
    for i in 0..69u64 {
        let mut sample = RenderSample::new("X", start + ms(i * 5))
            .with_render_count(i + 1)
            .with_timing((i * 5) as f64, if i == 0 { 0.0 } else { 5.0 });
        if i > 0 {
            sample = sample.with_snapshot_hash("stable");
        }
        verdict = detector.record_render(sample);
    }
    assert!(verdict.is_oscillating);
    assert!(verdict.should_open_circuit_breaker);

    assert!(detector.mark_circuit_breaker_open_at("X", start, ms(5000), "loop"));
    assert!(detector.is_component_flagged("X"));
    assert!(detector.acknowledge_recovery("X"));
    assert!(!detector.is_component_flagged("X"));
}

#[test]
fn stable_layers_never_trip() {
    let detector = DetectorHandle::default();
    let mut c = controller(detector.clone());
    let start = Instant::now();
    let layers = [
        RenderGuardPreset::CanvasController,
        RenderGuardPreset::NodeLayer,
        RenderGuardPreset::EdgeLayer,
        RenderGuardPreset::LayoutEngine,
        RenderGuardPreset::Virtualization,
        RenderGuardPreset::Interactions,
    ];
    for (l, preset) in layers.into_iter().enumerate() {
        for i in 0..10u64 {
            let hash = format!("{}-{i}", preset.as_str());
            let outcome = c.commit_layer_at(preset, start + ms(l as u64 * 100 + i * 5), Some(hash.as_str()));
            assert!(!outcome.tripped, "{preset:?} tripped");
        }
    }
    assert!(!c.is_paused());
    assert!(detector.flagged_components().is_empty());
}

#[test]
fn debounced_viewport_settles_once_on_last_value() {
    let config = ViewportConfig::default().with_buffer_zone(0.0);
    let mut tracker = ViewportTracker::new(config, CONTAINER);
    let start = Instant::now();
    let mut last_generation = 0;
    for i in 0..10u64 {
        let action = tracker.handle_viewport_at(Viewport::new(-(i as f64) * 10.0, 0.0, 1.0), start + ms(i * 10));
        if let ViewportAction::Deferred { generation, .. } = action {
            last_generation = generation;
        }
    }
    assert_eq!(tracker.computations(), 0);
    assert!(tracker.tick_at(start + ms(120)).is_none());

    let settled = tracker.fire_at(last_generation, start + ms(140)).expect("settled");
    assert_eq!(tracker.computations(), 1);
    assert_eq!(settled.rect.x, 90.0);
    assert_eq!(tracker.visible_bounds(), Some(settled));
}

#[test]
fn pipeline_failure_falls_back_and_recovers() {
    let (mut components, connections) = grid(4);
    let mut c = controller(DetectorHandle::default());
    let start = Instant::now();

    components[3].bounds.width = -5.0;
    let frame = c.frame_at(input(&components, &connections, Viewport::default()), start);
    let out = frame.canvas().expect("fallback still renders");
    assert!(!out.virtualized);
    assert_eq!(out.visible.components.len(), 16);
    assert!(c.canvas().boundary().is_fallback());

    components[3].bounds.width = 100.0;
    let frame = c.frame_at(input(&components, &connections, Viewport::default()), start + ms(16));
    let out = frame.canvas().expect("running");
    assert!(out.virtualized);
    assert!(!c.canvas().boundary().is_fallback());
}
