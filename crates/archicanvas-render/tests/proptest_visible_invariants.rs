//! Property-based invariant tests for visible-set resolution.
//!
//! 1. Never more visible components than the cap.
//! 2. `is_limited` is set exactly when candidates exceeded the cap.
//! 3. Every visible connection has both endpoints visible.
//! 4. Every visible component intersects the visible rectangle.
//! 5. Capped components are never farther from the center than a dropped one.

use std::collections::HashSet;

use archicanvas_core::geometry::AxisAlignedBox;
use archicanvas_render::{
    ItemKind, SpatialIndex, SpatialItem, VirtualizationConfig, VisibleBounds, resolve,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Diagram {
    nodes: Vec<(i32, i32)>,
    edges: Vec<(usize, usize)>,
}

fn diagram() -> impl Strategy<Value = Diagram> {
    proptest::collection::vec((-400i32..400, -400i32..400), 1..80).prop_flat_map(|nodes| {
        let n = nodes.len();
        let edges = proptest::collection::vec((0..n, 0..n), 0..60);
        (Just(nodes), edges).prop_map(|(nodes, edges)| Diagram { nodes, edges })
    })
}

fn view() -> impl Strategy<Value = VisibleBounds> {
    (-300i32..300, -300i32..300, 1i32..400, 1i32..400).prop_map(|(x, y, w, h)| {
        VisibleBounds::new(
            AxisAlignedBox::new(f64::from(x), f64::from(y), f64::from(w), f64::from(h)),
            1.0,
        )
    })
}

fn node_box(x: i32, y: i32) -> AxisAlignedBox {
    AxisAlignedBox::new(f64::from(x), f64::from(y), 20.0, 10.0)
}

fn build(d: &Diagram) -> SpatialIndex {
    let mut index = SpatialIndex::default();
    for (i, &(x, y)) in d.nodes.iter().enumerate() {
        index
            .insert(SpatialItem::component(format!("n{i}"), node_box(x, y)))
            .unwrap();
    }
    for (j, &(s, t)) in d.edges.iter().enumerate() {
        let a = node_box(d.nodes[s].0, d.nodes[s].1).center();
        let b = node_box(d.nodes[t].0, d.nodes[t].1).center();
        index
            .insert(SpatialItem::connection(
                format!("e{j}"),
                format!("n{s}"),
                format!("n{t}"),
                AxisAlignedBox::from_segment(a, b, 2.0),
            ))
            .unwrap();
    }
    index.tick();
    index
}

proptest! {
    #![proptest_config(ProptestConfig { max_global_rejects: 8192, ..ProptestConfig::default() })]

    #[test]
    fn cap_and_limit_flag(d in diagram(), v in view(), cap in 0usize..30) {
        let mut index = build(&d);
        let config = VirtualizationConfig::builder().with_max_visible_items(cap).build().unwrap();
        let set = resolve(&mut index, v, &config).unwrap();

        prop_assert!(set.components.len() <= cap);
        prop_assert_eq!(set.is_limited, set.candidate_components > cap);
        prop_assert_eq!(set.components.len(), set.candidate_components.min(cap));
        prop_assert_eq!(set.total_visible, set.components.len() + set.connections.len());
    }

    #[test]
    fn no_dangling_connections(d in diagram(), v in view(), cap in 0usize..30) {
        let mut index = build(&d);
        let config = VirtualizationConfig::builder().with_max_visible_items(cap).build().unwrap();
        let set = resolve(&mut index, v, &config).unwrap();

        let visible: HashSet<&str> = set.components.iter().map(|c| c.id.as_str()).collect();
        for edge in &set.connections {
            let ItemKind::Connection { source, target } = &edge.kind else {
                return Err(TestCaseError::fail("component in connection list"));
            };
            prop_assert!(visible.contains(source.as_str()), "{} missing source", edge.id);
            prop_assert!(visible.contains(target.as_str()), "{} missing target", edge.id);
        }
    }

    #[test]
    fn visible_components_intersect_view(d in diagram(), v in view()) {
        let mut index = build(&d);
        let set = resolve(&mut index, v, &VirtualizationConfig::default()).unwrap();
        for c in &set.components {
            prop_assert!(c.bounds.intersects(&v.rect));
        }
    }

    #[test]
    fn cap_prefers_nearer_components(d in diagram(), v in view(), cap in 1usize..10) {
        let mut index = build(&d);
        let config = VirtualizationConfig::builder().with_max_visible_items(cap).build().unwrap();
        let set = resolve(&mut index, v, &config).unwrap();
        prop_assume!(set.is_limited);

        let center = v.center();
        let kept: HashSet<&str> = set.components.iter().map(|c| c.id.as_str()).collect();
        let worst_kept = set
            .components
            .iter()
            .map(|c| c.bounds.center().distance(center))
            .fold(0.0f64, f64::max);
        for item in index.query(v.rect) {
            if item.is_component() && !kept.contains(item.id.as_str()) {
                prop_assert!(item.bounds.center().distance(center) >= worst_kept);
            }
        }
    }
}
