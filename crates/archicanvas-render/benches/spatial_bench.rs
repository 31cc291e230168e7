//! Benchmarks for spatial queries and visible-set resolution.
//!
//! Compares the packed tree against a linear scan and measures the full
//! resolve path (query, cap, connection filtering) on grid diagrams.
//!
//! Run with: cargo bench -p archicanvas-render --bench spatial_bench

use archicanvas_core::geometry::AxisAlignedBox;
use archicanvas_render::{
    SpatialIndex, SpatialItem, VirtualizationConfig, VisibleBounds, resolve,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

/// `n` components on a square grid plus a connection between horizontal neighbours.
fn grid(n: usize) -> SpatialIndex {
    let side = (n as f64).sqrt().ceil() as usize;
    let mut index = SpatialIndex::default();
    for i in 0..n {
        let x = (i % side) as f64 * 150.0;
        let y = (i / side) as f64 * 100.0;
        let _ = index.insert(SpatialItem::component(
            format!("c{i}"),
            AxisAlignedBox::new(x, y, 120.0, 60.0),
        ));
        if i % side != 0 {
            let _ = index.insert(SpatialItem::connection(
                format!("e{i}"),
                format!("c{}", i - 1),
                format!("c{i}"),
                AxisAlignedBox::new(x - 30.0, y + 28.0, 30.0, 4.0),
            ));
        }
    }
    index.rebuild_now();
    index
}

fn viewport() -> AxisAlignedBox {
    AxisAlignedBox::new(1000.0, 1000.0, 1920.0, 1080.0)
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial/query");

    for n in [1_000usize, 5_000, 20_000] {
        let index = grid(n);
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("tree", n), &index, |b, index| {
            b.iter(|| black_box(index.query(black_box(viewport())).len()))
        });

        group.bench_with_input(BenchmarkId::new("linear", n), &index, |b, index| {
            b.iter(|| black_box(index.query_linear(black_box(viewport())).len()))
        });
    }

    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial/resolve");
    let config = VirtualizationConfig::default();
    let capped = VirtualizationConfig::builder()
        .with_max_visible_items(50)
        .build()
        .unwrap_or_default();

    for n in [1_000usize, 20_000] {
        let mut index = grid(n);
        let bounds = VisibleBounds::new(viewport(), 1.0);

        group.bench_with_input(BenchmarkId::new("default", n), &(), |b, _| {
            b.iter(|| black_box(resolve(&mut index, bounds, &config).map(|s| s.total_visible)))
        });

        group.bench_with_input(BenchmarkId::new("cap_50", n), &(), |b, _| {
            b.iter(|| black_box(resolve(&mut index, bounds, &capped).map(|s| s.total_visible)))
        });
    }

    group.finish();
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial/rebuild");

    for n in [1_000usize, 20_000] {
        let mut index = grid(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("rebuild_now", n), &(), |b, _| {
            b.iter(|| {
                index.rebuild_now();
                black_box(index.stats().height)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_query, bench_resolve, bench_rebuild);
criterion_main!(benches);
