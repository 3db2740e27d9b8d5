//! Criterion benchmarks for the per-row derivation path.
//!
//! The producer runs the whole pipeline and appends to every series once per
//! instrument row, so this is the hot path of a session. Also covers the
//! consumer side: rebuilding a sliding average over a long series.
//!
//! Run with: cargo bench --bench pipeline

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mims_daq::data::moving_average::MovingAverageWindow;
use mims_daq::data::pipeline::DerivationPipeline;
use mims_daq::data::series::{SeriesId, SeriesStore};
use mims_daq::factor::FactorTable;
use mims_daq::layout::{ColumnLayout, LayoutOptions};
use std::sync::Arc;

const FACTORS: &str = "\
mz;name;Cmax;Amax;A0;k;ratio;pH;mass
2;H2;100;2,0E-10;1,0E-12;0,01;;7,2;40
3;HD;100;2,0E-10;1,0E-12;0,01
4;D2;100;2,0E-10;1,0E-12;0,01
30;NO;10;1,0E-11;1,0E-13;0,001;0,311
32;O2;250;5,0E-9;1,0E-11;0,02
36;18O2;250;5,0E-9;1,0E-11;0,02
40;Ar;12;3,0E-9;1,0E-11;0,001
44;CO2;1000;3,0E-9;2,0E-11;0,005;0,0871
44;N2O;500;2,0E-9;1,0E-11;0,004
";

fn layout() -> Arc<ColumnLayout> {
    let table = FactorTable::parse(FACTORS).unwrap();
    let channels: Vec<String> = ["40", "2", "3", "4", "12", "30", "32", "36", "44"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    Arc::new(ColumnLayout::resolve(&channels, &table, &LayoutOptions::default()).unwrap())
}

fn sample(t: usize, width: usize) -> Vec<f64> {
    let mut row = Vec::with_capacity(width);
    row.push(t as f64 / 60.0);
    row.extend((1..width).map(|c| 1.0e-10 * (1.0 + 0.01 * (c + t % 7) as f64)));
    row
}

/// Pipeline plus store append for one row, the full producer step.
fn pipeline_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_push");
    let layout = layout();
    let width = layout.raw_width();

    for rows in [100usize, 1_000] {
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| {
                let store = SeriesStore::new(layout.clone());
                let mut pipeline = DerivationPipeline::new(layout.clone(), 1.0);
                for t in 0..rows {
                    store.append(pipeline.push(sample(t, width)));
                }
                black_box(store.row_count())
            });
        });
    }
    group.finish();
}

/// Full rebuild of a sliding average after a half-width change.
fn smoothing_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("smoothing_rebuild");
    let layout = layout();
    let width = layout.raw_width();
    let store = SeriesStore::new(layout.clone());
    let mut pipeline = DerivationPipeline::new(layout, 1.0);
    for t in 0..5_000 {
        store.append(pipeline.push(sample(t, width)));
    }
    let source = store.snapshot(SeriesId::Concentration).unwrap();

    for half_width in [2usize, 10, 50] {
        group.bench_with_input(
            BenchmarkId::from_parameter(half_width),
            &half_width,
            |b, &half_width| {
                let mut window = MovingAverageWindow::new(1);
                b.iter(|| black_box(window.rebuild(half_width, &source).unwrap().len()));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, pipeline_push, smoothing_rebuild);
criterion_main!(benches);
