//! Benchmarks du pipeline de traduction

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geo::{Coord, LineString, Polygon};
use layer_pipeline::geometry::GeometryPipeline;
use layer_pipeline::{
    ClipGeometry, DataSource, Feature, FieldSpec, FieldType, FieldValue, GeomOperation,
    GeometryKind, GeometryOpConfig, GeometryType, Layer, LayerTranslator, MemoryDataSource,
    MemoryLayer, ProgressReporter, TranslationSettings,
};

/// Polygone régulier de `vertices` sommets
fn ring(cx: f64, cy: f64, radius: f64, vertices: usize) -> Polygon<f64> {
    let mut coords: Vec<Coord<f64>> = (0..vertices)
        .map(|i| {
            let angle = i as f64 / vertices as f64 * std::f64::consts::TAU;
            Coord {
                x: cx + radius * angle.cos(),
                y: cy + radius * angle.sin(),
            }
        })
        .collect();
    coords.push(coords[0]);
    Polygon::new(LineString::new(coords), vec![])
}

fn source_layer(features: usize) -> MemoryDataSource {
    let mut layer = MemoryLayer::new("bench", GeometryKind::new(GeometryType::Polygon), None)
        .with_fields(vec![
            FieldSpec::new("id", FieldType::Integer),
            FieldSpec::new("name", FieldType::String),
        ]);
    for i in 0..features {
        let feature = Feature::with_fields(vec![
            FieldValue::Integer(i as i64),
            FieldValue::String(format!("feature-{i}")),
        ])
        .with_geometry(ring((i % 100) as f64 * 3.0, (i / 100) as f64 * 3.0, 1.0, 64));
        layer.create_feature(feature).unwrap();
    }
    MemoryDataSource::new("bench").with_layer(layer)
}

fn bench_geometry_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("geometry_ops");
    let clip = Arc::new(ClipGeometry::from_bbox(0.0, 0.0, 150.0, 150.0));

    let configs = [
        ("none", GeometryOpConfig::default()),
        (
            "segmentize",
            GeometryOpConfig {
                operation: GeomOperation::Segmentize(0.05),
                ..Default::default()
            },
        ),
        (
            "simplify",
            GeometryOpConfig {
                operation: GeomOperation::SimplifyPreserveTopology(0.1),
                ..Default::default()
            },
        ),
        (
            "clip",
            GeometryOpConfig {
                clip_source: Some(clip.clone()),
                ..Default::default()
            },
        ),
    ];

    let feature = Feature::new(0).with_geometry(ring(0.5, 0.5, 1.0, 256));
    for (name, config) in &configs {
        group.bench_with_input(BenchmarkId::from_parameter(name), config, |b, config| {
            let pipeline = GeometryPipeline::new(config);
            b.iter(|| {
                let mut feature = feature.clone();
                let outcome = pipeline.run(black_box(&mut feature), None).unwrap();
                black_box((outcome, feature))
            })
        });
    }

    group.finish();
}

fn bench_translate_layer(c: &mut Criterion) {
    let mut group = c.benchmark_group("translate_layer");
    group.sample_size(10);

    for size in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let settings = TranslationSettings {
                group_transactions: 200,
                ..Default::default()
            };
            b.iter_batched(
                || (source_layer(size), MemoryDataSource::new("out")),
                |(mut source, mut destination)| {
                    let layer = source.layer(0).unwrap();
                    let outcome = LayerTranslator::new(&settings)
                        .translate(layer, &mut destination, &mut ProgressReporter::disabled())
                        .unwrap();
                    black_box(outcome)
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_geometry_ops, bench_translate_layer);
criterion_main!(benches);
