/*!
Performance benchmarks for the satstore persistence pipeline.
*/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use satstore_core::format::RasterMetadata;
use satstore_core::{
    ArrayWriter, Band, BandSelection, FormatWriter, ImageArtifact, PersistencePipeline,
    ProviderCatalog, RasterCompression, RasterWriter, SaveConfiguration,
};

fn bands(size: usize) -> Vec<Band> {
    ["red", "green", "blue", "nir"]
        .iter()
        .enumerate()
        .map(|(i, label)| {
            Band::new(
                *label,
                Array2::from_shape_fn((size, size), |(r, c)| ((r * size + c) % 4096) as f32 + i as f32),
            )
        })
        .collect()
}

fn bench_encoders(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for size in [256usize, 1024] {
        let bands = bands(size);
        let metadata = RasterMetadata::default();
        group.throughput(Throughput::Bytes((bands.len() * size * size * 4) as u64));

        for compression in [RasterCompression::None, RasterCompression::Deflate] {
            let writer = RasterWriter::new(compression);
            group.bench_with_input(
                BenchmarkId::new(format!("raster_{compression:?}"), size),
                &bands,
                |b, bands| b.iter(|| writer.encode(BandSelection::Merged(black_box(bands)), &metadata)),
            );
        }

        group.bench_with_input(BenchmarkId::new("array", size), &bands, |b, bands| {
            b.iter(|| ArrayWriter::new().encode(BandSelection::Merged(black_box(bands)), &metadata))
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let out = tempfile::tempdir().expect("temp dir");
    let config = SaveConfiguration::builder()
        .output_path(out.path())
        .save_as_array(true)
        .merge_bands(false)
        .build()
        .expect("valid config");
    let pipeline = PersistencePipeline::new(config, ProviderCatalog::builtin()).expect("pipeline");
    let artifacts: Vec<ImageArtifact> = (1..=8)
        .map(|day| {
            ImageArtifact::new(bands(256), format!("2024-06-{day:02}T10:00:00Z"), "S2MPC", "bench")
                .expect("artifact")
        })
        .collect();

    c.bench_function("save_all_8x4_bands", |b| {
        b.iter(|| pipeline.save_all(black_box(&artifacts)))
    });
}

criterion_group!(benches, bench_encoders, bench_pipeline);
criterion_main!(benches);
