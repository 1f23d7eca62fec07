//! Benchmarks for the streaming channelizer and folder
//!
//! Run with: cargo bench -p basefold-core --bench dsp_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use basefold_core::{
    Filterbank, FilterbankConfig, Fold, FoldConfig, FrequencyResponse, SampleBlock, SampleOrder,
};

fn test_block(start: u64, count: usize) -> SampleBlock {
    let samples: Vec<f64> = (0..count)
        .map(|i| ((start + i as u64) as f64 * 0.0371).sin())
        .collect();
    SampleBlock::from_real(start, 1.0e6, samples)
}

fn bench_filterbank(c: &mut Criterion) {
    let mut group = c.benchmark_group("filterbank");

    for nchan in [8usize, 64, 256] {
        let block_len = nchan * 1024;
        group.throughput(Throughput::Elements(block_len as u64));
        group.bench_with_input(BenchmarkId::new("process", nchan), &nchan, |b, &nchan| {
            let mut fb = Filterbank::new(FilterbankConfig {
                nchan,
                freq_res: 1,
                output_order: SampleOrder::TimeMajor,
            });
            fb.set_maximum_samples(block_len).unwrap();
            let mut start = 0u64;
            b.iter(|| {
                let block = test_block(start, block_len);
                start += block_len as u64;
                black_box(fb.process(&block).unwrap())
            })
        });
    }

    group.finish();
}

fn bench_filterbank_with_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("filterbank_fir");
    let nchan = 64;
    let freq_res = 16;
    let block_len = nchan * freq_res * 16;

    group.throughput(Throughput::Elements(block_len as u64));
    group.bench_function("process", |b| {
        let mut fb = Filterbank::new(FilterbankConfig {
            nchan,
            freq_res,
            output_order: SampleOrder::TimeMajor,
        });
        fb.set_response(FrequencyResponse::from_fir(&[0.1, 0.2, 0.4, 0.2, 0.1], freq_res).unwrap())
            .unwrap();
        fb.set_maximum_samples(block_len).unwrap();
        let mut start = 0u64;
        b.iter(|| {
            let block = test_block(start, block_len);
            start += block_len as u64;
            black_box(fb.process(&block).unwrap())
        })
    });

    group.finish();
}

fn bench_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("fold");

    for nbin in [64usize, 1024] {
        let block_len = 65536;
        group.throughput(Throughput::Elements(block_len as u64));
        group.bench_with_input(BenchmarkId::new("fold", nbin), &nbin, |b, &nbin| {
            let mut fold = Fold::new(FoldConfig {
                period: 0.0065536,
                nbin,
                sample_interval: 1e-7,
            });
            let mut start = 0u64;
            b.iter(|| {
                let block = test_block(start, block_len);
                start += block_len as u64;
                fold.fold(black_box(&block)).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_filterbank,
    bench_filterbank_with_response,
    bench_fold
);
criterion_main!(benches);
