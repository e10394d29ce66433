//! Q1 throughput per aggregation flavour, layout and selection variant, plus
//! the morsel scheduler end to end.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qone_exec::{AggrFlavour, Kernel, KernelConfig, Layout, MorselScheduler, SchedulerConfig, SimdFlavour};
use qone_storage::gen::generate;

const ROWS: usize = 1 << 20;

fn kernel_variants(c: &mut Criterion) {
    let table = Arc::new(generate(ROWS, 1));
    let mut group = c.benchmark_group("q1_kernel");
    group.throughput(Throughput::Elements(ROWS as u64));
    group.sample_size(20);

    for flavour in AggrFlavour::ALL {
        for layout in [Layout::Nsm, Layout::Dsm] {
            for simd in SimdFlavour::ALL {
                let config = KernelConfig { flavour, layout, simd, ..KernelConfig::default() };
                let id = BenchmarkId::from_parameter(format!("{flavour:?}/{layout:?}/{simd:?}"));
                let mut kernel = Kernel::new(Arc::clone(&table), config).unwrap();
                group.bench_function(id, |b| {
                    b.iter(|| {
                        kernel.reset();
                        kernel.run();
                        black_box(kernel.stats())
                    })
                });
            }
        }
    }
    group.finish();
}

fn scheduler(c: &mut Criterion) {
    let table = Arc::new(generate(4 * ROWS, 2));
    let mut group = c.benchmark_group("q1_scheduler");
    group.throughput(Throughput::Elements(table.cardinality() as u64));
    group.sample_size(10);

    for threads in [1, 2, 4] {
        let config = SchedulerConfig { threads: Some(threads), ..SchedulerConfig::default() };
        let kernel = KernelConfig { flavour: AggrFlavour::ShuffleFused, ..KernelConfig::default() };
        let mut scheduler = MorselScheduler::new(Arc::clone(&table), kernel, config).unwrap();
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, _| {
            b.iter(|| {
                scheduler.clear().unwrap();
                scheduler.run().unwrap();
                black_box(scheduler.result())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, kernel_variants, scheduler);
criterion_main!(benches);
