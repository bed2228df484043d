/*!
 * Allocation Benchmarks
 *
 * Compare allocate/deallocate through a nodump allocator with a plain
 * jemalloc arena and the global allocator
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nodump_alloc::{
    new_nodump_allocator, ArenaControl, CacheAllocator, JemallocControl, NoDumpOptions,
};
use std::alloc::{alloc, dealloc, Layout};
use std::sync::Arc;

const SIZES: [usize; 4] = [64, 4096, 65_536, 1 << 20];

fn nodump_allocator() -> Option<Arc<dyn CacheAllocator>> {
    match new_nodump_allocator(NoDumpOptions::new().with_label("bench")) {
        Ok(allocator) => Some(allocator),
        Err(e) => {
            eprintln!("skipping nodump benchmarks: {}", e);
            None
        }
    }
}

fn bench_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free");
    let nodump = nodump_allocator();
    let control = JemallocControl::new();
    let plain_arena = control.create_arena().ok();

    for size in SIZES {
        group.throughput(Throughput::Bytes(size as u64));

        if let Some(allocator) = &nodump {
            group.bench_with_input(BenchmarkId::new("nodump", size), &size, |b, &size| {
                b.iter(|| {
                    let ptr = allocator.allocate(black_box(size)).unwrap();
                    unsafe { allocator.deallocate(ptr) };
                });
            });
        }

        if let Some(arena) = plain_arena {
            let flags = control.flags_for(arena);
            group.bench_with_input(BenchmarkId::new("jemalloc_arena", size), &size, |b, &size| {
                b.iter(|| {
                    let ptr = control.allocate(black_box(size), flags).unwrap();
                    unsafe { control.deallocate(ptr, flags) };
                });
            });
        }

        let layout = Layout::from_size_align(size, 16).unwrap();
        group.bench_with_input(BenchmarkId::new("global", size), &layout, |b, &layout| {
            b.iter(|| unsafe {
                let ptr = alloc(black_box(layout));
                dealloc(ptr, layout);
            });
        });
    }

    group.finish();
    if let Some(arena) = plain_arena {
        control.destroy_arena(arena).ok();
    }
}

fn bench_batch_fill(c: &mut Criterion) {
    let Some(allocator) = nodump_allocator() else {
        return;
    };
    let mut group = c.benchmark_group("batch_fill");

    for count in [16usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let ptrs: Vec<_> = (0..count)
                    .filter_map(|i| allocator.allocate(64 + (i % 8) * 64))
                    .collect();
                for ptr in ptrs {
                    unsafe { allocator.deallocate(ptr) };
                }
            });
        });
    }

    group.finish();
}

fn bench_construction(c: &mut Criterion) {
    if nodump_allocator().is_none() {
        return;
    }
    c.bench_function("construct_and_destroy", |b| {
        b.iter(|| {
            let allocator = new_nodump_allocator(NoDumpOptions::default()).unwrap();
            black_box(allocator.name());
        });
    });
}

criterion_group!(benches, bench_alloc_free, bench_batch_fill, bench_construction);
criterion_main!(benches);
