use criterion::{
    black_box,
    criterion_group,
    criterion_main,
    Criterion,
    Throughput,
    BenchmarkId
};

use segalloc::Heap;

fn alloc_free_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc free");
    let mut heap = Heap::new();

    for size in [1, 8, 16, 31, 32, 64, 256, 1024, 4096, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| unsafe {
                let ptr = heap.alloc(black_box(size)).unwrap();

                heap.free(ptr.as_ptr()).unwrap();
            });
        });
    }

    group.finish();
}

fn alloc_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc batch");

    for size in [8, 128, 2048].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut heap = Heap::new();
            let mut live = Vec::with_capacity(1000);

            b.iter(|| {
                for _ in 0..1000 {
                    live.push(heap.alloc(size).unwrap());
                }

                for ptr in live.drain(..) {
                    unsafe { heap.free(ptr.as_ptr()).unwrap() };
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, alloc_free_sizes, alloc_batch);
criterion_main!(benches);
