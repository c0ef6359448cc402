// Trampoline dispatch benchmarks
//
// This benchmark suite measures:
// - Typed trampolines against the raw send they wrap
// - The cost of each return convention
// - Guarded calls with and without a raise
// - Event forwarding through a callback adapter

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use oxidex_bridge::bridge::trampoline::read_call;
use oxidex_bridge::bridge::{
    CallbackTable, Number, Port, String, base_symbols, make_adapter, raise, try_catch,
};
use oxidex_bridge::runtime::{AutoreleasePool, autoreleasepool};
use std::ffi::c_void;

/// Benchmark a read trampoline against a direct call of the same send
fn bench_read_call(c: &mut Criterion) {
    let number = Number::new_integer(42).unwrap();
    let selector = base_symbols().integer_value;
    let mut group = c.benchmark_group("read_call");

    group.bench_function("trampoline", |b| b.iter(|| black_box(number.integer_value())));
    group.bench_function("direct", |b| {
        b.iter(|| black_box(unsafe { read_call::<_, i64>(&*number, selector, ()) }))
    });

    group.finish();
}

/// Benchmark the two return conventions on the same method
fn bench_return_conventions(c: &mut Criterion) {
    let mut group = c.benchmark_group("return_convention");

    group.bench_function("not_retained", |b| {
        b.iter(|| {
            autoreleasepool(|pool| {
                let s = String::with_str(pool, black_box("value").into()).unwrap();
                black_box(s.length())
            })
        })
    });

    group.bench_function("retained", |b| {
        b.iter(|| {
            let s = String::with_str_retained(black_box("value").into()).unwrap();
            black_box(s.length())
        })
    });

    group.bench_function("allocate", |b| {
        b.iter(|| {
            let s = String::init_with_str(black_box("value").into()).unwrap();
            black_box(s.length())
        })
    });

    group.finish();
}

/// Benchmark autoreleased results accumulating in one pool
fn bench_pool_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_batch");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &n| {
            b.iter(|| {
                let pool = AutoreleasePool::new();
                for i in 0..n {
                    black_box(Number::with_integer(&pool, i).unwrap());
                }
            })
        });
    }

    group.finish();
}

/// Benchmark the guard itself, then a guarded raise
fn bench_guarded(c: &mut Criterion) {
    let number = Number::new_integer(7).unwrap();
    let mut group = c.benchmark_group("guarded");

    group.bench_function("no_raise", |b| {
        b.iter(|| black_box(try_catch(|| number.integer_value())))
    });
    group.bench_function("raise", |b| {
        b.iter(|| black_box(try_catch(|| -> () { raise("bench") }).is_err()))
    });

    group.finish();
}

unsafe extern "C" fn count_event(_adapter: *mut c_void, event: *mut c_void) {
    unsafe { *event.cast::<u64>() += 1 };
}

/// Benchmark a port delivering to an adapter delegate
fn bench_adapter_forwarding(c: &mut Criterion) {
    // SAFETY: every event posted below points at `count`
    let adapter = unsafe { make_adapter(CallbackTable::new(Some(count_event), None)) };
    let port = Port::init().unwrap();
    port.set_delegate(Some(&adapter));
    let mut count = 0u64;

    c.bench_function("adapter_forward", |b| {
        b.iter(|| port.post_mach_message(black_box((&raw mut count).cast())))
    });

    port.set_delegate(None);
    black_box(count);
}

criterion_group!(
    benches,
    bench_read_call,
    bench_return_conventions,
    bench_pool_batch,
    bench_guarded,
    bench_adapter_forwarding
);
criterion_main!(benches);
