//! Benchmarks for the hot paths of a host call: frame encoding, native
//! invocation, variant packing and virtual dispatch.
//!
//! ## Profiling with Puffin
//!
//! ```bash
//! cargo bench --features profile-with-puffin -- --profile-time 5
//! ```

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use extbind::extbind_core::{FrameSlot, NativeLifecycle};
use extbind::prelude::*;

struct NoopLifecycle;

impl NativeLifecycle for NoopLifecycle {
    fn destroy(&self, _raw: RawHandle) {}

    fn reference(&self, _raw: RawHandle) -> bool {
        true
    }

    fn unreference(&self, _raw: RawHandle) -> bool {
        false
    }
}

#[cfg(feature = "profile-with-puffin")]
fn init_profiler() {
    puffin::set_scopes_on(true);
}

#[cfg(not(feature = "profile-with-puffin"))]
fn init_profiler() {}

unsafe extern "C" fn sum_floats(args: *const FrameSlot, ret: *mut FrameSlot) {
    let args = unsafe { std::slice::from_raw_parts(args, 4) };
    let total: f64 = args.iter().map(|slot| slot.load::<f64>()).sum();
    unsafe { (*ret).store(total) };
}

struct Body {
    mass: f64,
}

fn runtime(depth: usize) -> ExtensionRuntime {
    let mut rt = ExtensionRuntime::new(ExtensionConfig::new(), Arc::new(NoopLifecycle));
    rt.begin_registration().unwrap();
    rt.register_class(
        ClassBuilder::new("Level0")
            .constructor(|| Body { mass: 1.0 })
            .method("area", |w: f64, h: f64| w * h)
            .method("weigh", |this: &mut Body, g: f64| this.mass * g)
            .build()
            .unwrap(),
    )
    .unwrap();
    for level in 1..=depth {
        rt.register_class(
            ClassBuilder::new(format!("Level{level}").as_str())
                .parent(format!("Level{}", level - 1).as_str())
                .build()
                .unwrap(),
        )
        .unwrap();
    }
    rt.finish_registration().unwrap();
    rt
}

fn bench_frame(c: &mut Criterion) {
    init_profiler();
    let mut group = c.benchmark_group("frame");

    group.bench_function("encode_invoke_4_floats", |b| {
        b.iter(|| {
            let mut frame = Frame::new(4);
            frame
                .put_arg(0, black_box(1.0f64))
                .put_arg(1, black_box(2.0f64))
                .put_arg(2, black_box(3.0f64))
                .put_arg(3, black_box(4.0f64));
            // SAFETY: sum_floats reads exactly four float slots.
            unsafe { frame.invoke(sum_floats) };
            black_box(frame.ret::<f64>())
        })
    });

    group.finish();
}

fn bench_variant(c: &mut Criterion) {
    let mut group = c.benchmark_group("variant");

    group.bench_function("pack_unpack_float", |b| {
        b.iter(|| Variant::pack(black_box(12.0f64)).unpack::<f64>())
    });

    let items: Vec<i64> = (0..64).collect();
    group.bench_function("pack_unpack_array_64", |b| {
        b.iter(|| Variant::pack(black_box(items.clone())).unpack::<Vec<i64>>())
    });

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let area = StringName::new("area");

    for depth in [0usize, 4, 16] {
        let rt = runtime(depth);
        let class = StringName::new(&format!("Level{depth}"));
        let mut frame = Frame::new(2);
        frame.put_arg(0, 3.0f64).put_arg(1, 4.0f64);

        group.bench_with_input(BenchmarkId::new("static_area", depth), &depth, |b, _| {
            b.iter(|| rt.dispatch(black_box(class), area, &frame))
        });
    }

    let rt = runtime(0);
    let id = rt.create_instance(StringName::new("Level0")).unwrap();
    let weigh = StringName::new("weigh");
    let mut frame = Frame::new(1);
    frame.put_arg(0, 9.81f64);
    group.bench_function("instance_weigh", |b| {
        b.iter(|| rt.dispatch_on(black_box(id), weigh, &frame))
    });

    group.finish();
}

criterion_group!(benches, bench_frame, bench_variant, bench_dispatch);
criterion_main!(benches);
