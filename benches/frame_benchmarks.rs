//! Benchmarks for the outbound call path: building a frame, dispatching it
//! through a resolved method bind, and reading the return back.
//!
//! The mock engine stands in for the native side, so the numbers measure the
//! bridge's own overhead plus one in-process pointer call.
//!
//! ## Profiling with Puffin
//!
//! ```bash
//! cargo bench --features profile-with-puffin --bench frame_benchmarks
//! ```

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use enginebridge::prelude::*;
use enginebridge_mock::{MockCall, MockEngine};
use std::hint::black_box;

#[cfg(feature = "profile-with-puffin")]
fn setup_profiler() {
    puffin::set_scopes_on(true);
}

#[cfg(not(feature = "profile-with-puffin"))]
fn setup_profiler() {}

#[cfg(feature = "profile-with-puffin")]
fn end_profiling_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}

#[cfg(not(feature = "profile-with-puffin"))]
fn end_profiling_frame() {}

fn engine_with_echo() -> (MockEngine, Engine, Words<1>) {
    let mock = MockEngine::new();
    mock.bind_method("Node", "echo_transform", 11, |call: &mut MockCall| {
        let transform: Transform3D = call.arg(0).unwrap_or_default();
        call.set_return(transform);
    });
    mock.bind_method("Node", "sum", 12, |call: &mut MockCall| {
        let total: i64 = (0..4).filter_map(|i| call.arg::<i64>(i)).sum();
        call.set_return(total);
    });
    let engine = Engine::new(mock.clone());
    let node = mock.spawn("Node");
    (mock, engine, node)
}

fn frame_benchmarks(c: &mut Criterion) {
    setup_profiler();
    let mut group = c.benchmark_group("frame");

    group.throughput(Throughput::Elements(4));
    group.bench_function("build_four_scalars", |b| {
        b.iter(|| {
            let mut frame = Frame::new();
            frame
                .push(black_box(1i64))
                .push(black_box(2.0f64))
                .push(black_box(true))
                .push(black_box(Vector3::new(1.0, 2.0, 3.0)));
            let ret = frame.reserve_return::<i64>();
            black_box(frame.read_return(ret).unwrap());
            end_profiling_frame();
        });
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("build_transform", |b| {
        b.iter(|| {
            let mut frame = Frame::new();
            frame.push(black_box(Transform3D::IDENTITY));
            black_box(frame.len());
        });
    });

    group.finish();
}

fn dispatch_benchmarks(c: &mut Criterion) {
    setup_profiler();
    let (_mock, engine, node) = engine_with_echo();
    let echo = engine.method_bind("Node", "echo_transform", 11).unwrap();
    let sum = engine.method_bind("Node", "sum", 12).unwrap();
    let mut group = c.benchmark_group("dispatch");

    group.bench_function("echo_transform", |b| {
        b.iter(|| {
            let mut frame = Frame::new();
            frame.push(black_box(Transform3D::IDENTITY));
            let ret = frame.reserve_return::<Transform3D>();
            unsafe { engine.call(&echo, node, &mut frame) }.unwrap();
            black_box(frame.read_return(ret).unwrap());
            end_profiling_frame();
        });
    });

    group.bench_function("sum_four_ints", |b| {
        b.iter(|| {
            let mut frame = Frame::new();
            for i in 0..4i64 {
                frame.push(black_box(i));
            }
            let ret = frame.reserve_return::<i64>();
            unsafe { engine.call(&sum, node, &mut frame) }.unwrap();
            black_box(frame.read_return(ret).unwrap());
            end_profiling_frame();
        });
    });

    group.bench_function("cached_method_bind", |b| {
        b.iter(|| black_box(engine.method_bind("Node", "sum", 12).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, frame_benchmarks, dispatch_benchmarks);
criterion_main!(benches);
