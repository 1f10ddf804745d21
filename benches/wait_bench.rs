use std::hint::black_box;
use std::time::Duration;

use criterion::*;
use lockstep::{
    CallbackMode, CompletionSource, EventManager, Ref, TrackedEvent, WaitEntry, WaitListEvent,
    WaitRequest,
};

fn ref_count_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ref_count");

    group.bench_function("clone_drop", |b| {
        let event = WaitListEvent::create();
        b.iter(|| {
            let clone = black_box(&event).clone();
            black_box(&clone);
        });
    });

    group.bench_function("retain_release_via_raw", |b| {
        let event = WaitListEvent::create();
        b.iter(|| {
            let raw = event.clone().detach();
            let adopted = unsafe { Ref::acquire(black_box(raw)) };
            black_box(&adopted);
        });
    });

    group.finish();
}

fn wait_list_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("wait_list");

    group.bench_function("signal_and_poll", |b| {
        b.iter(|| {
            let event = WaitListEvent::create();
            event.signal();
            black_box(event.wait(Duration::ZERO))
        });
    });

    group.bench_function("wait_any_8_signaled", |b| {
        b.iter_batched(
            || {
                let entries: Vec<_> = (0..8)
                    .map(|_| {
                        let event = WaitListEvent::create();
                        event.signal();
                        WaitEntry::new(event)
                    })
                    .collect();
                entries
            },
            |mut entries| black_box(WaitListEvent::wait_any(&mut entries, Duration::ZERO)),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn manager_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_manager");

    group.bench_function("track_signal_wait", |b| {
        let manager = EventManager::new();
        b.iter(|| {
            let signal = WaitListEvent::create();
            let event = TrackedEvent::create(
                CallbackMode::WaitAnyOnly,
                CompletionSource::Event(signal.clone()),
                |_| {},
            );
            let handle = manager.track_event(event);
            signal.signal();
            let mut requests = [WaitRequest::new(handle)];
            black_box(manager.wait_any(&mut requests, Duration::ZERO))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    ref_count_benchmark,
    wait_list_benchmark,
    manager_benchmark
);
criterion_main!(benches);
