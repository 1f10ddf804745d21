//! Event Primitive Tests
//!
//! Tests for:
//! - WaitListEvent: one-shot signaling, blocking waits, timeouts, wait_any
//!   over several events including duplicate entries
//! - wait_async pipe delivery
//! - System event pairs and wait_any_system_events

use std::thread;
use std::time::{Duration, Instant};

use lockstep::{
    LockstepError, SystemEventReceiver, SystemWaitEntry, WaitEntry, WaitListEvent,
    wait_any_system_events,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// WaitListEvent Tests
// ============================================================================

#[test]
fn event_starts_unsignaled() {
    let event = WaitListEvent::create();
    assert!(!event.is_signaled());
    assert!(!event.wait(Duration::ZERO));
}

#[test]
fn event_signal_is_one_shot_and_idempotent() {
    let event = WaitListEvent::create();
    event.signal();
    event.signal();
    assert!(event.is_signaled());
    assert!(event.wait(Duration::ZERO));
    // Repeated waits on a signaled event keep succeeding.
    assert!(event.wait(Duration::MAX));
}

#[test]
fn event_wait_blocks_until_signal() {
    init_logger();
    let event = WaitListEvent::create();

    let signaler = event.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        signaler.signal();
    });

    assert!(event.wait(Duration::from_secs(10)));
    worker.join().expect("signaler panicked");
}

#[test]
fn event_wait_times_out() {
    let event = WaitListEvent::create();
    let started = Instant::now();
    assert!(!event.wait(Duration::from_millis(50)));
    assert!(started.elapsed() >= Duration::from_millis(50));
}

// ============================================================================
// wait_any Tests
// ============================================================================

#[test]
fn wait_any_empty_slice_is_timeout() {
    let mut entries: Vec<WaitEntry> = Vec::new();
    assert!(!WaitListEvent::wait_any(&mut entries, Duration::from_secs(1)));
}

#[test]
fn wait_any_marks_only_the_signaled_event() {
    init_logger();
    let first = WaitListEvent::create();
    let second = WaitListEvent::create();

    let signaler = second.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        signaler.signal();
    });

    let mut entries = [WaitEntry::new(first), WaitEntry::new(second)];
    assert!(WaitListEvent::wait_any(&mut entries, Duration::from_secs(10)));
    assert!(!entries[0].ready);
    assert!(entries[1].ready);
    worker.join().expect("signaler panicked");
}

#[test]
fn wait_any_duplicate_entries_both_marked() {
    let event = WaitListEvent::create();
    event.signal();

    let mut entries = [WaitEntry::new(event.clone()), WaitEntry::new(event)];
    assert!(WaitListEvent::wait_any(&mut entries, Duration::ZERO));
    assert!(entries[0].ready);
    assert!(entries[1].ready);
}

#[test]
fn wait_any_duplicate_entries_marked_after_delayed_signal() {
    init_logger();
    let event = WaitListEvent::create();

    let signaler = event.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        signaler.signal();
    });

    // Two slots name the same event: one waiter registration, both flags.
    let mut entries = [WaitEntry::new(event.clone()), WaitEntry::new(event)];
    assert!(WaitListEvent::wait_any(&mut entries, Duration::from_secs(10)));
    assert!(entries[0].ready);
    assert!(entries[1].ready);
    worker.join().expect("signaler panicked");
}

#[test]
fn wait_any_fast_path_on_already_signaled() {
    let slow = WaitListEvent::create();
    let fast = WaitListEvent::create();
    fast.signal();

    let mut entries = [WaitEntry::new(slow), WaitEntry::new(fast)];
    let started = Instant::now();
    assert!(WaitListEvent::wait_any(&mut entries, Duration::from_secs(30)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!entries[0].ready);
    assert!(entries[1].ready);
}

#[test]
fn wait_any_zero_timeout_polls() {
    let pending = WaitListEvent::create();
    let mut entries = [WaitEntry::new(pending)];
    assert!(!WaitListEvent::wait_any(&mut entries, Duration::ZERO));
    assert!(!entries[0].ready);
}

#[test]
fn wait_any_times_out_with_no_flags_set() {
    let first = WaitListEvent::create();
    let second = WaitListEvent::create();
    let mut entries = [WaitEntry::new(first), WaitEntry::new(second)];

    assert!(!WaitListEvent::wait_any(
        &mut entries,
        Duration::from_millis(50)
    ));
    assert!(!entries[0].ready);
    assert!(!entries[1].ready);
}

#[test]
fn wait_any_many_waiters_one_signal() {
    init_logger();
    let event = WaitListEvent::create();

    thread::scope(|scope| {
        for _ in 0..4 {
            let local = event.clone();
            scope.spawn(move || {
                let mut entries = [WaitEntry::new(local)];
                assert!(WaitListEvent::wait_any(&mut entries, Duration::from_secs(10)));
                assert!(entries[0].ready);
            });
        }

        thread::sleep(Duration::from_millis(50));
        event.signal();
    });
}

// ============================================================================
// wait_async Tests
// ============================================================================

#[test]
fn wait_async_pre_signaled_receiver_is_ready() {
    let event = WaitListEvent::create();
    event.signal();

    let receiver = event.wait_async();
    assert!(receiver.is_signaled());
}

#[test]
fn wait_async_receiver_fires_on_signal() {
    let event = WaitListEvent::create();
    let receiver = event.wait_async();
    assert!(!receiver.is_signaled());

    event.signal();
    assert!(receiver.is_signaled());
}

// ============================================================================
// System Event Tests
// ============================================================================

#[test]
fn system_event_pair_delivers_signal() {
    let (sender, receiver) = SystemEventReceiver::new_pair();
    assert!(!receiver.is_signaled());
    sender.signal();
    assert!(receiver.is_signaled());
}

#[test]
fn system_wait_any_sees_delayed_signal() {
    init_logger();
    let (sender, receiver) = SystemEventReceiver::new_pair();
    let (_keep_alive, pending) = SystemEventReceiver::new_pair();

    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        sender.signal();
    });

    let mut entries = [SystemWaitEntry::new(pending), SystemWaitEntry::new(receiver)];
    let any = wait_any_system_events(&mut entries, Duration::from_secs(10))
        .expect("wait should not fail");
    assert!(any);
    assert!(!entries[0].ready);
    assert!(entries[1].ready);
    worker.join().expect("signaler panicked");
}

#[test]
fn system_wait_any_zero_timeout_polls() {
    let (_sender, receiver) = SystemEventReceiver::new_pair();
    let mut entries = [SystemWaitEntry::new(receiver)];
    let any = wait_any_system_events(&mut entries, Duration::ZERO).expect("poll should not fail");
    assert!(!any);
}

#[test]
fn system_wait_any_reports_dropped_senders() {
    let (sender, receiver) = SystemEventReceiver::new_pair();
    drop(sender);

    let mut entries = [SystemWaitEntry::new(receiver)];
    let result = wait_any_system_events(&mut entries, Duration::from_secs(10));
    assert!(matches!(result, Err(LockstepError::WaitFailed(_))));
}

#[test]
fn system_wait_any_signaled_shortcuts_infinite_timeout() {
    let receiver = SystemEventReceiver::signaled();
    let mut entries = [SystemWaitEntry::new(receiver)];
    let any = wait_any_system_events(&mut entries, Duration::MAX).expect("wait should not fail");
    assert!(any);
    assert!(entries[0].ready);
}
