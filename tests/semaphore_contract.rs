//! Contract tests for the semaphore: conservation, blocking, closure,
//! named lifetime, and refcount-safe teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use portkit::test_logging::init_test_logging;
use portkit::{
    assert_with_log, test_complete, test_phase, AccessPolicy, Deadline, Error, HeapAreas,
    NameRegistry, Semaphore, Tunables,
};

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

#[test]
fn scenario_b_third_acquirer_waits_for_release() {
    init_test("scenario_b_third_acquirer_waits_for_release");
    let sem = Semaphore::create(2);
    let passed = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..3 {
        let handle = sem.try_clone().expect("clone handle");
        let passed = Arc::clone(&passed);
        threads.push(std::thread::spawn(move || {
            handle.acquire(1, Deadline::Infinite).expect("acquire");
            passed.fetch_add(1, Ordering::SeqCst);
            handle.delete().expect("delete handle");
        }));
    }

    // Two pass immediately; the third registers as pending.
    while sem.count() != -1 {
        std::thread::yield_now();
    }
    assert_with_log!(
        passed.load(Ordering::SeqCst) == 2,
        "two acquirers passed before release",
        2usize,
        passed.load(Ordering::SeqCst)
    );

    sem.release(1).expect("release");
    for thread in threads {
        thread.join().expect("join");
    }
    assert_with_log!(
        passed.load(Ordering::SeqCst) == 3,
        "all three passed",
        3usize,
        passed.load(Ordering::SeqCst)
    );
    assert_with_log!(sem.count() == 0, "value observed zero", 0i64, sem.count());
    sem.delete().expect("delete");
    test_complete!("scenario_b_third_acquirer_waits_for_release");
}

#[test]
fn acquire_blocks_until_deadline_without_release() {
    init_test("acquire_blocks_until_deadline_without_release");
    let sem = Semaphore::create(1);

    let start = Instant::now();
    let result = sem.acquire(2, Deadline::After(Duration::from_millis(60)));
    assert_with_log!(
        result == Err(Error::TimedOut),
        "timed out",
        Err::<(), Error>(Error::TimedOut),
        result
    );
    assert_with_log!(
        start.elapsed() >= Duration::from_millis(60),
        "blocked for the full deadline",
        Duration::from_millis(60),
        start.elapsed()
    );

    let probe = sem.acquire(2, Deadline::NOW);
    assert_with_log!(
        probe == Err(Error::WouldBlock),
        "zero deadline never blocks",
        Err::<(), Error>(Error::WouldBlock),
        probe
    );
    sem.delete().expect("delete");
    test_complete!("acquire_blocks_until_deadline_without_release");
}

#[test]
fn absolute_deadline_bounds_an_acquire() {
    init_test("absolute_deadline_bounds_an_acquire");
    let sem = Semaphore::create(0);

    // An instant already in the past never blocks.
    let past = Instant::now() - Duration::from_millis(5);
    let probe = sem.acquire(1, Deadline::At(past));
    assert_with_log!(
        probe == Err(Error::WouldBlock),
        "past instant behaves as a probe",
        Err::<(), Error>(Error::WouldBlock),
        probe
    );

    let start = Instant::now();
    let result = sem.acquire(1, Deadline::At(start + Duration::from_millis(40)));
    assert_with_log!(
        result == Err(Error::TimedOut),
        "timed out at the absolute instant",
        Err::<(), Error>(Error::TimedOut),
        result
    );
    assert_with_log!(
        start.elapsed() >= Duration::from_millis(40),
        "blocked until the instant",
        Duration::from_millis(40),
        start.elapsed()
    );
    sem.delete().expect("delete");
    test_complete!("absolute_deadline_bounds_an_acquire");
}

#[test]
fn close_unblocks_every_acquirer_from_any_state() {
    init_test("close_unblocks_every_acquirer_from_any_state");
    let sem = Semaphore::create(0);

    let mut threads = Vec::new();
    for _ in 0..4 {
        let handle = sem.try_clone().expect("clone");
        threads.push(std::thread::spawn(move || {
            let result = handle.acquire(1, Deadline::Infinite);
            handle.delete().expect("delete handle");
            result
        }));
    }
    while sem.count() != -4 {
        std::thread::yield_now();
    }

    sem.close().expect("close");
    for thread in threads {
        let result = thread.join().expect("join");
        assert_with_log!(
            result == Err(Error::Failed),
            "blocked acquirer observed closure",
            Err::<(), Error>(Error::Failed),
            result
        );
    }

    let acquire = sem.acquire(1, Deadline::Infinite);
    assert_with_log!(
        acquire == Err(Error::Failed),
        "acquire after close",
        Err::<(), Error>(Error::Failed),
        acquire
    );
    let release = sem.release(1);
    assert_with_log!(
        release == Err(Error::Failed),
        "release after close",
        Err::<(), Error>(Error::Failed),
        release
    );
    sem.delete().expect("delete");
    test_complete!("close_unblocks_every_acquirer_from_any_state");
}

#[test]
fn named_lifetime_is_refcount_safe() {
    init_test("named_lifetime_is_refcount_safe");
    let areas = Arc::new(HeapAreas::new(1024 * 1024));
    let registry =
        NameRegistry::new(Tunables::default(), Arc::<HeapAreas>::clone(&areas)).expect("registry");

    let created = Semaphore::create_named(&registry, "shared.counter", 3, AccessPolicy::ReadWrite)
        .expect("create named");
    assert_with_log!(
        registry.contains("shared.counter"),
        "registered",
        true,
        registry.contains("shared.counter")
    );
    let backing = areas.used_bytes();
    assert_with_log!(backing > 0, "area committed", true, backing > 0);

    // Open twice; handles see the same state.
    let opened = Semaphore::open(&registry, "shared.counter").expect("open");
    let cloned = opened.try_clone().expect("clone named");
    assert_with_log!(created.handle_count() == 3, "three handles", 3u32, created.handle_count());

    opened.acquire(3, Deadline::Infinite).expect("acquire via opened");
    assert_with_log!(created.count() == 0, "shared value", 0i64, created.count());

    // Deletes in arbitrary handle order; the entry survives until the last.
    created.delete().expect("delete creator");
    assert_with_log!(
        registry.contains("shared.counter"),
        "alive after first delete",
        true,
        registry.contains("shared.counter")
    );
    cloned.delete().expect("delete clone");
    assert_with_log!(
        registry.contains("shared.counter"),
        "alive after second delete",
        true,
        registry.contains("shared.counter")
    );
    opened.delete().expect("final delete");
    assert_with_log!(
        !registry.contains("shared.counter"),
        "destroyed at zero",
        false,
        registry.contains("shared.counter")
    );
    assert_with_log!(areas.used_bytes() == 0, "area freed once", 0usize, areas.used_bytes());

    let reopen = Semaphore::open(&registry, "shared.counter");
    assert_with_log!(
        reopen.is_err(),
        "open after destroy fails",
        true,
        reopen.is_err()
    );
    test_complete!("named_lifetime_is_refcount_safe");
}

#[test]
fn named_create_rejects_duplicates_and_bad_names() {
    init_test("named_create_rejects_duplicates_and_bad_names");
    let registry = NameRegistry::in_process();

    let first = Semaphore::create_named(&registry, "dup", 0, AccessPolicy::ReadWrite)
        .expect("first create");
    let second = Semaphore::create_named(&registry, "dup", 0, AccessPolicy::ReadWrite).err();
    assert_with_log!(
        second == Some(Error::Failed),
        "duplicate name",
        Some(Error::Failed),
        second
    );

    let empty = Semaphore::create_named(&registry, "", 0, AccessPolicy::ReadWrite).err();
    assert_with_log!(
        empty == Some(Error::BadValue),
        "empty name",
        Some(Error::BadValue),
        empty
    );

    first.delete().expect("delete");
    test_complete!("named_create_rejects_duplicates_and_bad_names");
}

#[test]
fn small_request_is_served_before_large_one() {
    init_test("small_request_is_served_before_large_one");
    let sem = Semaphore::create(0);

    let bulk_handle = sem.try_clone().expect("clone");
    let bulk = std::thread::spawn(move || {
        let result = bulk_handle.acquire(4, Deadline::Infinite);
        bulk_handle.delete().expect("delete");
        result
    });
    while sem.count() != -4 {
        std::thread::yield_now();
    }

    let small_handle = sem.try_clone().expect("clone");
    let small = std::thread::spawn(move || {
        let result = small_handle.acquire(1, Deadline::Infinite);
        small_handle.delete().expect("delete");
        result
    });
    while sem.count() != -5 {
        std::thread::yield_now();
    }

    // One unit: only the small request can commit.
    sem.release(1).expect("release one");
    small.join().expect("join").expect("small acquire");
    assert_with_log!(sem.count() == -4, "bulk still pending", -4i64, sem.count());

    sem.release(4).expect("release rest");
    bulk.join().expect("join").expect("bulk acquire");
    sem.delete().expect("delete");
    test_complete!("small_request_is_served_before_large_one");
}
