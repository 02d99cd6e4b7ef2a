//! Critical-section capability with caller-ownership reassignment.
//!
//! Some rendezvous backends only let the current owning team release the
//! primitive, so the critical section guarding semaphore state must be
//! re-owned by whichever caller currently holds it. [`Locker`] hides that
//! behind a mutex-shaped API: the owner stamp is reassigned to the calling
//! thread/team on every lock, on every wakeup from a condvar wait, and on
//! unlock. Nothing outside the semaphore ever sees the stamp move.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

/// Identity of a lock holder, for ownership stamping and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holder {
    /// Process-wide id of the holding team.
    pub team: u32,
    /// Crate-assigned id of the holding thread.
    pub thread: u64,
}

/// The id of the current process ("team").
#[must_use]
pub fn current_team_id() -> u32 {
    std::process::id()
}

/// A stable per-thread id.
///
/// `std::thread::ThreadId` has no stable numeric form, so ids are assigned
/// from a process-wide counter on first use per thread.
#[must_use]
pub fn current_thread_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static ID: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}

/// Returns the identity of the calling thread.
#[must_use]
pub fn current_holder() -> Holder {
    Holder {
        team: current_team_id(),
        thread: current_thread_id(),
    }
}

/// Mutex over `T` whose recorded owner follows the calling thread.
#[derive(Debug)]
pub(crate) struct Locker<T> {
    cell: Mutex<T>,
    owner_thread: AtomicU64,
    owner_team: AtomicU32,
}

impl<T> Locker<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            cell: Mutex::new(value),
            owner_thread: AtomicU64::new(0),
            owner_team: AtomicU32::new(0),
        }
    }

    /// Enters the critical section and re-owns it for the caller.
    pub(crate) fn lock(&self) -> LockerGuard<'_, T> {
        let guard = self.cell.lock();
        self.stamp();
        LockerGuard {
            locker: self,
            guard,
        }
    }

    /// The last thread to hold or release the section. Diagnostic only.
    pub(crate) fn last_owner(&self) -> Holder {
        Holder {
            team: self.owner_team.load(Ordering::Relaxed),
            thread: self.owner_thread.load(Ordering::Relaxed),
        }
    }

    fn stamp(&self) {
        let holder = current_holder();
        self.owner_thread.store(holder.thread, Ordering::Relaxed);
        self.owner_team.store(holder.team, Ordering::Relaxed);
    }
}

/// Guard for a [`Locker`] critical section.
pub(crate) struct LockerGuard<'a, T> {
    locker: &'a Locker<T>,
    guard: MutexGuard<'a, T>,
}

impl<T> LockerGuard<'_, T> {
    /// Blocks on `cv`, then re-owns the section for this thread.
    pub(crate) fn wait(&mut self, cv: &Condvar) {
        cv.wait(&mut self.guard);
        self.locker.stamp();
    }

    /// Blocks on `cv` until `deadline`; returns true on timeout.
    pub(crate) fn wait_until(&mut self, cv: &Condvar, deadline: Instant) -> bool {
        let result = cv.wait_until(&mut self.guard, deadline);
        self.locker.stamp();
        result.timed_out()
    }
}

impl<T> std::ops::Deref for LockerGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for LockerGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for LockerGuard<'_, T> {
    fn drop(&mut self) {
        // The releaser is the legal last owner.
        self.locker.stamp();
    }
}
