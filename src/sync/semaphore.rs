//! Counting semaphore with N-ary acquire, deadlines, and close-to-unblock.
//!
//! The semaphore is intentionally blocking and mutex-protected: state lives
//! under a [`Locker`] critical section, waits block on one condvar
//! rendezvous, and nothing here is async or lock-free.
//!
//! # Wakeup ordering
//!
//! Among blocked acquirers, the smallest outstanding request commits first;
//! ties are broadcast together. This is a deliberate simplicity/fairness
//! trade-off, not strict FIFO: a bulk acquire cannot be starved forever by
//! a stream of small ones (the bulk request becomes the minimum once the
//! small ones drain), and a small request never sleeps behind a bulk one
//! that the current value cannot satisfy.
//!
//! # Lifetime
//!
//! A [`Semaphore`] is a counted handle. `create`/`open`/`try_clone` each
//! produce one handle and must be matched by exactly one `delete`; the
//! backing resources (registry entry, shared area) are destroyed by the
//! delete that drives the count to zero. Dropping an undeleted handle only
//! detaches and logs a leak diagnostic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Condvar;

use crate::area::AccessPolicy;
use crate::error::{Error, Result};
use crate::registry::NameRegistry;
use crate::sync::locker::{current_holder, Holder, Locker};
use crate::time::{Deadline, Resolved};

/// Size of the shared region backing one named semaphore: the state struct
/// plus the rendezvous primitive any mapping process bootstraps from.
pub(crate) const SHARED_STATE_BYTES: usize = 64;

/// Whether a release should offer the CPU to the woken waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RescheduleHint {
    /// Yield the releasing thread after waking waiters.
    #[default]
    Reschedule,
    /// Return to the releaser immediately.
    DoNotReschedule,
}

#[derive(Debug)]
struct SemState {
    /// Available count. Never observed negative (unsigned by construction).
    value: u32,
    /// Multiset of outstanding blocked request sizes: size -> waiters.
    ///
    /// The sum is the pending-acquire total reported by `count`; the first
    /// key is the minimum pending request, the starvation guard.
    pending: BTreeMap<u32, u32>,
    /// Monotonic: never reverts to false.
    closed: bool,
    /// Last successful acquirer. Diagnostic only.
    last_holder: Option<Holder>,
}

impl SemState {
    fn pending_total(&self) -> u64 {
        self.pending
            .iter()
            .map(|(count, waiters)| u64::from(*count) * u64::from(*waiters))
            .sum()
    }

    fn min_pending(&self) -> Option<u32> {
        self.pending.keys().next().copied()
    }

    fn add_waiter(&mut self, count: u32) {
        *self.pending.entry(count).or_insert(0) += 1;
    }

    fn remove_waiter(&mut self, count: u32) {
        if let Some(waiters) = self.pending.get_mut(&count) {
            *waiters -= 1;
            if *waiters == 0 {
                self.pending.remove(&count);
            }
        }
    }
}

/// The semaphore component: state, critical section, rendezvous, refcount.
///
/// Shared verbatim between every handle over one instance; the public
/// [`Semaphore`] adds naming and lifetime on top.
#[derive(Debug)]
pub(crate) struct SemCore {
    state: Locker<SemState>,
    rendezvous: Condvar,
    ref_count: AtomicU32,
}

impl SemCore {
    pub(crate) fn new(initial: u32) -> Self {
        Self {
            state: Locker::new(SemState {
                value: initial,
                pending: BTreeMap::new(),
                closed: false,
                last_holder: None,
            }),
            rendezvous: Condvar::new(),
            ref_count: AtomicU32::new(1),
        }
    }

    /// Acquires `count` units, blocking until `deadline`.
    pub(crate) fn acquire(&self, count: u32, deadline: Deadline) -> Result<()> {
        if count == 0 {
            return Err(Error::BadValue);
        }
        // One conversion at entry; internal re-waits never extend it.
        let deadline = deadline.resolve();

        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Failed);
        }
        if state.value >= count {
            // Fast path: no rendezvous touched.
            state.value -= count;
            state.last_holder = Some(current_holder());
            return Ok(());
        }
        if deadline.elapsed() {
            return Err(Error::WouldBlock);
        }

        state.add_waiter(count);
        let result = loop {
            let timed_out = match deadline {
                Resolved::Never => {
                    state.wait(&self.rendezvous);
                    false
                }
                Resolved::At(t) => state.wait_until(&self.rendezvous, t),
            };
            if timed_out {
                break Err(Error::TimedOut);
            }
            if state.closed {
                break Err(Error::Failed);
            }
            // Smallest pending request first. A larger request re-waits
            // even when the value would satisfy it, so a cheap waiter is
            // never passed over by an expensive one.
            let min = state.min_pending().unwrap_or(count);
            if count <= min && state.value >= count {
                state.value -= count;
                state.last_holder = Some(current_holder());
                break Ok(());
            }
        };
        state.remove_waiter(count);
        // Cascade: leftover value may satisfy a remaining waiter, and this
        // exit may have changed the minimum pending request.
        if state.value > 0 && !state.pending.is_empty() {
            self.rendezvous.notify_all();
        }
        result
    }

    /// Adds `count` units and wakes blocked acquirers to re-check.
    pub(crate) fn release(&self, count: u32, hint: RescheduleHint) -> Result<()> {
        if count == 0 {
            return Err(Error::BadValue);
        }
        let woke = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Failed);
            }
            // Overflow is an error, not a wraparound.
            state.value = state.value.checked_add(count).ok_or(Error::Failed)?;
            if state.pending.is_empty() {
                false
            } else {
                self.rendezvous.notify_all();
                true
            }
        };
        if woke && hint == RescheduleHint::Reschedule {
            std::thread::yield_now();
        }
        Ok(())
    }

    /// Marks the instance unusable and wakes every waiter.
    pub(crate) fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Failed);
        }
        state.closed = true;
        self.rendezvous.notify_all();
        Ok(())
    }

    /// The available count, or the negated pending total while acquirers
    /// are blocked.
    pub(crate) fn count(&self) -> i64 {
        let state = self.state.lock();
        let pending = state.pending_total();
        if pending > 0 {
            -(pending.min(i64::MAX as u64) as i64)
        } else {
            i64::from(state.value)
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn last_holder(&self) -> Option<Holder> {
        self.state.lock().last_holder
    }

    /// Adds one handle over this instance.
    pub(crate) fn retain(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one handle; returns the number of handles remaining.
    pub(crate) fn release_ref(&self) -> u32 {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub(crate) fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// The thread that most recently held the state lock. Diagnostic only.
    pub(crate) fn state_owner(&self) -> Holder {
        self.state.last_owner()
    }
}

#[derive(Debug)]
enum Backing {
    Local,
    Named {
        name: String,
        registry: Arc<NameRegistry>,
    },
}

/// A counted handle to a counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    core: Arc<SemCore>,
    backing: Backing,
    deleted: bool,
}

impl Semaphore {
    /// Creates a process-local semaphore with `initial` units.
    #[must_use]
    pub fn create(initial: u32) -> Self {
        tracing::trace!(initial, "semaphore created");
        Self {
            core: Arc::new(SemCore::new(initial)),
            backing: Backing::Local,
            deleted: false,
        }
    }

    /// Creates a named semaphore backed by a shared region from the
    /// registry's area provider.
    ///
    /// # Errors
    ///
    /// `BadValue` for an empty or over-long name, `Failed` if the name is
    /// taken, `NoMemory` if the provider cannot back the region.
    pub fn create_named(
        registry: &Arc<NameRegistry>,
        name: &str,
        initial: u32,
        policy: AccessPolicy,
    ) -> Result<Self> {
        let core = Arc::new(SemCore::new(initial));
        registry.insert_semaphore(name, policy, Arc::clone(&core))?;
        tracing::debug!(name, initial, "named semaphore created");
        Ok(Self {
            core,
            backing: Backing::Named {
                name: name.to_owned(),
                registry: Arc::clone(registry),
            },
            deleted: false,
        })
    }

    /// Opens an existing named semaphore, adding one handle.
    ///
    /// # Errors
    ///
    /// `Failed` if no semaphore with that name exists.
    pub fn open(registry: &Arc<NameRegistry>, name: &str) -> Result<Self> {
        let core = registry.open_semaphore(name)?;
        tracing::trace!(name, "named semaphore opened");
        Ok(Self {
            core,
            backing: Backing::Named {
                name: name.to_owned(),
                registry: Arc::clone(registry),
            },
            deleted: false,
        })
    }

    /// Duplicates this handle. Named handles delegate to [`Semaphore::open`].
    ///
    /// # Errors
    ///
    /// `Failed` if a named instance has already been destroyed.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.backing {
            Backing::Local => {
                self.core.retain();
                Ok(Self {
                    core: Arc::clone(&self.core),
                    backing: Backing::Local,
                    deleted: false,
                })
            }
            Backing::Named { name, registry } => Self::open(registry, name),
        }
    }

    /// Acquires `count` units, blocking until `deadline`.
    ///
    /// # Errors
    ///
    /// `BadValue` for a zero count, `WouldBlock` if the deadline had
    /// already passed on entry, `TimedOut` if it passed while blocked,
    /// `Failed` if the semaphore is (or becomes) closed.
    pub fn acquire(&self, count: u32, deadline: Deadline) -> Result<()> {
        self.core.acquire(count, deadline)
    }

    /// Releases `count` units back.
    ///
    /// # Errors
    ///
    /// `BadValue` for a zero count, `Failed` if closed or if the value
    /// would overflow.
    pub fn release(&self, count: u32) -> Result<()> {
        self.core.release(count, RescheduleHint::default())
    }

    /// [`Semaphore::release`] with an explicit scheduling hint.
    pub fn release_with(&self, count: u32, hint: RescheduleHint) -> Result<()> {
        self.core.release(count, hint)
    }

    /// Closes the instance: every blocked and future acquire fails.
    ///
    /// # Errors
    ///
    /// `Failed` if already closed.
    pub fn close(&self) -> Result<()> {
        tracing::debug!(name = self.name(), "semaphore closed");
        self.core.close()
    }

    /// The available count, or the negated pending-acquire total while
    /// acquirers are blocked.
    #[must_use]
    pub fn count(&self) -> i64 {
        self.core.count()
    }

    /// Whether [`Semaphore::close`] has been called on this instance.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// The thread/team that last acquired successfully. Diagnostic only.
    #[must_use]
    pub fn last_holder(&self) -> Option<Holder> {
        self.core.last_holder()
    }

    /// The name of a named instance.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.backing {
            Backing::Local => None,
            Backing::Named { name, .. } => Some(name),
        }
    }

    /// Number of open handles over this instance.
    #[must_use]
    pub fn handle_count(&self) -> u32 {
        self.core.ref_count()
    }

    /// Drops this handle; the handle driving the count to zero destroys
    /// the backing resources.
    ///
    /// # Errors
    ///
    /// `Failed` if a named instance's registry entry has gone missing.
    pub fn delete(mut self) -> Result<()> {
        self.deleted = true;
        match &self.backing {
            Backing::Local => {
                self.core.release_ref();
                Ok(())
            }
            Backing::Named { name, registry } => registry.release_named(name),
        }
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if !self.deleted {
            tracing::warn!(
                name = self.name(),
                last_owner = ?self.core.state_owner(),
                "semaphore handle dropped without delete; backing resources leak"
            );
        }
    }
}
