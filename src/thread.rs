//! Thread-exit rendezvous.
//!
//! Joining a thread is a client of the semaphore layer, not a separate
//! mechanism: each spawned thread owns a zero-initialized semaphore that an
//! exit guard releases exactly once when the thread finishes, including by
//! panic unwind. Waiting for the thread is an acquire against that
//! semaphore with the usual deadline semantics, and the join is repeatable
//! because a successful wait re-releases the unit it took.

use std::sync::Arc;

use crate::error::Result;
use crate::sync::semaphore::{RescheduleHint, SemCore};
use crate::time::Deadline;

/// Releases the exit semaphore exactly once, on drop.
struct ExitGuard(Arc<SemCore>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.0.release(1, RescheduleHint::DoNotReschedule);
    }
}

/// A handle for awaiting a spawned thread's exit.
#[derive(Debug)]
pub struct ThreadRendezvous {
    exit: Arc<SemCore>,
    name: String,
}

impl ThreadRendezvous {
    /// Blocks until the thread has exited or `deadline` passes.
    ///
    /// Repeatable: multiple callers (or repeated calls) all observe the
    /// exit once it has happened.
    ///
    /// # Errors
    ///
    /// `WouldBlock` if the thread is still running and the deadline is
    /// zero-duration, `TimedOut` if it passed while blocked.
    pub fn wait(&self, deadline: Deadline) -> Result<()> {
        self.exit.acquire(1, deadline)?;
        // Put the unit back so the next waiter also observes the exit.
        let _ = self.exit.release(1, RescheduleHint::DoNotReschedule);
        Ok(())
    }

    /// The name the thread was spawned with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Spawns a named thread whose exit can be awaited with a deadline.
pub fn spawn<F>(name: &str, f: F) -> ThreadRendezvous
where
    F: FnOnce() + Send + 'static,
{
    let exit = Arc::new(SemCore::new(0));
    let guard = ExitGuard(Arc::clone(&exit));
    let builder = std::thread::Builder::new().name(name.to_owned());
    let spawned = builder.spawn(move || {
        let _guard = guard;
        f();
    });
    if let Err(err) = spawned {
        // The guard moved into the failed closure was dropped by the
        // failed spawn, so waiters still unblock.
        tracing::warn!(name, %err, "thread spawn failed");
    }
    tracing::trace!(name, "thread spawned");
    ThreadRendezvous {
        exit,
        name: name.to_owned(),
    }
}
