//! Deadlines for blocking operations.
//!
//! Every blocking call in this crate takes a [`Deadline`]. A relative
//! deadline is converted exactly once, at operation entry, into an absolute
//! instant on the clock the waits actually use. Internal re-wait relays
//! therefore never extend the effective timeout.
//!
//! # Clock choice
//!
//! All deadlines resolve against [`std::time::Instant`], the monotonic
//! clock. Earlier renditions of this layer mixed wall-clock and boot-time
//! bases depending on the backend; this implementation deliberately uses a
//! single monotonic base, so a wall-clock step (NTP, suspend/resume
//! adjustments) never shortens or lengthens a wait.

use std::time::{Duration, Instant};

/// When a blocking operation must give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Block until the operation can complete or the instance is closed.
    Infinite,
    /// Block for at most this long, measured from operation entry.
    After(Duration),
    /// Block until this instant.
    At(Instant),
}

impl Deadline {
    /// The zero-duration probe deadline.
    ///
    /// An operation given `Deadline::NOW` never enters a blocking wait; if
    /// it cannot complete immediately it fails with
    /// [`Error::WouldBlock`](crate::Error::WouldBlock).
    pub const NOW: Self = Self::After(Duration::ZERO);

    /// Resolves this deadline to an absolute instant, once.
    #[must_use]
    pub(crate) fn resolve(self) -> Resolved {
        match self {
            Self::Infinite => Resolved::Never,
            // An unrepresentable far-future instant is an infinite wait.
            Self::After(d) => Instant::now()
                .checked_add(d)
                .map_or(Resolved::Never, Resolved::At),
            Self::At(t) => Resolved::At(t),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::Infinite
    }
}

impl From<Duration> for Deadline {
    fn from(d: Duration) -> Self {
        Self::After(d)
    }
}

impl From<Instant> for Deadline {
    fn from(t: Instant) -> Self {
        Self::At(t)
    }
}

/// A deadline after the one-time conversion at operation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolved {
    Never,
    At(Instant),
}

impl Resolved {
    /// Returns true if the deadline has already passed.
    pub(crate) fn elapsed(&self) -> bool {
        match self {
            Self::Never => false,
            Self::At(t) => *t <= Instant::now(),
        }
    }
}
