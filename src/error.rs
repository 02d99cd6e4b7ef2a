//! Error taxonomy for the kit.
//!
//! Every fallible operation in this crate returns one of five categories.
//! Native/backend failures are translated into this taxonomy at the layer
//! boundary; nothing in this crate panics on a caller error.
//!
//! - [`Error::BadValue`]: malformed argument (zero count, oversized payload,
//!   required-but-empty name)
//! - [`Error::NoMemory`]: allocation or region-mapping failure
//! - [`Error::WouldBlock`]: a zero-duration deadline could not be satisfied
//!   immediately
//! - [`Error::TimedOut`]: the deadline elapsed while blocked
//! - [`Error::Failed`]: generic failure: closed instance, counter overflow,
//!   missing named resource
//!
//! Retry or escalation after [`Error::TimedOut`] / [`Error::WouldBlock`] is
//! entirely the caller's responsibility.

use core::fmt;

/// The failure category of a kit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// Malformed argument: zero count, empty name, oversized payload.
    BadValue,
    /// Allocation or shared-region mapping failed.
    NoMemory,
    /// Zero-duration deadline and the operation was unsatisfiable right now.
    WouldBlock,
    /// Deadline elapsed while blocked.
    TimedOut,
    /// Generic failure: instance closed, counter overflow, unknown name.
    Failed,
}

impl Error {
    /// Returns true for [`Error::TimedOut`].
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Returns true for [`Error::WouldBlock`].
    #[must_use]
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }

    /// Returns true if the failure is a deadline outcome rather than a
    /// state or argument problem.
    #[must_use]
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::TimedOut | Self::WouldBlock)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadValue => write!(f, "invalid argument"),
            Self::NoMemory => write!(f, "out of memory"),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Failed => write!(f, "operation failed"),
        }
    }
}

impl std::error::Error for Error {}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;
