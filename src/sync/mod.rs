//! Blocking synchronization primitives.
//!
//! - [`Semaphore`]: counting semaphore with N-ary acquire/release,
//!   absolute-time deadlines, and close-to-unblock
//! - [`locker`]: the critical-section capability whose recorded owner
//!   follows the calling thread
//!
//! Everything here blocks on preemptive OS threads; nothing is
//! cooperative or async.

pub(crate) mod locker;
pub(crate) mod semaphore;

pub use locker::Holder;
pub use semaphore::{RescheduleHint, Semaphore};
