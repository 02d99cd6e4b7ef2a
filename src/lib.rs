//! Synchronization and message-passing primitives: counting semaphores and
//! bounded FIFO message ports.
//!
//! Two components, bottom-up:
//!
//! - [`Semaphore`]: a named or anonymous counting semaphore with N-ary
//!   acquire/release, absolute-time deadlines, close-to-unblock, and
//!   reference-counted lifetime.
//! - [`Port`]: a bounded FIFO of `(tag, payload)` records built from a
//!   pair of semaphores (one counting free slots, one counting filled
//!   slots) plus a short critical section over the record array.
//!
//! Named instances are registered in a process-wide [`NameRegistry`] and
//! backed by regions from an injected [`AreaProvider`], the seam through
//! which a real shared-memory allocator plugs in.
//!
//! Everything blocks on preemptive OS threads. Only acquire, write, read,
//! and peek may block; create, open, clone, close, release, and delete
//! never block beyond a brief critical section. No resource is finalized
//! automatically: every successful create/open/clone must be matched by
//! exactly one delete.
//!
//! # Example
//!
//! ```
//! use portkit::{Deadline, Port};
//!
//! let port = Port::create(16).expect("create");
//! port.write(1, b"hello", Deadline::Infinite).expect("write");
//! let (tag, payload) = port.read(Deadline::Infinite).expect("read");
//! assert_eq!((tag, payload.as_slice()), (1, &b"hello"[..]));
//! port.delete().expect("delete");
//! ```

#![warn(missing_docs)]

pub mod area;
pub mod config;
pub mod error;
pub mod port;
pub mod registry;
pub mod sync;
pub mod test_logging;
pub mod thread;
pub mod time;

pub use area::{AccessPolicy, Area, AreaProvider, HeapAreas};
pub use config::Tunables;
pub use error::{Error, Result};
pub use port::Port;
pub use registry::NameRegistry;
pub use sync::{Holder, RescheduleHint, Semaphore};
pub use time::Deadline;
