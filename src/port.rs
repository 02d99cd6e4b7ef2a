//! Bounded FIFO message port built from two semaphores.
//!
//! A port is a queue of fixed-size `(tag, payload)` records synchronized by
//! a writer semaphore counting free slots and a reader semaphore counting
//! filled slots, plus a short critical section over the record array.
//! Permit possession alone guarantees no two writers touch the same free
//! slot and no two readers the same filled slot; the critical section only
//! serializes the array indices, which is also why enqueue order equals
//! dequeue order regardless of semaphore wakeup ordering.
//!
//! Records are fixed-size (`Tunables::max_record_bytes` payload); larger
//! messages fail with `BadValue` and callers chunk. Dequeuing shifts the
//! remaining records down the array; for the small fixed record count
//! this memmove is cheaper than circular-index bookkeeping.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::area::AccessPolicy;
use crate::config::Tunables;
use crate::error::{Error, Result};
use crate::registry::NameRegistry;
use crate::sync::semaphore::{RescheduleHint, SemCore};
use crate::time::Deadline;

/// Size of the shared region header backing one named port, before the
/// record array.
pub(crate) const PORT_STATE_BYTES: usize = 64;

/// One queued message: tag, declared length, fixed-capacity payload.
#[derive(Debug)]
struct Record {
    tag: i32,
    len: usize,
    bytes: Box<[u8]>,
}

#[derive(Debug)]
struct Ring {
    /// Index 0 is the head; writers append at the tail.
    queue: Vec<Record>,
    /// Recycled payload buffers, one per free slot.
    free: Vec<Box<[u8]>>,
    closed: bool,
}

/// The port component shared by every handle over one instance.
#[derive(Debug)]
pub(crate) struct PortCore {
    capacity: usize,
    max_record_bytes: usize,
    /// Counts free slots; writers acquire, readers release.
    writer: SemCore,
    /// Counts filled slots; readers acquire, writers release.
    reader: SemCore,
    ring: Mutex<Ring>,
    ref_count: AtomicU32,
}

impl PortCore {
    pub(crate) fn new(capacity: usize, max_record_bytes: usize) -> Self {
        let free = (0..capacity)
            .map(|_| vec![0u8; max_record_bytes].into_boxed_slice())
            .collect();
        Self {
            capacity,
            max_record_bytes,
            writer: SemCore::new(capacity as u32),
            reader: SemCore::new(0),
            ring: Mutex::new(Ring {
                queue: Vec::with_capacity(capacity),
                free,
                closed: false,
            }),
            ref_count: AtomicU32::new(1),
        }
    }

    fn write(&self, tag: i32, payload: &[u8], deadline: Deadline) -> Result<()> {
        if payload.len() > self.max_record_bytes {
            return Err(Error::BadValue);
        }
        // Blocks while the queue is full; closure surfaces as Failed.
        self.writer.acquire(1, deadline)?;

        {
            let mut ring = self.ring.lock();
            if ring.closed {
                // Closed between our wakeup and the critical section; the
                // buffer is never touched.
                return Err(Error::Failed);
            }
            let mut bytes = ring.free.pop().unwrap_or_else(|| {
                // A writer permit implies a free slot; tolerate a missing
                // buffer rather than corrupt the queue.
                vec![0u8; self.max_record_bytes].into_boxed_slice()
            });
            bytes[..payload.len()].copy_from_slice(payload);
            ring.queue.push(Record {
                tag,
                len: payload.len(),
                bytes,
            });
        }

        // Hand the filled slot to readers. Failure means the port closed
        // after the record was queued; the queue is dead either way.
        self.reader
            .release(1, RescheduleHint::DoNotReschedule)
            .map_err(|_| Error::Failed)
    }

    fn read_into(&self, buf: &mut [u8], deadline: Deadline) -> Result<(i32, usize)> {
        self.reader.acquire(1, deadline)?;

        let (tag, copied) = {
            let mut ring = self.ring.lock();
            if ring.closed {
                return Err(Error::Failed);
            }
            if ring.queue.is_empty() {
                // A reader permit implies a queued record.
                return Err(Error::Failed);
            }
            // Shift-down dequeue: head out, remaining records move down.
            let record = ring.queue.remove(0);
            let copied = record.len.min(buf.len());
            buf[..copied].copy_from_slice(&record.bytes[..copied]);
            ring.free.push(record.bytes);
            (record.tag, copied)
        };

        // Refund the free slot. If the port closed meanwhile the refund is
        // moot; the record was already ours.
        let _ = self.writer.release(1, RescheduleHint::DoNotReschedule);
        Ok((tag, copied))
    }

    fn peek_length(&self, deadline: Deadline) -> Result<usize> {
        self.reader.acquire(1, deadline)?;

        let len = {
            let ring = self.ring.lock();
            if ring.closed {
                return Err(Error::Failed);
            }
            ring.queue.first().map(|record| record.len)
        };

        // The record stays queued; give the permit back.
        let _ = self.reader.release(1, RescheduleHint::DoNotReschedule);
        len.ok_or(Error::Failed)
    }

    fn close(&self) -> Result<()> {
        {
            let mut ring = self.ring.lock();
            if ring.closed {
                return Err(Error::Failed);
            }
            ring.closed = true;
        }
        // Force-release every blocked writer and reader; each observes
        // closure exactly once, and later calls fail from any state.
        let _ = self.writer.close();
        let _ = self.reader.close();
        Ok(())
    }

    fn count(&self) -> usize {
        self.ring.lock().queue.len()
    }

    fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }

    pub(crate) fn retain(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn release_ref(&self) -> u32 {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// Shared-region size for a named port with this geometry.
    fn region_size(capacity: usize, max_record_bytes: usize) -> usize {
        PORT_STATE_BYTES + capacity * (max_record_bytes + core::mem::size_of::<Record>())
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

/// A counted handle to a bounded FIFO message port.
#[derive(Debug)]
pub struct Port {
    core: Arc<PortCore>,
    backing: Backing,
    deleted: bool,
}

impl Port {
    /// Creates a process-local port with room for `capacity` records.
    ///
    /// # Errors
    ///
    /// `BadValue` for zero capacity, `NoMemory` above the default
    /// capacity limit.
    pub fn create(capacity: usize) -> Result<Self> {
        Self::create_with(&Tunables::default(), capacity)
    }

    /// Creates a process-local port under explicit tunables.
    ///
    /// # Errors
    ///
    /// `BadValue` for zero capacity or invalid tunables, `NoMemory` above
    /// the capacity limit.
    pub fn create_with(tunables: &Tunables, capacity: usize) -> Result<Self> {
        tunables.validate().map_err(|_| Error::BadValue)?;
        if capacity == 0 {
            return Err(Error::BadValue);
        }
        if capacity > tunables.max_queue_capacity {
            return Err(Error::NoMemory);
        }
        tracing::trace!(capacity, "port created");
        Ok(Self {
            core: Arc::new(PortCore::new(capacity, tunables.max_record_bytes)),
            backing: Backing::Local,
            deleted: false,
        })
    }

    /// Creates a named port backed by a shared region from the registry's
    /// area provider.
    ///
    /// # Errors
    ///
    /// `BadValue` for bad capacity or name, `Failed` if the name is taken,
    /// `NoMemory` if the provider cannot back the region.
    pub fn create_named(
        registry: &Arc<NameRegistry>,
        name: &str,
        capacity: usize,
        policy: AccessPolicy,
    ) -> Result<Self> {
        let tunables = registry.tunables();
        if capacity == 0 {
            return Err(Error::BadValue);
        }
        if capacity > tunables.max_queue_capacity {
            return Err(Error::NoMemory);
        }
        let core = Arc::new(PortCore::new(capacity, tunables.max_record_bytes));
        let size = PortCore::region_size(capacity, tunables.max_record_bytes);
        registry.insert_port(name, size, policy, Arc::clone(&core))?;
        tracing::debug!(name, capacity, "named port created");
        Ok(Self {
            core,
            backing: Backing::Named {
                name: name.to_owned(),
                registry: Arc::clone(registry),
            },
            deleted: false,
        })
    }

    /// Opens an existing named port, adding one handle.
    ///
    /// # Errors
    ///
    /// `Failed` if no port with that name exists.
    pub fn open(registry: &Arc<NameRegistry>, name: &str) -> Result<Self> {
        let core = registry.open_port(name)?;
        tracing::trace!(name, "named port opened");
        Ok(Self {
            core,
            backing: Backing::Named {
                name: name.to_owned(),
                registry: Arc::clone(registry),
            },
            deleted: false,
        })
    }

    /// Duplicates this handle. Named handles delegate to [`Port::open`].
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

    /// Queues one record, blocking while the port is full.
    ///
    /// # Errors
    ///
    /// `BadValue` if `payload` exceeds the record capacity, `WouldBlock` /
    /// `TimedOut` per the deadline, `Failed` if the port is closed (in
    /// which case the buffer is never touched).
    pub fn write(&self, tag: i32, payload: &[u8], deadline: Deadline) -> Result<()> {
        self.core.write(tag, payload, deadline)
    }

    /// Dequeues the head record, blocking while the port is empty.
    ///
    /// # Errors
    ///
    /// `WouldBlock` / `TimedOut` per the deadline, `Failed` if closed.
    pub fn read(&self, deadline: Deadline) -> Result<(i32, Vec<u8>)> {
        let mut buf = vec![0u8; self.core.max_record_bytes];
        let (tag, len) = self.core.read_into(&mut buf, deadline)?;
        buf.truncate(len);
        Ok((tag, buf))
    }

    /// Dequeues the head record into `buf`, truncating silently if the
    /// record is longer than the buffer. Returns the tag and the number of
    /// bytes copied.
    ///
    /// Use [`Port::peek_length`] first to size the buffer.
    ///
    /// # Errors
    ///
    /// `WouldBlock` / `TimedOut` per the deadline, `Failed` if closed.
    pub fn read_into(&self, buf: &mut [u8], deadline: Deadline) -> Result<(i32, usize)> {
        self.core.read_into(buf, deadline)
    }

    /// The declared length of the head record, without dequeuing it.
    /// Blocks like [`Port::read`] while the port is empty.
    ///
    /// # Errors
    ///
    /// `WouldBlock` / `TimedOut` per the deadline, `Failed` if closed.
    pub fn peek_length(&self, deadline: Deadline) -> Result<usize> {
        self.core.peek_length(deadline)
    }

    /// Closes the port: every blocked writer and reader observes `Failed`,
    /// and all later operations fail.
    ///
    /// # Errors
    ///
    /// `Failed` if already closed.
    pub fn close(&self) -> Result<()> {
        tracing::debug!(name = self.name(), "port closed");
        self.core.close()
    }

    /// Number of records currently queued.
    #[must_use]
    pub fn count(&self) -> usize {
        self.core.count()
    }

    /// The fixed queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    /// Whether [`Port::close`] has been called on this instance.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
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
    /// the backing resources. Legal from any state, open or closed.
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

impl Drop for Port {
    fn drop(&mut self) {
        if !self.deleted {
            tracing::warn!(
                name = self.name(),
                "port handle dropped without delete; backing resources leak"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_logging::init_test_logging;
    use crate::{assert_with_log, test_complete, test_phase};
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        test_phase!(name);
    }

    #[test]
    fn capacity_one_fill_drain_cycle() {
        // Scenario A from the contract.
        init_test("capacity_one_fill_drain_cycle");
        let port = Port::create(1).expect("create");

        port.write(1, b"A", Deadline::Infinite).expect("write A");
        let full = port.write(2, b"B", Deadline::NOW);
        assert_with_log!(
            full == Err(Error::WouldBlock),
            "write on full port with NOW",
            Err::<(), Error>(Error::WouldBlock),
            full
        );

        let (tag, payload) = port.read(Deadline::Infinite).expect("read A");
        assert_with_log!(tag == 1, "first tag", 1i32, tag);
        assert_with_log!(payload == b"A", "first payload", b"A".to_vec(), payload);

        port.write(2, b"B", Deadline::Infinite).expect("write B");
        let (tag, payload) = port.read(Deadline::Infinite).expect("read B");
        assert_with_log!(tag == 2, "second tag", 2i32, tag);
        assert_with_log!(payload == b"B", "second payload", b"B".to_vec(), payload);

        port.delete().expect("delete");
        test_complete!("capacity_one_fill_drain_cycle");
    }

    #[test]
    fn fifo_order_is_preserved() {
        init_test("fifo_order_is_preserved");
        let port = Port::create(8).expect("create");
        for i in 0..8i32 {
            port.write(i, &i.to_le_bytes(), Deadline::Infinite)
                .expect("write");
        }
        assert_with_log!(port.count() == 8, "queued", 8usize, port.count());
        for i in 0..8i32 {
            let (tag, payload) = port.read(Deadline::Infinite).expect("read");
            assert_with_log!(tag == i, "tag order", i, tag);
            assert_with_log!(
                payload == i.to_le_bytes(),
                "payload order",
                i.to_le_bytes().to_vec(),
                payload
            );
        }
        port.delete().expect("delete");
        test_complete!("fifo_order_is_preserved");
    }

    #[test]
    fn oversized_payload_is_bad_value() {
        init_test("oversized_payload_is_bad_value");
        let port = Port::create(1).expect("create");
        let too_big = vec![0u8; Tunables::default().max_record_bytes + 1];
        let result = port.write(0, &too_big, Deadline::Infinite);
        assert_with_log!(
            result == Err(Error::BadValue),
            "oversized write",
            Err::<(), Error>(Error::BadValue),
            result
        );
        // The failed write consumed no slot.
        assert_with_log!(port.count() == 0, "nothing queued", 0usize, port.count());
        port.write(0, b"fits", Deadline::Infinite).expect("write");
        port.delete().expect("delete");
        test_complete!("oversized_payload_is_bad_value");
    }

    #[test]
    fn read_into_truncates_silently() {
        init_test("read_into_truncates_silently");
        let port = Port::create(1).expect("create");
        port.write(7, b"0123456789", Deadline::Infinite).expect("write");

        let len = port.peek_length(Deadline::Infinite).expect("peek");
        assert_with_log!(len == 10, "peeked length", 10usize, len);
        // Peek does not dequeue.
        assert_with_log!(port.count() == 1, "still queued", 1usize, port.count());

        let mut small = [0u8; 4];
        let (tag, copied) = port.read_into(&mut small, Deadline::Infinite).expect("read");
        assert_with_log!(tag == 7, "tag", 7i32, tag);
        assert_with_log!(copied == 4, "truncated length", 4usize, copied);
        assert_with_log!(&small == b"0123", "truncated bytes", b"0123", &small);

        port.delete().expect("delete");
        test_complete!("read_into_truncates_silently");
    }

    #[test]
    fn empty_port_read_would_block_and_times_out() {
        init_test("empty_port_read_would_block_and_times_out");
        let port = Port::create(2).expect("create");
        let probe = port.read(Deadline::NOW);
        assert_with_log!(
            probe == Err(Error::WouldBlock),
            "read probe",
            Err::<(i32, Vec<u8>), Error>(Error::WouldBlock),
            probe
        );
        let timed = port.read(Deadline::After(Duration::from_millis(20)));
        assert_with_log!(
            timed == Err(Error::TimedOut),
            "read timeout",
            Err::<(i32, Vec<u8>), Error>(Error::TimedOut),
            timed
        );
        port.delete().expect("delete");
        test_complete!("empty_port_read_would_block_and_times_out");
    }

    #[test]
    fn close_unblocks_reader_and_writer() {
        init_test("close_unblocks_reader_and_writer");
        let port = Arc::new(PortCore::new(1, 64));

        // Fill the port so a writer will block.
        port.write(1, b"full", Deadline::Infinite).expect("fill");

        let writer_port = Arc::clone(&port);
        let writer =
            std::thread::spawn(move || writer_port.write(2, b"blocked", Deadline::Infinite));
        while writer_core_pending(&port) == 0 {
            std::thread::yield_now();
        }

        port.close().expect("close");
        let writer_result = writer.join().expect("join");
        assert_with_log!(
            writer_result == Err(Error::Failed),
            "blocked writer observed closure",
            Err::<(), Error>(Error::Failed),
            writer_result
        );

        // Terminal from any state.
        let write = port.write(3, b"x", Deadline::Infinite);
        assert_with_log!(
            write == Err(Error::Failed),
            "write after close",
            Err::<(), Error>(Error::Failed),
            write
        );
        let mut buf = [0u8; 8];
        let read = port.read_into(&mut buf, Deadline::Infinite);
        assert_with_log!(
            read == Err(Error::Failed),
            "read after close",
            Err::<(i32, usize), Error>(Error::Failed),
            read
        );
        let again = port.close();
        assert_with_log!(
            again == Err(Error::Failed),
            "second close",
            Err::<(), Error>(Error::Failed),
            again
        );
        test_complete!("close_unblocks_reader_and_writer");
    }

    fn writer_core_pending(core: &PortCore) -> i64 {
        let pending = core.writer.count();
        if pending < 0 { -pending } else { 0 }
    }

    #[test]
    fn writer_blocks_until_reader_drains() {
        init_test("writer_blocks_until_reader_drains");
        let port = Arc::new(PortCore::new(1, 64));
        port.write(1, b"first", Deadline::Infinite).expect("fill");

        let writer_port = Arc::clone(&port);
        let writer = std::thread::spawn(move || {
            writer_port.write(2, b"second", Deadline::Infinite)
        });
        while writer_core_pending(&port) == 0 {
            std::thread::yield_now();
        }

        let mut buf = [0u8; 64];
        let (tag, len) = port.read_into(&mut buf, Deadline::Infinite).expect("read");
        assert_with_log!(tag == 1, "drained head", 1i32, tag);
        assert_with_log!(&buf[..len] == b"first", "head payload", b"first", &buf[..len]);

        writer.join().expect("join").expect("unblocked write");
        let (tag, _) = port.read_into(&mut buf, Deadline::Infinite).expect("read 2");
        assert_with_log!(tag == 2, "second record", 2i32, tag);
        test_complete!("writer_blocks_until_reader_drains");
    }

    #[test]
    fn capacity_limits_are_enforced() {
        init_test("capacity_limits_are_enforced");
        let zero = Port::create(0).err();
        assert_with_log!(
            zero == Some(Error::BadValue),
            "zero capacity",
            Some(Error::BadValue),
            zero
        );
        let over = Port::create(Tunables::default().max_queue_capacity + 1).err();
        assert_with_log!(
            over == Some(Error::NoMemory),
            "over capacity limit",
            Some(Error::NoMemory),
            over
        );
        test_complete!("capacity_limits_are_enforced");
    }

    #[test]
    fn local_clone_shares_queue() {
        init_test("local_clone_shares_queue");
        let port = Port::create(4).expect("create");
        let dup = port.try_clone().expect("clone");
        assert_with_log!(port.handle_count() == 2, "two handles", 2u32, port.handle_count());

        dup.write(9, b"via dup", Deadline::Infinite).expect("write");
        let (tag, payload) = port.read(Deadline::Infinite).expect("read");
        assert_with_log!(tag == 9, "shared record tag", 9i32, tag);
        assert_with_log!(
            payload == b"via dup",
            "shared record payload",
            b"via dup".to_vec(),
            payload
        );

        dup.delete().expect("delete dup");
        port.delete().expect("delete");
        test_complete!("local_clone_shares_queue");
    }
}
