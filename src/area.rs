//! Consumed interface to the named shared-region provider.
//!
//! Named semaphores and ports are backed by a region obtained from an
//! [`AreaProvider`]; this trait is the only place the kit touches region
//! allocation. The provider injected into the
//! [`NameRegistry`](crate::registry::NameRegistry) decides what a region
//! really is: the in-process default, [`HeapAreas`], hands out plain heap
//! buffers under a byte quota, which is what unit tests substitute.
//!
//! The real allocator that maps regions between unrelated processes lives
//! outside this crate and implements the same three operations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// How a cloned region may be used by the mapping client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Full access. The default for creators.
    #[default]
    ReadWrite,
    /// The mapping may observe but not mutate the region.
    ReadOnly,
}

/// Identifier of one region within its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AreaId(pub u64);

/// A mapped region handle: id, size, and the backing byte store.
#[derive(Debug, Clone)]
pub struct Area {
    id: AreaId,
    size: usize,
    policy: AccessPolicy,
    bytes: Arc<Mutex<Box<[u8]>>>,
}

impl Area {
    /// The provider-scoped id of this region.
    #[must_use]
    pub fn id(&self) -> AreaId {
        self.id
    }

    /// The size of the region in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The access policy this mapping was opened with.
    #[must_use]
    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    /// Runs `f` over the region's bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.bytes.lock();
        f(&mut bytes)
    }
}

/// The named shared-region allocator the kit consumes.
pub trait AreaProvider: Send + Sync {
    /// Creates a region of `size` bytes under `name`.
    ///
    /// # Errors
    ///
    /// `Failed` if the name is taken, `NoMemory` if the provider cannot
    /// back the region, `BadValue` for an empty name or zero size.
    fn create_area(&self, name: &str, size: usize, policy: AccessPolicy) -> Result<Area>;

    /// Maps an existing region by name.
    ///
    /// # Errors
    ///
    /// `Failed` if no region with that name exists.
    fn clone_area(&self, name: &str, policy: AccessPolicy) -> Result<Area>;

    /// Releases one mapping; the region is freed when the last mapping is
    /// deleted.
    ///
    /// # Errors
    ///
    /// `Failed` if the handle does not belong to this provider.
    fn delete_area(&self, area: Area) -> Result<()>;
}

struct Slot {
    id: AreaId,
    size: usize,
    refs: u32,
    bytes: Arc<Mutex<Box<[u8]>>>,
}

struct HeapState {
    areas: HashMap<String, Slot>,
    used: usize,
    next_id: u64,
}

/// In-process [`AreaProvider`]: heap buffers under a byte quota.
pub struct HeapAreas {
    state: Mutex<HeapState>,
    quota: usize,
}

impl HeapAreas {
    /// Creates a provider with the given total byte budget.
    #[must_use]
    pub fn new(quota: usize) -> Self {
        Self {
            state: Mutex::new(HeapState {
                areas: HashMap::new(),
                used: 0,
                next_id: 1,
            }),
            quota,
        }
    }

    /// Bytes currently committed to live regions.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.state.lock().used
    }
}

impl Default for HeapAreas {
    fn default() -> Self {
        Self::new(crate::config::Tunables::default().area_quota_bytes)
    }
}

impl AreaProvider for HeapAreas {
    fn create_area(&self, name: &str, size: usize, policy: AccessPolicy) -> Result<Area> {
        if name.is_empty() || size == 0 {
            return Err(Error::BadValue);
        }
        let mut state = self.state.lock();
        if state.areas.contains_key(name) {
            return Err(Error::Failed);
        }
        if state.used.saturating_add(size) > self.quota {
            return Err(Error::NoMemory);
        }
        let id = AreaId(state.next_id);
        state.next_id += 1;
        state.used += size;
        let bytes = Arc::new(Mutex::new(vec![0u8; size].into_boxed_slice()));
        state.areas.insert(
            name.to_owned(),
            Slot {
                id,
                size,
                refs: 1,
                bytes: Arc::clone(&bytes),
            },
        );
        tracing::trace!(name, size, id = id.0, "area created");
        Ok(Area {
            id,
            size,
            policy,
            bytes,
        })
    }

    fn clone_area(&self, name: &str, policy: AccessPolicy) -> Result<Area> {
        let mut state = self.state.lock();
        let slot = state.areas.get_mut(name).ok_or(Error::Failed)?;
        slot.refs += 1;
        Ok(Area {
            id: slot.id,
            size: slot.size,
            policy,
            bytes: Arc::clone(&slot.bytes),
        })
    }

    fn delete_area(&self, area: Area) -> Result<()> {
        let mut state = self.state.lock();
        let name = state
            .areas
            .iter()
            .find(|(_, slot)| slot.id == area.id)
            .map(|(name, _)| name.clone())
            .ok_or(Error::Failed)?;
        let slot = state.areas.get_mut(&name).ok_or(Error::Failed)?;
        slot.refs -= 1;
        if slot.refs == 0 {
            state.used -= area.size();
            state.areas.remove(&name);
            tracing::trace!(name, id = area.id().0, "area destroyed");
        }
        Ok(())
    }
}
