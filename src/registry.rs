//! Process-wide name registry for named semaphores and ports.
//!
//! One mutex-protected table maps each instance name to its shared core and
//! the backing area. Creation stamps a kind tag at the start of the region
//! so a mapping client can tell a semaphore region from a port region. The registry is an explicit, lazily-initialized
//! service: production code reaches it through [`NameRegistry::global`],
//! while constructors take `&Arc<NameRegistry>` so tests substitute their
//! own instance (and their own [`AreaProvider`]).
//!
//! All named refcounting funnels through here: `open` increments and
//! `release_named` decrements under the table lock, so a final delete and a
//! concurrent open of the same name serialize instead of racing the
//! destroy.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::area::{AccessPolicy, Area, AreaProvider, HeapAreas};
use crate::config::Tunables;
use crate::error::{Error, Result};
use crate::port::PortCore;
use crate::sync::semaphore::SemCore;

/// Header tag stamped at the start of a named region so a mapping
/// client can tell what kind of instance backs it.
pub(crate) const SEMAPHORE_REGION_TAG: &[u8; 4] = b"SEM\0";
/// Header tag for port-backed regions.
pub(crate) const PORT_REGION_TAG: &[u8; 4] = b"PRT\0";

/// A named instance held by the registry.
#[derive(Clone)]
pub(crate) enum NamedObject {
    Semaphore(Arc<SemCore>),
    Port(Arc<PortCore>),
}

impl NamedObject {
    fn retain(&self) {
        match self {
            Self::Semaphore(core) => core.retain(),
            Self::Port(core) => core.retain(),
        }
    }

    fn release_ref(&self) -> u32 {
        match self {
            Self::Semaphore(core) => core.release_ref(),
            Self::Port(core) => core.release_ref(),
        }
    }
}

struct Entry {
    object: NamedObject,
    area: Area,
}

/// The name-to-instance table plus the injected area provider.
pub struct NameRegistry {
    tunables: Tunables,
    areas: Arc<dyn AreaProvider>,
    table: Mutex<HashMap<String, Entry>>,
}

impl NameRegistry {
    /// Creates a registry over the given provider.
    ///
    /// # Errors
    ///
    /// `BadValue` if the tunables fail validation.
    pub fn new(tunables: Tunables, areas: Arc<dyn AreaProvider>) -> Result<Arc<Self>> {
        tunables.validate().map_err(|_| Error::BadValue)?;
        Ok(Arc::new(Self {
            tunables,
            areas,
            table: Mutex::new(HashMap::new()),
        }))
    }

    /// An in-process registry over [`HeapAreas`] with default tunables.
    #[must_use]
    pub fn in_process() -> Arc<Self> {
        Self::new(Tunables::default(), Arc::new(HeapAreas::default()))
            .expect("default tunables validate")
    }

    /// The process-wide registry, initialized on first use.
    pub fn global() -> &'static Arc<Self> {
        static GLOBAL: OnceLock<Arc<NameRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(Self::in_process)
    }

    /// The limits this registry was built with.
    #[must_use]
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Number of live named instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// True if no named instance is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// True if `name` is currently bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.table.lock().contains_key(name)
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > self.tunables.max_name_len {
            return Err(Error::BadValue);
        }
        Ok(())
    }

    fn insert(
        &self,
        name: &str,
        size: usize,
        policy: AccessPolicy,
        object: NamedObject,
    ) -> Result<()> {
        self.validate_name(name)?;
        let mut table = self.table.lock();
        if table.contains_key(name) {
            return Err(Error::Failed);
        }
        let area = self.areas.create_area(name, size, policy)?;
        let tag = match &object {
            NamedObject::Semaphore(_) => SEMAPHORE_REGION_TAG,
            NamedObject::Port(_) => PORT_REGION_TAG,
        };
        // Every region is at least one state header long.
        area.with_bytes(|bytes| bytes[..tag.len()].copy_from_slice(tag));
        tracing::trace!(name, policy = ?area.policy(), "named region stamped");
        table.insert(name.to_owned(), Entry { object, area });
        Ok(())
    }

    pub(crate) fn insert_semaphore(
        &self,
        name: &str,
        policy: AccessPolicy,
        core: Arc<SemCore>,
    ) -> Result<()> {
        self.insert(
            name,
            crate::sync::semaphore::SHARED_STATE_BYTES,
            policy,
            NamedObject::Semaphore(core),
        )
    }

    pub(crate) fn insert_port(
        &self,
        name: &str,
        size: usize,
        policy: AccessPolicy,
        core: Arc<PortCore>,
    ) -> Result<()> {
        self.insert(name, size, policy, NamedObject::Port(core))
    }

    pub(crate) fn open_semaphore(&self, name: &str) -> Result<Arc<SemCore>> {
        let table = self.table.lock();
        match table.get(name) {
            Some(Entry {
                object: NamedObject::Semaphore(core),
                ..
            }) => {
                core.retain();
                Ok(Arc::clone(core))
            }
            // Missing, or the name is bound to a port.
            _ => Err(Error::Failed),
        }
    }

    pub(crate) fn open_port(&self, name: &str) -> Result<Arc<PortCore>> {
        let table = self.table.lock();
        match table.get(name) {
            Some(Entry {
                object: NamedObject::Port(core),
                ..
            }) => {
                core.retain();
                Ok(Arc::clone(core))
            }
            _ => Err(Error::Failed),
        }
    }

    /// Drops one handle over `name`; the drop reaching zero destroys the
    /// entry and its backing area.
    pub(crate) fn release_named(&self, name: &str) -> Result<()> {
        let mut table = self.table.lock();
        let remaining = table.get(name).ok_or(Error::Failed)?.object.release_ref();
        if remaining == 0 {
            let entry = table.remove(name).ok_or(Error::Failed)?;
            drop(table);
            tracing::debug!(name, "named instance destroyed");
            self.areas.delete_area(entry.area)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for NameRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameRegistry")
            .field("tunables", &self.tunables)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
