//! Handle registry for objects exposed across the C boundary.
//!
//! Every object handed out through a raw handle lives in a [`HandleTable`].
//! A table entry carries an explicit reference count: insertion applies the
//! caller's +1, [`HandleTable::add_ref`] increments it and
//! [`HandleTable::release`] decrements it, giving the value back to the caller
//! when the count reaches zero so it is destroyed exactly once and outside the
//! table lock.
//!
//! Handles are generation-checked. A handle that has been fully released is
//! reported as [`HandleError::Stale`] even after its slot has been reused.

use std::fmt;

use parking_lot::Mutex;
use slotmap::{DefaultKey, Key, KeyData, SlotMap};

/// Opaque 64-bit handle value. Zero is the null handle.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawHandle(u64);

impl RawHandle {
    /// The null handle.
    pub const NULL: RawHandle = RawHandle(0);

    /// Wrap a raw value received from the boundary.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value to hand to the boundary.
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Check if this is the null handle.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    fn key(self) -> Result<DefaultKey, HandleError> {
        if self.is_null() {
            return Err(HandleError::Null);
        }
        Ok(KeyData::from_ffi(self.0).into())
    }

    fn from_key(key: DefaultKey) -> Self {
        Self(key.data().as_ffi())
    }
}

/// Why a handle could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleError {
    /// The handle was null.
    Null,
    /// The handle was never issued or has been fully released.
    Stale,
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null handle"),
            Self::Stale => write!(f, "stale or unknown handle"),
        }
    }
}

impl std::error::Error for HandleError {}

/// Snapshot of a table's live objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryReport {
    /// Number of live entries.
    pub live: usize,
    /// Sum of reference counts over all live entries.
    pub references: u64,
}

impl RegistryReport {
    /// Check whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl std::ops::Add for RegistryReport {
    type Output = RegistryReport;

    fn add(self, rhs: Self) -> Self::Output {
        RegistryReport {
            live: self.live + rhs.live,
            references: self.references + rhs.references,
        }
    }
}

struct Entry<T> {
    value: T,
    refs: u32,
}

/// Reference-counted table of objects addressed by [`RawHandle`].
pub struct HandleTable<T> {
    name: &'static str,
    slots: Mutex<SlotMap<DefaultKey, Entry<T>>>,
}

impl<T> HandleTable<T> {
    /// Create an empty table. The name is used in diagnostics.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Mutex::new(SlotMap::new()),
        }
    }

    /// Get the table name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Insert a value with an initial reference count of one.
    pub fn insert(&self, value: T) -> RawHandle {
        let key = self.slots.lock().insert(Entry { value, refs: 1 });
        let handle = RawHandle::from_key(key);
        log::trace!("{}: created handle {:#x}", self.name, handle.as_raw());
        handle
    }

    /// Run `f` against the value behind `handle`.
    pub fn with<R>(&self, handle: RawHandle, f: impl FnOnce(&T) -> R) -> Result<R, HandleError> {
        let key = handle.key()?;
        let slots = self.slots.lock();
        let entry = slots.get(key).ok_or(HandleError::Stale)?;
        Ok(f(&entry.value))
    }

    /// Increment the reference count. Returns the new count.
    pub fn add_ref(&self, handle: RawHandle) -> Result<u32, HandleError> {
        let key = handle.key()?;
        let mut slots = self.slots.lock();
        let entry = slots.get_mut(key).ok_or(HandleError::Stale)?;
        entry.refs = entry.refs.saturating_add(1);
        log::trace!(
            "{}: add_ref {:#x} -> {}",
            self.name,
            handle.as_raw(),
            entry.refs
        );
        Ok(entry.refs)
    }

    /// Decrement the reference count.
    ///
    /// Returns the value when the count reached zero. The caller drops it,
    /// which runs the native destruction path outside the table lock.
    pub fn release(&self, handle: RawHandle) -> Result<Option<T>, HandleError> {
        let key = handle.key()?;
        let mut slots = self.slots.lock();
        let entry = slots.get_mut(key).ok_or(HandleError::Stale)?;
        entry.refs -= 1;
        if entry.refs > 0 {
            log::trace!(
                "{}: release {:#x} -> {}",
                self.name,
                handle.as_raw(),
                entry.refs
            );
            return Ok(None);
        }
        log::trace!("{}: destroying {:#x}", self.name, handle.as_raw());
        Ok(slots.remove(key).map(|entry| entry.value))
    }

    /// Get the current reference count of a handle.
    pub fn ref_count(&self, handle: RawHandle) -> Result<u32, HandleError> {
        let key = handle.key()?;
        let slots = self.slots.lock();
        slots.get(key).map(|e| e.refs).ok_or(HandleError::Stale)
    }

    /// Check whether a handle currently resolves.
    pub fn contains(&self, handle: RawHandle) -> bool {
        handle
            .key()
            .map(|key| self.slots.lock().contains_key(key))
            .unwrap_or(false)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Check if the table has no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot the table for leak checks.
    pub fn report(&self) -> RegistryReport {
        let slots = self.slots.lock();
        RegistryReport {
            live: slots.len(),
            references: slots.values().map(|e| u64::from(e.refs)).sum(),
        }
    }

    /// Remove every entry, returning the values so the caller can drop them.
    pub fn drain(&self) -> Vec<T> {
        let mut slots = self.slots.lock();
        let keys: Vec<_> = slots.keys().collect();
        keys.into_iter()
            .filter_map(|key| slots.remove(key))
            .map(|entry| entry.value)
            .collect()
    }
}

impl<T: Clone> HandleTable<T> {
    /// Clone the value behind `handle`.
    pub fn get(&self, handle: RawHandle) -> Result<T, HandleError> {
        self.with(handle, T::clone)
    }
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("name", &self.name)
            .field("report", &self.report())
            .finish()
    }
}
