//! Native handle table.
//!
//! Values that cross into the embedding language are pinned here and named by
//! an opaque 64-bit [`Handle`]. A handle stays valid until it is unpinned;
//! handles are never reused within one registry, so a stale handle fails with
//! [`Error::InvalidHandle`] instead of aliasing a newer value.

use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::trace;

use crate::error::{Error, Result};

type Slot = Arc<dyn Any + Send + Sync>;

/// Opaque reference to a pinned native value. Zero is never a valid handle.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(u64);

impl Handle {
    pub const INVALID: Handle = Handle(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct HandleRegistry {
    next: AtomicU64,
    values: DashMap<u64, Slot>,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        HandleRegistry {
            next: AtomicU64::new(1),
            values: DashMap::new(),
        }
    }

    /// Pins `value` until [`unpin`](Self::unpin) is called with the returned handle.
    pub fn pin<T: Any + Send + Sync>(&self, value: T) -> Handle {
        self.pin_arc(Arc::new(value))
    }

    pub fn pin_arc<T: Any + Send + Sync>(&self, value: Arc<T>) -> Handle {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.values.insert(id, value);
        trace!("pinned {} as #{}", type_name::<T>(), id);
        Handle(id)
    }

    /// Resolves a handle to the value it pins. The caller names the type.
    pub fn get<T: Any + Send + Sync>(&self, handle: Handle) -> Result<Arc<T>> {
        let slot = self
            .values
            .get(&handle.0)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::InvalidHandle(handle.0))?;
        slot.downcast::<T>().map_err(|_| Error::TypeMismatch {
            handle: handle.0,
            expected: type_name::<T>(),
        })
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.values.contains_key(&handle.0)
    }

    pub fn unpin(&self, handle: Handle) -> Result<()> {
        match self.values.remove(&handle.0) {
            Some(_) => {
                trace!("unpinned #{}", handle.0);
                Ok(())
            }
            None => Err(Error::InvalidHandle(handle.0)),
        }
    }

    /// Unpins and returns the value, provided it has type `T`.
    pub fn take<T: Any + Send + Sync>(&self, handle: Handle) -> Result<Arc<T>> {
        match self.values.remove_if(&handle.0, |_, slot| (**slot).is::<T>()) {
            Some((_, slot)) => slot.downcast::<T>().map_err(|_| Error::TypeMismatch {
                handle: handle.0,
                expected: type_name::<T>(),
            }),
            None if self.contains(handle) => Err(Error::TypeMismatch {
                handle: handle.0,
                expected: type_name::<T>(),
            }),
            None => Err(Error::InvalidHandle(handle.0)),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drops every pinned value. Outstanding handles become invalid.
    pub fn clear(&self) {
        self.values.clear();
    }
}

/// Owns one pinned handle and unpins it when closed or dropped.
pub struct Pinned<T> {
    registry: Arc<HandleRegistry>,
    handle: Handle,
    _value: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Pinned<T> {
    pub fn new(registry: &Arc<HandleRegistry>, value: T) -> Self {
        Self::from_arc(registry, Arc::new(value))
    }

    pub fn from_arc(registry: &Arc<HandleRegistry>, value: Arc<T>) -> Self {
        let handle = registry.pin_arc(value);
        Pinned {
            registry: Arc::clone(registry),
            handle,
            _value: PhantomData,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn get(&self) -> Result<Arc<T>> {
        self.registry.get(self.handle)
    }

    /// Hands ownership of the handle to the caller; it will not be unpinned
    /// by this guard.
    pub fn into_raw(mut self) -> Handle {
        std::mem::replace(&mut self.handle, Handle::INVALID)
    }

    pub fn close(mut self) -> Result<()> {
        let handle = std::mem::replace(&mut self.handle, Handle::INVALID);
        self.registry.unpin(handle)
    }
}

impl<T> Drop for Pinned<T> {
    fn drop(&mut self) {
        if self.handle.is_valid() {
            // Already-released handles are fine here: the value was taken out
            // through another path (e.g. a completed callback).
            let _ = self.registry.unpin(self.handle);
        }
    }
}
