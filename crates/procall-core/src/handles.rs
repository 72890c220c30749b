//! Handle manager: opaque 64-bit handles for server-side objects.
//!
//! A [`HandleTable`] owns the objects of one kind (sources, scenes, ...) and
//! hands out [`Handle`] values the client can hold on to. A handle is a slot
//! index tagged with a generation:
//!
//! ```text
//! [u32 generation][u32 slot index]     (high bits .. low bits)
//! ```
//!
//! Releasing an object bumps the slot's generation before the slot goes back
//! on a FIFO free list, so a recycled slot never produces a number that was
//! live before. Resolving a stale or unknown handle is a checked `NotFound`.
//!
//! # Concurrency
//!
//! Each object sits behind its own async mutex. [`HandleTable::resolve`]
//! returns a guard that holds that mutex for as long as the caller uses the
//! object, so calls against the same handle are serialized (a second caller
//! waits) while calls against different handles run in parallel.
//! [`HandleTable::release`] waits for the current guard to drop before it
//! removes the object; callers queued behind it then see `NotFound`.
//!
//! Releasing a handle while the same task holds a guard for it deadlocks.

use crate::value::Value;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, warn};

/// Opaque reference to a live server-side object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Never refers to a live object; generations start at 1.
    pub const NULL: Handle = Handle(0);

    fn new(index: u32, generation: u32) -> Self {
        Handle(((generation as u64) << 32) | index as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }

    pub fn index(&self) -> u32 {
        self.0 as u32
    }

    pub fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<Handle> for Value {
    fn from(handle: Handle) -> Self {
        Value::UInt64(handle.0)
    }
}

/// Handle table errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("Handle not found: {0}")]
    NotFound(Handle),

    #[error("Handle table exhausted")]
    Exhausted,
}

type Cell<T> = Arc<AsyncMutex<Option<T>>>;

struct Slot<T> {
    generation: u32,
    cell: Option<Cell<T>>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: VecDeque<u32>,
    live: usize,
}

/// Exclusive access to a resolved object.
///
/// Holding the guard keeps other calls on the same handle, and its release,
/// waiting.
pub struct HandleGuard<T> {
    handle: Handle,
    guard: OwnedMappedMutexGuard<Option<T>, T>,
}

impl<T> HandleGuard<T> {
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl<T> Deref for HandleGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for HandleGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Slot table mapping handles to live objects of one kind.
pub struct HandleTable<T> {
    kind: &'static str,
    slots: Mutex<Slots<T>>,
}

impl<T: Send + 'static> HandleTable<T> {
    /// Create an empty table. `kind` only appears in log lines.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: VecDeque::new(),
                live: 0,
            }),
        }
    }

    // The index lock is never held across an await; a poisoned lock only
    // means another thread panicked between two plain field updates.
    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install `value` and return a handle that has never been live before.
    pub fn create(&self, value: T) -> Result<Handle, HandleError> {
        let cell = Arc::new(AsyncMutex::new(Some(value)));
        let mut slots = self.lock();

        let index = match slots.free.pop_front() {
            Some(index) => index,
            None => {
                let index = u32::try_from(slots.entries.len()).map_err(|_| HandleError::Exhausted)?;
                slots.entries.push(Slot {
                    generation: 1,
                    cell: None,
                });
                index
            }
        };

        let slot = &mut slots.entries[index as usize];
        slot.cell = Some(cell);
        let handle = Handle::new(index, slot.generation);
        slots.live += 1;

        debug!("{} {} created ({} live)", self.kind, handle, slots.live);
        Ok(handle)
    }

    fn cell(&self, handle: Handle) -> Result<Cell<T>, HandleError> {
        let slots = self.lock();
        slots
            .entries
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.cell.clone())
            .ok_or(HandleError::NotFound(handle))
    }

    /// Resolve a handle to its object, waiting for any call that currently
    /// holds it.
    pub async fn resolve(&self, handle: Handle) -> Result<HandleGuard<T>, HandleError> {
        let cell = self.cell(handle)?;
        let guard = cell.lock_owned().await;
        // The object may have been released while this call was queued.
        let guard = OwnedMutexGuard::try_map(guard, |value| value.as_mut())
            .map_err(|_| HandleError::NotFound(handle))?;
        Ok(HandleGuard { handle, guard })
    }

    /// Remove the object behind `handle` and return it.
    ///
    /// Waits until no resolved guard for the handle is alive.
    pub async fn release(&self, handle: Handle) -> Result<T, HandleError> {
        let cell = self.cell(handle)?;
        let value = {
            let mut guard = cell.lock().await;
            guard.take().ok_or(HandleError::NotFound(handle))?
        };

        let mut slots = self.lock();
        let slots = &mut *slots;
        let slot = &mut slots.entries[handle.index() as usize];
        if slot.generation == handle.generation() {
            slot.cell = None;
            slots.live -= 1;
            match slot.generation.checked_add(1) {
                Some(next) => {
                    slot.generation = next;
                    slots.free.push_back(handle.index());
                }
                None => {
                    // Every generation of this slot has been used; retire it.
                    warn!("{} slot {} retired after generation wrap", self.kind, handle.index());
                }
            }
        }

        debug!("{} {} released ({} live)", self.kind, handle, slots.live);
        Ok(value)
    }

    /// Whether `handle` currently refers to a live object.
    pub fn contains(&self, handle: Handle) -> bool {
        self.cell(handle).is_ok()
    }

    /// Handles of all live objects, in slot order.
    pub fn handles(&self) -> Vec<Handle> {
        let slots = self.lock();
        slots
            .entries
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.cell.is_some())
            .map(|(index, slot)| Handle::new(index as u32, slot.generation))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
