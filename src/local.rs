//! Task-local storage slots with initializer/destroyer hooks.
//!
//! A *slot* is a named registry entry holding one opaque value per managed
//! task. Slots are established explicitly via
//! [`Weft::establish_local`](crate::Weft::establish_local) — optionally with
//! an initializer, a destroyer, and an error sink — or implicitly, with no
//! callbacks, on first access of an unknown name.
//!
//! The initializer runs once per (task, slot) on the task's first access;
//! the destroyer runs exactly once when the task exits, on every exit path
//! including panic unwind. Callback failures are pushed to the slot's error
//! sink (or logged and dropped when none is configured) and never abort the
//! task that triggered them.
//!
//! A cell is locked for the duration of each access, so an initializer or
//! destroyer must not re-enter the same slot on the same task.

use crate::error::{BoxError, Error, ErrorKind, Result};
use crate::queue::{ErrorQueue, ErrorReport};
use crate::task::TaskId;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Callback signature for slot initializers and destroyers.
pub type LocalCallback = Arc<dyn Fn(&mut LocalCell) -> std::result::Result<(), BoxError> + Send + Sync>;

/// The per-(task, slot) storage cell.
///
/// The stored value is opaque; typed access goes through [`LocalCell::get`],
/// [`LocalCell::get_mut`], [`LocalCell::set`], and [`LocalCell::take`].
pub struct LocalCell {
    name: Arc<str>,
    task: TaskId,
    initialized: bool,
    value: Option<Box<dyn Any + Send>>,
}

impl LocalCell {
    fn new(name: Arc<str>, task: TaskId) -> Self {
        Self {
            name,
            task,
            initialized: false,
            value: None,
        }
    }

    /// Returns the slot name this cell belongs to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the task that owns this cell.
    #[must_use]
    pub const fn task(&self) -> TaskId {
        self.task
    }

    /// Stores a value, replacing any previous one.
    pub fn set<T: Any + Send>(&mut self, value: T) {
        self.value = Some(Box::new(value));
    }

    /// Returns a shared reference to the stored value, if it has type `T`.
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.as_ref()?.downcast_ref()
    }

    /// Returns a mutable reference to the stored value, if it has type `T`.
    #[must_use]
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.value.as_mut()?.downcast_mut()
    }

    /// Removes and returns the stored value, if it has type `T`.
    ///
    /// A value of a different type is left in place.
    #[must_use]
    pub fn take<T: Any>(&mut self) -> Option<T> {
        match self.value.take()?.downcast::<T>() {
            Ok(boxed) => Some(*boxed),
            Err(other) => {
                self.value = Some(other);
                None
            }
        }
    }

    /// Drops the stored value, if any.
    pub fn clear(&mut self) {
        self.value = None;
    }

    /// Returns true when a value is stored.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.value.is_some()
    }
}

impl fmt::Debug for LocalCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCell")
            .field("name", &self.name)
            .field("task", &self.task)
            .field("is_set", &self.is_set())
            .finish()
    }
}

/// Options for establishing a local slot.
#[derive(Clone, Default)]
pub struct LocalOptions {
    /// Runs on a task's first access to the slot.
    pub initializer: Option<LocalCallback>,
    /// Runs once when a task that accessed the slot exits.
    pub destroyer: Option<LocalCallback>,
    /// Receives callback failures; failures are dropped when unset.
    pub error_sink: Option<ErrorQueue>,
}

impl LocalOptions {
    /// Creates empty options (no callbacks, no sink).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initializer callback.
    #[must_use]
    pub fn initializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut LocalCell) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(f));
        self
    }

    /// Sets the destroyer callback.
    #[must_use]
    pub fn destroyer<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut LocalCell) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.destroyer = Some(Arc::new(f));
        self
    }

    /// Sets the error sink for callback failures.
    #[must_use]
    pub fn error_sink(mut self, sink: ErrorQueue) -> Self {
        self.error_sink = Some(sink);
        self
    }
}

impl fmt::Debug for LocalOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalOptions")
            .field("initializer", &self.initializer.is_some())
            .field("destroyer", &self.destroyer.is_some())
            .field("error_sink", &self.error_sink.is_some())
            .finish()
    }
}

struct Slot {
    name: Arc<str>,
    initializer: Option<LocalCallback>,
    destroyer: Option<LocalCallback>,
    sink: Option<ErrorQueue>,
    cells: Mutex<HashMap<TaskId, Arc<Mutex<LocalCell>>>>,
}

impl Slot {
    fn new(name: Arc<str>, options: LocalOptions) -> Self {
        Self {
            name,
            initializer: options.initializer,
            destroyer: options.destroyer,
            sink: options.error_sink,
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell_for(&self, task: TaskId) -> Arc<Mutex<LocalCell>> {
        let mut cells = self.cells.lock().expect("slot cells poisoned");
        Arc::clone(
            cells
                .entry(task)
                .or_insert_with(|| Arc::new(Mutex::new(LocalCell::new(Arc::clone(&self.name), task)))),
        )
    }

    fn report(&self, task: TaskId, error: BoxError) {
        tracing::warn!(slot = %self.name, %task, %error, "local slot callback failed");
        if let Some(sink) = &self.sink {
            sink.push(ErrorReport::new(Some(task), error));
        }
    }
}

/// Process-wide registry of named local slots, owned by a facade.
pub(crate) struct LocalRegistry {
    slots: Mutex<HashMap<Arc<str>, Arc<Slot>>>,
}

impl LocalRegistry {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a slot. Fails if the name is taken.
    pub(crate) fn establish(&self, name: &str, options: LocalOptions) -> Result<()> {
        let mut slots = self.slots.lock().expect("local registry poisoned");
        if slots.contains_key(name) {
            return Err(Error::new(ErrorKind::SlotAlreadyExists)
                .with_context(format!("slot {name:?}")));
        }
        let name: Arc<str> = Arc::from(name);
        slots.insert(Arc::clone(&name), Arc::new(Slot::new(name, options)));
        Ok(())
    }

    /// Looks up a slot, creating an unregistered one on first use.
    fn slot(&self, name: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().expect("local registry poisoned");
        if let Some(slot) = slots.get(name) {
            return Arc::clone(slot);
        }
        let name: Arc<str> = Arc::from(name);
        let slot = Arc::new(Slot::new(Arc::clone(&name), LocalOptions::default()));
        slots.insert(name, Arc::clone(&slot));
        slot
    }

    /// Runs `f` with the given task's cell in the named slot.
    ///
    /// The cell is created — and the slot initializer run — on the task's
    /// first access.
    pub(crate) fn with<R>(
        &self,
        name: &str,
        task: TaskId,
        f: impl FnOnce(&mut LocalCell) -> R,
    ) -> R {
        let slot = self.slot(name);
        let cell = slot.cell_for(task);
        let mut cell = cell.lock().expect("local cell poisoned");
        if !cell.initialized {
            cell.initialized = true;
            if let Some(init) = &slot.initializer {
                if let Err(error) = init(&mut cell) {
                    slot.report(task, error);
                }
            }
        }
        f(&mut cell)
    }

    /// Removes every cell the task created and runs destroyers.
    ///
    /// Called exactly once by the spawn wrapper when the task exits.
    /// Ordering across slots is unspecified.
    pub(crate) fn cleanup(&self, task: TaskId) {
        let slots: Vec<Arc<Slot>> = {
            let slots = self.slots.lock().expect("local registry poisoned");
            slots.values().cloned().collect()
        };
        for slot in slots {
            let removed = {
                let mut cells = slot.cells.lock().expect("slot cells poisoned");
                cells.remove(&task)
            };
            let Some(cell) = removed else {
                continue;
            };
            let mut cell = cell.lock().expect("local cell poisoned");
            if let Some(destroy) = &slot.destroyer {
                if let Err(error) = destroy(&mut cell) {
                    slot.report(task, error);
                }
            }
        }
    }
}
