//! Rank-local registry of objects reachable from remote closures.
//!
//! Every rank registers its instance of a distributed object at the same
//! point of the program, so the returned [`Handle`] names the matching
//! instance on every rank. Registration must happen before the next
//! `poll` or `barrier` on that rank.

use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

type Slot = Option<Arc<dyn Any + Send + Sync>>;

/// Typed index into a [`Registry`]
pub struct Handle<T> {
    id: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Raw slot id
    pub fn id(&self) -> usize {
        self.id
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.id)
    }
}

/// Per-rank table of registered objects
#[derive(Default)]
pub struct Registry {
    slots: RwLock<Vec<Slot>>,
}

impl Registry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `object` and returns its handle.
    ///
    /// Takes the lowest released id before growing the table, so ranks
    /// that register and release in the same order hand out the same ids.
    pub fn register<T>(&self, object: Arc<T>) -> Handle<T>
    where
        T: Send + Sync + 'static,
    {
        let object = Some(object as Arc<dyn Any + Send + Sync>);
        let mut slots = self.slots.write();
        let id = match slots.iter().position(Option::is_none) {
            Some(id) => {
                slots[id] = object;
                id
            }
            None => {
                slots.push(object);
                slots.len() - 1
            }
        };
        Handle {
            id,
            _marker: PhantomData,
        }
    }

    /// Looks up the object behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if the handle was never registered on this rank, was
    /// released, or names an object of another type. All three mean the
    /// ranks disagree on collective construction order.
    pub fn resolve<T>(&self, handle: Handle<T>) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        let object = self
            .slots
            .read()
            .get(handle.id)
            .and_then(|slot| slot.clone());
        match object.map(|o| o.downcast::<T>()) {
            Some(Ok(object)) => object,
            Some(Err(_)) => panic!("{:?} resolved to an object of another type", handle),
            None => panic!("{:?} is not registered on this rank", handle),
        }
    }

    /// Drops the registry's reference to the object behind `handle`.
    ///
    /// The id may be handed out again by the next [`register`](Self::register).
    pub fn release<T>(&self, handle: Handle<T>) {
        if let Some(slot) = self.slots.write().get_mut(handle.id) {
            *slot = None;
        }
    }

    /// Number of live registrations
    pub fn live(&self) -> usize {
        self.slots.read().iter().filter(|s| s.is_some()).count()
    }
}
