//! Free-list of reusable objects.
//!
//! Unlike the arena, objects here are never shared: `acquire()` moves one out,
//! `release()` resets it and moves it back. The pool is owned by a single
//! consumer, so no locking is involved.

/// Objects that can be returned to an [`ObjectPool`].
pub trait Poolable {
    /// Return the object to its empty, unbound state.
    ///
    /// Called by [`ObjectPool::release`] before the object is stored.
    fn reset(&mut self);
}

/// Type alias for the factory used when the free-list is empty.
type FactoryFn<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Pool of reusable objects with `acquire`/`release`.
pub struct ObjectPool<T: Poolable> {
    free: Vec<T>,
    factory: FactoryFn<T>,
    /// Objects built by the factory since creation
    created: usize,
}

impl<T: Poolable> ObjectPool<T> {
    /// Create an empty pool that builds objects with `factory` on demand.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            free: Vec::new(),
            factory: Box::new(factory),
            created: 0,
        }
    }

    /// Create a pool with `size` objects already built.
    pub fn with_preallocated<F>(size: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let free = (0..size).map(|_| factory()).collect();
        Self {
            free,
            factory: Box::new(factory),
            created: size,
        }
    }

    /// Take an object from the free-list, building one if it is empty.
    pub fn acquire(&mut self) -> T {
        match self.free.pop() {
            Some(item) => item,
            None => {
                self.created += 1;
                (self.factory)()
            }
        }
    }

    /// Reset `item` and put it back on the free-list.
    pub fn release(&mut self, mut item: T) {
        item.reset();
        self.free.push(item);
    }

    /// Objects currently waiting on the free-list.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Objects built since the pool was created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created
    }
}

impl<T: Poolable + Default + 'static> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new(T::default)
    }
}

impl<T: Poolable> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("idle", &self.free.len())
            .field("created", &self.created)
            .finish()
    }
}
