//! Bookkeeping for GPU-side resources.
//!
//! The graphics backend never garbage collects geometry, materials or
//! textures, so every allocation is recorded here and must be released by an
//! explicit dispose. A [`ResourceHandle`] is consumed by `release`, which
//! makes a double free unrepresentable.

use std::{cell::RefCell, fmt, rc::Rc};

use slotmap::SlotMap;

slotmap::new_key_type! {
    pub struct ResourceKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Geometry,
    Material,
    Texture,
}

type Pool = Rc<RefCell<SlotMap<ResourceKey, ResourceKind>>>;

/// Shared arena of live resources, cheap to clone.
#[derive(Clone, Default)]
pub struct Resources {
    pool: Pool,
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("live", &self.live_count())
            .finish()
    }
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, kind: ResourceKind) -> ResourceHandle {
        let key = self.pool.borrow_mut().insert(kind);
        ResourceHandle {
            key,
            kind,
            pool: Rc::downgrade(&self.pool),
        }
    }

    pub fn live_count(&self) -> usize {
        self.pool.borrow().len()
    }

    pub fn live_of(&self, kind: ResourceKind) -> usize {
        self.pool.borrow().values().filter(|k| **k == kind).count()
    }
}

/// One allocated resource. Not `Clone`: ownership is exclusive.
pub struct ResourceHandle {
    key: ResourceKey,
    kind: ResourceKind,
    pool: std::rc::Weak<RefCell<SlotMap<ResourceKey, ResourceKind>>>,
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish()
    }
}

impl ResourceHandle {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn release(self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.borrow_mut().remove(self.key);
        }
    }
}

/// Releases the handle in `slot`, if any. Safe to call repeatedly.
pub fn release(slot: &mut Option<ResourceHandle>) {
    if let Some(handle) = slot.take() {
        handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_handles_leave_the_pool() {
        let resources = Resources::new();
        let mut geometry = Some(resources.allocate(ResourceKind::Geometry));
        let material = resources.allocate(ResourceKind::Material);
        assert_eq!(resources.live_count(), 2);
        release(&mut geometry);
        release(&mut geometry);
        assert_eq!(resources.live_of(ResourceKind::Geometry), 0);
        material.release();
        assert_eq!(resources.live_count(), 0);
    }
}
