//! Listener lists owned by the components that emit them.

use std::{cell::RefCell, rc::Rc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener<E> = Rc<RefCell<dyn FnMut(&E)>>;

/// Event emission capability composed into a component.
///
/// Listeners may be removed while an event is being emitted; a listener
/// removed that way is not called for the rest of the emission.
pub struct Emitter<E> {
    next_id: std::cell::Cell<u64>,
    listeners: RefCell<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self {
            next_id: std::cell::Cell::new(0),
            listeners: RefCell::new(Vec::new()),
        }
    }
}

impl<E> std::fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

impl<E> Emitter<E> {
    pub fn on(&self, listener: impl FnMut(&E) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let listener: Listener<E> = Rc::new(RefCell::new(listener));
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(other, _)| *other != id);
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<_> = self.listeners.borrow().clone();
        for (id, listener) in snapshot {
            let still_registered = self
                .listeners
                .borrow()
                .iter()
                .any(|(other, _)| *other == id);
            if !still_registered {
                continue;
            }
            // A listener that re-enters its own emitter is skipped rather
            // than double-borrowed.
            if let Ok(mut listener) = listener.try_borrow_mut() {
                (&mut *listener)(event);
            }
        }
    }
}
