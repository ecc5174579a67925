//! Deterministic work queue for fetch scheduling.
//!
//! Key properties:
//! - Total ordering on `(priority, id)`.
//! - Equal priorities are processed in insertion order.
//! - Cancellation removes the item without perturbing the order of the rest.

use std::collections::BTreeMap;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(pub u64);

// Smaller priorities run earlier; ids break ties in insertion order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    priority: i32,
    id: WorkId,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    next_id: u64,
    items: BTreeMap<Key, T>,
    priorities: BTreeMap<WorkId, i32>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            items: BTreeMap::new(),
            priorities: BTreeMap::new(),
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, priority: i32, payload: T) -> WorkId {
        let id = WorkId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.items.insert(Key { priority, id }, payload);
        self.priorities.insert(id, priority);
        id
    }

    /// Removes a pending item, returning its payload.
    pub fn cancel(&mut self, id: WorkId) -> Option<T> {
        let priority = self.priorities.remove(&id)?;
        self.items.remove(&Key { priority, id })
    }

    /// Pops the next (highest priority, then oldest) item.
    pub fn pop_next(&mut self) -> Option<(WorkId, i32, T)> {
        let (key, payload) = self.items.pop_first()?;
        self.priorities.remove(&key.id);
        Some((key.id, key.priority, payload))
    }

    /// Drops every pending item.
    pub fn clear(&mut self) {
        self.items.clear();
        self.priorities.clear();
    }
}
