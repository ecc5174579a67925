use foundation::bounds::Aabb2;

use crate::bvh::{Bvh, Item};

/// Maximum number of independently built trees before they are merged.
const MAX_SEGMENTS: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    pub bounds: Aabb2,
    pub data: T,
}

/// Bulk-loadable bounding-box index.
///
/// Every `load` builds one tree over its batch only, so inserting a page of
/// results never rebuilds the trees of earlier pages. Once more than
/// `MAX_SEGMENTS` trees exist they are merged into one.
///
/// Entries are never removed individually; `clear` is the only deletion.
/// `search` returns entries in insertion order.
#[derive(Debug, Clone)]
pub struct SpatialIndex<T> {
    entries: Vec<Entry<T>>,
    segments: Vec<Bvh>,
}

impl<T> Default for SpatialIndex<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            segments: Vec::new(),
        }
    }
}

impl<T> SpatialIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Insert a batch of entries; returns how many were added.
    pub fn load<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = (Aabb2, T)>,
    {
        let start = self.entries.len();
        self.entries.extend(
            batch
                .into_iter()
                .map(|(bounds, data)| Entry { bounds, data }),
        );
        let added = self.entries.len() - start;
        if added == 0 {
            return 0;
        }

        if self.segments.len() >= MAX_SEGMENTS {
            self.segments = vec![Bvh::build(items_for(&self.entries, 0))];
        } else {
            self.segments.push(Bvh::build(items_for(&self.entries, start)));
        }
        added
    }

    pub fn insert(&mut self, bounds: Aabb2, data: T) {
        self.load(std::iter::once((bounds, data)));
    }

    /// Entries whose bounds intersect `query`.
    pub fn search_entries(&self, query: &Aabb2) -> Vec<&Entry<T>> {
        let mut slots = Vec::new();
        for segment in &self.segments {
            segment.query_into(query, &mut slots);
        }
        slots.sort_unstable();
        slots.dedup();
        slots.into_iter().map(|slot| &self.entries[slot]).collect()
    }

    pub fn search(&self, query: &Aabb2) -> Vec<&T> {
        self.search_entries(query)
            .into_iter()
            .map(|entry| &entry.data)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry<T>> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.segments.clear();
    }
}

fn items_for<T>(entries: &[Entry<T>], start: usize) -> Vec<Item> {
    entries[start..]
        .iter()
        .enumerate()
        .map(|(i, entry)| Item {
            slot: start + i,
            bounds: entry.bounds,
        })
        .collect()
}
