use runtime::work_queue::{WorkId, WorkQueue};

use crate::loader::PageFetch;

/// Pending page fetches, lowest page number first.
///
/// Ordering by page means every wanted tile gets its first page before any
/// tile gets its second; ties keep submission order. This is a thin wrapper
/// over `runtime::WorkQueue` so the loader owns its scheduling policy.
#[derive(Debug, Default)]
pub struct FetchQueue {
    inner: WorkQueue<PageFetch>,
}

impl FetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn submit(&mut self, fetch: PageFetch) -> WorkId {
        let priority = i32::try_from(fetch.key.page).unwrap_or(i32::MAX);
        self.inner.push(priority, fetch)
    }

    pub fn cancel(&mut self, id: WorkId) -> Option<PageFetch> {
        self.inner.cancel(id)
    }

    pub fn pop_next(&mut self) -> Option<PageFetch> {
        self.inner.pop_next().map(|(_, _, fetch)| fetch)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
