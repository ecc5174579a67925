//! Per-tile paginated loading.
//!
//! Every wanted tile walks its catalog pages one at a time:
//!
//! ```text
//! INIT → QUEUED → FETCHING → LOADED (full page: next page QUEUED)
//!                          → LOADED (short/empty/failed page: stop)
//! QUEUED | FETCHING → INIT   when the tile leaves the wanted set
//! ```
//!
//! The loader never performs I/O. A driver pops `PageFetch`es, runs them, and
//! hands each outcome back to `settle`, which decides the follow-up.

use std::collections::BTreeMap;
use std::fmt;

use runtime::work_queue::WorkId;
use tracing::debug;

use crate::config::{LoaderConfig, RetryPolicy};
use crate::protocol::{CatalogError, CatalogPage, PageQuery};
use crate::queue::FetchQueue;
use crate::request::Request;
use crate::tile::{Tile, TileCoord};

/// Page cap per tile for a (floored) view zoom.
pub fn max_pages_at_zoom(zoom: u32) -> u32 {
    match zoom {
        0..=14 => 2,
        15 => 5,
        16 => 10,
        17 => 20,
        18 => 40,
        _ => 80,
    }
}

/// Next page to request for a tile.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Next(u32),
    /// The catalog has nothing more for this tile.
    Exhausted,
}

impl Default for PageCursor {
    fn default() -> Self {
        PageCursor::Next(1)
    }
}

impl PageCursor {
    pub fn page(&self) -> Option<u32> {
        match *self {
            PageCursor::Next(page) => Some(page),
            PageCursor::Exhausted => None,
        }
    }

    // Cursors only move forward.
    fn advance_past(&mut self, page: u32) {
        if let PageCursor::Next(next) = self {
            *next = (*next).max(page.saturating_add(1));
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey {
    pub tile: TileCoord,
    pub page: u32,
}

impl PageKey {
    pub fn new(tile: TileCoord, page: u32) -> Self {
        Self { tile, page }
    }
}

/// Renders as `x,y,z,page`.
impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.tile, self.page)
    }
}

/// One page request, ready for a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PageFetch {
    pub request: Request,
    pub key: PageKey,
    pub query: PageQuery,
    /// 0 for the first try.
    pub attempt: u32,
    /// Wait this long before sending (retry backoff).
    pub delay_ms: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum PageState {
    Queued { request: Request, work: WorkId },
    Fetching { request: Request },
    Loaded,
}

impl PageState {
    fn in_flight_request(&self) -> Option<Request> {
        match *self {
            PageState::Queued { request, .. } | PageState::Fetching { request } => Some(request),
            PageState::Loaded => None,
        }
    }
}

/// Effects of a `reconcile` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Requests dropped because their tile is no longer wanted.
    pub aborted: Vec<Request>,
    /// Pages newly queued.
    pub scheduled: Vec<PageKey>,
}

/// What `settle` decided for a finished fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The fetch no longer owns its page (aborted, superseded or reset), or its
    /// tile is no longer wanted. Nothing may be applied.
    Discarded,
    /// Records may be ingested. A full page queues `next`, if under the cap.
    Accepted { full: bool, next: Option<PageKey> },
    /// The catalog had nothing; the tile is exhausted.
    Empty,
    /// Failed without retry; the page counts as loaded.
    Failed,
    /// Failed and requeued.
    Retrying { attempt: u32, delay_ms: u64 },
}

/// Page-cursor state machine over the wanted tile set.
#[derive(Debug)]
pub struct TileLoader {
    page_size: u32,
    max_concurrent: usize,
    retry: RetryPolicy,
    zoom: u32,
    wanted: BTreeMap<TileCoord, Tile>,
    pages: BTreeMap<PageKey, PageState>,
    cursors: BTreeMap<TileCoord, PageCursor>,
    queue: FetchQueue,
    fetching: usize,
    next_request: u64,
}

impl TileLoader {
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            max_concurrent: config.max_concurrent_fetches.max(1),
            retry: config.retry,
            zoom: 0,
            wanted: BTreeMap::new(),
            pages: BTreeMap::new(),
            cursors: BTreeMap::new(),
            queue: FetchQueue::new(),
            fetching: 0,
            next_request: 1,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Floored view zoom from the last `reconcile`.
    pub fn zoom(&self) -> u32 {
        self.zoom
    }

    pub fn cursor(&self, tile: &TileCoord) -> PageCursor {
        self.cursors.get(tile).copied().unwrap_or_default()
    }

    pub fn is_wanted(&self, tile: &TileCoord) -> bool {
        self.wanted.contains_key(tile)
    }

    pub fn is_loaded(&self, key: &PageKey) -> bool {
        matches!(self.pages.get(key), Some(PageState::Loaded))
    }

    /// Queued or fetching.
    pub fn is_in_flight(&self, key: &PageKey) -> bool {
        self.pages
            .get(key)
            .is_some_and(|s| s.in_flight_request().is_some())
    }

    pub fn in_flight(&self) -> Vec<PageKey> {
        self.pages
            .iter()
            .filter(|(_, s)| s.in_flight_request().is_some())
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn loaded(&self) -> Vec<PageKey> {
        self.pages
            .iter()
            .filter(|(_, s)| **s == PageState::Loaded)
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn fetching_count(&self) -> usize {
        self.fetching
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// No page is queued or fetching.
    pub fn is_idle(&self) -> bool {
        self.fetching == 0 && self.queue.is_empty()
    }

    /// Make `tiles` the wanted set and queue the next page of each.
    ///
    /// In-flight pages of tiles outside the new set are dropped and reported
    /// in `aborted`; pages of still-wanted tiles are left alone.
    pub fn reconcile(&mut self, tiles: &[Tile], zoom: f64) -> Reconciled {
        self.zoom = zoom.max(0.0).floor() as u32;
        self.wanted = tiles.iter().map(|t| (t.coord, *t)).collect();

        let mut out = Reconciled::default();
        let stale: Vec<PageKey> = self
            .pages
            .iter()
            .filter(|(k, s)| {
                s.in_flight_request().is_some() && !self.wanted.contains_key(&k.tile)
            })
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            if let Some(request) = self.drop_in_flight(&key) {
                out.aborted.push(request);
            }
        }

        for tile in tiles {
            if let Some(key) = self.schedule(tile.coord) {
                out.scheduled.push(key);
            }
        }

        debug!(
            zoom = self.zoom,
            wanted = self.wanted.len(),
            aborted = out.aborted.len(),
            scheduled = out.scheduled.len(),
            "reconciled wanted tiles"
        );
        out
    }

    /// Next fetch to start, unless the concurrency ceiling is reached.
    pub fn next_fetch(&mut self) -> Option<PageFetch> {
        if self.fetching >= self.max_concurrent {
            return None;
        }
        let fetch = self.queue.pop_next()?;
        self.pages.insert(
            fetch.key,
            PageState::Fetching {
                request: fetch.request,
            },
        );
        self.fetching += 1;
        Some(fetch)
    }

    /// Apply the outcome of `fetch` to the page state.
    ///
    /// Success and failure both end the page's in-flight state. The caller
    /// ingests the records only on `Settlement::Accepted`.
    pub fn settle(
        &mut self,
        fetch: &PageFetch,
        outcome: Result<&CatalogPage, &CatalogError>,
    ) -> Settlement {
        let key = fetch.key;
        let owned = matches!(
            self.pages.get(&key),
            Some(PageState::Fetching { request }) if *request == fetch.request
        );
        if !owned {
            return Settlement::Discarded;
        }
        self.fetching = self.fetching.saturating_sub(1);

        if !self.wanted.contains_key(&key.tile) {
            self.pages.remove(&key);
            return Settlement::Discarded;
        }

        match outcome {
            Ok(page) => {
                self.pages.insert(key, PageState::Loaded);
                let full = page.len() >= self.page_size as usize;
                if full {
                    self.cursors.entry(key.tile).or_default().advance_past(key.page);
                    let next = self.schedule(key.tile);
                    Settlement::Accepted { full, next }
                } else {
                    self.cursors.insert(key.tile, PageCursor::Exhausted);
                    Settlement::Accepted { full, next: None }
                }
            }
            Err(CatalogError::Empty) => {
                self.pages.insert(key, PageState::Loaded);
                self.cursors.insert(key.tile, PageCursor::Exhausted);
                Settlement::Empty
            }
            Err(err) => match self.retry.delay_ms(fetch.attempt) {
                Some(delay_ms) if err.is_transient() => {
                    let attempt = fetch.attempt + 1;
                    let request = self.mint_request();
                    self.enqueue(PageFetch {
                        request,
                        key,
                        query: fetch.query.clone(),
                        attempt,
                        delay_ms,
                    });
                    Settlement::Retrying { attempt, delay_ms }
                }
                _ => {
                    self.pages.insert(key, PageState::Loaded);
                    Settlement::Failed
                }
            },
        }
    }

    /// Forget everything; returns the requests that were in flight.
    pub fn reset(&mut self) -> Vec<Request> {
        let aborted = self
            .pages
            .values()
            .filter_map(PageState::in_flight_request)
            .collect();
        self.wanted.clear();
        self.pages.clear();
        self.cursors.clear();
        self.queue.clear();
        self.fetching = 0;
        aborted
    }

    fn schedule(&mut self, tile: TileCoord) -> Option<PageKey> {
        let extent = self.wanted.get(&tile)?.extent;
        let page = self.cursor(&tile).page()?;
        if page > max_pages_at_zoom(self.zoom) {
            return None;
        }
        let key = PageKey::new(tile, page);
        if self.pages.contains_key(&key) {
            return None;
        }

        let request = self.mint_request();
        self.enqueue(PageFetch {
            request,
            key,
            query: PageQuery::new(&extent, page, self.page_size),
            attempt: 0,
            delay_ms: 0,
        });
        Some(key)
    }

    fn enqueue(&mut self, fetch: PageFetch) {
        let key = fetch.key;
        let request = fetch.request;
        let work = self.queue.submit(fetch);
        self.pages.insert(key, PageState::Queued { request, work });
    }

    fn drop_in_flight(&mut self, key: &PageKey) -> Option<Request> {
        match self.pages.remove(key)? {
            PageState::Queued { request, work } => {
                self.queue.cancel(work);
                Some(request)
            }
            PageState::Fetching { request } => {
                self.fetching = self.fetching.saturating_sub(1);
                Some(request)
            }
            state @ PageState::Loaded => {
                self.pages.insert(*key, state);
                None
            }
        }
    }

    fn mint_request(&mut self) -> Request {
        let request = Request(self.next_request);
        self.next_request += 1;
        request
    }
}
