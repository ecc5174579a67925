//! Async session driver.
//!
//! One lock guards the cache and the table of running fetch tasks. Tasks
//! hold the lock only to settle their page and start follow-ups, never
//! across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use streaming::{
    ImageRecord, ImageryCache, PageFetch, PageKey, Projection, Reconciled, Request, SequenceLine,
};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::source::CatalogSource;

const EVENT_CAPACITY: usize = 64;

/// Sent after a page added images; renderers should re-query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImages {
    pub page: PageKey,
    pub inserted: usize,
}

/// Cloneable handle to one imagery session.
#[derive(Clone)]
pub struct ImageryService {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServiceConfig,
    source: Arc<dyn CatalogSource>,
    state: Mutex<State>,
    events: broadcast::Sender<LoadedImages>,
    idle: Notify,
}

#[derive(Default)]
struct State {
    cache: Option<ImageryCache>,
    /// Running fetches. A task whose request is missing here was aborted and
    /// must not touch the cache.
    tasks: HashMap<Request, JoinHandle<()>>,
}

impl ImageryService {
    pub fn new(config: ServiceConfig, source: Arc<dyn CatalogSource>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let service = Self {
            inner: Arc::new(Inner {
                config,
                source,
                state: Mutex::new(State::default()),
                events,
                idle: Notify::new(),
            }),
        };
        service.init();
        service
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Create the cache if there is none.
    pub fn init(&self) {
        let mut state = self.inner.state.lock();
        state
            .cache
            .get_or_insert_with(|| ImageryCache::new(self.inner.config.loader.clone()));
    }

    /// Abort every running fetch and start over with empty state.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        let aborted = state.tasks.len();
        for (_, handle) in state.tasks.drain() {
            handle.abort();
        }
        match state.cache.as_mut() {
            Some(cache) => {
                cache.reset();
            }
            None => state.cache = Some(ImageryCache::new(self.inner.config.loader.clone())),
        }
        drop(state);

        info!(aborted, "imagery session reset");
        self.inner.idle.notify_waiters();
    }

    /// Plan the view and start fetching its pages.
    ///
    /// Must be called inside a tokio runtime.
    pub fn load_images<P: Projection + ?Sized>(&self, projection: &P) -> Reconciled {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let cache = state
            .cache
            .get_or_insert_with(|| ImageryCache::new(self.inner.config.loader.clone()));

        let planned = cache.plan(projection);
        for request in &planned.aborted {
            if let Some(handle) = state.tasks.remove(request) {
                handle.abort();
            }
        }
        dispatch(&self.inner, state);
        if state.tasks.is_empty() {
            self.inner.idle.notify_waiters();
        }
        planned
    }

    /// Receive a message each time a page adds images.
    pub fn subscribe(&self) -> broadcast::Receiver<LoadedImages> {
        self.inner.events.subscribe()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.state.lock().tasks.is_empty()
    }

    /// Resolve once no fetch is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Inspect the cache under the session lock.
    pub fn with_cache<R>(&self, f: impl FnOnce(&ImageryCache) -> R) -> Option<R> {
        self.inner.state.lock().cache.as_ref().map(f)
    }

    /// Density-limited images in view.
    pub fn images<P: Projection + ?Sized>(&self, projection: &P) -> Vec<Arc<ImageRecord>> {
        self.with_cache(|cache| cache.images(projection))
            .unwrap_or_default()
    }

    /// Lines for every sequence with an image in view.
    pub fn sequences<P: Projection + ?Sized>(&self, projection: &P) -> Vec<SequenceLine> {
        self.with_cache(|cache| cache.sequence_lines(projection))
            .unwrap_or_default()
    }

    pub fn sequence_key_for_image(record: &ImageRecord) -> &str {
        ImageryCache::sequence_key_for_image(record)
    }

    pub fn image_url(&self, record: &ImageRecord) -> String {
        record.image_url(&self.inner.config.api_base)
    }

    pub fn rotate_sequence(&self, sequence_id: &str, degrees: f64) -> Option<f64> {
        let mut state = self.inner.state.lock();
        state.cache.as_mut()?.rotate_sequence(sequence_id, degrees)
    }

    pub fn sequence_rotation(&self, sequence_id: &str) -> f64 {
        self.with_cache(|cache| cache.sequence_rotation(sequence_id))
            .unwrap_or(0.0)
    }

    /// Neighbour `delta` steps along the record's sequence.
    pub fn step(&self, record: &ImageRecord, delta: i64) -> Option<Arc<ImageRecord>> {
        self.with_cache(|cache| cache.step(record, delta)).flatten()
    }

    pub fn sequence_image_keys(&self, sequence_id: &str) -> Vec<String> {
        self.with_cache(|cache| cache.sequence_image_keys(sequence_id))
            .unwrap_or_default()
    }
}

/// Start queued fetches until the cache's concurrency ceiling stops us.
fn dispatch(inner: &Arc<Inner>, state: &mut State) {
    let Some(cache) = state.cache.as_mut() else {
        return;
    };
    while let Some(fetch) = cache.next_fetch() {
        let request = fetch.request;
        let handle = tokio::spawn(run_fetch(Arc::clone(inner), fetch));
        state.tasks.insert(request, handle);
    }
}

async fn run_fetch(inner: Arc<Inner>, fetch: PageFetch) {
    if fetch.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(fetch.delay_ms)).await;
    }
    let outcome = inner.source.fetch_page(fetch.query.clone()).await;

    let (completion, now_idle) = {
        let mut guard = inner.state.lock();
        let state = &mut *guard;
        if state.tasks.remove(&fetch.request).is_none() {
            debug!(page = %fetch.key, "fetch finished after abort");
            return;
        }
        let Some(cache) = state.cache.as_mut() else {
            return;
        };
        let completion = cache.complete(&fetch, outcome);
        dispatch(&inner, state);
        (completion, state.tasks.is_empty())
    };

    if completion.loaded_images() {
        let _ = inner.events.send(LoadedImages {
            page: completion.key,
            inserted: completion.inserted,
        });
    }
    if now_idle {
        inner.idle.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::ImageryService;
    use crate::config::ServiceConfig;
    use crate::source::MemoryCatalog;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use streaming::{
        CatalogError, CatalogPage, ImageRecord, LoaderConfig, Mercator, Projection, RetryPolicy,
    };
    use tokio::time::timeout;

    fn view() -> Mercator {
        Mercator::centered([13.4, 52.5], 17.0, [256.0, 128.0])
    }

    fn record(px: [f64; 2], seq: &str, index: u32) -> ImageRecord {
        ImageRecord {
            loc: view().invert(px),
            key: format!("{seq}/{index}"),
            heading: 0.0,
            captured_at: None,
            captured_by: None,
            image_path: format!("files/{seq}-{index}.jpg"),
            sequence_id: seq.to_string(),
            sequence_index: index,
        }
    }

    fn service(loader: LoaderConfig, catalog: Arc<MemoryCatalog>) -> ImageryService {
        let config = ServiceConfig {
            loader,
            ..ServiceConfig::default()
        };
        ImageryService::new(config, catalog)
    }

    async fn settle(service: &ImageryService) {
        timeout(Duration::from_secs(5), service.wait_idle())
            .await
            .expect("service went idle");
    }

    #[tokio::test]
    async fn loads_pages_until_a_short_one() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.push(
            1,
            Ok(CatalogPage::new(vec![
                record([20.0, 20.0], "s", 0),
                record([60.0, 20.0], "s", 1),
            ])),
        );
        catalog.push(2, Ok(CatalogPage::new(vec![record([100.0, 20.0], "t", 0)])));

        let loader = LoaderConfig {
            page_size: 2,
            ..LoaderConfig::default()
        };
        let service = service(loader, Arc::clone(&catalog));
        let mut events = service.subscribe();

        let planned = service.load_images(&view());
        assert_eq!(planned.scheduled.len(), 1);
        settle(&service).await;

        let pages: Vec<u32> = catalog.requests().iter().map(|q| q.page).collect();
        assert_eq!(pages, vec![1, 2]);
        assert_eq!(service.images(&view()).len(), 3);

        let keys: Vec<String> = service
            .sequences(&view())
            .iter()
            .map(|l| l.key().to_string())
            .collect();
        assert_eq!(keys, vec!["s", "t"]);

        let first = events.try_recv().unwrap();
        let second = events.try_recv().unwrap();
        assert_eq!(first.inserted + second.inserted, 3);
        assert_eq!(first.page.page, 1);

        // Everything is loaded; the same view asks for nothing new.
        let again = service.load_images(&view());
        assert!(again.scheduled.is_empty());
        assert!(service.is_idle());
    }

    #[tokio::test]
    async fn failed_page_stays_failed_without_retry() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.push(1, Err(CatalogError::Transport("refused".into())));
        let service = service(LoaderConfig::default(), Arc::clone(&catalog));
        let mut events = service.subscribe();

        service.load_images(&view());
        settle(&service).await;

        assert!(service.images(&view()).is_empty());
        assert!(events.try_recv().is_err());
        let failed = service.with_cache(|c| c.metrics().counter("pages_failed"));
        assert_eq!(failed, Some(1));

        service.load_images(&view());
        settle(&service).await;
        assert_eq!(catalog.requests().len(), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.push(1, Err(CatalogError::Status(502)));
        catalog.push(1, Ok(CatalogPage::new(vec![record([20.0, 20.0], "s", 0)])));
        let loader = LoaderConfig {
            retry: RetryPolicy::Retry {
                max_retries: 2,
                backoff_ms: 1,
            },
            ..LoaderConfig::default()
        };
        let service = service(loader, Arc::clone(&catalog));

        service.load_images(&view());
        settle(&service).await;

        assert_eq!(catalog.requests().len(), 2);
        assert_eq!(service.images(&view()).len(), 1);
        let retried = service.with_cache(|c| c.metrics().counter("pages_retried"));
        assert_eq!(retried, Some(1));
    }

    #[tokio::test]
    async fn reset_aborts_running_fetches() {
        let catalog = Arc::new(MemoryCatalog::new().with_latency(Duration::from_secs(30)));
        catalog.push(1, Ok(CatalogPage::new(vec![record([20.0, 20.0], "s", 0)])));
        let service = service(LoaderConfig::default(), Arc::clone(&catalog));

        service.load_images(&view());
        assert!(!service.is_idle());

        service.reset();
        assert!(service.is_idle());
        settle(&service).await;
        assert_eq!(service.with_cache(|c| c.images_len()), Some(0));
        assert!(service.with_cache(|c| c.loader().is_idle()).unwrap());
    }

    #[tokio::test]
    async fn panning_away_aborts_the_old_tile() {
        let catalog = Arc::new(MemoryCatalog::new().with_latency(Duration::from_secs(30)));
        let service = service(LoaderConfig::default(), Arc::clone(&catalog));

        service.load_images(&view());
        let elsewhere = Mercator::centered([-73.98, 40.75], 17.0, [256.0, 128.0]);
        let planned = service.load_images(&elsewhere);
        assert_eq!(planned.aborted.len(), 1);
        assert_eq!(planned.scheduled.len(), 1);

        let in_flight = service.with_cache(|c| c.loader().in_flight()).unwrap();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0], planned.scheduled[0]);
        service.reset();
    }

    #[tokio::test]
    async fn sequence_operations_go_through_the_cache() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.push(
            1,
            Ok(CatalogPage::new(vec![
                record([20.0, 20.0], "s", 0),
                record([40.0, 20.0], "s", 1),
            ])),
        );
        let service = service(LoaderConfig::default(), catalog);
        service.load_images(&view());
        settle(&service).await;

        let first = record([20.0, 20.0], "s", 0);
        let next = service.step(&first, 1).unwrap();
        assert_eq!(next.key, "s/1");
        assert_eq!(ImageryService::sequence_key_for_image(&next), "s");
        assert!(service.step(&first, -1).is_none());

        assert_eq!(service.rotate_sequence("s", 45.0), Some(45.0));
        assert_eq!(service.rotate_sequence("s", 45.0), Some(90.0));
        assert_eq!(service.sequence_rotation("s"), 90.0);
        assert_eq!(service.sequence_image_keys("s"), vec!["s/0", "s/1"]);
        assert_eq!(
            service.image_url(&next),
            "https://openstreetcam.org/files/s-1.jpg"
        );
    }
}
