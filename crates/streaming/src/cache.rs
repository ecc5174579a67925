use std::collections::BTreeSet;
use std::sync::Arc;

use runtime::Metrics;
use spatial::SpatialIndex;
use tracing::{debug, warn};

use crate::config::LoaderConfig;
use crate::loader::{PageFetch, PageKey, Reconciled, Settlement, TileLoader};
use crate::projection::Projection;
use crate::protocol::{CatalogError, CatalogPage};
use crate::record::ImageRecord;
use crate::request::Request;
use crate::sampler::{ViewportSampler, viewport_extent};
use crate::sequence::{SequenceAssembler, SequenceLine};
use crate::tile::TileGrid;

/// Result of applying one finished fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub key: PageKey,
    pub settlement: Settlement,
    /// Records added to the index and sequences.
    pub inserted: usize,
}

impl Completion {
    /// Whether renderers should re-query.
    pub fn loaded_images(&self) -> bool {
        self.inserted > 0
    }
}

/// Session state for one imagery layer: page bookkeeping, the image index and
/// the sequence map.
///
/// All mutation goes through `&mut self`; a concurrent owner must serialize
/// access behind a single lock.
#[derive(Debug)]
pub struct ImageryCache {
    config: LoaderConfig,
    grid: TileGrid,
    sampler: ViewportSampler,
    loader: TileLoader,
    images: SpatialIndex<Arc<ImageRecord>>,
    sequences: SequenceAssembler,
    metrics: Metrics,
}

impl ImageryCache {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            grid: TileGrid::new(config.tile_zoom),
            sampler: ViewportSampler::new(config.cell_size_px, config.cell_limit),
            loader: TileLoader::new(&config),
            images: SpatialIndex::new(),
            sequences: SequenceAssembler::new(),
            metrics: Metrics::new(),
            config,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn loader(&self) -> &TileLoader {
        &self.loader
    }

    pub fn images_len(&self) -> usize {
        self.images.len()
    }

    pub fn sequences(&self) -> &SequenceAssembler {
        &self.sequences
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Recompute wanted tiles for the view and queue their next pages.
    pub fn plan<P: Projection + ?Sized>(&mut self, projection: &P) -> Reconciled {
        let tiles = self.grid.wanted_tiles(projection);
        let out = self.loader.reconcile(&tiles, projection.zoom());
        self.metrics.inc_by("pages_aborted", out.aborted.len() as u64);
        self.metrics.inc_by("pages_scheduled", out.scheduled.len() as u64);
        self.update_gauges();
        out
    }

    /// Next fetch to start, honouring the concurrency ceiling.
    pub fn next_fetch(&mut self) -> Option<PageFetch> {
        let fetch = self.loader.next_fetch()?;
        self.metrics.inc("pages_requested");
        self.update_gauges();
        Some(fetch)
    }

    /// Apply a finished fetch: settle the page, then ingest accepted records.
    pub fn complete(
        &mut self,
        fetch: &PageFetch,
        outcome: Result<CatalogPage, CatalogError>,
    ) -> Completion {
        let settlement = self.loader.settle(fetch, outcome.as_ref());
        let mut inserted = 0;

        match (&settlement, outcome) {
            (Settlement::Accepted { .. }, Ok(page)) => {
                inserted = self.ingest(page);
                self.metrics.inc("pages_loaded");
                self.metrics.inc_by("records_indexed", inserted as u64);
                debug!(page = %fetch.key, inserted, "page loaded");
            }
            (Settlement::Discarded, _) => {
                self.metrics.inc("pages_discarded");
                debug!(page = %fetch.key, request = fetch.request.0, "discarded stale page");
            }
            (Settlement::Empty, _) => {
                self.metrics.inc("pages_empty");
            }
            (Settlement::Retrying { attempt, delay_ms }, Err(err)) => {
                self.metrics.inc("pages_retried");
                warn!(page = %fetch.key, attempt, delay_ms, "page failed, retrying: {err}");
            }
            (_, Err(err)) => {
                self.metrics.inc("pages_failed");
                warn!(page = %fetch.key, "page failed: {err}");
            }
            (_, Ok(_)) => {}
        }
        self.update_gauges();

        Completion {
            key: fetch.key,
            settlement,
            inserted,
        }
    }

    fn ingest(&mut self, page: CatalogPage) -> usize {
        let records: Vec<Arc<ImageRecord>> = page.records.into_iter().map(Arc::new).collect();
        let inserted = self
            .images
            .load(records.iter().map(|r| (r.bounds(), r.clone())));
        for record in records {
            self.sequences.insert(record);
        }
        inserted
    }

    fn update_gauges(&mut self) {
        let in_flight = self.loader.fetching_count() + self.loader.queued_count();
        self.metrics.set_gauge("pages_in_flight", in_flight as i64);
    }

    /// Density-limited images for marker rendering.
    pub fn images<P: Projection + ?Sized>(&self, projection: &P) -> Vec<Arc<ImageRecord>> {
        self.sampler
            .sample(projection, &self.images)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Lines for every sequence with at least one image in the viewport.
    pub fn sequence_lines<P: Projection + ?Sized>(&self, projection: &P) -> Vec<SequenceLine> {
        let extent = viewport_extent(projection);
        let ids: BTreeSet<&str> = self
            .images
            .search(&extent)
            .into_iter()
            .map(|r| r.sequence_id.as_str())
            .collect();
        self.sequences.export(ids)
    }

    pub fn sequence_key_for_image(record: &ImageRecord) -> &str {
        &record.sequence_id
    }

    pub fn rotate_sequence(&mut self, sequence_id: &str, degrees: f64) -> Option<f64> {
        self.sequences.rotate(sequence_id, degrees)
    }

    pub fn sequence_rotation(&self, sequence_id: &str) -> f64 {
        self.sequences.rotation(sequence_id)
    }

    pub fn step(&self, record: &ImageRecord, delta: i64) -> Option<Arc<ImageRecord>> {
        self.sequences.step(record, delta)
    }

    pub fn sequence_image_keys(&self, sequence_id: &str) -> Vec<String> {
        self.sequences.image_keys(sequence_id)
    }

    /// Replace all state; returns the requests that were in flight.
    pub fn reset(&mut self) -> Vec<Request> {
        let aborted = self.loader.reset();
        self.images.clear();
        self.sequences = SequenceAssembler::new();
        self.metrics.clear();
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::ImageryCache;
    use crate::config::LoaderConfig;
    use crate::loader::{PageCursor, Settlement};
    use crate::projection::{Mercator, Projection};
    use crate::protocol::{CatalogError, CatalogPage};
    use crate::record::ImageRecord;
    use crate::tile::MAX_TILE_ZOOM;
    use pretty_assertions::assert_eq;

    fn view() -> Mercator {
        Mercator::centered([13.4, 52.5], 17.0, [256.0, 128.0])
    }

    fn config(page_size: u32) -> LoaderConfig {
        LoaderConfig {
            page_size,
            ..LoaderConfig::default()
        }
    }

    fn record(p: &Mercator, px: [f64; 2], seq: &str, index: u32) -> ImageRecord {
        ImageRecord {
            loc: p.invert(px),
            key: format!("{seq}/{index}"),
            heading: 0.0,
            captured_at: None,
            captured_by: None,
            image_path: String::new(),
            sequence_id: seq.to_string(),
            sequence_index: index,
        }
    }

    #[test]
    fn zoom_17_paginates_twice_then_exhausts() {
        let p = view();
        assert!((p.zoom() - 17.0).abs() < 1e-9);
        let mut cache = ImageryCache::new(config(2));
        let planned = cache.plan(&p);
        assert_eq!(planned.scheduled.len(), 1, "one z14 tile covers this view");

        let f1 = cache.next_fetch().unwrap();
        let tile = f1.key.tile;
        let full = CatalogPage::new(vec![
            record(&p, [10.0, 10.0], "a", 0),
            record(&p, [50.0, 10.0], "a", 2),
        ]);
        let c1 = cache.complete(&f1, Ok(full));
        assert!(c1.loaded_images());
        assert_eq!(cache.loader().cursor(&tile), PageCursor::Next(2));

        let f2 = cache.next_fetch().expect("second page fires");
        assert_eq!(f2.query.page, 2);
        let short = CatalogPage::new(vec![record(&p, [90.0, 10.0], "b", 0)]);
        let c2 = cache.complete(&f2, Ok(short));
        assert_eq!(c2.settlement, Settlement::Accepted { full: false, next: None });
        assert_eq!(cache.loader().cursor(&tile), PageCursor::Exhausted);
        assert!(cache.next_fetch().is_none());

        assert_eq!(cache.images_len(), 3);
        assert_eq!(cache.metrics().counter("pages_loaded"), 2);
        assert_eq!(cache.metrics().counter("records_indexed"), 3);
        assert_eq!(cache.metrics().gauge("pages_in_flight"), Some(0));

        let lines = cache.sequence_lines(&p);
        let keys: Vec<&str> = lines.iter().map(|l| l.key()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(lines[0].coordinates.len(), 2);
    }

    #[test]
    fn failed_page_inserts_nothing_and_is_not_surfaced() {
        let p = view();
        let mut cache = ImageryCache::new(config(2));
        cache.plan(&p);
        let f = cache.next_fetch().unwrap();
        let c = cache.complete(&f, Err(CatalogError::Transport("timeout".into())));
        assert_eq!(c.settlement, Settlement::Failed);
        assert!(!c.loaded_images());
        assert_eq!(cache.images_len(), 0);
        assert!(cache.loader().is_loaded(&f.key));
        assert_eq!(cache.metrics().counter("pages_failed"), 1);
    }

    #[test]
    fn stale_completion_after_pan_is_dropped() {
        let p = view();
        let mut cache = ImageryCache::new(config(2));
        cache.plan(&p);
        let f = cache.next_fetch().unwrap();

        // Pan far away; the old tile leaves the wanted set.
        let elsewhere = Mercator::centered([-73.98, 40.75], 17.0, [256.0, 128.0]);
        let planned = cache.plan(&elsewhere);
        assert_eq!(planned.aborted, vec![f.request]);

        let c = cache.complete(
            &f,
            Ok(CatalogPage::new(vec![record(&p, [10.0, 10.0], "a", 0)])),
        );
        assert_eq!(c.settlement, Settlement::Discarded);
        assert_eq!(cache.images_len(), 0);
        assert!(cache.sequences().is_empty());
    }

    #[test]
    fn images_are_density_limited() {
        let p = view();
        let mut cache = ImageryCache::new(config(1000));
        cache.plan(&p);
        let f = cache.next_fetch().unwrap();
        let crowd = (0..40).map(|i| record(&p, [4.0, 4.0], "c", i)).collect();
        cache.complete(&f, Ok(CatalogPage::new(crowd)));

        assert_eq!(cache.images(&p).len(), 3);
    }

    #[test]
    fn reset_clears_everything() {
        let p = view();
        let mut cache = ImageryCache::new(config(1));
        cache.plan(&p);
        let f = cache.next_fetch().unwrap();
        cache.complete(
            &f,
            Ok(CatalogPage::new(vec![record(&p, [10.0, 10.0], "a", 0)])),
        );
        assert_eq!(cache.rotate_sequence("a", 90.0), Some(90.0));

        let aborted = cache.reset();
        assert_eq!(aborted.len(), 1, "chained page 2 was queued");
        assert_eq!(cache.images_len(), 0);
        assert_eq!(cache.sequence_rotation("a"), 0.0);
        assert!(cache.loader().is_idle());
    }

    #[test]
    fn oversized_tile_zoom_plans_without_panicking() {
        let p = Mercator::centered([13.4, 52.5], 31.0, [256.0, 128.0]);
        let mut cache = ImageryCache::new(LoaderConfig {
            tile_zoom: 64,
            ..LoaderConfig::default()
        });
        let planned = cache.plan(&p);
        assert!(!planned.scheduled.is_empty());
        assert!(planned.scheduled.iter().all(|k| k.tile.z == MAX_TILE_ZOOM));
    }
}
