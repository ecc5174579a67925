//! Imagery offset lookups with a spatial result cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Url;
use streaming::{offset_query, parse_offsets, ImageryOffset, OffsetCache, OffsetError};
use tokio::task::AbortHandle;
use tracing::{debug, info};

#[derive(Clone)]
pub struct OffsetService {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    client: reqwest::Client,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    cache: OffsetCache,
    /// In-flight lookups by full request URL.
    pending: HashMap<String, Pending>,
    next_ticket: u64,
}

struct Pending {
    ticket: u64,
    abort: AbortHandle,
}

impl OffsetService {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                client,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.inner.state.lock().cache.len()
    }

    /// Offsets known near `location` (`[lon, lat]`).
    ///
    /// Answers from the cache when it covers the point; otherwise asks the
    /// service. Only one request per URL runs at a time. The lookup finishes
    /// and caches its result even if the caller stops waiting.
    pub async fn search(
        &self,
        location: [f64; 2],
    ) -> Result<Vec<Arc<ImageryOffset>>, OffsetError> {
        let url = Url::parse_with_params(&self.inner.url, offset_query(location))
            .map_err(|e| OffsetError::InvalidUrl(e.to_string()))?;
        let key = url.to_string();

        let task = {
            let mut state = self.inner.state.lock();
            let hits = state.cache.lookup(location);
            if !hits.is_empty() {
                return Ok(hits);
            }
            if state.pending.contains_key(&key) {
                return Err(OffsetError::AlreadyPending);
            }

            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let task = tokio::spawn(lookup(Arc::clone(&self.inner), key.clone(), ticket, url));
            state.pending.insert(
                key,
                Pending {
                    ticket,
                    abort: task.abort_handle(),
                },
            );
            task
        };

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(OffsetError::Aborted),
            Err(e) => Err(OffsetError::Transport(e.to_string())),
        }
    }

    /// Abort running lookups and forget cached offsets.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        let aborted = state.pending.len();
        for (_, pending) in state.pending.drain() {
            pending.abort.abort();
        }
        state.cache.clear();
        info!(aborted, "imagery offsets reset");
    }
}

/// Runs one lookup to completion: fetch, release the URL, cache the result.
///
/// A ticket that no longer owns the URL belongs to a lookup superseded by a
/// reset, and its result is dropped.
async fn lookup(
    inner: Arc<Inner>,
    key: String,
    ticket: u64,
    url: Url,
) -> Result<Vec<Arc<ImageryOffset>>, OffsetError> {
    let result = fetch_offsets(inner.client.clone(), url).await;

    let mut state = inner.state.lock();
    match state.pending.get(&key) {
        Some(p) if p.ticket == ticket => {
            state.pending.remove(&key);
        }
        _ => return Err(OffsetError::Aborted),
    }

    let offsets: Vec<Arc<ImageryOffset>> = result?.into_iter().map(Arc::new).collect();
    state.cache.insert_all(&offsets);
    debug!(found = offsets.len(), url = %key, "imagery offsets cached");
    Ok(offsets)
}

async fn fetch_offsets(
    client: reqwest::Client,
    url: Url,
) -> Result<Vec<ImageryOffset>, OffsetError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| OffsetError::Transport(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(OffsetError::Status(resp.status().as_u16()));
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| OffsetError::Transport(e.to_string()))?;
    parse_offsets(&bytes)
}

#[cfg(test)]
mod tests {
    use super::OffsetService;
    use crate::test_http::serve;
    use axum::http::Method;
    use pretty_assertions::assert_eq;
    use std::pin::pin;
    use std::time::Duration;
    use streaming::OffsetError;
    use tokio::time::timeout;

    const FOUND: &str = r#"[
        {"type":"meta","timestamp":"2017-06-01"},
        {"type":"offset","lat":"52.5","lon":"13.4","imlat":"52.50001","imlon":"13.40002",
         "imagery":"bing","author":"someone","date":"2016-02-03","description":"aligned"}
    ]"#;

    #[tokio::test]
    async fn caches_results_around_each_offset() {
        let (base, log) = serve(200, FOUND, Duration::ZERO).await;
        let service = OffsetService::new(format!("{base}/get"));

        let found = service.search([13.4, 52.5]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].imagery.as_deref(), Some("bing"));
        assert_eq!(found[0].imagery_loc, Some([13.40002, 52.50001]));

        // 500 m away is inside the padded footprint.
        let nearby = service.search([13.4, 52.5045]).await.unwrap();
        assert_eq!(nearby, found);
        assert_eq!(log.lock().len(), 1);

        let request = log.lock()[0].clone();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.uri, "/get?radius=20&format=json&lat=52.5&lon=13.4");
    }

    #[tokio::test]
    async fn upstream_errors_and_empty_answers() {
        let (base, _) = serve(200, r#"{"error":"rate limited"}"#, Duration::ZERO).await;
        let service = OffsetService::new(format!("{base}/get"));
        assert_eq!(
            service.search([13.4, 52.5]).await,
            Err(OffsetError::Upstream("rate limited".to_string()))
        );

        let (base, _) = serve(200, r#"[{"type":"meta"}]"#, Duration::ZERO).await;
        let service = OffsetService::new(format!("{base}/get"));
        assert_eq!(service.search([13.4, 52.5]).await, Err(OffsetError::NotFound));
        assert_eq!(service.cached_len(), 0);
    }

    #[tokio::test]
    async fn duplicate_lookup_is_rejected_and_reset_aborts() {
        let (base, _) = serve(200, FOUND, Duration::from_secs(30)).await;
        let service = OffsetService::new(format!("{base}/get"));

        let mut first = pin!(service.search([13.4, 52.5]));
        assert!(timeout(Duration::from_millis(20), &mut first).await.is_err());

        assert_eq!(
            service.search([13.4, 52.5]).await,
            Err(OffsetError::AlreadyPending)
        );

        service.reset();
        assert_eq!(first.await, Err(OffsetError::Aborted));
        assert_eq!(service.cached_len(), 0);
    }

    #[tokio::test]
    async fn abandoned_search_still_fills_the_cache() {
        let (base, log) = serve(200, FOUND, Duration::from_millis(50)).await;
        let service = OffsetService::new(format!("{base}/get"));

        assert!(timeout(Duration::from_millis(5), service.search([13.4, 52.5]))
            .await
            .is_err());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(service.cached_len(), 1);

        let found = service.search([13.4, 52.5]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn unparsable_lookup_url_is_reported_as_such() {
        let service = OffsetService::new("not a url");
        assert!(matches!(
            service.search([13.4, 52.5]).await,
            Err(OffsetError::InvalidUrl(_))
        ));
        assert_eq!(service.cached_len(), 0);
    }
}
