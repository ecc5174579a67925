//! Catalog sources: where pages of image records come from.
//!
//! `HttpCatalog` talks to the public listing API; `MemoryCatalog` serves
//! scripted pages for tests and offline runs.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use parking_lot::Mutex;
use streaming::{CatalogError, CatalogPage, PageQuery, NEARBY_PHOTOS_PATH};

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A paginated catalog of geotagged images.
///
/// Implementations must be `Send + Sync`; the service shares one source
/// between all fetch tasks.
pub trait CatalogSource: Send + Sync {
    /// Fetch one page. An empty page is `Err(CatalogError::Empty)`.
    fn fetch_page(&self, query: PageQuery) -> BoxFuture<'_, Result<CatalogPage, CatalogError>>;
}

/// Form-encoded POST against `{api_base}/1.0/list/nearby-photos/`.
pub struct HttpCatalog {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(api_base: &str) -> Self {
        Self::with_client(api_base, reqwest::Client::new())
    }

    pub fn with_client(api_base: &str, client: reqwest::Client) -> Self {
        Self {
            endpoint: format!("{}{}", api_base.trim_end_matches('/'), NEARBY_PHOTOS_PATH),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CatalogSource for HttpCatalog {
    fn fetch_page(&self, query: PageQuery) -> BoxFuture<'_, Result<CatalogPage, CatalogError>> {
        Box::pin(async move {
            let resp = self
                .client
                .post(&self.endpoint)
                .form(&query)
                .send()
                .await
                .map_err(|e| CatalogError::Transport(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(CatalogError::Status(resp.status().as_u16()));
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| CatalogError::Transport(e.to_string()))?;

            CatalogPage::from_json(&bytes)
        })
    }
}

/// In-memory catalog keyed by page number.
///
/// Each page holds a script of outcomes; all but the last are consumed in
/// order, the last repeats. Unscripted pages are empty.
#[derive(Default)]
pub struct MemoryCatalog {
    pages: Mutex<HashMap<u32, VecDeque<Result<CatalogPage, CatalogError>>>>,
    requests: Mutex<Vec<PageQuery>>,
    latency: Duration,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, page: u32, outcome: Result<CatalogPage, CatalogError>) {
        self.pages.lock().entry(page).or_default().push_back(outcome);
    }

    /// Queries received so far, in arrival order.
    pub fn requests(&self) -> Vec<PageQuery> {
        self.requests.lock().clone()
    }

    fn answer(&self, page: u32) -> Result<CatalogPage, CatalogError> {
        let mut pages = self.pages.lock();
        let Some(script) = pages.get_mut(&page) else {
            return Err(CatalogError::Empty);
        };
        if script.len() > 1 {
            script.pop_front().unwrap_or(Err(CatalogError::Empty))
        } else {
            script.front().cloned().unwrap_or(Err(CatalogError::Empty))
        }
    }
}

impl CatalogSource for MemoryCatalog {
    fn fetch_page(&self, query: PageQuery) -> BoxFuture<'_, Result<CatalogPage, CatalogError>> {
        Box::pin(async move {
            let page = query.page;
            self.requests.lock().push(query);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.answer(page)
        })
    }
}
