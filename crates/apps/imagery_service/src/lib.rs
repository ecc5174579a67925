//! Async driver for the street-level imagery layer.
//!
//! `ImageryService` owns an [`streaming::ImageryCache`] behind a lock and runs
//! page fetches as tokio tasks against a [`CatalogSource`]. `OffsetService`
//! answers imagery-offset lookups with its own spatial cache.

pub mod config;
pub mod offsets;
pub mod service;
pub mod source;

#[cfg(test)]
pub(crate) mod test_http;

pub use config::*;
pub use offsets::*;
pub use service::*;
pub use source::*;
