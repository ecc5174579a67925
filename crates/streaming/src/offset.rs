//! Imagery alignment offsets: decoding and the point-lookup cache.

use std::fmt;
use std::sync::Arc;

use foundation::bounds::Aabb2;
use serde::Serialize;
use serde_json::Value;
use spatial::SpatialIndex;

use crate::protocol::{number, text};

/// Search radius requested from the offset database, in kilometres.
pub const OFFSET_RADIUS_KM: u32 = 20;

/// Each returned offset is assumed to apply this far around its location.
pub const OFFSET_PAD_METERS: f64 = 1000.0;

/// A recorded imagery offset near a location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageryOffset {
    /// `[lon, lat]` where the offset was measured.
    pub loc: [f64; 2],
    /// `[lon, lat]` of the same point as seen in the imagery.
    pub imagery_loc: Option<[f64; 2]>,
    pub imagery: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetError {
    /// The configured lookup URL cannot be parsed.
    InvalidUrl(String),
    Transport(String),
    Status(u16),
    /// The service answered with an `error` payload.
    Upstream(String),
    Malformed(String),
    /// Fewer than two entries came back.
    NotFound,
    /// An identical lookup is still running.
    AlreadyPending,
    /// The lookup was cancelled by a reset.
    Aborted,
}

impl fmt::Display for OffsetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetError::InvalidUrl(msg) => write!(f, "invalid offset service URL: {msg}"),
            OffsetError::Transport(msg) => write!(f, "offset request failed: {msg}"),
            OffsetError::Status(code) => write!(f, "offset service returned HTTP {code}"),
            OffsetError::Upstream(msg) => write!(f, "offset service error: {msg}"),
            OffsetError::Malformed(msg) => write!(f, "malformed offset response: {msg}"),
            OffsetError::NotFound => write!(f, "no imagery offset found"),
            OffsetError::AlreadyPending => write!(f, "offset lookup already in flight"),
            OffsetError::Aborted => write!(f, "offset lookup aborted"),
        }
    }
}

impl std::error::Error for OffsetError {}

/// Query-string parameters for a lookup at `[lon, lat]`.
pub fn offset_query(location: [f64; 2]) -> Vec<(&'static str, String)> {
    vec![
        ("radius", OFFSET_RADIUS_KM.to_string()),
        ("format", "json".to_string()),
        ("lat", location[1].to_string()),
        ("lon", location[0].to_string()),
    ]
}

/// Decode a lookup response.
///
/// The service returns an array whose first element describes the query
/// itself; the offsets follow it.
pub fn parse_offsets(body: &[u8]) -> Result<Vec<ImageryOffset>, OffsetError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| OffsetError::Malformed(e.to_string()))?;

    if let Some(err) = value.get("error") {
        let msg = text(err).unwrap_or_else(|| err.to_string());
        return Err(OffsetError::Upstream(msg));
    }
    let Value::Array(entries) = value else {
        return Err(OffsetError::Malformed("expected an array".to_string()));
    };
    if entries.len() < 2 {
        return Err(OffsetError::NotFound);
    }

    entries[1..]
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            parse_entry(entry)
                .ok_or_else(|| OffsetError::Malformed(format!("entry {}: missing lat/lon", i + 1)))
        })
        .collect()
}

fn parse_entry(entry: &Value) -> Option<ImageryOffset> {
    let field = |name: &str| entry.get(name);
    let lon = field("lon").and_then(number)?;
    let lat = field("lat").and_then(number)?;
    let imagery_loc = match (
        field("imlon").and_then(number),
        field("imlat").and_then(number),
    ) {
        (Some(x), Some(y)) => Some([x, y]),
        _ => None,
    };
    Some(ImageryOffset {
        loc: [lon, lat],
        imagery_loc,
        imagery: field("imagery").and_then(text),
        author: field("author").and_then(text),
        date: field("date").and_then(text),
        description: field("description").and_then(text),
    })
}

/// Offsets already fetched, indexed by their padded footprint.
#[derive(Debug, Default)]
pub struct OffsetCache {
    index: SpatialIndex<Arc<ImageryOffset>>,
}

impl OffsetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Cached offsets whose footprint covers `location`.
    pub fn lookup(&self, location: [f64; 2]) -> Vec<Arc<ImageryOffset>> {
        self.index
            .search(&Aabb2::point(location))
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn insert_all(&mut self, offsets: &[Arc<ImageryOffset>]) {
        self.index.load(
            offsets
                .iter()
                .map(|o| (Aabb2::point(o.loc).pad_by_meters(OFFSET_PAD_METERS), o.clone())),
        );
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }
}
