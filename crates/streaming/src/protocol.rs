//! Wire format of the nearby-photos catalog.
//!
//! Requests are form-encoded; responses are JSON with a `currentPageItems`
//! array. The catalog is loose about types (numbers frequently arrive as
//! strings), so items are decoded as raw JSON values and validated here,
//! at the ingestion boundary, before anything reaches the cache.

use std::fmt;

use foundation::bounds::Aabb2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{ImageRecord, parse_capture_time};

/// Path of the listing endpoint relative to the API base.
pub const NEARBY_PHOTOS_PATH: &str = "/1.0/list/nearby-photos/";

/// Form parameters for one page of the listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageQuery {
    pub ipp: u32,
    pub page: u32,
    /// `"maxLat,minLon"`.
    #[serde(rename = "bbTopLeft")]
    pub bb_top_left: String,
    /// `"minLat,maxLon"`.
    #[serde(rename = "bbBottomRight")]
    pub bb_bottom_right: String,
}

impl PageQuery {
    pub fn new(extent: &Aabb2, page: u32, page_size: u32) -> Self {
        Self {
            ipp: page_size,
            page,
            bb_top_left: format!("{},{}", extent.max[1], extent.min[0]),
            bb_bottom_right: format!("{},{}", extent.min[1], extent.max[0]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The request never produced a response.
    Transport(String),
    /// Non-success HTTP status.
    Status(u16),
    /// Undecodable body or an item missing a required field.
    Malformed(String),
    /// A well-formed response without items.
    Empty,
}

impl CatalogError {
    /// Whether repeating the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Transport(_) | CatalogError::Status(_))
    }
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Transport(msg) => write!(f, "catalog request failed: {msg}"),
            CatalogError::Status(code) => write!(f, "catalog returned HTTP {code}"),
            CatalogError::Malformed(msg) => write!(f, "malformed catalog response: {msg}"),
            CatalogError::Empty => write!(f, "catalog returned no items"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// One decoded page.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogPage {
    pub records: Vec<ImageRecord>,
}

impl CatalogPage {
    pub fn new(records: Vec<ImageRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decode and validate a response body.
    ///
    /// Fails with `Empty` when the page has no items and with `Malformed` when
    /// the body or any single item is invalid; a page is accepted whole or not
    /// at all.
    pub fn from_json(body: &[u8]) -> Result<Self, CatalogError> {
        let response: PageResponse = serde_json::from_slice(body)
            .map_err(|e| CatalogError::Malformed(e.to_string()))?;
        let items = response.current_page_items.unwrap_or_default();
        if items.is_empty() {
            return Err(CatalogError::Empty);
        }
        let records = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| item.into_record().map_err(|field| malformed_item(i, field)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { records })
    }
}

fn malformed_item(index: usize, field: &str) -> CatalogError {
    CatalogError::Malformed(format!("item {index}: missing or invalid `{field}`"))
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(rename = "currentPageItems", default)]
    current_page_items: Option<Vec<RawItem>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawItem {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    lng: Option<Value>,
    #[serde(default)]
    lat: Option<Value>,
    #[serde(default)]
    heading: Option<Value>,
    #[serde(default)]
    shot_date: Option<Value>,
    #[serde(default)]
    date_added: Option<Value>,
    #[serde(default)]
    username: Option<Value>,
    #[serde(default)]
    lth_name: Option<Value>,
    #[serde(default)]
    sequence_id: Option<Value>,
    #[serde(default)]
    sequence_index: Option<Value>,
}

impl RawItem {
    /// Validates required fields; the error names the first offending field.
    fn into_record(self) -> Result<ImageRecord, &'static str> {
        let lon = self.lng.as_ref().and_then(number).ok_or("lng")?;
        let lat = self.lat.as_ref().and_then(number).ok_or("lat")?;
        if !(-180.0..=180.0).contains(&lon) {
            return Err("lng");
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err("lat");
        }
        let key = self.id.as_ref().and_then(text).ok_or("id")?;
        let image_path = self.lth_name.as_ref().and_then(text).ok_or("lth_name")?;
        let sequence_id = self.sequence_id.as_ref().and_then(text).ok_or("sequence_id")?;
        let sequence_index = self
            .sequence_index
            .as_ref()
            .and_then(number)
            .and_then(index)
            .ok_or("sequence_index")?;

        // Heading is cosmetic; an absent one points north.
        let heading = match &self.heading {
            None | Some(Value::Null) => 0.0,
            Some(v) => number(v).ok_or("heading")?,
        };

        let captured_at = [&self.shot_date, &self.date_added]
            .into_iter()
            .flatten()
            .filter_map(text)
            .find(|s| !s.trim().is_empty())
            .and_then(|s| parse_capture_time(&s));
        let captured_by = self
            .username
            .as_ref()
            .and_then(text)
            .filter(|s| !s.is_empty());

        Ok(ImageRecord {
            loc: [lon, lat],
            key,
            heading,
            captured_at,
            captured_by,
            image_path,
            sequence_id,
            sequence_index,
        })
    }
}

/// A finite number, given either as a JSON number or a numeric string.
pub fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// A non-empty string, given either as a JSON string or a number.
pub fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn index(n: f64) -> Option<u32> {
    (n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX)).then_some(n as u32)
}
