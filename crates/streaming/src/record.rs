use chrono::{DateTime, NaiveDate, NaiveDateTime};
use foundation::bounds::Aabb2;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;

/// Public site hosting image details and author profiles.
pub const SITE_BASE: &str = "https://openstreetcam.org";

// Same unreserved set as JavaScript's `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// One street-level photo as returned by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
    /// `[lon, lat]` in degrees.
    pub loc: [f64; 2],
    pub key: String,
    /// Camera heading in degrees.
    pub heading: f64,
    pub captured_at: Option<NaiveDateTime>,
    pub captured_by: Option<String>,
    pub image_path: String,
    pub sequence_id: String,
    pub sequence_index: u32,
}

impl ImageRecord {
    pub fn bounds(&self) -> Aabb2 {
        Aabb2::point(self.loc)
    }

    pub fn image_url(&self, api_base: &str) -> String {
        format!("{}/{}", api_base.trim_end_matches('/'), self.image_path)
    }

    pub fn details_url(&self) -> String {
        format!(
            "{SITE_BASE}/details/{}/{}",
            self.sequence_id, self.sequence_index
        )
    }

    pub fn author_url(&self) -> Option<String> {
        self.captured_by
            .as_deref()
            .map(|user| format!("{SITE_BASE}/user/{}", utf8_percent_encode(user, COMPONENT)))
    }

    /// Capture date formatted for attribution, e.g. `2017-05-23`.
    pub fn captured_date_label(&self) -> Option<String> {
        self.captured_at.map(|t| t.format("%Y-%m-%d").to_string())
    }
}

/// Parse the catalog's capture timestamps; anything unrecognised is `None`.
pub fn parse_capture_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.naive_utc());
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(t);
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(t);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
