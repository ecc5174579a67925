//! Reconstruction of capture sequences from individually fetched images.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::record::ImageRecord;

/// Photos sharing one sequence id, addressed by their sequence index.
///
/// Pages arrive in arbitrary order, so slots fill in sparsely; unfilled
/// indices are simply absent.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    images: BTreeMap<u32, Arc<ImageRecord>>,
    /// Display rotation in degrees, owned by the viewer.
    pub rotation: f64,
}

impl Sequence {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&Arc<ImageRecord>> {
        self.images.get(&index)
    }

    /// Present images in index order.
    pub fn images(&self) -> impl Iterator<Item = &Arc<ImageRecord>> {
        self.images.values()
    }

    /// Coordinates of present images in index order; gaps are skipped.
    pub fn coordinates(&self) -> Vec<[f64; 2]> {
        self.images.values().map(|r| r.loc).collect()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum GeometryKind {
    LineString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineProperties {
    pub key: String,
}

/// GeoJSON-shaped line for one sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceLine {
    #[serde(rename = "type")]
    pub kind: GeometryKind,
    pub coordinates: Vec<[f64; 2]>,
    pub properties: LineProperties,
}

impl SequenceLine {
    pub fn key(&self) -> &str {
        &self.properties.key
    }
}

/// Sequence id → `Sequence`.
#[derive(Debug, Clone, Default)]
pub struct SequenceAssembler {
    sequences: HashMap<String, Sequence>,
}

impl SequenceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// File `record` under its sequence, creating the sequence on first sight.
    ///
    /// A later record with the same index replaces the earlier one.
    pub fn insert(&mut self, record: Arc<ImageRecord>) {
        self.sequences
            .entry(record.sequence_id.clone())
            .or_default()
            .images
            .insert(record.sequence_index, record);
    }

    pub fn get(&self, sequence_id: &str) -> Option<&Sequence> {
        self.sequences.get(sequence_id)
    }

    /// One line per known id, in the order given; unknown ids are skipped.
    pub fn export<'a, I>(&self, ids: I) -> Vec<SequenceLine>
    where
        I: IntoIterator<Item = &'a str>,
    {
        ids.into_iter()
            .filter_map(|id| {
                let seq = self.sequences.get(id)?;
                Some(SequenceLine {
                    kind: GeometryKind::LineString,
                    coordinates: seq.coordinates(),
                    properties: LineProperties { key: id.to_string() },
                })
            })
            .collect()
    }

    /// Add `degrees` to the sequence's rotation and return the new angle.
    pub fn rotate(&mut self, sequence_id: &str, degrees: f64) -> Option<f64> {
        let seq = self.sequences.get_mut(sequence_id)?;
        seq.rotation += degrees;
        Some(seq.rotation)
    }

    pub fn rotation(&self, sequence_id: &str) -> f64 {
        self.sequences
            .get(sequence_id)
            .map(|s| s.rotation)
            .unwrap_or(0.0)
    }

    /// The image `delta` positions away from `record` in its sequence.
    ///
    /// Returns `None` when that slot is unfilled or out of range.
    pub fn step(&self, record: &ImageRecord, delta: i64) -> Option<Arc<ImageRecord>> {
        let target = i64::from(record.sequence_index).checked_add(delta)?;
        let target = u32::try_from(target).ok()?;
        self.sequences
            .get(&record.sequence_id)?
            .get(target)
            .cloned()
    }

    /// Keys of every image in the sequence, in index order.
    pub fn image_keys(&self, sequence_id: &str) -> Vec<String> {
        self.sequences
            .get(sequence_id)
            .map(|s| s.images().map(|r| r.key.clone()).collect())
            .unwrap_or_default()
    }
}
