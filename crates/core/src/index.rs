use crate::error::IndexError;
use crate::models::{EmbeddingRecord, Modality};
use std::collections::HashMap;
use std::sync::RwLock;

/// Vectors with a norm below this are refused rather than normalized into
/// garbage.
pub const NORM_EPSILON: f32 = 1e-6;

struct ModalitySpace {
    dimension: usize,
    records: Vec<EmbeddingRecord>,
}

/// In-memory store of unit-normalized embedding vectors scoped by
/// (video id, modality). Each space fixes its dimension on first insert.
#[derive(Default)]
pub struct VectorIndex {
    spaces: RwLock<HashMap<(String, Modality), ModalitySpace>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record, normalizing its vector. The first insert for a
    /// (video, modality) pair establishes the space's dimension; later
    /// inserts with a different length fail loudly.
    pub fn insert(&self, mut record: EmbeddingRecord) -> Result<(), IndexError> {
        let norm = record
            .vector
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();
        if norm < NORM_EPSILON {
            return Err(IndexError::DegenerateVector {
                video_id: record.video_id.clone(),
                modality: record.modality,
            });
        }
        for value in &mut record.vector {
            *value /= norm;
        }

        let key = (record.video_id.clone(), record.modality);
        let mut spaces = self.spaces.write().expect("index lock poisoned");

        match spaces.get_mut(&key) {
            Some(space) => {
                if space.dimension != record.vector.len() {
                    return Err(IndexError::DimensionMismatch {
                        video_id: record.video_id,
                        modality: record.modality,
                        expected: space.dimension,
                        actual: record.vector.len(),
                    });
                }
                space.records.push(record);
            }
            None => {
                spaces.insert(
                    key,
                    ModalitySpace {
                        dimension: record.vector.len(),
                        records: vec![record],
                    },
                );
            }
        }
        Ok(())
    }

    /// Up to `k` records by descending cosine similarity, ties broken by
    /// ascending ordering key. An unknown (video, modality) pair yields an
    /// empty list; a query vector that does not fit the space is an error,
    /// never an empty result.
    pub fn query(
        &self,
        video_id: &str,
        modality: Modality,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(EmbeddingRecord, f32)>, IndexError> {
        let spaces = self.spaces.read().expect("index lock poisoned");
        let space = match spaces.get(&(video_id.to_string(), modality)) {
            Some(space) => space,
            None => return Ok(Vec::new()),
        };
        if space.dimension != vector.len() {
            return Err(IndexError::DimensionMismatch {
                video_id: video_id.to_string(),
                modality,
                expected: space.dimension,
                actual: vector.len(),
            });
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm < NORM_EPSILON {
            return Err(IndexError::DegenerateVector {
                video_id: video_id.to_string(),
                modality,
            });
        }
        let query: Vec<f32> = vector.iter().map(|value| value / norm).collect();

        let mut scored: Vec<(EmbeddingRecord, f32)> = space
            .records
            .iter()
            .map(|record| {
                let score = record
                    .vector
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| a * b)
                    .sum::<f32>();
                (record.clone(), score)
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .1
                .total_cmp(&left.1)
                .then(left.0.order_key().total_cmp(&right.0.order_key()))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Removes every record for the video across both modalities.
    pub fn delete(&self, video_id: &str) {
        self.spaces
            .write()
            .expect("index lock poisoned")
            .retain(|(id, _), _| id != video_id);
    }

    pub fn len(&self, video_id: &str, modality: Modality) -> usize {
        self.spaces
            .read()
            .expect("index lock poisoned")
            .get(&(video_id.to_string(), modality))
            .map(|space| space.records.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, video_id: &str) -> bool {
        self.len(video_id, Modality::Text) == 0 && self.len(video_id, Modality::Visual) == 0
    }

    /// Snapshot of a video's records for one modality, in insertion order.
    pub fn records(&self, video_id: &str, modality: Modality) -> Vec<EmbeddingRecord> {
        self.spaces
            .read()
            .expect("index lock poisoned")
            .get(&(video_id.to_string(), modality))
            .map(|space| space.records.clone())
            .unwrap_or_default()
    }
}
