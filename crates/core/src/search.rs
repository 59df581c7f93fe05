use crate::error::SearchError;
use crate::index::VectorIndex;
use crate::models::{
    Modality, ProcessingStage, SearchEvent, SearchMode, SearchQuery, SearchResult,
};
use crate::status::StatusStore;
use crate::traits::{SearchHistorySink, TextEmbedder, VisualEmbedder};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Fixed score addition when the raw query appears verbatim in a segment.
pub const LEXICAL_BONUS: f32 = 0.3;

/// Hybrid results closer together than this are the same moment.
pub const PROXIMITY_WINDOW_SECONDS: f64 = 2.0;

/// Text mode fetches this multiple of k so the lexical bonus can promote
/// candidates from below the cut line.
const OVERSAMPLE_FACTOR: usize = 2;

/// Answers text, visual and hybrid queries against a video's two embedding
/// spaces. Only videos with a completed pipeline are searchable.
pub struct SearchEngine {
    status: Arc<StatusStore>,
    index: Arc<VectorIndex>,
    text_embedder: Arc<dyn TextEmbedder>,
    visual_embedder: Arc<dyn VisualEmbedder>,
    history: Arc<dyn SearchHistorySink>,
}

impl SearchEngine {
    pub fn new(
        status: Arc<StatusStore>,
        index: Arc<VectorIndex>,
        text_embedder: Arc<dyn TextEmbedder>,
        visual_embedder: Arc<dyn VisualEmbedder>,
        history: Arc<dyn SearchHistorySink>,
    ) -> Self {
        Self {
            status,
            index,
            text_embedder,
            visual_embedder,
            history,
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        let needle = query.text.trim();
        if needle.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let completed = self
            .status
            .get(&query.video_id)
            .map(|status| status.stage == ProcessingStage::Completed)
            .unwrap_or(false);
        if !completed {
            return Err(SearchError::NotIndexed(query.video_id.clone()));
        }

        let mut results = match query.mode {
            SearchMode::Text => self.text_search(&query.video_id, needle, query.top_k).await?,
            SearchMode::Visual => {
                self.visual_search(&query.video_id, needle, query.top_k)
                    .await?
            }
            SearchMode::Hybrid => {
                let text_hits = self.text_search(&query.video_id, needle, query.top_k).await?;
                let visual_hits = self
                    .visual_search(&query.video_id, needle, query.top_k)
                    .await?;
                let merged: Vec<SearchResult> =
                    text_hits.into_iter().chain(visual_hits).collect();
                dedup_by_proximity(merged, PROXIMITY_WINDOW_SECONDS)
            }
        };

        sort_results(&mut results);
        results.truncate(query.top_k);

        debug!(
            video_id = %query.video_id,
            mode = %query.mode,
            hits = results.len(),
            "search answered"
        );
        self.history
            .record_search(SearchEvent {
                video_id: query.video_id.clone(),
                query: needle.to_string(),
                mode: query.mode,
                recorded_at: Utc::now(),
                result_count: results.len(),
                top_score: results.first().map(|hit| hit.score).unwrap_or(0.0),
            })
            .await;

        Ok(results)
    }

    async fn text_search(
        &self,
        video_id: &str,
        needle: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let query_vector = self.text_embedder.embed_text(needle).await?;
        let candidates = self.index.query(
            video_id,
            Modality::Text,
            &query_vector,
            top_k.saturating_mul(OVERSAMPLE_FACTOR),
        )?;

        let needle_lower = needle.to_lowercase();
        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|(record, score)| {
                let score = if record.snippet().to_lowercase().contains(&needle_lower) {
                    (score + LEXICAL_BONUS).min(1.0)
                } else {
                    score
                };
                SearchResult {
                    start_seconds: record.start_seconds(),
                    end_seconds: record.end_seconds(),
                    text: record.snippet().to_string(),
                    score,
                    modality: Modality::Text,
                    frame: None,
                }
            })
            .collect();

        sort_results(&mut results);
        results.truncate(top_k);
        Ok(results)
    }

    async fn visual_search(
        &self,
        video_id: &str,
        needle: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let query_vector = self.visual_embedder.embed_query(needle).await?;
        let candidates = self
            .index
            .query(video_id, Modality::Visual, &query_vector, top_k)?;

        let results = candidates
            .into_iter()
            .map(|(record, score)| {
                let timestamp = record.start_seconds();
                SearchResult {
                    start_seconds: timestamp,
                    end_seconds: None,
                    text: self.snippet_at(video_id, timestamp),
                    score,
                    modality: Modality::Visual,
                    frame: record.frame().cloned(),
                }
            })
            .collect();
        Ok(results)
    }

    /// Frames carry no text of their own; borrow the transcript segment the
    /// timestamp falls into, if any.
    fn snippet_at(&self, video_id: &str, timestamp: f64) -> String {
        self.index
            .records(video_id, Modality::Text)
            .iter()
            .find_map(|record| match (record.start_seconds(), record.end_seconds()) {
                (start, Some(end)) if start <= timestamp && timestamp <= end => {
                    Some(record.snippet().to_string())
                }
                _ => None,
            })
            .unwrap_or_default()
    }
}

fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.start_seconds.total_cmp(&right.start_seconds))
    });
}

/// Collapses results whose timestamps fall inside the proximity window,
/// keeping the higher-scoring one. Input order does not matter; candidates
/// are visited best-first.
fn dedup_by_proximity(mut results: Vec<SearchResult>, window_seconds: f64) -> Vec<SearchResult> {
    sort_results(&mut results);
    let mut kept: Vec<SearchResult> = Vec::with_capacity(results.len());
    for candidate in results {
        let duplicate = kept.iter().any(|existing| {
            (existing.start_seconds - candidate.start_seconds).abs() <= window_seconds
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}
