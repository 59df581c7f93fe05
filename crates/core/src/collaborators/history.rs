use crate::models::SearchEvent;
use crate::traits::SearchHistorySink;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory log of past searches, grouped per video. Deleting a video's
/// index also discards its history.
#[derive(Default)]
pub struct SearchHistoryStore {
    events: Mutex<HashMap<String, Vec<SearchEvent>>>,
}

impl SearchHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events for one video, oldest first.
    pub fn events_for(&self, video_id: &str) -> Vec<SearchEvent> {
        self.events
            .lock()
            .expect("history lock poisoned")
            .get(video_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn delete(&self, video_id: &str) {
        self.events
            .lock()
            .expect("history lock poisoned")
            .remove(video_id);
    }
}

#[async_trait]
impl SearchHistorySink for SearchHistoryStore {
    async fn record_search(&self, event: SearchEvent) {
        self.events
            .lock()
            .expect("history lock poisoned")
            .entry(event.video_id.clone())
            .or_default()
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchMode;
    use chrono::Utc;

    fn event(video_id: &str, query: &str) -> SearchEvent {
        SearchEvent {
            video_id: video_id.to_string(),
            query: query.to_string(),
            mode: SearchMode::Text,
            recorded_at: Utc::now(),
            result_count: 2,
            top_score: 0.8,
        }
    }

    #[tokio::test]
    async fn events_accumulate_in_order_per_video() {
        let store = SearchHistoryStore::new();
        store.record_search(event("vid-1", "first")).await;
        store.record_search(event("vid-1", "second")).await;
        store.record_search(event("vid-2", "other")).await;

        let events = store.events_for("vid-1");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].query, "first");
        assert_eq!(events[1].query, "second");
        assert_eq!(store.events_for("vid-2").len(), 1);
    }

    #[tokio::test]
    async fn delete_clears_only_that_video() {
        let store = SearchHistoryStore::new();
        store.record_search(event("vid-1", "a")).await;
        store.record_search(event("vid-2", "b")).await;

        store.delete("vid-1");
        assert!(store.events_for("vid-1").is_empty());
        assert_eq!(store.events_for("vid-2").len(), 1);
    }
}
