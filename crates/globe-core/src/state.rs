use std::sync::Arc;

use tokio::sync::RwLock;

use crate::catalog::StationCatalog;
use crate::protocol::{FetchStatus, PlaybackSnapshot};

/// Everything the rendering surface can read.  `rev` is a monotonically
/// increasing counter bumped on every change so clients can detect missed
/// updates.
#[derive(Debug, Clone, Default)]
pub struct GlobeState {
    pub rev: u64,
    pub catalog: Arc<StationCatalog>,
    pub selected_country: Option<String>,
    pub playback: PlaybackSnapshot,
    pub fetch: FetchStatus,
}

impl GlobeState {
    /// Sidebar heading.
    pub fn list_title(&self) -> String {
        match &self.selected_country {
            Some(country) => format!("{} Stations", country),
            None => "Global Radio".to_string(),
        }
    }
}

/// Shared snapshot of the core's state.  Only the core event loop writes;
/// HTTP handlers read clones.
pub struct StateManager {
    state: Arc<RwLock<GlobeState>>,
}

impl StateManager {
    pub fn new(playback: PlaybackSnapshot) -> Self {
        let state = GlobeState {
            rev: 1,
            playback,
            ..GlobeState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn get_state(&self) -> GlobeState {
        self.state.read().await.clone()
    }

    pub async fn rev(&self) -> u64 {
        self.state.read().await.rev
    }

    pub async fn set_catalog(&self, catalog: Arc<StationCatalog>, fetch: FetchStatus) {
        let mut state = self.state.write().await;
        state.catalog = catalog;
        state.fetch = fetch;
        state.rev += 1;
    }

    pub async fn set_fetch_status(&self, fetch: FetchStatus) {
        let mut state = self.state.write().await;
        state.fetch = fetch;
        state.rev += 1;
    }

    pub async fn set_selected_country(&self, country: Option<String>) {
        let mut state = self.state.write().await;
        state.selected_country = country;
        state.rev += 1;
    }

    pub async fn set_playback(&self, playback: PlaybackSnapshot) {
        let mut state = self.state.write().await;
        if state.playback != playback {
            state.playback = playback;
            state.rev += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PlaybackStatus, StationRecord};

    #[tokio::test]
    async fn test_rev_bumps_on_change_only() {
        let sm = StateManager::new(PlaybackSnapshot::default());
        assert_eq!(sm.rev().await, 1);

        sm.set_playback(PlaybackSnapshot::default()).await;
        assert_eq!(sm.rev().await, 1);

        sm.set_playback(PlaybackSnapshot {
            status: PlaybackStatus::Loading,
            ..PlaybackSnapshot::default()
        })
        .await;
        assert_eq!(sm.rev().await, 2);

        let catalog = StationCatalog::new(vec![StationRecord {
            id: "x".into(),
            country: "Chile".into(),
            latitude: Some(1.0),
            longitude: Some(1.0),
            ..StationRecord::default()
        }]);
        sm.set_catalog(Arc::new(catalog), FetchStatus::Loaded { stations: 1 }).await;
        let state = sm.get_state().await;
        assert_eq!(state.rev, 3);
        assert_eq!(state.catalog.countries().len(), 1);
        assert_eq!(state.fetch, FetchStatus::Loaded { stations: 1 });
    }

    #[tokio::test]
    async fn test_list_title_follows_selection() {
        let sm = StateManager::new(PlaybackSnapshot::default());
        assert_eq!(sm.get_state().await.list_title(), "Global Radio");
        sm.set_selected_country(Some("Japan".into())).await;
        assert_eq!(sm.get_state().await.list_title(), "Japan Stations");
    }
}
