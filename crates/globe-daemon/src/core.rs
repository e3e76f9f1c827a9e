/// GlobeCore: single-owner event loop for all mutable state.
///
/// Every input (HTTP commands, media callbacks, directory fetch results)
/// arrives as a `CoreEvent` on one mpsc channel.  GlobeCore owns the catalog,
/// the selected country and the `PlaybackController` exclusively; after each
/// event that changes something it publishes a snapshot to `StateManager` and
/// broadcasts `BroadcastMessage::StateUpdated`.
///
/// Directory fetches run on their own task and post their result back tagged
/// with a fetch generation, so a response that arrives after a newer refresh
/// was issued is dropped.
use std::sync::Arc;

use globe_core::catalog::StationCatalog;
use globe_core::config::Config;
use globe_core::directory::DirectoryClient;
use globe_core::error::{FetchError, PlaybackError};
use globe_core::playback::{MediaElement, PlaybackController};
use globe_core::protocol::{Command, FetchStatus, MediaSignal};
use globe_core::state::StateManager;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::BroadcastMessage;

// ── CoreEvent ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("unknown station `{0}`")]
    UnknownStation(String),
    #[error("no stations for country `{0}`")]
    UnknownCountry(String),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

pub type CommandReply = oneshot::Sender<Result<(), CommandError>>;

/// All inputs into the GlobeCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A command from the HTTP API.  `reply` receives the outcome when set.
    ClientCommand {
        cmd: Command,
        reply: Option<CommandReply>,
    },
    /// Tagged callback from the media element.
    Media(MediaSignal),
    /// Directory fetch finished.
    CatalogFetched {
        generation: u64,
        result: Result<Vec<Value>, FetchError>,
    },
    /// Shutdown requested.
    Shutdown,
}

// ── GlobeCore ─────────────────────────────────────────────────────────────────

pub struct GlobeCore<M: MediaElement> {
    directory: Arc<DirectoryClient>,
    catalog: Arc<StationCatalog>,
    selected_country: Option<String>,
    playback: PlaybackController<M>,
    state_manager: Arc<StateManager>,
    /// Loop-back sender for spawned fetch tasks.
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    fetch_generation: u64,
}

impl<M: MediaElement> GlobeCore<M> {
    pub fn new(
        config: &Config,
        directory: DirectoryClient,
        media: M,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<CoreEvent>,
    ) -> Self {
        let playback = PlaybackController::new(media, config.playback.default_volume);
        let state_manager = Arc::new(StateManager::new(playback.snapshot()));
        Self {
            directory: Arc::new(directory),
            catalog: Arc::new(StationCatalog::default()),
            selected_country: None,
            playback,
            state_manager,
            event_tx,
            broadcast_tx,
            fetch_generation: 0,
        }
    }

    /// Borrow the state manager (for use by the HTTP server).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("GlobeCore: starting event loop");
        self.start_fetch().await;

        while let Some(evt) = event_rx.recv().await {
            if matches!(evt, CoreEvent::Shutdown) {
                info!("GlobeCore: shutdown requested");
                break;
            }
            self.handle_event(evt).await;
        }

        info!("GlobeCore: stopping playback");
        self.playback.stop();
        Ok(())
    }

    pub(crate) async fn handle_event(&mut self, evt: CoreEvent) {
        match evt {
            CoreEvent::ClientCommand { cmd, reply } => {
                info!("GlobeCore: command {:?}", cmd);
                let result = self.handle_command(cmd).await;
                if let Err(e) = &result {
                    warn!("GlobeCore: command failed: {}", e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            CoreEvent::Media(signal) => {
                if self.playback.on_signal(signal) {
                    self.publish_playback().await;
                }
            }
            CoreEvent::CatalogFetched { generation, result } => {
                self.handle_fetched(generation, result).await;
            }
            CoreEvent::Shutdown => {}
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<(), CommandError> {
        let result: Result<(), CommandError> = match cmd {
            Command::SelectCountry { country } => {
                if self.catalog.has_country(&country) {
                    self.set_country(Some(country)).await;
                    Ok(())
                } else {
                    Err(CommandError::UnknownCountry(country))
                }
            }
            Command::ClearCountry => {
                self.set_country(None).await;
                Ok(())
            }
            Command::SelectStation { id } => match self.catalog.find(&id).cloned() {
                Some(station) => self.playback.select(station).map(|_| ()).map_err(Into::into),
                None => Err(CommandError::UnknownStation(id)),
            },
            Command::Play => self.playback.play().map_err(Into::into),
            Command::Pause => self.playback.pause().map_err(Into::into),
            Command::Stop => {
                self.playback.stop();
                Ok(())
            }
            Command::Volume { value } => {
                self.playback.set_volume(value);
                Ok(())
            }
            Command::Refresh => {
                self.start_fetch().await;
                Ok(())
            }
        };
        // Failed transitions can still change state (e.g. → Errored).
        self.publish_playback().await;
        result
    }

    async fn set_country(&mut self, country: Option<String>) {
        if self.selected_country == country {
            return;
        }
        self.selected_country = country.clone();
        self.state_manager.set_selected_country(country).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn publish_playback(&self) {
        let before = self.state_manager.rev().await;
        self.state_manager.set_playback(self.playback.snapshot()).await;
        if self.state_manager.rev().await != before {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    // ── directory ─────────────────────────────────────────────────────────────

    async fn start_fetch(&mut self) {
        self.fetch_generation += 1;
        let generation = self.fetch_generation;
        info!("GlobeCore: fetching directory (generation {})", generation);

        self.state_manager.set_fetch_status(FetchStatus::Loading).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);

        let directory = Arc::clone(&self.directory);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = directory.fetch_stations().await;
            if tx
                .send(CoreEvent::CatalogFetched { generation, result })
                .await
                .is_err()
            {
                debug!("GlobeCore gone before fetch {} completed", generation);
            }
        });
    }

    async fn handle_fetched(&mut self, generation: u64, result: Result<Vec<Value>, FetchError>) {
        if generation != self.fetch_generation {
            debug!(
                "GlobeCore: discarding stale fetch {} (current {})",
                generation, self.fetch_generation
            );
            return;
        }

        let (catalog, status) = match result {
            Ok(raw) => {
                let catalog = StationCatalog::from_raw(raw);
                info!(
                    "GlobeCore: loaded {} stations in {} countries",
                    catalog.len(),
                    catalog.countries().len()
                );
                let status = FetchStatus::Loaded {
                    stations: catalog.len(),
                };
                (catalog, status)
            }
            Err(e) => {
                error!("GlobeCore: directory fetch failed: {}", e);
                let status = FetchStatus::Failed {
                    message: e.to_string(),
                };
                (StationCatalog::default(), status)
            }
        };

        self.catalog = Arc::new(catalog);
        self.state_manager
            .set_catalog(Arc::clone(&self.catalog), status)
            .await;

        // The selection must name a country the catalog still has.
        let stale = self
            .selected_country
            .as_deref()
            .is_some_and(|c| !self.catalog.has_country(c));
        if stale {
            info!("GlobeCore: selected country no longer in catalog, clearing");
            self.set_country(None).await;
        }
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    /// Install a catalog as if a fetch had just returned it.
    #[cfg(test)]
    pub(crate) async fn seed_catalog(&mut self, raw: Vec<Value>) {
        self.fetch_generation += 1;
        let generation = self.fetch_generation;
        self.handle_fetched(generation, Ok(raw)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globe_core::config::DirectoryConfig;
    use globe_core::error::MediaError;
    use globe_core::protocol::{PlaybackStatus, PlaybackToken};
    use serde_json::json;

    #[derive(Default)]
    struct SilentMedia;

    impl MediaElement for SilentMedia {
        fn set_source(&mut self, _: PlaybackToken, _: &str) -> Result<(), MediaError> {
            Ok(())
        }
        fn load(&mut self, _: PlaybackToken) -> Result<(), MediaError> {
            Ok(())
        }
        fn play(&mut self) -> Result<(), MediaError> {
            Ok(())
        }
        fn pause(&mut self) -> Result<(), MediaError> {
            Ok(())
        }
        fn set_volume(&mut self, _: f32) -> Result<(), MediaError> {
            Ok(())
        }
        fn release(&mut self) {}
    }

    fn new_core() -> (GlobeCore<SilentMedia>, mpsc::Receiver<CoreEvent>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (broadcast_tx, _) = broadcast::channel(16);
        let directory = DirectoryClient::new(DirectoryConfig {
            mirrors: Vec::new(),
            ..DirectoryConfig::default()
        })
        .unwrap();
        let core = GlobeCore::new(
            &Config::default(),
            directory,
            SilentMedia,
            broadcast_tx,
            event_tx,
        );
        (core, event_rx)
    }

    fn raw_station(id: &str, country: &str) -> Value {
        json!({
            "stationuuid": id,
            "name": format!("Station {id}"),
            "country": country,
            "geo_lat": 10.0,
            "geo_long": 20.0,
            "url_resolved": format!("http://{id}/live"),
        })
    }

    async fn command(core: &mut GlobeCore<SilentMedia>, cmd: Command) -> Result<(), CommandError> {
        let (tx, rx) = oneshot::channel();
        core.handle_event(CoreEvent::ClientCommand {
            cmd,
            reply: Some(tx),
        })
        .await;
        rx.await.unwrap()
    }

    async fn loaded_core() -> GlobeCore<SilentMedia> {
        let (mut core, _rx) = new_core();
        core.seed_catalog(vec![
            raw_station("a", "France"),
            raw_station("b", "France"),
            raw_station("c", "Japan"),
        ])
        .await;
        core
    }

    #[tokio::test]
    async fn test_fetch_result_populates_catalog() {
        let core = loaded_core().await;
        let state = core.state_manager().get_state().await;
        assert_eq!(state.catalog.len(), 3);
        assert_eq!(state.catalog.countries().len(), 2);
        assert_eq!(state.fetch, FetchStatus::Loaded { stations: 3 });
    }

    #[tokio::test]
    async fn test_stale_fetch_is_discarded() {
        let mut core = loaded_core().await;
        core.fetch_generation = 3;
        core.handle_event(CoreEvent::CatalogFetched {
            generation: 2,
            result: Ok(vec![raw_station("z", "Peru")]),
        })
        .await;
        let state = core.state_manager().get_state().await;
        assert!(state.catalog.find("z").is_none());
        assert_eq!(state.catalog.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_empty_catalog_and_message() {
        let mut core = loaded_core().await;
        core.fetch_generation = 2;
        core.handle_event(CoreEvent::CatalogFetched {
            generation: 2,
            result: Err(FetchError::Status(500)),
        })
        .await;
        let state = core.state_manager().get_state().await;
        assert!(state.catalog.is_empty());
        assert!(matches!(state.fetch, FetchStatus::Failed { ref message } if message.contains("500")));
    }

    #[tokio::test]
    async fn test_refresh_without_mirrors_reports_failure() {
        let (mut core, mut rx) = new_core();
        command(&mut core, Command::Refresh).await.unwrap();
        assert_eq!(
            core.state_manager().get_state().await.fetch,
            FetchStatus::Loading
        );
        let evt = rx.recv().await.unwrap();
        core.handle_event(evt).await;
        assert!(matches!(
            core.state_manager().get_state().await.fetch,
            FetchStatus::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_refresh_clears_selection_of_vanished_country() {
        let mut core = loaded_core().await;
        command(&mut core, Command::SelectCountry { country: "France".into() })
            .await
            .unwrap();

        // A refresh that still lists France keeps the selection.
        core.seed_catalog(vec![raw_station("a", "France"), raw_station("c", "Japan")])
            .await;
        assert_eq!(
            core.state_manager().get_state().await.selected_country.as_deref(),
            Some("France")
        );

        // A refresh without France drops it.
        core.seed_catalog(vec![raw_station("c", "Japan")]).await;
        let state = core.state_manager().get_state().await;
        assert!(state.selected_country.is_none());
        assert_eq!(state.list_title(), "Global Radio");

        // A failed refresh drops it too.
        command(&mut core, Command::SelectCountry { country: "Japan".into() })
            .await
            .unwrap();
        core.fetch_generation += 1;
        let generation = core.fetch_generation;
        core.handle_event(CoreEvent::CatalogFetched {
            generation,
            result: Err(FetchError::Status(500)),
        })
        .await;
        let state = core.state_manager().get_state().await;
        assert!(state.catalog.is_empty());
        assert!(state.selected_country.is_none());
        assert_eq!(
            command(&mut core, Command::SelectCountry { country: "Japan".into() }).await,
            Err(CommandError::UnknownCountry("Japan".into()))
        );
    }

    #[tokio::test]
    async fn test_select_unknown_station() {
        let mut core = loaded_core().await;
        assert_eq!(
            command(&mut core, Command::SelectStation { id: "nope".into() }).await,
            Err(CommandError::UnknownStation("nope".into()))
        );
    }

    #[tokio::test]
    async fn test_country_selection_is_published() {
        let mut core = loaded_core().await;
        command(&mut core, Command::SelectCountry { country: "Japan".into() })
            .await
            .unwrap();
        let state = core.state_manager().get_state().await;
        assert_eq!(state.selected_country.as_deref(), Some("Japan"));
        assert_eq!(state.catalog.stations(Some("Japan"), "").len(), 1);

        command(&mut core, Command::ClearCountry).await.unwrap();
        assert!(core.state_manager().get_state().await.selected_country.is_none());

        assert_eq!(
            command(&mut core, Command::SelectCountry { country: "Atlantis".into() }).await,
            Err(CommandError::UnknownCountry("Atlantis".into()))
        );
    }

    #[tokio::test]
    async fn test_late_media_signal_for_previous_station_is_ignored() {
        let mut core = loaded_core().await;
        command(&mut core, Command::SelectStation { id: "a".into() }).await.unwrap();
        let token_a = core.state_manager().get_state().await.playback.token;
        command(&mut core, Command::Play).await.unwrap();
        command(&mut core, Command::SelectStation { id: "b".into() }).await.unwrap();

        core.handle_event(CoreEvent::Media(MediaSignal::ReadyToPlay(token_a)))
            .await;
        let playback = core.state_manager().get_state().await.playback;
        assert_eq!(playback.status, PlaybackStatus::Loading);
        assert_eq!(playback.current_station.unwrap().id, "b");

        let token_b = playback.token;
        core.handle_event(CoreEvent::Media(MediaSignal::ReadyToPlay(token_b)))
            .await;
        assert_eq!(
            core.state_manager().get_state().await.playback.status,
            PlaybackStatus::Ready
        );

        command(&mut core, Command::Stop).await.unwrap();
        let playback = core.state_manager().get_state().await.playback;
        assert_eq!(playback.status, PlaybackStatus::Idle);
        assert!(playback.current_station.is_none());
    }

    #[tokio::test]
    async fn test_play_without_selection_is_reported() {
        let mut core = loaded_core().await;
        assert_eq!(
            command(&mut core, Command::Play).await,
            Err(CommandError::Playback(PlaybackError::NoStation))
        );
        assert_eq!(
            core.state_manager().get_state().await.playback.status,
            PlaybackStatus::Errored
        );
    }

    #[tokio::test]
    async fn test_volume_command_clamps() {
        let mut core = loaded_core().await;
        command(&mut core, Command::Volume { value: 1.5 }).await.unwrap();
        assert_eq!(core.state_manager().get_state().await.playback.volume, 1.0);
    }
}
