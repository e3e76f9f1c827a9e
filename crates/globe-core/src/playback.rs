//! Playback state machine.
//!
//! `PlaybackController` owns the single "current station" slot and drives a
//! `MediaElement`.  The media element reports back asynchronously; each
//! callback carries the `PlaybackToken` of the source it belongs to and is
//! ignored when that token is no longer current.
//!
//! ```text
//!            select                    ready               play
//!  Idle ───────────────▶ Loading ───────────────▶ Ready ──────────▶ Playing
//!                          │  └──────────── play ─────────────────▶  │  ▲
//!                          │                                  pause  ▼  │ play
//!                          │                                       Paused
//!  any ── stop ──▶ Idle    any ── error ──▶ Errored     Playing ── ended ──▶ Idle
//! ```

use tracing::{debug, info, warn};

use crate::error::{MediaError, PlaybackError};
use crate::protocol::{MediaSignal, PlaybackSnapshot, PlaybackStatus, PlaybackToken, StationRecord};

pub const DEFAULT_VOLUME: f32 = 0.7;

/// The platform's audio decode/output primitive.
///
/// Calls are fire-and-forget: an `Err` means the request was rejected on the
/// spot; later failures arrive as `MediaSignal::Error`.
pub trait MediaElement {
    /// Point the element at a new stream.  `token` tags every callback that
    /// stream produces.
    fn set_source(&mut self, token: PlaybackToken, url: &str) -> Result<(), MediaError>;
    /// Start fetching/buffering the current source without playing it.
    fn load(&mut self, token: PlaybackToken) -> Result<(), MediaError>;
    fn play(&mut self) -> Result<(), MediaError>;
    fn pause(&mut self) -> Result<(), MediaError>;
    /// `volume` is already clamped to 0.0..=1.0.
    fn set_volume(&mut self, volume: f32) -> Result<(), MediaError>;
    /// Stop output and drop the source.
    fn release(&mut self);
}

pub struct PlaybackController<M: MediaElement> {
    media: M,
    status: PlaybackStatus,
    current: Option<StationRecord>,
    volume: f32,
    token: PlaybackToken,
    last_error: Option<String>,
}

impl<M: MediaElement> PlaybackController<M> {
    pub fn new(media: M, volume: f32) -> Self {
        Self {
            media,
            status: PlaybackStatus::Idle,
            current: None,
            volume: sanitize_volume(volume).unwrap_or(DEFAULT_VOLUME),
            token: PlaybackToken::default(),
            last_error: None,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn current_station(&self) -> Option<&StationRecord> {
        self.current.as_ref()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn token(&self) -> PlaybackToken {
        self.token
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.status == PlaybackStatus::Loading
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            status: self.status,
            current_station: self.current.clone(),
            volume: self.volume,
            token: self.token,
            last_error: self.last_error.clone(),
        }
    }

    // ── user operations ──────────────────────────────────────────────────────

    /// Make `station` current and start loading it.  Whatever was playing
    /// before is stopped and its pending callbacks become stale.
    pub fn select(&mut self, station: StationRecord) -> Result<PlaybackToken, PlaybackError> {
        if self.current.is_some() {
            self.media.release();
        }
        self.token = self.token.next();
        self.status = PlaybackStatus::Loading;
        self.last_error = None;
        info!(
            "playback: select '{}' ({}) token={}",
            station.name, station.id, self.token.0
        );

        let token = self.token;
        let url = station.stream_url().to_string();
        self.current = Some(station);

        let loaded = self
            .media
            .set_source(token, &url)
            .and_then(|_| self.media.set_volume(self.volume))
            .and_then(|_| self.media.load(token));
        match loaded {
            Ok(()) => Ok(token),
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn play(&mut self) -> Result<(), PlaybackError> {
        match self.status {
            PlaybackStatus::Playing => Ok(()),
            _ if self.current.is_none() => {
                self.status = PlaybackStatus::Errored;
                self.last_error = Some(PlaybackError::NoStation.to_string());
                Err(PlaybackError::NoStation)
            }
            PlaybackStatus::Loading | PlaybackStatus::Ready | PlaybackStatus::Paused => {
                match self.media.play() {
                    Ok(()) => {
                        debug!("playback: {:?} → Playing", self.status);
                        self.status = PlaybackStatus::Playing;
                        Ok(())
                    }
                    Err(e) => Err(self.fail(e)),
                }
            }
            from => Err(PlaybackError::InvalidTransition { op: "play", from }),
        }
    }

    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        match self.status {
            PlaybackStatus::Paused => Ok(()),
            PlaybackStatus::Playing => match self.media.pause() {
                Ok(()) => {
                    self.status = PlaybackStatus::Paused;
                    Ok(())
                }
                Err(e) => Err(self.fail(e)),
            },
            from => Err(PlaybackError::InvalidTransition { op: "pause", from }),
        }
    }

    /// Back to Idle from anywhere; the current station is cleared.
    pub fn stop(&mut self) {
        self.media.release();
        self.token = self.token.next();
        if let Some(station) = self.current.take() {
            info!("playback: stop '{}'", station.name);
        }
        self.status = PlaybackStatus::Idle;
        self.last_error = None;
    }

    /// Clamp into 0.0..=1.0 and apply.  NaN leaves the volume untouched.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        let Some(volume) = sanitize_volume(volume) else {
            warn!("playback: ignoring NaN volume");
            return self.volume;
        };
        self.volume = volume;
        if let Err(e) = self.media.set_volume(volume) {
            warn!("playback: media rejected volume {}: {}", volume, e);
        }
        self.volume
    }

    // ── media callbacks ──────────────────────────────────────────────────────

    /// Dispatch a media callback.  Returns `false` when it was stale.
    pub fn on_signal(&mut self, signal: MediaSignal) -> bool {
        match signal {
            MediaSignal::ReadyToPlay(token) => self.on_ready_to_play(token),
            MediaSignal::Ended(token) => self.on_ended(token),
            MediaSignal::Error(token, reason) => self.on_error(token, &reason),
        }
    }

    /// The source can play.  Does not start playback.
    pub fn on_ready_to_play(&mut self, token: PlaybackToken) -> bool {
        if !self.is_current(token, "ready") {
            return false;
        }
        if self.status == PlaybackStatus::Loading {
            self.status = PlaybackStatus::Ready;
        }
        true
    }

    /// The stream ran out.  No auto-advance.
    pub fn on_ended(&mut self, token: PlaybackToken) -> bool {
        if !self.is_current(token, "ended") {
            return false;
        }
        if self.status == PlaybackStatus::Playing {
            self.status = PlaybackStatus::Idle;
        }
        true
    }

    pub fn on_error(&mut self, token: PlaybackToken, reason: &str) -> bool {
        if !self.is_current(token, "error") {
            return false;
        }
        warn!("playback: media error on token={}: {}", token.0, reason);
        self.status = PlaybackStatus::Errored;
        self.last_error = Some(reason.to_string());
        true
    }

    fn is_current(&self, token: PlaybackToken, what: &str) -> bool {
        if token != self.token {
            debug!(
                "playback: dropping stale {} for token={} (current={})",
                what, token.0, self.token.0
            );
            return false;
        }
        true
    }

    fn fail(&mut self, e: MediaError) -> PlaybackError {
        warn!("playback: media rejected request: {}", e);
        self.status = PlaybackStatus::Errored;
        self.last_error = Some(e.to_string());
        PlaybackError::Media(e)
    }
}

fn sanitize_volume(volume: f32) -> Option<f32> {
    if volume.is_nan() {
        None
    } else {
        Some(volume.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingMedia {
        calls: Vec<String>,
        reject_play: bool,
        reject_source: bool,
    }

    impl MediaElement for RecordingMedia {
        fn set_source(&mut self, token: PlaybackToken, url: &str) -> Result<(), MediaError> {
            if self.reject_source {
                return Err(MediaError::Unavailable);
            }
            self.calls.push(format!("source {} {}", token.0, url));
            Ok(())
        }
        fn load(&mut self, token: PlaybackToken) -> Result<(), MediaError> {
            self.calls.push(format!("load {}", token.0));
            Ok(())
        }
        fn play(&mut self) -> Result<(), MediaError> {
            if self.reject_play {
                return Err(MediaError::Rejected("autoplay blocked".into()));
            }
            self.calls.push("play".into());
            Ok(())
        }
        fn pause(&mut self) -> Result<(), MediaError> {
            self.calls.push("pause".into());
            Ok(())
        }
        fn set_volume(&mut self, volume: f32) -> Result<(), MediaError> {
            self.calls.push(format!("volume {volume}"));
            Ok(())
        }
        fn release(&mut self) {
            self.calls.push("release".into());
        }
    }

    fn station(id: &str) -> StationRecord {
        StationRecord {
            id: id.into(),
            name: format!("Station {id}"),
            country: "France".into(),
            url_resolved: format!("http://{id}/live"),
            latitude: Some(0.0),
            longitude: Some(0.0),
            ..StationRecord::default()
        }
    }

    fn controller() -> PlaybackController<RecordingMedia> {
        PlaybackController::new(RecordingMedia::default(), DEFAULT_VOLUME)
    }

    #[test]
    fn test_initial_state() {
        let pc = controller();
        assert_eq!(pc.status(), PlaybackStatus::Idle);
        assert!(pc.current_station().is_none());
        assert_eq!(pc.volume(), DEFAULT_VOLUME);
    }

    #[test]
    fn test_late_ready_from_superseded_station_is_ignored() {
        let mut pc = controller();
        let a = pc.select(station("a")).unwrap();
        assert_eq!(pc.status(), PlaybackStatus::Loading);
        pc.play().unwrap();
        assert_eq!(pc.status(), PlaybackStatus::Playing);

        let b = pc.select(station("b")).unwrap();
        assert_ne!(a, b);
        assert_eq!(pc.status(), PlaybackStatus::Loading);
        assert!(!pc.on_ready_to_play(a));
        assert_eq!(pc.status(), PlaybackStatus::Loading);
        assert_eq!(pc.current_station().unwrap().id, "b");

        pc.stop();
        assert_eq!(pc.status(), PlaybackStatus::Idle);
        assert!(pc.current_station().is_none());
    }

    #[test]
    fn test_select_drives_media_in_order() {
        let mut pc = controller();
        pc.select(station("a")).unwrap();
        pc.select(station("b")).unwrap();
        assert_eq!(
            pc.media().calls,
            vec![
                "source 1 http://a/live",
                "volume 0.7",
                "load 1",
                "release",
                "source 2 http://b/live",
                "volume 0.7",
                "load 2",
            ]
        );
    }

    #[test]
    fn test_ready_does_not_autostart() {
        let mut pc = controller();
        let t = pc.select(station("a")).unwrap();
        assert!(pc.on_ready_to_play(t));
        assert_eq!(pc.status(), PlaybackStatus::Ready);
        assert!(!pc.media().calls.contains(&"play".to_string()));
        pc.play().unwrap();
        assert_eq!(pc.status(), PlaybackStatus::Playing);
    }

    #[test]
    fn test_ready_after_early_play_keeps_playing() {
        let mut pc = controller();
        let t = pc.select(station("a")).unwrap();
        pc.play().unwrap();
        assert!(pc.on_ready_to_play(t));
        assert_eq!(pc.status(), PlaybackStatus::Playing);
    }

    #[test]
    fn test_pause_and_resume() {
        let mut pc = controller();
        pc.select(station("a")).unwrap();
        assert!(matches!(
            pc.pause(),
            Err(PlaybackError::InvalidTransition { op: "pause", .. })
        ));
        pc.play().unwrap();
        pc.pause().unwrap();
        assert_eq!(pc.status(), PlaybackStatus::Paused);
        pc.pause().unwrap();
        pc.play().unwrap();
        assert_eq!(pc.status(), PlaybackStatus::Playing);
    }

    #[test]
    fn test_play_without_station_errors() {
        let mut pc = controller();
        assert_eq!(pc.play(), Err(PlaybackError::NoStation));
        assert_eq!(pc.status(), PlaybackStatus::Errored);
    }

    #[test]
    fn test_rejected_play_moves_to_errored() {
        let mut pc = PlaybackController::new(
            RecordingMedia {
                reject_play: true,
                ..RecordingMedia::default()
            },
            0.5,
        );
        pc.select(station("a")).unwrap();
        assert!(pc.is_loading());
        let err = pc.play().unwrap_err();
        assert!(matches!(err, PlaybackError::Media(MediaError::Rejected(_))));
        assert_eq!(pc.status(), PlaybackStatus::Errored);
        assert!(!pc.is_loading());
        assert!(pc.last_error().unwrap().contains("autoplay blocked"));
        assert_eq!(pc.current_station().unwrap().id, "a");
    }

    #[test]
    fn test_rejected_source_moves_to_errored() {
        let mut pc = PlaybackController::new(
            RecordingMedia {
                reject_source: true,
                ..RecordingMedia::default()
            },
            0.5,
        );
        let err = pc.select(station("a")).unwrap_err();
        assert_eq!(err, PlaybackError::Media(MediaError::Unavailable));
        assert_eq!(pc.status(), PlaybackStatus::Errored);
    }

    #[test]
    fn test_reselect_recovers_from_error() {
        let mut pc = controller();
        let t = pc.select(station("a")).unwrap();
        assert!(pc.on_error(t, "decode failure"));
        assert_eq!(pc.status(), PlaybackStatus::Errored);
        assert!(matches!(
            pc.play(),
            Err(PlaybackError::InvalidTransition { op: "play", .. })
        ));
        pc.select(station("a")).unwrap();
        assert_eq!(pc.status(), PlaybackStatus::Loading);
        assert!(pc.last_error().is_none());
    }

    #[test]
    fn test_ended_goes_idle_without_advancing() {
        let mut pc = controller();
        let t = pc.select(station("a")).unwrap();
        pc.play().unwrap();
        assert!(pc.on_ended(t));
        assert_eq!(pc.status(), PlaybackStatus::Idle);
        assert_eq!(pc.current_station().unwrap().id, "a");
        assert_eq!(pc.media().calls.iter().filter(|c| c.starts_with("load")).count(), 1);
    }

    #[test]
    fn test_stale_signals_after_stop_are_ignored() {
        let mut pc = controller();
        let t = pc.select(station("a")).unwrap();
        pc.stop();
        assert!(!pc.on_signal(MediaSignal::Error(t, "late".into())));
        assert!(!pc.on_signal(MediaSignal::Ended(t)));
        assert_eq!(pc.status(), PlaybackStatus::Idle);
        assert!(pc.last_error().is_none());
    }

    #[test]
    fn test_volume_is_clamped() {
        let mut pc = controller();
        assert_eq!(pc.set_volume(1.5), 1.0);
        assert_eq!(pc.set_volume(-0.2), 0.0);
        assert_eq!(pc.set_volume(0.3), 0.3);
        assert_eq!(pc.set_volume(f32::NAN), 0.3);
        assert_eq!(pc.snapshot().volume, 0.3);
    }
}
