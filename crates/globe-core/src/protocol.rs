use serde::{Deserialize, Serialize};

/// Commands sent from the HTTP surface to the core event loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    SelectCountry { country: String },
    ClearCountry,
    SelectStation { id: String },
    Play,
    Pause,
    Stop,
    Volume { value: f32 },
    /// Re-issue the directory fetch.
    Refresh,
}

/// Playback status as seen by the rendering surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle, // nothing selected, explicitly stopped, or stream ended
    Loading, // source set, waiting for the media element
    Ready,   // media element can play; waiting for an explicit play
    Playing,
    Paused,
    Errored, // media element rejected the stream
}

impl PlaybackStatus {
    /// Label used on the play/pause button.
    pub fn button_label(&self) -> &'static str {
        match self {
            PlaybackStatus::Loading => "Loading...",
            PlaybackStatus::Playing => "Pause",
            _ => "Play",
        }
    }
}

/// Identity of one `select`/`stop` generation.  Media callbacks carry the
/// token of the source they belong to so stale ones can be dropped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PlaybackToken(pub u64);

impl PlaybackToken {
    pub fn next(self) -> Self {
        PlaybackToken(self.0 + 1)
    }
}

/// Asynchronous notification from the media element.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSignal {
    ReadyToPlay(PlaybackToken),
    Ended(PlaybackToken),
    Error(PlaybackToken, String),
}

impl MediaSignal {
    pub fn token(&self) -> PlaybackToken {
        match self {
            MediaSignal::ReadyToPlay(t) | MediaSignal::Ended(t) | MediaSignal::Error(t, _) => *t,
        }
    }
}

/// One eligible station from the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StationRecord {
    /// Directory identifier (`stationuuid`), opaque.
    pub id: String,
    pub name: String,
    pub country: String,
    #[serde(default)]
    pub language: String,
    /// Raw comma-separated tag string as the directory sends it.
    #[serde(default)]
    pub tags: String,
    pub url_resolved: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub bitrate: Option<u32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl StationRecord {
    /// URL handed to the media element.
    pub fn stream_url(&self) -> &str {
        if self.url_resolved.is_empty() {
            &self.url
        } else {
            &self.url_resolved
        }
    }

    /// Individual tags, trimmed, empty ones skipped.
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// "jazz,news • english"
    pub fn subtitle(&self) -> String {
        format!("{} • {}", self.tags, self.language)
    }

    /// "128kbps • MP3"; the bitrate part stays empty when unknown.
    pub fn format_line(&self) -> String {
        let bitrate = match self.bitrate {
            Some(b) if b > 0 => format!("{}kbps", b),
            _ => String::new(),
        };
        format!("{} • {}", bitrate, self.codec)
    }
}

/// Derived per-country summary used for globe markers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CountryAggregate {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub count: usize,
}

impl CountryAggregate {
    /// Hover tooltip text.
    pub fn label(&self) -> String {
        format!("{} ({} stations)", self.name, self.count)
    }
}

/// Read-only view of the playback controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub current_station: Option<StationRecord>,
    pub volume: f32,
    pub token: PlaybackToken,
    pub last_error: Option<String>,
}

/// Outcome of the most recent directory fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FetchStatus {
    #[default]
    Loading,
    Loaded { stations: usize },
    Failed { message: String },
}
