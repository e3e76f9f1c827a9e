use thiserror::Error;

/// The directory fetch failed.  The catalog falls back to an empty station
/// list; the fetch can be re-issued.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("directory returned HTTP {0}")]
    Status(u16),
    #[error("directory payload could not be decoded: {0}")]
    Decode(String),
    #[error("no directory mirrors configured")]
    NoMirror,
}

/// A single raw directory entry could not be turned into a `StationRecord`.
/// Never surfaced to the user; the entry is just dropped.
#[derive(Debug, Error, PartialEq)]
pub enum RecordShapeError {
    #[error("entry is not a JSON object")]
    NotAnObject,
    #[error("required field `{0}` is missing or empty")]
    Missing(&'static str),
    #[error("field `{0}` is not a usable number")]
    BadNumber(&'static str),
}

/// Failure reported by the audio output primitive.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MediaError {
    #[error("media backend is not available")]
    Unavailable,
    #[error("media backend rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("no station selected")]
    NoStation,
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("cannot {op} while {from:?}")]
    InvalidTransition {
        op: &'static str,
        from: crate::protocol::PlaybackStatus,
    },
}
