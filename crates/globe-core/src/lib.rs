//! Shared core of the radio globe: station catalog, sphere projection,
//! playback state machine and the radio-browser directory client.

pub mod catalog;
pub mod config;
pub mod directory;
pub mod error;
pub mod geo;
pub mod platform;
pub mod playback;
pub mod protocol;
pub mod state;
