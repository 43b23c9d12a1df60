//! Sentence-by-sentence playback: the state machine and its outward seam

pub mod controller;
pub mod observer;

pub use controller::{Player, PlayerConfig, PlayerHandle, PlaybackSnapshot, PlaybackState};
pub use observer::{ControlStates, NoopObserver, PlaybackEvent, PlaybackObserver};
