//! Outward notification seam for the playback controller
//!
//! The controller has no rendering dependency; a shell implements
//! `PlaybackObserver` and reacts to transitions, progress, highlighting and
//! control enablement.

use crate::playback::controller::PlaybackState;

/// A state transition emitted to the observer. Transient; the controller
/// does not retain events after dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Dispatch of the sentence at this index began
    SentenceStarted(usize),
    /// The sentence at this index finished naturally
    SentenceEnded(usize),
    Paused,
    Resumed,
    Stopped,
    Error(String),
}

/// Which controls are currently meaningful, plus the state they derive from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlStates {
    pub state: PlaybackState,
    pub can_play: bool,
    pub can_pause: bool,
    pub can_stop: bool,
}

/// Interface the controller calls outward after every state change.
///
/// Only `playback_event` is required; the derived notifications default to
/// no-ops for shells that do not need them.
pub trait PlaybackObserver: Send + Sync {
    fn playback_event(&self, event: PlaybackEvent);

    /// Sentences completed out of total, for a progress bar.
    fn progress_changed(&self, _completed: usize, _total: usize) {}

    /// The sentence to highlight, or `None` to clear highlighting.
    fn highlight_changed(&self, _index: Option<usize>) {}

    fn controls_changed(&self, _controls: ControlStates) {}
}

/// Observer that ignores everything, for headless embedding
pub struct NoopObserver;

impl PlaybackObserver for NoopObserver {
    fn playback_event(&self, _event: PlaybackEvent) {}
}
