//! Speech backends for sentence playback
//!
//! Two variants implement one capability contract: a local backend that
//! delegates to the host's built-in synthesis, and a remote backend that
//! fetches character-voice audio over HTTP and plays it out.

pub mod local;
pub mod playout;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;

use crate::voice::{BackendKind, VoiceDescriptor};
use crate::Result;

pub use local::{LocalBackend, SynthesisHost, UtteranceCallback, UtteranceRequest};
pub use playout::{Playout, PlayoutEnd};
pub use remote::{RemoteBackend, RemoteConfig};

/// How a `speak` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// The utterance finished naturally
    Completed,
    /// The utterance was aborted by `cancel()`; carries no meaning for the
    /// sentence it belonged to
    Cancelled,
}

/// A speech backend turns one sentence into audible output.
///
/// At most one `speak` call is outstanding per backend instance; the player
/// state machine is the only caller and enforces this. `pause`, `resume`
/// and `cancel` act on that single in-flight utterance and are no-ops when
/// nothing is in flight.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Speak one sentence at the given rate with the given voice.
    ///
    /// Resolves with `Completed` on natural finish, `Cancelled` after
    /// `cancel()`, or an error describing the synthesis failure.
    async fn speak(&self, text: &str, rate: f32, voice: &VoiceDescriptor)
        -> Result<SpeakOutcome>;

    /// Suspend the in-flight utterance.
    fn pause(&self);

    /// Continue a suspended utterance.
    fn resume(&self);

    /// Abort the in-flight utterance immediately.
    fn cancel(&self);

    /// Apply a new rate to the in-flight utterance, if the backend has a
    /// live rate knob. Returns whether the rate was applied; when `false`
    /// the new rate takes effect on the next sentence.
    fn set_live_rate(&self, _rate: f32) -> bool {
        false
    }
}

/// The backends available to a player, by kind
///
/// Either side may be absent: the remote engine when its catalog could not
/// be fetched, the local one when the host provides no synthesis.
#[derive(Clone, Default)]
pub struct BackendSet {
    local: Option<Arc<dyn SpeechBackend>>,
    remote: Option<Arc<dyn SpeechBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local(mut self, backend: Arc<dyn SpeechBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn with_remote(mut self, backend: Arc<dyn SpeechBackend>) -> Self {
        self.remote = Some(backend);
        self
    }

    pub fn get(&self, kind: BackendKind) -> Option<&Arc<dyn SpeechBackend>> {
        match kind {
            BackendKind::Local => self.local.as_ref(),
            BackendKind::Remote => self.remote.as_ref(),
        }
    }

    pub fn local(&self) -> Option<&Arc<dyn SpeechBackend>> {
        self.local.as_ref()
    }

    /// The backend to dispatch with for the requested kind, falling through
    /// to the other side when the requested one is absent.
    pub fn resolve(&self, kind: BackendKind) -> Option<&Arc<dyn SpeechBackend>> {
        self.get(kind)
            .or_else(|| self.get(other_kind(kind)))
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.remote.is_none()
    }
}

fn other_kind(kind: BackendKind) -> BackendKind {
    match kind {
        BackendKind::Local => BackendKind::Remote,
        BackendKind::Remote => BackendKind::Local,
    }
}
