//! Local speech backend over the host's built-in synthesis capability
//!
//! The host capability is a collaborator the embedding shell provides: a
//! callback-style utterance primitive plus transport-level pause, resume
//! and cancel. This module bridges that primitive to the async backend
//! contract.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::speech::{SpeakOutcome, SpeechBackend};
use crate::voice::{BackendKind, HostVoice, VoiceDescriptor};
use crate::{Result, RodokuError};

/// Completion callback for one utterance.
///
/// Invoked with `Ok(())` when the utterance finishes naturally and
/// `Err(reason)` on a synthesis error. A cancelled utterance's callback is
/// dropped unspoken.
pub type UtteranceCallback = Box<dyn FnOnce(std::result::Result<(), String>) + Send>;

/// One utterance handed to the host capability
pub struct UtteranceRequest {
    pub text: String,
    pub rate: f32,
    /// Host voice name; `None` selects the host's default voice
    pub voice: Option<String>,
    pub on_done: UtteranceCallback,
}

/// The host-provided synthesis capability.
///
/// Implementations dispatch at most one utterance at a time; `pause`,
/// `resume` and `cancel` act on that utterance. The callback may be invoked
/// from any thread.
pub trait SynthesisHost: Send + Sync {
    /// Enumerate the voices the host offers.
    fn voices(&self) -> Vec<HostVoice>;

    /// Begin speaking one utterance. Errors here are dispatch failures;
    /// synthesis failures arrive through the request's callback.
    fn speak(&self, request: UtteranceRequest) -> Result<()>;

    fn pause(&self);
    fn resume(&self);
    fn cancel(&self);
}

/// Speech backend delegating to the host capability
pub struct LocalBackend {
    host: Arc<dyn SynthesisHost>,
}

impl LocalBackend {
    pub fn new(host: Arc<dyn SynthesisHost>) -> Self {
        Self { host }
    }

    /// The host's voice list, for catalog assembly.
    pub fn voices(&self) -> Vec<HostVoice> {
        self.host.voices()
    }
}

#[async_trait]
impl SpeechBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn speak(
        &self,
        text: &str,
        rate: f32,
        voice: &VoiceDescriptor,
    ) -> Result<SpeakOutcome> {
        let (tx, rx) = oneshot::channel();
        let on_done: UtteranceCallback = Box::new(move |outcome| {
            let _ = tx.send(outcome);
        });

        // A descriptor from the remote catalog (the fallback path) or an
        // empty id means the host default voice.
        let voice_name = match voice.kind {
            BackendKind::Local if !voice.id.is_empty() => Some(voice.id.clone()),
            _ => None,
        };

        self.host.speak(UtteranceRequest {
            text: text.to_owned(),
            rate,
            voice: voice_name,
            on_done,
        })?;

        match rx.await {
            Ok(Ok(())) => Ok(SpeakOutcome::Completed),
            Ok(Err(reason)) => Err(RodokuError::SynthesisFailed(reason)),
            // Callback dropped unspoken: the utterance was cancelled
            Err(_) => {
                debug!("host utterance cancelled");
                Ok(SpeakOutcome::Cancelled)
            }
        }
    }

    fn pause(&self) {
        self.host.pause();
    }

    fn resume(&self) {
        self.host.resume();
    }

    fn cancel(&self) {
        self.host.cancel();
    }
}
