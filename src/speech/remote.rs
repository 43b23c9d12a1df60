//! Remote character-voice backend
//!
//! Sends one sentence at a time to the synthesis endpoint, receives a wav
//! payload and plays it through the playout worker. A companion read-only
//! endpoint lists speakers and their style variants; when it cannot be
//! reached the remote backend is simply unavailable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::speech::playout::{Playout, PlayoutEnd};
use crate::speech::{SpeakOutcome, SpeechBackend};
use crate::voice::{BackendKind, VoiceDescriptor};
use crate::{Result, RodokuError};

/// Configuration for the remote synthesis collaborator
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// Synthesis endpoint, POST `{text, speaker}` -> wav bytes
    pub synthesis_url: String,

    /// Speaker catalog endpoint, GET -> speakers with style variants
    pub speakers_url: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            synthesis_url: "http://localhost:3020/api/voicevox/synthesis".to_string(),
            speakers_url: "http://localhost:3020/api/voicevox/speakers".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    speaker: u32,
}

/// One speaker in the remote catalog
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSpeaker {
    pub name: String,
    pub speaker_uuid: String,
    pub styles: Vec<RemoteStyle>,
}

/// One style variant of a speaker
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStyle {
    pub id: u32,
    pub name: String,
}

/// Flatten the speaker catalog into one descriptor per style.
pub fn catalog_descriptors(speakers: &[RemoteSpeaker]) -> Vec<VoiceDescriptor> {
    speakers
        .iter()
        .flat_map(|speaker| {
            speaker.styles.iter().map(move |style| {
                VoiceDescriptor::new(
                    BackendKind::Remote,
                    style.id.to_string(),
                    format!("{} ({})", speaker.name, style.name),
                )
            })
        })
        .collect()
}

/// Speech backend for the remote synthesis service
pub struct RemoteBackend {
    http: reqwest::Client,
    config: RemoteConfig,
    playout: Playout,
    /// Bumped by `cancel()`; a payload that finishes fetching under an old
    /// epoch is discarded instead of played
    cancel_epoch: AtomicU64,
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RodokuError::ConfigError(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            config,
            playout: Playout::spawn(),
            cancel_epoch: AtomicU64::new(0),
        })
    }

    /// Fetch the speaker catalog and flatten it into voice descriptors.
    ///
    /// An unreachable catalog is reported as an error so the caller can
    /// treat the remote engine as unavailable.
    pub async fn fetch_voices(&self) -> Result<Vec<VoiceDescriptor>> {
        let speakers: Vec<RemoteSpeaker> = self
            .http
            .get(&self.config.speakers_url)
            .send()
            .await
            .map_err(|e| RodokuError::CatalogError(e.to_string()))?
            .error_for_status()
            .map_err(|e| RodokuError::CatalogError(e.to_string()))?
            .json()
            .await
            .map_err(|e| RodokuError::CatalogError(e.to_string()))?;

        let descriptors = catalog_descriptors(&speakers);
        info!(
            "remote catalog: {} speakers, {} styles",
            speakers.len(),
            descriptors.len()
        );
        Ok(descriptors)
    }

    async fn synthesize(&self, text: &str, speaker: u32) -> Result<Vec<u8>> {
        let response = self
            .http
            .post(&self.config.synthesis_url)
            .json(&SynthesisRequest { text, speaker })
            .send()
            .await
            .map_err(|e| RodokuError::SynthesisFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RodokuError::SynthesisFailed(format!(
                "synthesis returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RodokuError::SynthesisFailed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn speak(
        &self,
        text: &str,
        rate: f32,
        voice: &VoiceDescriptor,
    ) -> Result<SpeakOutcome> {
        let speaker: u32 = voice.id.parse().map_err(|_| {
            RodokuError::SynthesisFailed(format!("not a remote style id: {:?}", voice.id))
        })?;

        let epoch = self.cancel_epoch.load(Ordering::SeqCst);
        let wav = self.synthesize(text, speaker).await?;

        // Cancelled while the request was in flight: the payload is stale.
        if self.cancel_epoch.load(Ordering::SeqCst) != epoch {
            debug!("discarding audio fetched after cancel");
            return Ok(SpeakOutcome::Cancelled);
        }

        match self.playout.play(wav, rate).await {
            Ok(PlayoutEnd::Finished) => Ok(SpeakOutcome::Completed),
            Ok(PlayoutEnd::Stopped) => Ok(SpeakOutcome::Cancelled),
            Ok(PlayoutEnd::Failed(reason)) => {
                warn!("playout failed: {}", reason);
                Err(RodokuError::SynthesisFailed(reason))
            }
            Err(_) => Err(RodokuError::PlayoutError("playout worker gone".to_string())),
        }
    }

    fn pause(&self) {
        self.playout.pause();
    }

    fn resume(&self) {
        self.playout.resume();
    }

    fn cancel(&self) {
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
        self.playout.stop();
    }

    fn set_live_rate(&self, rate: f32) -> bool {
        self.playout.set_speed(rate);
        true
    }
}
