//! Assembled read-aloud engine
//!
//! Wires the external collaborators to the playback controller: extraction
//! feeds the sentence splitter, the speaker catalogs feed voice selection,
//! and the player drives the backends. This is the surface a thin shell
//! embeds; it renders nothing itself.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ReaderConfig;
use crate::extract::{Article, ExtractorClient};
use crate::playback::{Player, PlayerHandle, PlaybackObserver};
use crate::speech::{BackendSet, LocalBackend, RemoteBackend, SynthesisHost};
use crate::text::split_sentences;
use crate::voice::{VoiceCatalog, VoiceDescriptor};
use crate::Result;

/// The assembled engine: extraction client, voice catalog and a running
/// playback controller
pub struct Reader {
    extractor: ExtractorClient,
    catalog: VoiceCatalog,
    player: PlayerHandle,
}

impl Reader {
    /// Assemble the backends, fetch the voice catalogs and start the
    /// playback controller.
    ///
    /// `host` is the embedding shell's synthesis capability, if it has
    /// one. The remote backend is included only when its speaker catalog
    /// can be fetched; an unreachable catalog just means character voices
    /// are not offered. With neither backend this fails with
    /// [`crate::RodokuError::NoBackendAvailable`].
    pub async fn start(
        config: ReaderConfig,
        host: Option<Arc<dyn SynthesisHost>>,
        observer: Arc<dyn PlaybackObserver>,
    ) -> Result<Self> {
        config.validate()?;
        let extractor = ExtractorClient::new(config.extractor.clone())?;

        let mut backends = BackendSet::new();
        let mut host_voices = Vec::new();

        if let Some(host) = host {
            let local = LocalBackend::new(host);
            host_voices = local.voices();
            backends = backends.with_local(Arc::new(local));
        }

        let mut remote_descriptors = Vec::new();
        if !config.disable_remote {
            let remote = RemoteBackend::new(config.remote.clone())?;
            match remote.fetch_voices().await {
                Ok(descriptors) => {
                    remote_descriptors = descriptors;
                    backends = backends.with_remote(Arc::new(remote));
                }
                Err(e) => {
                    // Not an error to the user: playback continues on the
                    // host voices alone.
                    info!("remote synthesis unavailable: {}", e);
                }
            }
        }

        let catalog = VoiceCatalog::assemble(remote_descriptors, &host_voices);
        let initial_voice = catalog
            .default_choice()
            .cloned()
            .unwrap_or_else(VoiceDescriptor::host_default);
        info!("initial voice: {}", initial_voice.display_name);

        let (player, handle) =
            Player::new(backends, initial_voice, observer, config.player.clone())?;
        player.spawn();

        Ok(Self {
            extractor,
            catalog,
            player: handle,
        })
    }

    /// Extract the article behind a URL, split it and load it into the
    /// player, ready for `play()`.
    pub async fn read_url(&self, url: &str) -> Result<Article> {
        let article = self.extractor.extract(url).await?;
        let sentences = split_sentences(&article.content);
        if sentences.is_empty() {
            warn!("article \"{}\" has no readable sentences", article.title);
        }
        self.player.load(sentences).await?;
        Ok(article)
    }

    /// The merged voice catalog for the shell's selector.
    pub fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    /// Handle to the playback controller.
    pub fn player(&self) -> &PlayerHandle {
        &self.player
    }
}
