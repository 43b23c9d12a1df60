//! Configuration for the complete reader
//!
//! Centralizes the sub-configurations owned by each module.

use crate::extract::ExtractorConfig;
use crate::playback::PlayerConfig;
use crate::speech::RemoteConfig;
use crate::Result;

/// Configuration for the assembled reader
#[derive(Clone, Debug, Default)]
pub struct ReaderConfig {
    /// Content extraction collaborator
    pub extractor: ExtractorConfig,

    /// Remote synthesis collaborator
    pub remote: RemoteConfig,

    /// Playback controller
    pub player: PlayerConfig,

    /// Skip the remote speaker catalog entirely
    pub disable_remote: bool,
}

impl ReaderConfig {
    /// Point both HTTP collaborators at a different service root.
    pub fn with_service_root(mut self, root: &str) -> Self {
        let root = root.trim_end_matches('/');
        self.extractor.endpoint = format!("{}/api/extract", root);
        self.remote.synthesis_url = format!("{}/api/voicevox/synthesis", root);
        self.remote.speakers_url = format!("{}/api/voicevox/speakers", root);
        self
    }

    pub fn with_player(mut self, player: PlayerConfig) -> Self {
        self.player = player;
        self
    }

    /// Run on the host synthesis capability only.
    pub fn without_remote(mut self) -> Self {
        self.disable_remote = true;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.player.validate()
    }
}
