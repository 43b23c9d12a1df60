//! Voice descriptors, catalog assembly and the default-voice policy
//!
//! Voices come from two catalogs: the remote speaker catalog (one entry per
//! speaker style) and the host synthesis capability's voice list. The
//! catalog merges them into a single ordered list of descriptors the shell
//! can present, with remote character voices first.

use serde::{Deserialize, Serialize};

/// Which speech backend a voice belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    Local,
    Remote,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Remote => write!(f, "remote"),
        }
    }
}

/// An immutable voice choice: backend tag plus an opaque identifier
///
/// The id is backend-specific (a style id for the remote engine, a voice
/// name for the host engine) and is never interpreted by the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceDescriptor {
    pub kind: BackendKind,
    pub id: String,
    pub display_name: String,
}

impl VoiceDescriptor {
    pub fn new(kind: BackendKind, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// The host engine's default voice, used when nothing better is known
    /// and as the target of the remote-to-local fallback.
    pub fn host_default() -> Self {
        Self::new(BackendKind::Local, "", "System default")
    }
}

/// A voice advertised by the host synthesis capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVoice {
    pub name: String,
    pub language: String,
    pub display_name: String,
}

impl HostVoice {
    pub fn new(
        name: impl Into<String>,
        language: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            display_name: display_name.into(),
        }
    }
}

fn is_japanese(language: &str) -> bool {
    language.contains("ja") || language.contains("JP")
}

fn female_hint(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("female") || lower.contains("woman") || lower.contains("girl")
}

/// Pick the preferred host voice: a Japanese female voice first, then any
/// Japanese voice, then the first voice offered.
pub fn preferred_host_voice(voices: &[HostVoice]) -> Option<&HostVoice> {
    voices
        .iter()
        .find(|v| is_japanese(&v.language) && female_hint(&v.name))
        .or_else(|| voices.iter().find(|v| is_japanese(&v.language)))
        .or_else(|| voices.first())
}

/// The merged, ordered voice list offered to the shell
#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    entries: Vec<VoiceDescriptor>,
}

impl VoiceCatalog {
    /// Merge the remote descriptors and the host voice list.
    ///
    /// Remote character voices come first. Of the host voices only the
    /// Japanese ones are listed, female-sounding names sorted ahead,
    /// matching what a reader of Japanese articles actually wants offered.
    pub fn assemble(remote: Vec<VoiceDescriptor>, host_voices: &[HostVoice]) -> Self {
        let mut entries = remote;

        let mut local: Vec<&HostVoice> = host_voices
            .iter()
            .filter(|v| is_japanese(&v.language))
            .collect();
        local.sort_by(|a, b| {
            female_hint(&b.name)
                .cmp(&female_hint(&a.name))
                .then_with(|| a.name.cmp(&b.name))
        });

        entries.extend(local.into_iter().map(|v| {
            VoiceDescriptor::new(BackendKind::Local, v.name.clone(), v.display_name.clone())
        }));

        Self { entries }
    }

    pub fn entries(&self) -> &[VoiceDescriptor] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The initial selection: the first remote style when the remote engine
    /// is available, otherwise the first listed host voice.
    pub fn default_choice(&self) -> Option<&VoiceDescriptor> {
        self.entries.first()
    }

    /// Look up a descriptor by backend and id.
    pub fn find(&self, kind: BackendKind, id: &str) -> Option<&VoiceDescriptor> {
        self.entries.iter().find(|v| v.kind == kind && v.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_voices() -> Vec<HostVoice> {
        vec![
            HostVoice::new("Alex", "en-US", "Alex"),
            HostVoice::new("Kyoko Female", "ja-JP", "Kyoko"),
            HostVoice::new("Otoya", "ja-JP", "Otoya"),
        ]
    }

    #[test]
    fn test_preferred_voice_japanese_female_first() {
        let voices = host_voices();
        let preferred = preferred_host_voice(&voices).unwrap();
        assert_eq!(preferred.name, "Kyoko Female");
    }

    #[test]
    fn test_preferred_voice_falls_back_to_japanese() {
        let voices = vec![
            HostVoice::new("Alex", "en-US", "Alex"),
            HostVoice::new("Otoya", "ja-JP", "Otoya"),
        ];
        assert_eq!(preferred_host_voice(&voices).unwrap().name, "Otoya");
    }

    #[test]
    fn test_preferred_voice_falls_back_to_first() {
        let voices = vec![HostVoice::new("Alex", "en-US", "Alex")];
        assert_eq!(preferred_host_voice(&voices).unwrap().name, "Alex");
        assert!(preferred_host_voice(&[]).is_none());
    }

    #[test]
    fn test_catalog_remote_first() {
        let remote = vec![
            VoiceDescriptor::new(BackendKind::Remote, "1", "ずんだもん (ノーマル)"),
            VoiceDescriptor::new(BackendKind::Remote, "3", "四国めたん (あまあま)"),
        ];
        let catalog = VoiceCatalog::assemble(remote, &host_voices());

        assert_eq!(catalog.entries().len(), 4);
        assert_eq!(catalog.entries()[0].kind, BackendKind::Remote);
        assert_eq!(catalog.default_choice().unwrap().id, "1");
    }

    #[test]
    fn test_catalog_filters_and_sorts_host_voices() {
        let catalog = VoiceCatalog::assemble(Vec::new(), &host_voices());

        // Only Japanese voices are listed, female-sounding names first
        let names: Vec<&str> = catalog.entries().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(names, vec!["Kyoko Female", "Otoya"]);
        assert_eq!(catalog.default_choice().unwrap().kind, BackendKind::Local);
    }

    #[test]
    fn test_catalog_find() {
        let remote = vec![VoiceDescriptor::new(BackendKind::Remote, "8", "春日部つむぎ")];
        let catalog = VoiceCatalog::assemble(remote, &[]);

        assert!(catalog.find(BackendKind::Remote, "8").is_some());
        assert!(catalog.find(BackendKind::Local, "8").is_none());
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = VoiceCatalog::assemble(Vec::new(), &[]);
        assert!(catalog.is_empty());
        assert!(catalog.default_choice().is_none());
    }
}
