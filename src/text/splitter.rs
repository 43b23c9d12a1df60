//! Sentence segmentation for article text
//!
//! Playback is driven one sentence at a time, so extracted article text is
//! cut into an ordered list before it is handed to the player.

/// Terminal characters that end a sentence: Japanese terminal punctuation
/// plus line breaks.
const TERMINATORS: [char; 4] = ['。', '！', '？', '\n'];

/// Split article text into an ordered list of sentences.
///
/// Splits on `。`, `！`, `？` and newlines, trims each piece and drops
/// empty pieces. Text without any terminator yields a single trimmed
/// sentence; blank input yields an empty list.
pub fn split_sentences(text: &str) -> Vec<String> {
    text.split(TERMINATORS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
