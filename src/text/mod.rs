//! Text processing for read-aloud playback

pub mod splitter;

pub use splitter::split_sentences;
