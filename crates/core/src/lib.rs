//! Morgonpodd core: turns a two-host news script into one finished episode.
//!
//! The heart of the crate is the script-to-audio path:
//! [`script::ScriptParser`] → [`script::chunker`] → [`synth::DialogueSynthesizer`]
//! → [`audio::assembler::AudioAssembler`]. Everything else (scraping, script
//! writing, feed, upload) is thin plumbing wired together by [`pipeline`].

pub mod audio;
pub mod config;
pub mod dates;
pub mod episode;
pub mod feed;
pub mod intro;
pub mod music;
pub mod pipeline;
pub mod scraper;
pub mod script;
pub mod summarizer;
pub mod synth;
pub mod types;
pub mod upload;

pub use config::PodcastConfig;
pub use types::{DialogueSegment, DialogueUnit, MusicCue, MusicSegment, Segment, TrackRef};
