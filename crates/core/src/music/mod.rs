pub mod catalog;

pub use catalog::{content_id, MusicCatalog, MusicTrack, TrackInfo, TrackUpdate};
