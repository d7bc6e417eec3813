use std::fmt;

/// Reference to a catalogued track as written inside a `[MUSIK: ...]` marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackRef {
    /// 8-character lowercase hex content-hash ID.
    Id(String),
    /// Legacy `artist - title` pair.
    Legacy { artist: String, title: String },
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackRef::Id(id) => write!(f, "{}", id),
            TrackRef::Legacy { artist, title } => write!(f, "{} - {}", artist, title),
        }
    }
}

/// One speaker turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueSegment {
    /// Host name, canonical spelling from the configuration.
    pub speaker: String,
    /// Whitespace-normalized, never empty.
    pub text: String,
}

/// A music directive lifted out of the script.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicSegment {
    /// The marker exactly as it appeared, brackets included.
    pub raw_marker: String,
    pub track_ref: TrackRef,
    /// Optional `N sekunder` hint from the legacy form.
    pub duration: Option<f64>,
}

/// One parsed unit of the script, in script order.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Dialogue(DialogueSegment),
    Music(MusicSegment),
}

impl Segment {
    pub fn dialogue(speaker: &str, text: &str) -> Self {
        Segment::Dialogue(DialogueSegment {
            speaker: speaker.to_string(),
            text: text.to_string(),
        })
    }

    pub fn as_dialogue(&self) -> Option<&DialogueSegment> {
        match self {
            Segment::Dialogue(d) => Some(d),
            Segment::Music(_) => None,
        }
    }

    pub fn as_music(&self) -> Option<&MusicSegment> {
        match self {
            Segment::Music(m) => Some(m),
            Segment::Dialogue(_) => None,
        }
    }
}

/// A dialogue segment ready for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueUnit {
    /// Index in the dialogue-only stream (0, 1, 2, ...).
    pub position: usize,
    pub speaker: String,
    pub voice_id: String,
    pub text: String,
}

impl DialogueUnit {
    /// Length counted against the chunk budget.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

impl fmt::Display for DialogueUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.speaker, self.text)
    }
}

/// A music segment placed relative to the dialogue stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicCue {
    /// Order among all music markers in the script.
    pub ordinal: usize,
    /// Dialogue-stream position of the first unit after the marker.
    pub position: usize,
    pub segment: MusicSegment,
}
