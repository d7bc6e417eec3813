//! Line-oriented script parser.
//!
//! Turns LLM-authored script text into an ordered [`Segment`] stream:
//! speaker turns (`Anna: ...`) and `[MUSIK: ...]` directives. The parser
//! never fails; anything it cannot classify is treated as dialogue text or
//! dropped with a warning.

use regex::Regex;

use crate::config::PodcastConfig;
use crate::types::{DialogueSegment, MusicSegment, Segment, TrackRef};

lazy_static::lazy_static! {
    /// Any bracketed music directive. The ref is validated separately so a
    /// malformed one falls through as text.
    static ref MARKER: Regex = Regex::new(r"\[MUSIK:\s*([^\[\]]*?)\s*\]").unwrap();

    static ref TRACK_ID: Regex = Regex::new(r"^[0-9a-f]{8}$").unwrap();

    /// `artist - title[, N sekunder]` with spaces around the dash.
    static ref LEGACY_SPACED: Regex = Regex::new(
        r"^(?P<artist>.+?)\s+-\s+(?P<title>.+?)(?:,\s*(?P<secs>\d+(?:\.\d+)?)\s*sekund(?:e|er)?)?$"
    ).unwrap();

    /// Tighter fallback: `artist-title`, artist may not contain a dash.
    static ref LEGACY_TIGHT: Regex = Regex::new(
        r"^(?P<artist>[^-]+?)\s*-\s*(?P<title>[^,]+?)(?:,\s*(?P<secs>\d+(?:\.\d+)?)\s*sekund(?:e|er)?)?$"
    ).unwrap();

    /// `Name: text` at column 0.
    static ref SPEAKER_LINE: Regex = Regex::new(
        r"^(?P<name>\p{L}[\p{L}\p{N} .'_-]{0,39}):(?:\s+(?P<text>.*))?$"
    ).unwrap();
}

/// Parse the inside of a `[MUSIK: ...]` marker.
///
/// ID form takes precedence over the legacy `artist - title` form.
pub fn parse_track_ref(inner: &str) -> Option<(TrackRef, Option<f64>)> {
    let inner = inner.trim();
    if TRACK_ID.is_match(inner) {
        return Some((TrackRef::Id(inner.to_string()), None));
    }

    let caps = LEGACY_SPACED
        .captures(inner)
        .or_else(|| LEGACY_TIGHT.captures(inner))?;
    let artist = caps.name("artist")?.as_str().trim();
    let title = caps.name("title")?.as_str().trim();
    if artist.is_empty() || title.is_empty() {
        return None;
    }
    let duration = caps
        .name("secs")
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|d| *d > 0.0);

    Some((
        TrackRef::Legacy {
            artist: artist.to_string(),
            title: title.to_string(),
        },
        duration,
    ))
}

/// Remove every valid music marker from text, leaving dialogue only.
pub fn strip_markers(text: &str) -> String {
    MARKER
        .replace_all(text, |caps: &regex::Captures| {
            let inner = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            if parse_track_ref(inner).is_some() {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// A piece of one script line after marker extraction.
enum Piece<'a> {
    Text(&'a str),
    Marker(MusicSegment),
}

fn split_markers(line: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for caps in MARKER.captures_iter(line) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some((track_ref, duration)) = parse_track_ref(inner.as_str()) else {
            continue;
        };
        pieces.push(Piece::Text(&line[last..whole.start()]));
        pieces.push(Piece::Marker(MusicSegment {
            raw_marker: whole.as_str().to_string(),
            track_ref,
            duration,
        }));
        last = whole.end();
    }
    pieces.push(Piece::Text(&line[last..]));
    pieces
}

/// Accumulates one speaker turn until it is closed.
struct OpenTurn {
    speaker: String,
    words: Vec<String>,
}

impl OpenTurn {
    fn new(speaker: &str) -> Self {
        Self {
            speaker: speaker.to_string(),
            words: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.words
            .extend(text.split_whitespace().map(|w| w.to_string()));
    }

    fn finish(self) -> Option<Segment> {
        if self.words.is_empty() {
            return None;
        }
        Some(Segment::Dialogue(DialogueSegment {
            speaker: self.speaker,
            text: self.words.join(" "),
        }))
    }
}

/// Script parser bound to the configured host names.
#[derive(Debug, Clone, Default)]
pub struct ScriptParser {
    hosts: Vec<String>,
}

impl ScriptParser {
    /// With no hosts, any `Name:` prefix counts as a speaker.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &PodcastConfig) -> Self {
        Self::new(config.host_names())
    }

    /// Canonical speaker name and remaining text if `line` is a speaker line.
    fn speaker_line<'a>(&self, line: &'a str) -> Option<(String, &'a str)> {
        let caps = SPEAKER_LINE.captures(line)?;
        let name = caps.name("name")?.as_str().trim_end();
        let text = caps.name("text").map(|m| m.as_str()).unwrap_or("");

        if self.hosts.is_empty() {
            return Some((name.to_string(), text));
        }
        let wanted = name.to_lowercase();
        self.hosts
            .iter()
            .find(|h| h.to_lowercase() == wanted)
            .map(|h| (h.clone(), text))
    }

    /// True when at least two lines are speaker lines.
    pub fn is_conversational(&self, script: &str) -> bool {
        script
            .lines()
            .filter(|l| self.speaker_line(l.trim_end()).is_some())
            .take(2)
            .count()
            >= 2
    }

    pub fn parse(&self, script: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut open: Option<OpenTurn> = None;

        for raw in script.lines() {
            let line = raw.trim_end();
            if line.trim().is_empty() {
                continue;
            }

            // A speaker line always closes the previous turn.
            let body = match self.speaker_line(line) {
                Some((speaker, rest)) => {
                    segments.extend(open.take().and_then(OpenTurn::finish));
                    open = Some(OpenTurn::new(&speaker));
                    rest
                }
                None => line,
            };

            // Speaker to resume with if text follows a marker on this line.
            let mut resume: Option<String> = None;
            let mut after_marker = false;
            for piece in split_markers(body) {
                match piece {
                    Piece::Text(text) => {
                        if text.trim().is_empty() {
                            continue;
                        }
                        let mut text = text;
                        // `[MUSIK: ..] Erik: ...` hands the turn to Erik.
                        if after_marker {
                            if let Some((speaker, rest)) = self.speaker_line(text.trim()) {
                                segments.extend(open.take().and_then(OpenTurn::finish));
                                resume = None;
                                open = Some(OpenTurn::new(&speaker));
                                text = rest;
                            }
                        }
                        if open.is_none() {
                            open = resume.take().map(|speaker| OpenTurn::new(&speaker));
                        }
                        match open.as_mut() {
                            Some(turn) => turn.push(text),
                            None => log::warn!(
                                "Dropping script text outside any speaker turn: {}",
                                text.trim()
                            ),
                        }
                    }
                    Piece::Marker(music) => {
                        if let Some(turn) = open.take() {
                            resume = Some(turn.speaker.clone());
                            segments.extend(turn.finish());
                        }
                        segments.push(Segment::Music(music));
                        after_marker = true;
                    }
                }
            }
        }

        segments.extend(open.take().and_then(OpenTurn::finish));
        segments
    }
}
