//! RSS 2.0 podcast feed with the iTunes namespace.

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::PodcastSettings;
use crate::dates::CivilTime;
use crate::episode::{EpisodeMetadata, EpisodeStore};

/// Episodes beyond this many are left out of the feed.
pub const MAX_FEED_EPISODES: usize = 50;

/// Summary written next to the feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedSummary {
    pub title: String,
    pub description: String,
    pub episode_count: usize,
    pub last_updated: String,
    pub feed_url: String,
}

/// Paths of the files written by [`write_feed`].
#[derive(Debug, Clone)]
pub struct FeedFiles {
    pub xml: PathBuf,
    pub json: PathBuf,
}

pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn mime_for(file: &str) -> &'static str {
    match Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        _ => "audio/mpeg",
    }
}

fn base_url(settings: &PodcastSettings) -> &str {
    settings.public_url.trim_end_matches('/')
}

/// Render the feed. `episodes` must already be newest first.
pub fn render_rss(settings: &PodcastSettings, episodes: &[EpisodeMetadata], now: u64) -> Result<String> {
    let mut xml = String::new();
    writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        xml,
        r#"<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd" xmlns:atom="http://www.w3.org/2005/Atom">"#
    )?;
    writeln!(xml, "<channel>")?;
    write_channel_header(&mut xml, settings, now)?;
    for episode in episodes.iter().take(MAX_FEED_EPISODES) {
        write_item(&mut xml, base_url(settings), episode)?;
    }
    writeln!(xml, "</channel>")?;
    writeln!(xml, "</rss>")?;
    Ok(xml)
}

fn write_channel_header(xml: &mut String, settings: &PodcastSettings, now: u64) -> fmt::Result {
    let base = xml_escape(base_url(settings));
    let cover_name = Path::new(&settings.cover_image)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cover.jpg".to_string());
    let cover = xml_escape(&format!("{}/{}", base_url(settings), cover_name));
    let title = xml_escape(&settings.title);
    let description = xml_escape(&settings.description);
    let author = xml_escape(&settings.author);

    writeln!(xml, "  <title>{}</title>", title)?;
    writeln!(xml, "  <link>{}</link>", base)?;
    writeln!(xml, "  <description>{}</description>", description)?;
    writeln!(xml, "  <language>{}</language>", xml_escape(&settings.language))?;
    writeln!(
        xml,
        r#"  <atom:link href="{}/feed.xml" rel="self" type="application/rss+xml"/>"#,
        base
    )?;
    writeln!(xml, "  <lastBuildDate>{}</lastBuildDate>", CivilTime::from_unix(now).rfc2822())?;
    writeln!(xml, "  <itunes:author>{}</itunes:author>", author)?;
    writeln!(xml, "  <itunes:summary>{}</itunes:summary>", description)?;
    writeln!(
        xml,
        "  <itunes:owner><itunes:name>{}</itunes:name><itunes:email>{}</itunes:email></itunes:owner>",
        author,
        xml_escape(&settings.email)
    )?;
    writeln!(xml, r#"  <itunes:category text="{}"/>"#, xml_escape(&settings.category))?;
    writeln!(
        xml,
        "  <itunes:explicit>{}</itunes:explicit>",
        if settings.explicit { "yes" } else { "no" }
    )?;
    writeln!(xml, r#"  <itunes:image href="{}"/>"#, cover)?;
    writeln!(
        xml,
        "  <image><url>{}</url><title>{}</title><link>{}</link></image>",
        cover, title, base
    )
}

fn write_item(xml: &mut String, base: &str, episode: &EpisodeMetadata) -> fmt::Result {
    let audio_url = format!("{}/episodes/{}", base, episode.audio_file);
    writeln!(xml, "  <item>")?;
    writeln!(xml, "    <title>{}</title>", xml_escape(&episode.title))?;
    writeln!(xml, "    <description>{}</description>", xml_escape(&episode.description))?;
    writeln!(xml, r#"    <guid isPermaLink="false">{}</guid>"#, xml_escape(&episode.guid))?;
    writeln!(xml, "    <pubDate>{}</pubDate>", xml_escape(&episode.pub_date))?;
    writeln!(
        xml,
        r#"    <enclosure url="{}" length="{}" type="{}"/>"#,
        xml_escape(&audio_url),
        episode.file_size_bytes,
        mime_for(&episode.audio_file)
    )?;
    writeln!(
        xml,
        "    <link>{}/episode/{}</link>",
        xml_escape(base),
        episode.episode_number
    )?;
    writeln!(xml, "    <itunes:duration>{}</itunes:duration>", episode.duration)?;
    writeln!(xml, "    <itunes:episode>{}</itunes:episode>", episode.episode_number)?;
    writeln!(xml, "  </item>")
}

/// Regenerate `feed.xml` and `feed.json` in `public_dir` from every episode
/// in the store.
pub fn write_feed(
    settings: &PodcastSettings,
    store: &EpisodeStore,
    public_dir: &Path,
    now: u64,
) -> Result<FeedFiles> {
    let episodes = store.load_all()?;
    std::fs::create_dir_all(public_dir)
        .with_context(|| format!("Failed to create {}", public_dir.display()))?;

    let xml_path = public_dir.join("feed.xml");
    std::fs::write(&xml_path, render_rss(settings, &episodes, now)?)
        .with_context(|| format!("Failed to write {}", xml_path.display()))?;

    let summary = FeedSummary {
        title: settings.title.clone(),
        description: settings.description.clone(),
        episode_count: episodes.len().min(MAX_FEED_EPISODES),
        last_updated: CivilTime::from_unix(now).iso8601(),
        feed_url: format!("{}/feed.xml", base_url(settings)),
    };
    let json_path = public_dir.join("feed.json");
    std::fs::write(&json_path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("Failed to write {}", json_path.display()))?;

    log::info!(
        "RSS feed generated: {} ({} episodes)",
        xml_path.display(),
        summary.episode_count
    );
    Ok(FeedFiles {
        xml: xml_path,
        json: json_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: u64 = 1_792_218_615;

    fn settings() -> PodcastSettings {
        PodcastSettings {
            title: "Morgonpodd & Co".into(),
            public_url: "https://pod.example.se/".into(),
            cover_image: "public/cover.jpg".into(),
            ..PodcastSettings::default()
        }
    }

    fn episode(n: u32, published_unix: u64) -> EpisodeMetadata {
        EpisodeMetadata {
            title: format!("Morgonpodd #{} - 17 oktober 2026", n),
            description: "Avsnitt".into(),
            episode_number: n,
            duration: "00:10:05".into(),
            duration_seconds: 605,
            file_size_bytes: 1234,
            pub_date: CivilTime::from_unix(published_unix).rfc2822(),
            published_unix,
            guid: format!("morgonpodd-20261017-{}", n),
            audio_file: format!("episode_{}.mp3", n),
            script_file: None,
            generated_at: String::new(),
        }
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape(r#"a<b>&"c"'"#), "a&lt;b&gt;&amp;&quot;c&quot;&apos;");
    }

    #[test]
    fn test_channel_and_item_fields() {
        let xml = render_rss(&settings(), &[episode(3, SAMPLE)], SAMPLE).unwrap();
        assert!(xml.contains("<title>Morgonpodd &amp; Co</title>"));
        assert!(xml.contains(r#"<itunes:image href="https://pod.example.se/cover.jpg"/>"#));
        assert!(xml.contains(
            r#"<enclosure url="https://pod.example.se/episodes/episode_3.mp3" length="1234" type="audio/mpeg"/>"#
        ));
        assert!(xml.contains("<itunes:duration>00:10:05</itunes:duration>"));
        assert!(xml.contains("<pubDate>Sat, 17 Oct 2026 06:30:15 +0000</pubDate>"));
        assert!(xml.contains("<itunes:explicit>no</itunes:explicit>"));
    }

    #[test]
    fn test_feed_caps_episode_count() {
        let episodes: Vec<EpisodeMetadata> = (1..=60).rev().map(|n| episode(n, n as u64)).collect();
        let xml = render_rss(&settings(), &episodes, SAMPLE).unwrap();
        assert_eq!(xml.matches("<item>").count(), MAX_FEED_EPISODES);
        assert!(xml.contains("episode_60.mp3"));
        assert!(!xml.contains("episode_10.mp3"));
    }

    #[test]
    fn test_write_feed_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = EpisodeStore::new(&dir.path().join("episodes"));
        store.save(&episode(1, 100)).unwrap();
        store.save(&episode(2, 200)).unwrap();

        let files = write_feed(&settings(), &store, &dir.path().join("public"), SAMPLE).unwrap();
        let xml = std::fs::read_to_string(&files.xml).unwrap();
        let first = xml.find("episode_2.mp3").unwrap();
        let second = xml.find("episode_1.mp3").unwrap();
        assert!(first < second);

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&files.json).unwrap()).unwrap();
        assert_eq!(summary["episode_count"], 2);
        assert_eq!(summary["feed_url"], "https://pod.example.se/feed.xml");
    }

    #[test]
    fn test_wav_enclosure_type() {
        let mut ep = episode(1, SAMPLE);
        ep.audio_file = "episode_1.wav".into();
        let xml = render_rss(&settings(), &[ep], SAMPLE).unwrap();
        assert!(xml.contains(r#"type="audio/wav""#));
    }
}
