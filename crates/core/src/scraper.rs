//! News source scraping.
//!
//! Every configured source is fetched over HTTP, a bounded number at a
//! time. RSS feeds yield `<item>` entries, HTML pages yield `<h1>`..`<h3>`
//! headlines. A failing source becomes an empty result with an error note.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{PodcastConfig, SourceConfig};

/// Headlines this short are navigation noise.
const MIN_TITLE_CHARS: usize = 10;

const WEATHER_UNAVAILABLE: &str = "Väderinformation ej tillgänglig";

lazy_static! {
    static ref RSS_ITEM: Regex = Regex::new(r"(?is)<(item|entry)\b[^>]*>(.*?)</(?:item|entry)>").unwrap();
    static ref RSS_TITLE: Regex = Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").unwrap();
    static ref RSS_LINK: Regex =
        Regex::new(r#"(?is)<link\b[^>]*?(?:href="([^"]*)"[^>]*/?>|>(.*?)</link>)"#).unwrap();
    static ref RSS_DESCRIPTION: Regex =
        Regex::new(r"(?is)<(?:description|summary)\b[^>]*>(.*?)</(?:description|summary)>").unwrap();
    static ref HEADLINE: Regex = Regex::new(r"(?is)<h([1-3])\b[^>]*>(.*?)</h[1-3]>").unwrap();
    static ref CDATA: Regex = Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").unwrap();
    static ref TAG: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref SPACE: Regex = Regex::new(r"\s+").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Everything gathered from one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceResult {
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: u32,
    pub items: Vec<ScrapedItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceResult {
    fn failed(source: &SourceConfig, error: String) -> Self {
        Self {
            source: source.name.clone(),
            kind: source.kind.clone(),
            priority: source.priority,
            items: Vec::new(),
            error: Some(error),
        }
    }
}

/// Source of the day's raw material. Never fails as a whole.
pub trait Scraper: Send + Sync {
    fn scrape_all(&self) -> Vec<SourceResult>;
}

pub struct HttpScraper {
    http: reqwest::blocking::Client,
    sources: Vec<SourceConfig>,
    max_concurrent: usize,
}

impl HttpScraper {
    pub fn new(sources: Vec<SourceConfig>, timeout_secs: u64, max_concurrent: usize) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(concat!("morgonpodd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            sources,
            max_concurrent: max_concurrent.max(1),
        })
    }

    pub fn from_config(config: &PodcastConfig) -> Result<Self> {
        Self::new(
            config.sources.clone(),
            config.providers.fetch_timeout_secs,
            config.providers.max_concurrent_fetches,
        )
    }

    fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("Failed to fetch {}", url))?;
        if !response.status().is_success() {
            bail!("HTTP {} from {}", response.status(), url);
        }
        response
            .text()
            .with_context(|| format!("Failed to read body from {}", url))
    }

    fn scrape_source(&self, source: &SourceConfig) -> SourceResult {
        log::info!("Scraping {}...", source.name);
        match self.fetch(&source.url) {
            Ok(body) => {
                let items = extract_items(&body, source);
                log::debug!("{}: {} items", source.name, items.len());
                SourceResult {
                    source: source.name.clone(),
                    kind: source.kind.clone(),
                    priority: source.priority,
                    items,
                    error: None,
                }
            }
            Err(e) => {
                log::warn!("Skipping {}: {:#}", source.name, e);
                SourceResult::failed(source, format!("{:#}", e))
            }
        }
    }
}

impl Scraper for HttpScraper {
    fn scrape_all(&self) -> Vec<SourceResult> {
        let mut results = Vec::with_capacity(self.sources.len());
        for batch in self.sources.chunks(self.max_concurrent) {
            std::thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|source| (source, scope.spawn(move || self.scrape_source(source))))
                    .collect();
                for (source, handle) in handles {
                    match handle.join() {
                        Ok(result) => results.push(result),
                        Err(_) => {
                            log::error!("Scraper thread for {} panicked", source.name);
                            results.push(SourceResult::failed(source, "scraper panicked".into()));
                        }
                    }
                }
            });
        }
        sort_by_priority(&mut results);
        results
    }
}

/// Stable ascending sort, so equal priorities keep configuration order.
pub fn sort_by_priority(results: &mut [SourceResult]) {
    results.sort_by_key(|r| r.priority);
}

/// Pull items out of a fetched page or feed.
pub fn extract_items(body: &str, source: &SourceConfig) -> Vec<ScrapedItem> {
    let mut items = if RSS_ITEM.is_match(body) {
        extract_feed_items(body, source.max_items)
    } else {
        extract_headlines(body, source.max_items)
    };
    if items.is_empty() && source.kind == "weather" {
        items.push(ScrapedItem {
            title: WEATHER_UNAVAILABLE.to_string(),
            summary: None,
            link: None,
        });
    }
    items
}

fn extract_feed_items(body: &str, max_items: usize) -> Vec<ScrapedItem> {
    RSS_ITEM
        .captures_iter(body)
        .filter_map(|caps| {
            let inner = caps.get(2)?.as_str();
            let title = clean_text(RSS_TITLE.captures(inner)?.get(1)?.as_str());
            if title.chars().count() <= MIN_TITLE_CHARS {
                return None;
            }
            let link = RSS_LINK
                .captures(inner)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| clean_text(m.as_str()))
                .filter(|l| !l.is_empty());
            let summary = RSS_DESCRIPTION
                .captures(inner)
                .and_then(|c| c.get(1))
                .map(|m| clean_text(m.as_str()))
                .filter(|s| !s.is_empty());
            Some(ScrapedItem {
                title,
                summary,
                link,
            })
        })
        .take(max_items)
        .collect()
}

fn extract_headlines(body: &str, max_items: usize) -> Vec<ScrapedItem> {
    HEADLINE
        .captures_iter(body)
        .filter_map(|caps| {
            let title = clean_text(caps.get(2)?.as_str());
            (title.chars().count() > MIN_TITLE_CHARS).then_some(ScrapedItem {
                title,
                summary: None,
                link: None,
            })
        })
        .take(max_items)
        .collect()
}

/// Unwrap CDATA, drop tags, decode the common entities, squash whitespace.
fn clean_text(raw: &str) -> String {
    let unwrapped = CDATA.replace_all(raw, "$1");
    // Entity-escaped markup inside descriptions is common.
    let decoded = decode_entities(&unwrapped);
    let stripped = TAG.replace_all(&decoded, " ");
    let text = decode_entities(&stripped);
    SPACE.replace_all(text.trim(), " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Render scraped results as the text block handed to the script writer.
pub fn render_for_prompt(results: &[SourceResult]) -> String {
    let mut sections = Vec::new();
    for result in results.iter().filter(|r| !r.items.is_empty()) {
        let mut section = format!("{} ({}):\n", result.source, result.kind);
        for item in &result.items {
            section.push_str("- ");
            section.push_str(&item.title);
            if let Some(summary) = &item.summary {
                section.push_str(": ");
                section.push_str(summary);
            }
            section.push('\n');
        }
        sections.push(section);
    }
    sections.join("\n")
}
