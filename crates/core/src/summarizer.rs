//! Script writing through an OpenAI-compatible chat completion API.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;

use crate::config::{HostConfig, PodcastConfig};
use crate::dates::{now_unix, CivilTime};
use crate::scraper::{render_for_prompt, SourceResult};

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const BASE_URL_VAR: &str = "OPENAI_BASE_URL";

const SYSTEM_PROMPT: &str = "Du är en professionell AI som hjälper till att skapa naturliga samtal mellan poddvärdar på svenska.";

/// Turns the day's scraped material into a raw script.
pub trait ScriptWriter: Send + Sync {
    fn create_script(&self, scraped: &[SourceResult], music_context: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct OpenAiScriptWriter {
    http: reqwest::blocking::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    hosts: Vec<HostConfig>,
    /// Fixed clock for reproducible prompts; wall clock when unset.
    fixed_now: Option<u64>,
}

impl OpenAiScriptWriter {
    /// Without an API key every call returns the fallback script.
    pub fn new(config: &PodcastConfig, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.providers.http_timeout_secs.max(1)))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: config.providers.openai_base_url.trim_end_matches('/').to_string(),
            model: config.providers.openai_model.clone(),
            hosts: config.hosts.clone(),
            fixed_now: None,
        })
    }

    pub fn at(mut self, now: u64) -> Self {
        self.fixed_now = Some(now);
        self
    }

    fn now(&self) -> u64 {
        self.fixed_now.unwrap_or_else(now_unix)
    }

    /// Reads `OPENAI_API_KEY` and, when set, `OPENAI_BASE_URL`.
    pub fn from_env(config: &PodcastConfig) -> Result<Self> {
        let key = std::env::var(API_KEY_VAR).ok();
        if key.is_none() {
            log::warn!("{} not set, scripts will use the fallback text", API_KEY_VAR);
        }
        let mut writer = Self::new(config, key)?;
        if let Ok(url) = std::env::var(BASE_URL_VAR) {
            writer.base_url = url.trim_end_matches('/').to_string();
        }
        Ok(writer)
    }

    fn complete(&self, api_key: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .context("Chat completion request failed")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            bail!("Chat completion HTTP {}: {}", status, text.trim());
        }
        let parsed: ChatResponse = response
            .json()
            .context("Failed to parse chat completion response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            bail!("Chat completion returned no text");
        }
        Ok(content)
    }
}

impl ScriptWriter for OpenAiScriptWriter {
    fn create_script(&self, scraped: &[SourceResult], music_context: &str) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            log::warn!("No script writer key available, using fallback script");
            return Ok(fallback_script(self.now()));
        };
        let prompt = build_prompt(&self.hosts, scraped, music_context, self.now());
        match self.complete(api_key, &prompt) {
            Ok(script) => {
                log::info!("Podcast script generated ({} chars)", script.chars().count());
                Ok(script)
            }
            Err(e) => {
                log::error!("Error generating script, using fallback: {:#}", e);
                Ok(fallback_script(self.now()))
            }
        }
    }
}

fn host_or<'a>(hosts: &'a [HostConfig], index: usize, name: &'a str, personality: &'a str) -> (&'a str, &'a str) {
    hosts
        .get(index)
        .map(|h| (h.name.as_str(), h.personality.as_str()))
        .unwrap_or((name, personality))
}

/// The user prompt: hosts, date, material, music and format rules.
pub fn build_prompt(
    hosts: &[HostConfig],
    scraped: &[SourceResult],
    music_context: &str,
    now: u64,
) -> String {
    let (h1, p1) = host_or(hosts, 0, "Anna", "Energisk morgonvärd");
    let (h2, p2) = host_or(hosts, 1, "Erik", "Analytisk och noggrann");
    let date = CivilTime::from_unix(now).swedish_long();
    let content = render_for_prompt(scraped);

    format!(
        "Du skapar ett naturligt samtal mellan {h1} och {h2}, två professionella poddvärdar.

{h1}: {p1}
{h2}: {p2}

Dagens datum: {date}

Dagens innehåll att diskutera:
{content}

Bakgrundsmusik:
{music_context}

Instruktioner:
1. Skapa ett naturligt samtal mellan {h1} och {h2}
2. Låt dem diskutera nyheterna som ett äkta samtal, inte bara läsa upp punkter
3. {h1} börjar ofta med hälsningar och översikter
4. {h2} fokuserar mer på analys och detaljer
5. Använd format: \"{h1}: [text]\" och \"{h2}: [text]\", en replik per rad
6. Lägg musik på egen rad med [MUSIK: id] där det passar, aldrig mitt i en replik
7. Avsluta med båda värdarna som säger adjö på sitt sätt

Skapa ett 8-12 minuters samtal på svenska."
    )
}

/// Single-voice script used when no model output is available.
pub fn fallback_script(now: u64) -> String {
    let weekday = CivilTime::from_unix(now).swedish_weekday();
    format!(
        "God morgon och välkommen till dagens podd! Det är {weekday} och här kommer en snabb överblick av vad som händer idag.

Vi har samlat nyheter från flera källor men hade tekniska problem med sammanfattningen. Besök nyhetssajterna direkt för fullständig information.

Ha en fantastisk dag och vi hörs igen imorgon!"
    )
}
