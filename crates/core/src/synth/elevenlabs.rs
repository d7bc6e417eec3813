//! ElevenLabs HTTP client (blocking).
//!
//! Dialogue chunks go to `/v1/text-to-dialogue`, single-voice text to
//! `/v1/text-to-speech/{voice_id}`. The API key comes from
//! `ELEVENLABS_API_KEY`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use super::{DialogueInput, DialogueProvider, SpeechProvider};
use crate::config::ProviderConfig;

pub const API_KEY_VAR: &str = "ELEVENLABS_API_KEY";

#[derive(Debug, Clone, Serialize)]
struct VoiceSettings {
    stability: f64,
    similarity_boost: f64,
    style: f64,
    use_speaker_boost: bool,
}

#[derive(Serialize)]
struct DialogueRequest<'a> {
    inputs: &'a [DialogueInput],
    model_id: &'a str,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

pub struct ElevenLabsClient {
    http: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    dialogue_model: String,
    speech_model: String,
    output_format: String,
    voice_settings: VoiceSettings,
}

impl ElevenLabsClient {
    pub fn new(api_key: &str, providers: &ProviderConfig) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("ElevenLabs API key is empty");
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(providers.http_timeout_secs.max(1)))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            base_url: providers.elevenlabs_base_url.trim_end_matches('/').to_string(),
            dialogue_model: providers.dialogue_model.clone(),
            speech_model: providers.speech_model.clone(),
            output_format: providers.speech_output_format.clone(),
            voice_settings: VoiceSettings {
                stability: providers.stability,
                similarity_boost: providers.similarity_boost,
                style: providers.style,
                use_speaker_boost: providers.use_speaker_boost,
            },
        })
    }

    /// Build from `ELEVENLABS_API_KEY`.
    pub fn from_env(providers: &ProviderConfig) -> Result<Self> {
        let key = std::env::var(API_KEY_VAR)
            .with_context(|| format!("{} is not set", API_KEY_VAR))?;
        Self::new(&key, providers)
    }

    fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .query(&[("output_format", self.output_format.as_str())])
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(body)
            .send()
            .with_context(|| format!("Request to {} failed", path))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            bail!("ElevenLabs HTTP {} for {}: {}", status, path, text.trim());
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("Failed to read audio from {}", path))?;
        Ok(bytes.to_vec())
    }
}

impl DialogueProvider for ElevenLabsClient {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    fn synthesize_dialogue(&self, inputs: &[DialogueInput]) -> Result<Vec<u8>> {
        let body = DialogueRequest {
            inputs,
            model_id: &self.dialogue_model,
        };
        self.post("/v1/text-to-dialogue", &body)
    }
}

impl SpeechProvider for ElevenLabsClient {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    fn synthesize_speech(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let body = SpeechRequest {
            text,
            model_id: &self.speech_model,
            voice_settings: &self.voice_settings,
        };
        self.post(&format!("/v1/text-to-speech/{}", voice_id), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        assert!(ElevenLabsClient::new("  ", &ProviderConfig::default()).is_err());
    }

    #[test]
    fn test_dialogue_request_shape() {
        let inputs = vec![
            DialogueInput {
                text: "Hej!".into(),
                voice_id: "v1".into(),
            },
            DialogueInput {
                text: "God morgon!".into(),
                voice_id: "v2".into(),
            },
        ];
        let body = DialogueRequest {
            inputs: &inputs,
            model_id: "eleven_v3",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model_id"], "eleven_v3");
        assert_eq!(json["inputs"][1]["voice_id"], "v2");
        assert_eq!(json["inputs"][0]["text"], "Hej!");
    }

    #[test]
    fn test_speech_request_carries_voice_settings() {
        let client = ElevenLabsClient::new("key", &ProviderConfig::default()).unwrap();
        let body = SpeechRequest {
            text: "Välkommen",
            model_id: &client.speech_model,
            voice_settings: &client.voice_settings,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model_id"], "eleven_multilingual_v2");
        assert_eq!(json["voice_settings"]["similarity_boost"], 0.75);
        assert_eq!(json["voice_settings"]["use_speaker_boost"], true);
    }

    #[test]
    fn test_unreachable_host_is_an_error() {
        let providers = ProviderConfig {
            elevenlabs_base_url: "http://127.0.0.1:9".into(),
            http_timeout_secs: 2,
            ..ProviderConfig::default()
        };
        let client = ElevenLabsClient::new("key", &providers).unwrap();
        assert!(client.synthesize_speech("Hej", "voice").is_err());
    }
}
