//! Vision model providers.
//!
//! Every provider implements [`VisionAnalyzer`]: one image plus a prompt in,
//! the model's raw text out. Interpreting that text is the validator's job.
//!
//! | `vision.provider` | Wire format | Default model | Pre-call delay |
//! |-------------------|-------------|---------------|----------------|
//! | `openai` | chat completions | `gpt-4o-mini` | 1 s |
//! | `groq` | chat completions | `llama-3.2-90b-vision-preview` | 7 s |
//! | `xai` | chat completions | `grok-2-vision-1212` | 6 s |
//! | `anthropic` | messages | `claude-3-5-sonnet-latest` | none |
//! | `gemini` | generateContent | `gemini-2.0-flash-exp` | 5 s |
//!
//! The pre-call delay is a fixed sleep before every request. Transient
//! failures go through the shared backoff loop in [`crate::http`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use std::path::Path;
use std::time::Duration;

use crate::config::VisionConfig;
use crate::error::ProviderError;
use crate::http::{self, BackoffPolicy};

#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Provider name used in logs and errors.
    fn name(&self) -> &str;

    async fn analyze(&self, image_path: &Path, prompt: &str) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Groq,
    Xai,
    Anthropic,
    Gemini,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wire {
    ChatCompletions,
    Messages,
    GenerateContent,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "openai" => Some(Self::OpenAi),
            "groq" => Some(Self::Groq),
            "xai" => Some(Self::Xai),
            "anthropic" => Some(Self::Anthropic),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::Xai => "xai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Groq => "llama-3.2-90b-vision-preview",
            Self::Xai => "grok-2-vision-1212",
            Self::Anthropic => "claude-3-5-sonnet-latest",
            Self::Gemini => "gemini-2.0-flash-exp",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Xai => "https://api.x.ai/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    pub fn default_pre_call_delay(self) -> Duration {
        Duration::from_millis(match self {
            Self::OpenAi => 1000,
            Self::Groq => 7000,
            Self::Xai => 6000,
            Self::Anthropic => 0,
            Self::Gemini => 5000,
        })
    }

    fn wire(self) -> Wire {
        match self {
            Self::OpenAi | Self::Groq | Self::Xai => Wire::ChatCompletions,
            Self::Anthropic => Wire::Messages,
            Self::Gemini => Wire::GenerateContent,
        }
    }
}

/// An HTTP vision provider, configured once at startup.
pub struct RemoteVisionAnalyzer {
    kind: ProviderKind,
    model: String,
    base_url: String,
    api_key: String,
    max_tokens: u32,
    pre_call_delay: Duration,
    policy: BackoffPolicy,
    client: reqwest::Client,
}

impl RemoteVisionAnalyzer {
    pub fn new(config: &VisionConfig) -> Result<Self> {
        let Some(kind) = ProviderKind::parse(&config.provider) else {
            bail!("Unknown vision provider: {}", config.provider);
        };
        let api_key = config.api_key.clone().ok_or_else(|| {
            anyhow::anyhow!("{} environment variable not set", config.key_env())
        })?;

        Ok(Self {
            kind,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| kind.default_model().to_string()),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| kind.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_tokens: config.max_tokens,
            pre_call_delay: config
                .pre_call_delay_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| kind.default_pre_call_delay()),
            policy: BackoffPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
            client: http::client(config.timeout_secs)?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, mime: &str, data: &str, prompt: &str) -> reqwest::RequestBuilder {
        match self.kind.wire() {
            Wire::ChatCompletions => self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&serde_json::json!({
                    "model": self.model,
                    "max_tokens": self.max_tokens,
                    "messages": [{
                        "role": "user",
                        "content": [
                            { "type": "text", "text": prompt },
                            {
                                "type": "image_url",
                                "image_url": { "url": format!("data:{};base64,{}", mime, data) }
                            }
                        ]
                    }]
                })),
            Wire::Messages => self
                .client
                .post(format!("{}/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&serde_json::json!({
                    "model": self.model,
                    "max_tokens": self.max_tokens,
                    "messages": [{
                        "role": "user",
                        "content": [
                            {
                                "type": "image",
                                "source": { "type": "base64", "media_type": mime, "data": data }
                            },
                            { "type": "text", "text": prompt }
                        ]
                    }]
                })),
            Wire::GenerateContent => self
                .client
                .post(format!(
                    "{}/models/{}:generateContent",
                    self.base_url, self.model
                ))
                .header("x-goog-api-key", &self.api_key)
                .json(&serde_json::json!({
                    "contents": [{
                        "parts": [
                            { "text": prompt },
                            { "inline_data": { "mime_type": mime, "data": data } }
                        ]
                    }],
                    "generationConfig": { "maxOutputTokens": self.max_tokens }
                })),
        }
    }
}

#[async_trait]
impl VisionAnalyzer for RemoteVisionAnalyzer {
    fn name(&self) -> &str {
        self.kind.name()
    }

    async fn analyze(&self, image_path: &Path, prompt: &str) -> Result<String, ProviderError> {
        let bytes = tokio::fs::read(image_path).await.map_err(|e| {
            ProviderError::new(
                self.name(),
                None,
                format!("cannot read image {}: {}", image_path.display(), e),
            )
        })?;
        let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let mime = mime_for(image_path);

        if !self.pre_call_delay.is_zero() {
            tokio::time::sleep(self.pre_call_delay).await;
        }

        let json = http::send_with_backoff(&self.policy, self.name(), || {
            self.request(mime, &data, prompt)
        })
        .await?;

        parse_response(self.kind.wire(), &json)
            .ok_or_else(|| ProviderError::new(self.name(), Some(200), "response carried no text"))
    }
}

/// Build the analyzer named by `vision.provider`.
pub fn create_analyzer(config: &VisionConfig) -> Result<Box<dyn VisionAnalyzer>> {
    Ok(Box::new(RemoteVisionAnalyzer::new(config)?))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

fn parse_response(wire: Wire, json: &serde_json::Value) -> Option<String> {
    let text = match wire {
        Wire::ChatCompletions => json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str()),
        Wire::Messages => json
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            })
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str()),
        Wire::GenerateContent => json
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str()),
    };
    text.map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_provider_round_trips_its_name() {
        for name in ["openai", "groq", "xai", "anthropic", "gemini"] {
            assert_eq!(ProviderKind::parse(name).map(|k| k.name()), Some(name));
        }
        assert_eq!(ProviderKind::parse("bedrock"), None);
    }

    #[test]
    fn provider_delays() {
        assert_eq!(ProviderKind::Groq.default_pre_call_delay(), Duration::from_secs(7));
        assert_eq!(ProviderKind::Anthropic.default_pre_call_delay(), Duration::ZERO);
    }

    #[test]
    fn missing_key_fails_construction() {
        let config = VisionConfig::default();
        let err = create_analyzer(&config).err().unwrap();
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[test]
    fn config_overrides_defaults() {
        let config = VisionConfig {
            provider: "openai".into(),
            model: Some("gpt-4o".into()),
            base_url: Some("http://localhost:9999/v1/".into()),
            api_key: Some("k".into()),
            pre_call_delay_ms: Some(0),
            ..VisionConfig::default()
        };
        let analyzer = RemoteVisionAnalyzer::new(&config).unwrap();
        assert_eq!(analyzer.model(), "gpt-4o");
        assert_eq!(analyzer.base_url, "http://localhost:9999/v1");
        assert!(analyzer.pre_call_delay.is_zero());
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(mime_for(Path::new("a/page1_img1.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("a/page1_img1.jpg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a/noext")), "image/jpeg");
    }

    #[test]
    fn response_text_by_wire() {
        let chat = serde_json::json!({"choices": [{"message": {"content": "{\"a\":1}"}}]});
        assert_eq!(parse_response(Wire::ChatCompletions, &chat).as_deref(), Some("{\"a\":1}"));

        let messages = serde_json::json!({"content": [{"type": "text", "text": "hi"}]});
        assert_eq!(parse_response(Wire::Messages, &messages).as_deref(), Some("hi"));

        let gemini = serde_json::json!({"candidates": [{"content": {"parts": [{"text": "yo"}]}}]});
        assert_eq!(parse_response(Wire::GenerateContent, &gemini).as_deref(), Some("yo"));

        assert_eq!(parse_response(Wire::ChatCompletions, &serde_json::json!({})), None);
    }
}
