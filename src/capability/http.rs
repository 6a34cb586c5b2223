//! Chat-completions adapter for the summarization tiers.
//!
//! Speaks the OpenAI-compatible `/chat/completions` shape, which covers the
//! hosted providers the tiers are typically mapped onto. One adapter instance
//! serves all three tiers; each tier is just a different model id and prompt.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::CapabilityError;
use super::{AccuracyVerifier, FinalCompiler, Summarizer, Tier};

/// Maximum allowed response content length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input characters per call.
const MAX_INPUT_CHARS: usize = 200_000;

/// Model ids used per tier.
#[derive(Debug, Clone)]
pub struct TierModels {
    pub light: String,
    pub medium: String,
    pub large: String,
}

impl Default for TierModels {
    fn default() -> Self {
        Self {
            light: "meta-llama/llama-3.2-1b-instruct".into(),
            medium: "google/gemma-2-9b-it".into(),
            large: "meta-llama/llama-3.1-70b-instruct".into(),
        }
    }
}

impl TierModels {
    fn for_tier(&self, tier: Tier) -> &str {
        match tier {
            Tier::Light => &self.light,
            Tier::Medium => &self.medium,
            Tier::Large => &self.large,
        }
    }
}

/// HTTP adapter implementing [`Summarizer`] and [`FinalCompiler`].
#[derive(Debug, Clone)]
pub struct HttpChatCapability {
    client: reqwest::Client,
    base_url: String,
    models: TierModels,
}

impl HttpChatCapability {
    /// Create from an API key and default endpoint/models.
    pub fn new(api_key: impl Into<String>) -> Result<Self, CapabilityError> {
        Self::with_config(
            api_key,
            "https://openrouter.ai/api/v1",
            Duration::from_secs(120),
            TierModels::default(),
        )
    }

    /// Create from environment variables.
    ///
    /// `VERDANT_API_KEY` is required; `VERDANT_BASE_URL`,
    /// `VERDANT_TIMEOUT_SECONDS` and `VERDANT_{LIGHT,MEDIUM,LARGE}_MODEL`
    /// override the defaults.
    pub fn from_env() -> Result<Self, CapabilityError> {
        let api_key = std::env::var("VERDANT_API_KEY")
            .map_err(|_| CapabilityError::config("VERDANT_API_KEY not set"))?;

        let base_url = std::env::var("VERDANT_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".into());

        let timeout = std::env::var("VERDANT_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(120));

        let defaults = TierModels::default();
        let models = TierModels {
            light: std::env::var("VERDANT_LIGHT_MODEL").unwrap_or(defaults.light),
            medium: std::env::var("VERDANT_MEDIUM_MODEL").unwrap_or(defaults.medium),
            large: std::env::var("VERDANT_LARGE_MODEL").unwrap_or(defaults.large),
        };

        Self::with_config(api_key, base_url, timeout, models)
    }

    /// Create with explicit configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        models: TierModels,
    ) -> Result<Self, CapabilityError> {
        let api_key = api_key.into();
        let base_url = base_url.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| CapabilityError::config("invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| CapabilityError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            models,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn chat(
        &self,
        model: &str,
        system: &str,
        user: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CapabilityError> {
        let total_chars = system.len() + user.len();
        if total_chars > MAX_INPUT_CHARS {
            return Err(CapabilityError::invalid_input(format!(
                "input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let messages = [
            ApiMessage {
                role: "system",
                content: system.to_string(),
            },
            ApiMessage {
                role: "user",
                content: user,
            },
        ];

        let api_req = ChatApiRequest {
            model,
            messages: &messages,
            temperature,
            max_tokens,
        };

        let mut response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();

        // Stream the body to enforce the size limit.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(CapabilityError::upstream(
                    "chat",
                    format!("response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();

        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(CapabilityError::rate_limited(Duration::from_secs(60)));
            }
            let message = serde_json::from_str::<ChatApiResponse>(&body)
                .ok()
                .and_then(|p| p.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(CapabilityError::upstream(
                "chat",
                message,
                status.as_u16() >= 500,
            ));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body)
            .map_err(|e| CapabilityError::upstream("chat", format!("invalid JSON: {e}"), false))?;

        if let Some(error) = parsed.error {
            return Err(CapabilityError::upstream(
                "chat",
                error.message.unwrap_or_default(),
                false,
            ));
        }

        let mut content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| CapabilityError::upstream("chat", "no content in response", false))?;

        if content.len() > MAX_RESPONSE_LEN {
            content.truncate(MAX_RESPONSE_LEN);
        }

        Ok(content.trim().to_string())
    }
}

// =============================================================================
// API types
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

// =============================================================================
// Prompts
// =============================================================================

const SUMMARIZE_SYSTEM: &str = "You are an expert summarization model. \
Provide a concise, factual summary of the text you are given. \
Do not add any preamble, introduction, or conversational fluff.";

const COMPILE_SYSTEM: &str = "You are an expert editor. You will be given a \
collection of small, disconnected summaries from a document. Synthesize them \
into a single, coherent, well-written executive summary. STRICTLY use only \
the information present in the summaries. Do not invent, assume, or \
extrapolate beyond what is explicitly stated. Be concise, accurate, and \
factual.";

#[async_trait]
impl Summarizer for HttpChatCapability {
    async fn summarize(&self, tier: Tier, text: &str) -> Result<String, CapabilityError> {
        let user = format!("TEXT:\n{text}\n\nSUMMARY:");
        self.chat(self.models.for_tier(tier), SUMMARIZE_SYSTEM, user, 0.2, 512)
            .await
    }
}

const VERIFY_SYSTEM: &str = "You are a strict fact-checking model. You will \
be given an ORIGINAL text and a CANDIDATE summary. Answer with exactly one \
word: YES if every claim in the candidate is supported by the original, NO \
otherwise.";

#[async_trait]
impl AccuracyVerifier for HttpChatCapability {
    async fn verify(&self, original: &str, candidate: &str) -> Result<bool, CapabilityError> {
        let user = format!("ORIGINAL:\n{original}\n\nCANDIDATE:\n{candidate}\n\nANSWER:");
        let answer = self
            .chat(&self.models.light, VERIFY_SYSTEM, user, 0.0, 4)
            .await?;
        let answer = answer.trim().to_ascii_lowercase();
        if answer.starts_with("yes") {
            Ok(true)
        } else if answer.starts_with("no") {
            Ok(false)
        } else {
            // Unparseable verdict; let the caller's fail-open policy decide.
            Err(CapabilityError::upstream(
                "verify",
                format!("unrecognized verdict: {answer:?}"),
                false,
            ))
        }
    }
}

#[async_trait]
impl FinalCompiler for HttpChatCapability {
    async fn compile(&self, joined_summaries: &str) -> Result<String, CapabilityError> {
        let user = format!("SUMMARIES:\n{joined_summaries}\n\nEXECUTIVE SUMMARY:");
        self.chat(&self.models.large, COMPILE_SYSTEM, user, 0.5, 2000)
            .await
    }
}
