use std::future::Future;
use std::time::Duration;

use crate::config::{resolve_api_key, LlmConfig};
use crate::error::{Result, SitesmithError};
use crate::retry::{with_retry, RetryPolicy};

/// Which pipeline step a completion serves. Providers ignore it; the offline
/// echo provider uses it to pick a deterministic reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Enhance,
    Code,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub purpose: Purpose,
    pub system: String,
    pub prompt: String,
}

/// A text-completion collaborator. The pipeline only depends on this trait,
/// so tests drive it with scripted fakes.
pub trait CompletionModel: Send + Sync {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// LLM text generation service over OpenRouter, OpenAI, Anthropic, Gemini
/// or Ollama, plus an offline `echo` provider.
pub struct LlmService {
    provider: LlmProvider,
    config: LlmConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for LlmService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmService")
            .field("provider", &self.provider)
            .field("model", &self.config.model)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LlmProvider {
    OpenRouter,
    OpenAI,
    Anthropic,
    Gemini,
    Ollama,
    Echo,
}

impl LlmService {
    /// Create an LLM service from configuration.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let provider = match config.provider.as_str() {
            "openrouter" => LlmProvider::OpenRouter,
            "openai" => LlmProvider::OpenAI,
            "anthropic" | "claude" => LlmProvider::Anthropic,
            "gemini" => LlmProvider::Gemini,
            "ollama" => LlmProvider::Ollama,
            "echo" => LlmProvider::Echo,
            other => {
                return Err(SitesmithError::Config(format!(
                    "unknown LLM provider: '{other}' (expected 'openrouter', 'openai', 'anthropic', 'gemini', 'ollama' or 'echo')"
                )));
            }
        };

        // Validate API key for providers that need one
        if let Some(env_var) = provider.default_key_env() {
            key_for(config, env_var)?;
        }

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            provider,
            config: config.clone(),
            client: builder.build()?,
        })
    }

    /// Provider name as configured, for health reporting.
    pub fn provider_name(&self) -> &str {
        &self.config.provider
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn dispatch(&self, request: &CompletionRequest) -> Result<String> {
        let prompt = request.prompt.as_str();
        let system = Some(request.system.as_str()).filter(|s| !s.is_empty());
        match self.provider {
            LlmProvider::OpenRouter => {
                self.generate_chat_completions(prompt, system, "https://openrouter.ai/api", "OpenRouter")
                    .await
            }
            LlmProvider::OpenAI => {
                self.generate_chat_completions(prompt, system, "https://api.openai.com", "OpenAI")
                    .await
            }
            LlmProvider::Anthropic => self.generate_anthropic(prompt, system).await,
            LlmProvider::Gemini => self.generate_gemini(prompt, system).await,
            LlmProvider::Ollama => self.generate_ollama(prompt, system).await,
            LlmProvider::Echo => Ok(echo_reply(request)),
        }
    }

    /// OpenAI-compatible: POST {base_url}/v1/chat/completions
    async fn generate_chat_completions(
        &self,
        prompt: &str,
        system: Option<&str>,
        default_base_url: &str,
        label: &str,
    ) -> Result<String> {
        let env_var = self.provider.default_key_env().unwrap_or("OPENAI_API_KEY");
        let api_key = key_for(&self.config, env_var)?;
        let base_url = self.config.base_url.as_deref().unwrap_or(default_base_url);

        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));

        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(serde_json::json!({"role": "system", "content": sys}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SitesmithError::Upstream(format!("{label} request failed: {e}")))?;

        let json = read_json(resp, label).await?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| SitesmithError::Upstream(format!("{label} response missing content")))
    }

    /// Anthropic: POST {base_url}/v1/messages
    async fn generate_anthropic(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let api_key = key_for(&self.config, "ANTHROPIC_API_KEY")?;
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com");

        let url = format!("{}/v1/messages", base_url.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        if let Some(sys) = system {
            body["system"] = serde_json::Value::String(sys.to_string());
        }

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SitesmithError::Upstream(format!("Anthropic request failed: {e}")))?;

        let json = read_json(resp, "Anthropic").await?;

        // {"content": [{"type": "text", "text": "..."}]}
        json["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| SitesmithError::Upstream("Anthropic response missing text content".into()))
    }

    /// Gemini: POST generativelanguage.googleapis.com/v1beta/models/{model}:generateContent
    async fn generate_gemini(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let api_key = key_for(&self.config, "GEMINI_API_KEY")?;
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://generativelanguage.googleapis.com");

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            self.config.model,
        );

        let mut body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "maxOutputTokens": self.config.max_tokens,
            }
        });

        if let Some(sys) = system {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": sys}]});
        }

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SitesmithError::Upstream(format!("Gemini request failed: {e}")))?;

        let json = read_json(resp, "Gemini").await?;

        json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| SitesmithError::Upstream("Gemini response missing text".into()))
    }

    /// Ollama: POST {base_url}/api/generate
    async fn generate_ollama(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("http://localhost:11434");

        let url = format!("{}/api/generate", base_url.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "num_predict": self.config.max_tokens,
            }
        });

        if let Some(sys) = system {
            body["system"] = serde_json::Value::String(sys.to_string());
        }

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SitesmithError::Upstream(format!("Ollama request failed: {e}")))?;

        let json = read_json(resp, "Ollama").await?;

        json["response"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| SitesmithError::Upstream("Ollama response missing 'response' field".into()))
    }
}

impl CompletionModel for LlmService {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        tracing::debug!(
            provider = %self.config.provider,
            model = %self.config.model,
            purpose = ?request.purpose,
            prompt_len = request.prompt.len(),
            "llm completion"
        );
        with_retry(&RetryPolicy::MODEL, "llm completion", || self.dispatch(request)).await
    }
}

impl LlmProvider {
    fn default_key_env(self) -> Option<&'static str> {
        match self {
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Ollama | Self::Echo => None,
        }
    }
}

fn key_for(config: &LlmConfig, default_env_var: &str) -> Result<String> {
    resolve_api_key(
        config.api_key.as_deref(),
        config.env_var.as_deref(),
        default_env_var,
        &config.provider,
    )
}

async fn read_json(resp: reqwest::Response, label: &str) -> Result<serde_json::Value> {
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(SitesmithError::Upstream(format!("{label} error {status}: {text}")));
    }

    resp.json()
        .await
        .map_err(|e| SitesmithError::Upstream(format!("{label} response parse error: {e}")))
}

// ── echo provider ──────────────────────────────────────────────────────

fn echo_reply(request: &CompletionRequest) -> String {
    match request.purpose {
        Purpose::Enhance => request.prompt.trim().to_string(),
        Purpose::Code => format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
             <title>Sitesmith preview</title>\n\
             <script src=\"https://cdn.tailwindcss.com\"></script>\n</head>\n\
             <body class=\"min-h-screen bg-white text-gray-900\">\n\
             <main class=\"mx-auto max-w-3xl p-8\">\n<p class=\"text-lg\">{}</p>\n</main>\n\
             </body>\n</html>",
            escape_html(request.prompt.trim())
        ),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
