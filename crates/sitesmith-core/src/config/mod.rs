use crate::error::{Result, SitesmithError};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitesmithConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Custom path for the SQLite database. Defaults to `~/.config/sitesmith/sitesmith.db`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_web_host")]
    pub host: String,
    /// Public origin of the client app, used for checkout return URLs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Origins allowed to make credentialed requests. Empty means permissive CORS.
    #[serde(default)]
    pub trusted_origins: Vec<String>,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_web_port(),
            host: default_web_host(),
            public_url: default_public_url(),
            trusted_origins: Vec::new(),
            session_cookie: default_session_cookie(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub env_var: Option<String>,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
    /// Per-request timeout. Unset means model calls may take as long as they take.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
            base_url: None,
            env_var: None,
            max_tokens: default_llm_max_tokens(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Credits charged per creation or revision.
    #[serde(default = "default_generation_cost")]
    pub cost: i64,
    /// Maximum characters of the initial prompt used as the project name.
    #[serde(default = "default_name_max_chars")]
    pub name_max_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            cost: default_generation_cost(),
            name_max_chars: default_name_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_stripe_key_env")]
    pub secret_key_env: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_stripe_webhook_env")]
    pub webhook_secret_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Identifier stamped into checkout metadata; webhook events for other apps are ignored.
    #[serde(default = "default_app_id")]
    pub app_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            secret_key_env: default_stripe_key_env(),
            webhook_secret: None,
            webhook_secret_env: default_stripe_webhook_env(),
            base_url: None,
            app_id: default_app_id(),
            currency: default_currency(),
            webhook_tolerance_secs: default_webhook_tolerance(),
        }
    }
}

impl BillingConfig {
    /// Stripe secret key from config or `secret_key_env`, if any.
    pub fn resolve_secret_key(&self) -> Option<String> {
        resolve_secret(self.secret_key.as_deref(), &self.secret_key_env)
    }

    /// Webhook signing secret from config or `webhook_secret_env`, if any.
    pub fn resolve_webhook_secret(&self) -> Option<String> {
        resolve_secret(self.webhook_secret.as_deref(), &self.webhook_secret_env)
    }
}

fn resolve_secret(value: Option<&str>, env_var: &str) -> Option<String> {
    match value {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => std::env::var(env_var).ok().filter(|v| !v.is_empty()),
    }
}

/// Valid LLM provider names.
pub const VALID_LLM_PROVIDERS: &[&str] = &[
    "openrouter",
    "openai",
    "anthropic",
    "claude",
    "gemini",
    "ollama",
    "echo",
];

// -- Defaults --

fn default_web_port() -> u16 {
    3000
}
fn default_web_host() -> String {
    "127.0.0.1".to_string()
}
fn default_public_url() -> String {
    "http://localhost:5173".to_string()
}
fn default_session_cookie() -> String {
    "auth_session".to_string()
}
fn default_llm_provider() -> String {
    "openrouter".to_string()
}
fn default_llm_model() -> String {
    "z-ai/glm-4.5-air:free".to_string()
}
fn default_llm_max_tokens() -> usize {
    16384
}
fn default_generation_cost() -> i64 {
    5
}
fn default_name_max_chars() -> usize {
    50
}
fn default_stripe_key_env() -> String {
    "STRIPE_SECRET_KEY".to_string()
}
fn default_stripe_webhook_env() -> String {
    "STRIPE_WEBHOOK_SECRET".to_string()
}
fn default_app_id() -> String {
    "ai-site-builder".to_string()
}
fn default_currency() -> String {
    "usd".to_string()
}
fn default_webhook_tolerance() -> i64 {
    300
}

impl SitesmithConfig {
    /// Load configuration with layered merge:
    /// 1. ~/.config/sitesmith/config.toml (global)
    /// 2. .sitesmith/config.toml (project)
    /// 3. .sitesmith/config.local.toml (local, gitignored)
    /// 4. `SITESMITH__<SECTION>__<KEY>` environment variables
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                builder = builder.add_source(File::from(global_path).required(false));
            }
        }

        if let Some(dir) = project_dir {
            let project_config = dir.join(".sitesmith").join("config.toml");
            if project_config.exists() {
                builder = builder.add_source(File::from(project_config).required(false));
            }

            let local_config = dir.join(".sitesmith").join("config.local.toml");
            if local_config.exists() {
                builder = builder.add_source(File::from(local_config).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SITESMITH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| SitesmithError::Config(e.to_string()))?;

        let mut cfg: Self = config
            .try_deserialize()
            .map_err(|e| SitesmithError::Config(e.to_string()))?;

        cfg.validate();
        Ok(cfg)
    }

    /// Load with defaults only (no files, no environment).
    pub fn default_config() -> Self {
        Self {
            storage: StorageConfig::default(),
            web: WebConfig::default(),
            llm: LlmConfig::default(),
            generation: GenerationConfig::default(),
            billing: BillingConfig::default(),
        }
    }

    /// Validate config values, fixing out-of-range values and logging warnings.
    /// This is lenient: it repairs values rather than rejecting the config.
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !VALID_LLM_PROVIDERS.contains(&self.llm.provider.as_str()) {
            warnings.push(format!(
                "unknown LLM provider '{}', valid: {}",
                self.llm.provider,
                VALID_LLM_PROVIDERS.join(", ")
            ));
        }

        if self.llm.max_tokens == 0 {
            warnings.push("llm.max_tokens = 0, setting to 4096".to_string());
            self.llm.max_tokens = 4096;
        }

        if self.llm.timeout_secs == Some(0) {
            warnings.push("llm.timeout_secs = 0, disabling the timeout".to_string());
            self.llm.timeout_secs = None;
        }

        if self.generation.cost <= 0 {
            warnings.push(format!(
                "generation.cost = {} must be positive, setting to 5",
                self.generation.cost
            ));
            self.generation.cost = 5;
        }

        if self.generation.name_max_chars == 0 {
            warnings.push("generation.name_max_chars = 0, setting to 50".to_string());
            self.generation.name_max_chars = 50;
        }

        if self.billing.webhook_tolerance_secs <= 0 {
            warnings.push("billing.webhook_tolerance_secs must be positive, setting to 300".into());
            self.billing.webhook_tolerance_secs = 300;
        }

        if self.web.session_cookie.trim().is_empty() {
            warnings.push("web.session_cookie is empty, using 'auth_session'".to_string());
            self.web.session_cookie = default_session_cookie();
        }

        for w in &warnings {
            tracing::warn!("config: {}", w);
        }

        warnings
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("sitesmith").join("config.toml"))
}

/// Resolve an API key: check the config field first, then an environment variable.
pub fn resolve_api_key(
    api_key: Option<&str>,
    env_var_override: Option<&str>,
    default_env_var: &str,
    provider_name: &str,
) -> Result<String> {
    if let Some(key) = api_key {
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    let env_var_name = env_var_override.unwrap_or(default_env_var);

    std::env::var(env_var_name).map_err(|_| {
        SitesmithError::Config(format!(
            "{provider_name} LLM provider requires an API key (set llm.api_key or {env_var_name})"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SitesmithConfig::default_config();
        assert_eq!(config.web.port, 3000);
        assert_eq!(config.web.session_cookie, "auth_session");
        assert_eq!(config.llm.provider, "openrouter");
        assert_eq!(config.generation.cost, 5);
        assert_eq!(config.generation.name_max_chars, 50);
        assert_eq!(config.billing.app_id, "ai-site-builder");
        assert!(config.llm.timeout_secs.is_none());
    }

    #[test]
    fn test_load_config_no_files() {
        let config = SitesmithConfig::load(Some(Path::new("/nonexistent/path"))).unwrap();
        assert_eq!(config.generation.cost, 5);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = SitesmithConfig::default_config();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: SitesmithConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.web.port, config.web.port);
        assert_eq!(parsed.llm.model, config.llm.model);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: SitesmithConfig = toml::from_str(
            r#"
            [llm]
            provider = "echo"

            [generation]
            cost = 7
            "#,
        )
        .unwrap();
        assert_eq!(parsed.llm.provider, "echo");
        assert_eq!(parsed.llm.max_tokens, 16384);
        assert_eq!(parsed.generation.cost, 7);
        assert_eq!(parsed.generation.name_max_chars, 50);
        assert_eq!(parsed.web.port, 3000);
    }

    #[test]
    fn test_validate_repairs_bad_values() {
        let mut config = SitesmithConfig::default_config();
        config.generation.cost = 0;
        config.llm.max_tokens = 0;
        config.llm.timeout_secs = Some(0);
        config.billing.webhook_tolerance_secs = -1;

        let warnings = config.validate();
        assert_eq!(warnings.len(), 4);
        assert_eq!(config.generation.cost, 5);
        assert_eq!(config.llm.max_tokens, 4096);
        assert!(config.llm.timeout_secs.is_none());
        assert_eq!(config.billing.webhook_tolerance_secs, 300);
    }

    #[test]
    fn test_validate_unknown_provider_warns() {
        let mut config = SitesmithConfig::default_config();
        config.llm.provider = "banana".into();
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("unknown LLM provider")));
    }

    #[test]
    fn test_resolve_api_key_prefers_config() {
        let key = resolve_api_key(Some("cfg-key"), None, "SITESMITH_TEST_UNSET", "openai").unwrap();
        assert_eq!(key, "cfg-key");
    }

    #[test]
    fn test_resolve_api_key_missing() {
        let err = resolve_api_key(None, Some("SITESMITH_TEST_DEFINITELY_UNSET"), "X", "openai")
            .unwrap_err();
        assert!(err.to_string().contains("SITESMITH_TEST_DEFINITELY_UNSET"));
    }

    #[test]
    fn test_billing_secret_from_config() {
        let billing = BillingConfig {
            webhook_secret: Some("whsec_test".into()),
            ..Default::default()
        };
        assert_eq!(billing.resolve_webhook_secret().as_deref(), Some("whsec_test"));
    }
}
