use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::InsightError;

/// Well-known environment variables that override the config file.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const AUTH_URL_ENV: &str = "AUTH_URL";
pub const AUTH_SERVICE_KEY_ENV: &str = "AUTH_SERVICE_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InsightConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_statement_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

/// Identity endpoint used to resolve bearer tokens into tenants.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub service_key: String,
}

/// One entry of the provider fallback chain.
///
/// The API key is read from `api_key_env` at startup unless `api_key` is set
/// inline. Entries without a key are skipped.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderEntry {
    pub name: String,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub referer: Option<String>,
}

impl ProviderEntry {
    fn new(name: &str, base_url: &str, model: &str, api_key_env: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key_env: Some(api_key_env.to_string()),
            api_key: None,
            referer: None,
        }
    }

    /// Resolve the API key: inline value first, then the named env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
            })
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_chain")]
    pub chain: Vec<ProviderEntry>,
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_temperature() -> f32 {
    0.1
}

/// Priority order: primary completions API, OpenAI-compatible router, tertiary vendor.
pub fn default_chain() -> Vec<ProviderEntry> {
    let mut router = ProviderEntry::new(
        "opensource",
        "https://openrouter.ai/api/v1",
        "deepseek/deepseek-chat",
        "OPENSOURCE_API_KEY",
    );
    router.referer = Some("https://supabase.com".to_string());

    vec![
        ProviderEntry::new(
            "openai",
            "https://api.openai.com/v1",
            "gpt-4o-mini",
            "OPENAI_API_KEY",
        ),
        router,
        ProviderEntry::new("grok", "https://api.x.ai/v1", "grok-beta", "GROK_API_KEY"),
    ]
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_provider_timeout(),
            temperature: default_temperature(),
            chain: default_chain(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    pub max_generated_rows: u32,
    pub fallback_rows: u32,
    pub chart_max_rows: usize,
    pub sql_max_tokens: u32,
    pub insight_max_tokens: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_generated_rows: 50,
            fallback_rows: 10,
            chart_max_rows: 20,
            sql_max_tokens: 500,
            insight_max_tokens: 1000,
        }
    }
}

impl InsightConfig {
    /// Load from an optional TOML file, then `INSIGHT__SECTION__KEY` env vars,
    /// then the well-known variables (`DATABASE_URL`, `AUTH_URL`, `AUTH_SERVICE_KEY`).
    pub fn load(path: &str) -> Result<Self, InsightError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("INSIGHT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let mut config: Self = s.try_deserialize()?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            self.database.url = url;
        }
        if let Ok(url) = std::env::var(AUTH_URL_ENV) {
            self.auth.url = url;
        }
        if let Ok(key) = std::env::var(AUTH_SERVICE_KEY_ENV) {
            self.auth.service_key = key;
        }
    }
}
