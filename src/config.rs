use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Upper bound for `sync.retry_backoff`.
pub const MAX_RETRY_BACKOFF: f64 = 60.0;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Bare hostname, e.g. `your-store.myshopify.com`.
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            access_token: None,
            api_version: default_api_version(),
            page_size: default_page_size(),
        }
    }
}

fn default_api_version() -> String {
    "2025-10".to_string()
}
fn default_page_size() -> usize {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    #[serde(default)]
    pub app_key: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_channel_api_base")]
    pub api_base: String,
    /// Live mode requires the app key to start with this prefix.
    #[serde(default = "default_app_key_prefix")]
    pub app_key_prefix: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            app_key: None,
            secret: None,
            access_token: None,
            api_base: default_channel_api_base(),
            app_key_prefix: default_app_key_prefix(),
        }
    }
}

fn default_channel_api_base() -> String {
    "https://partner.tiktokshop.com/api".to_string()
}
fn default_app_key_prefix() -> String {
    "app_".to_string()
}

impl ChannelConfig {
    /// Whether the credentials are good enough to talk to the real channel.
    pub fn has_live_credentials(&self) -> bool {
        let key_ok = self
            .app_key
            .as_deref()
            .is_some_and(|k| !k.is_empty() && k.starts_with(&self.app_key_prefix));
        let secret_ok = self.secret.as_deref().is_some_and(|s| !s.is_empty());
        key_ok && secret_ok
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    /// Attempts per product before falling back (call or parse failures).
    #[serde(default = "default_ai_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_ai_model(),
            base_url: default_ai_base_url(),
            max_retries: default_ai_max_retries(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_ai_max_retries() -> u32 {
    3
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}

impl AiConfig {
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_order_limit")]
    pub order_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_backoff: default_retry_backoff(),
            timeout_secs: default_timeout_secs(),
            order_limit: default_order_limit(),
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff() -> f64 {
    2.0
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_order_limit() -> usize {
    50
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_backoff)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

impl Config {
    /// Overlay values from environment variables.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a closure over
    /// a map so they never mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = get("SHOPIFY_STORE") {
            self.store.domain = v;
        }
        if let Some(v) = get("SHOPIFY_TOKEN").or_else(|| get("SHOPIFY_ACCESS_TOKEN")) {
            self.store.access_token = Some(v);
        }
        if let Some(v) = get("SHOPIFY_API_VERSION") {
            self.store.api_version = v;
        }

        if let Some(v) = get("TIKTOK_APP_KEY") {
            self.channel.app_key = Some(v);
        }
        if let Some(v) = get("TIKTOK_SECRET") {
            self.channel.secret = Some(v);
        }
        if let Some(v) = get("TIKTOK_ACCESS_TOKEN") {
            self.channel.access_token = Some(v);
        }
        if let Some(v) = get("TIKTOK_API_BASE") {
            self.channel.api_base = v;
        }

        if let Some(v) = get("OPENAI_API_KEY") {
            self.ai.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.ai.model = v;
        }

        if let Some(v) = get("SYNC_INTERVAL") {
            self.sync.interval_secs = v
                .parse()
                .with_context(|| format!("SYNC_INTERVAL must be an integer, got '{}'", v))?;
        }
        if let Some(v) = get("BATCH_SIZE") {
            self.sync.batch_size = v
                .parse()
                .with_context(|| format!("BATCH_SIZE must be an integer, got '{}'", v))?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.sync.max_retries = v
                .parse()
                .with_context(|| format!("MAX_RETRIES must be an integer, got '{}'", v))?;
        }
        if let Some(v) = get("RETRY_BACKOFF") {
            self.sync.retry_backoff = v
                .parse()
                .with_context(|| format!("RETRY_BACKOFF must be a number, got '{}'", v))?;
        }

        Ok(())
    }

    /// Check the configuration before any client is built.
    ///
    /// Store credentials are only required for real runs; dry-run never
    /// touches the network.
    pub fn validate(&mut self, dry_run: bool) -> Result<()> {
        if self.sync.batch_size == 0 {
            bail!("sync.batch_size must be > 0");
        }
        if self.sync.max_retries == 0 {
            bail!("sync.max_retries must be > 0");
        }
        if !(self.sync.retry_backoff >= 1.0 && self.sync.retry_backoff <= MAX_RETRY_BACKOFF) {
            bail!(
                "sync.retry_backoff must be in [1.0, {}]",
                MAX_RETRY_BACKOFF
            );
        }
        if self.ai.max_retries == 0 {
            bail!("ai.max_retries must be > 0");
        }
        if self.store.page_size == 0 || self.store.page_size > 250 {
            bail!("store.page_size must be in [1, 250]");
        }

        if !self.store.domain.is_empty() {
            self.store.domain = normalize_store_domain(&self.store.domain)?;
        }

        if dry_run {
            return Ok(());
        }

        let mut missing = Vec::new();
        if self.store.domain.is_empty() {
            missing.push("SHOPIFY_STORE");
        }
        if self.store.access_token.as_deref().unwrap_or("").is_empty() {
            missing.push("SHOPIFY_TOKEN");
        }
        if !missing.is_empty() {
            bail!(
                "Missing required configuration: {} (set them in the environment or the config file, or use --dry-run)",
                missing.join(", ")
            );
        }

        Ok(())
    }
}

/// Strip a scheme and trailing slash, then require a bare lowercase hostname.
pub fn normalize_store_domain(raw: &str) -> Result<String> {
    let domain = raw
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_ascii_lowercase();

    let valid_chars = domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if domain.is_empty()
        || !valid_chars
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        bail!(
            "Invalid store domain '{}': expected a hostname like 'your-store.myshopify.com'",
            raw
        );
    }

    Ok(domain)
}

/// Load configuration from an optional TOML file, then the environment.
///
/// Validation is left to [`Config::validate`] because its rules depend on
/// whether the run is a dry run.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str::<Config>(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };

    config.apply_env(|name| std::env::var(name).ok())?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.api_version, "2025-10");
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.retry_backoff, 2.0);
        assert_eq!(config.ai.model, "gpt-4o-mini");
        assert_eq!(config.channel.app_key_prefix, "app_");
        assert!(!config.ai.is_enabled());
    }

    #[test]
    fn test_toml_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
[store]
domain = "demo.myshopify.com"

[sync]
batch_size = 25
"#,
        )
        .unwrap();
        assert_eq!(config.store.domain, "demo.myshopify.com");
        assert_eq!(config.store.page_size, 250);
        assert_eq!(config.sync.batch_size, 25);
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.server.bind, "0.0.0.0:5000");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::default();
        config.store.domain = "file.myshopify.com".into();
        config
            .apply_env(env(&[
                ("SHOPIFY_STORE", "env.myshopify.com"),
                ("SHOPIFY_ACCESS_TOKEN", "shpat_123"),
                ("OPENAI_API_KEY", "sk-test"),
                ("BATCH_SIZE", "10"),
                ("RETRY_BACKOFF", "1.5"),
            ]))
            .unwrap();

        assert_eq!(config.store.domain, "env.myshopify.com");
        assert_eq!(config.store.access_token.as_deref(), Some("shpat_123"));
        assert!(config.ai.is_enabled());
        assert_eq!(config.sync.batch_size, 10);
        assert_eq!(config.sync.retry_backoff, 1.5);
    }

    #[test]
    fn test_bad_numeric_env_is_an_error() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("MAX_RETRIES", "three")])).unwrap_err();
        assert!(err.to_string().contains("MAX_RETRIES"));
    }

    #[test]
    fn test_validate_requires_store_credentials_unless_dry_run() {
        let mut config = Config::default();
        assert!(config.validate(true).is_ok());

        let err = config.validate(false).unwrap_err().to_string();
        assert!(err.contains("SHOPIFY_STORE"));
        assert!(err.contains("SHOPIFY_TOKEN"));

        config.store.domain = "demo.myshopify.com".into();
        config.store.access_token = Some("shpat_1".into());
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = Config::default();
        config.sync.batch_size = 0;
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn test_validate_bounds_retry_backoff() {
        for bad in [0.5, 1e20, f64::INFINITY, f64::NAN] {
            let mut config = Config::default();
            config.sync.retry_backoff = bad;
            let err = config.validate(true).unwrap_err().to_string();
            assert!(err.contains("retry_backoff"), "{bad}: {err}");
        }

        let mut config = Config::default();
        config.sync.retry_backoff = MAX_RETRY_BACKOFF;
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn test_store_domain_normalization() {
        assert_eq!(
            normalize_store_domain("https://Demo.myshopify.com/").unwrap(),
            "demo.myshopify.com"
        );
        assert!(normalize_store_domain("not a domain").is_err());
        assert!(normalize_store_domain("localhost").is_err());
        assert!(normalize_store_domain("demo.myshopify.com/admin").is_err());
    }

    #[test]
    fn test_live_credentials_need_prefix_and_secret() {
        let mut channel = ChannelConfig::default();
        assert!(!channel.has_live_credentials());

        channel.app_key = Some("key_without_prefix".into());
        channel.secret = Some("s3cret".into());
        assert!(!channel.has_live_credentials());

        channel.app_key = Some("app_12345".into());
        assert!(channel.has_live_credentials());

        channel.secret = Some(String::new());
        assert!(!channel.has_live_credentials());
    }
}
