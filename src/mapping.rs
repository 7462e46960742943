//! Product mapping: store product → channel listing.
//!
//! [`ProductMapper`] asks a [`CompletionProvider`] to rewrite a product's
//! title, description, and hashtags for the channel audience. Results are
//! cached in memory under a fingerprint of the fields that influence the
//! rewrite. Whenever the provider is unconfigured, unreachable, or returns
//! something unusable, the mapper falls back to [`fallback_map`], so
//! mapping never fails.
//!
//! # Providers
//!
//! - **[`OpenAiProvider`]**: `POST {base_url}/chat/completions`.
//! - **[`DryRunProvider`]**: canned response, no network, no credentials.
//! - **[`DisabledProvider`]**: always errors; selected when no API key is set.
//!
//! Use [`create_provider`] to pick one from the configuration.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AiConfig;
use crate::error::{Result, SyncError};
use crate::http::{HttpMethod, HttpRequest, HttpTransport};
use crate::models::{CanonicalProduct, ChannelProduct, ChannelVariant};
use crate::retry::RetryPolicy;

/// Used when a product has no tags to derive hashtags from.
pub const DEFAULT_HASHTAGS: [&str; 3] = ["#TikTokMadeMeBuyIt", "#Trending", "#ShopNow"];

pub const MAX_HASHTAGS: usize = 5;
pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

const FINGERPRINT_DESCRIPTION_CHARS: usize = 100;
const PROMPT_VARIANTS: usize = 3;

const SYSTEM_PROMPT: &str = "You are an expert at optimizing e-commerce products for TikTok Shop.
Analyze the product data and provide:
1. An optimized title (max 100 characters, catchy and TikTok-friendly)
2. An optimized description (max 500 characters, engaging, including trending hashtags)
3. Exactly 5 trending hashtags such as #TikTokMadeMeBuyIt, #Y2K, #Aesthetic

Respond with a single JSON object with these keys:
- tiktok_title: string
- tiktok_description: string
- hashtags: array of 5 hashtag strings

Focus on trending TikTok aesthetics and viral product copy.";

/// A chat-completion backend returning raw assistant text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// False for a provider that can never answer.
    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl CompletionProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(SyncError::Config("AI provider is not configured".into()))
    }
}

// ============ Dry-run Provider ============

/// Returns the same canned response for every prompt.
///
/// The canned fields are blank, so every mapped product keeps its store
/// title and receives fallback hashtags.
pub struct DryRunProvider;

pub const DRY_RUN_RESPONSE: &str = r#"{"tiktok_title": "", "tiktok_description": "", "hashtags": []}"#;

#[async_trait]
impl CompletionProvider for DryRunProvider {
    fn model_name(&self) -> &str {
        "dry-run"
    }

    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        let preview: String = user.chars().take(100).collect();
        info!("[DRY RUN] Would call the AI service with prompt: {}...", preview);
        Ok(DRY_RUN_RESPONSE.to_string())
    }
}

// ============ OpenAI Provider ============

/// Chat completions over HTTP.
///
/// One `complete` is one HTTP request. Retries belong to the
/// [`ProductMapper`], which bounds attempts per product.
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    endpoint: String,
    temperature: f64,
    max_tokens: u32,
    transport: Arc<dyn HttpTransport>,
}

impl OpenAiProvider {
    pub fn new(config: &AiConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SyncError::Config("OPENAI_API_KEY is not set".into()))?;

        Ok(Self {
            api_key,
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            transport,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
        .to_string();

        let req = HttpRequest::new(HttpMethod::Post, self.endpoint.as_str())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .body(body);
        let resp = self.transport.send(req).await?;
        if !resp.is_success() {
            return Err(SyncError::from_status(resp.status, &resp.text()));
        }

        let json: Value = serde_json::from_slice(&resp.body)?;
        parse_completion_content(&json)
    }
}

/// Pull `choices[0].message.content` out of a chat completion response.
fn parse_completion_content(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| SyncError::AiResponse("completion has no message content".into()))
}

/// Pick a provider for the configuration.
///
/// Dry-run wins over everything; without an API key the mapper runs on the
/// fallback path through [`DisabledProvider`].
pub fn create_provider(
    config: &AiConfig,
    dry_run: bool,
    transport: Arc<dyn HttpTransport>,
) -> Box<dyn CompletionProvider> {
    if dry_run {
        return Box::new(DryRunProvider);
    }
    if !config.is_enabled() {
        warn!("OPENAI_API_KEY is not set; product mapping will use the fallback transform");
        return Box::new(DisabledProvider);
    }
    match OpenAiProvider::new(config, transport) {
        Ok(provider) => Box::new(provider),
        Err(e) => {
            warn!("AI provider unavailable ({}); using the fallback transform", e);
            Box::new(DisabledProvider)
        }
    }
}

// ============ Mapper ============

/// Counters for one mapper's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingStats {
    pub ai_calls: usize,
    pub cache_hits: usize,
    pub fallbacks: usize,
}

/// Fields read out of a completion.
#[derive(Debug, Default, PartialEq, Deserialize)]
pub struct AiMapping {
    #[serde(default, rename = "tiktok_title", alias = "title")]
    pub title: Option<String>,
    #[serde(default, rename = "tiktok_description", alias = "description")]
    pub description: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

pub struct ProductMapper {
    provider: Box<dyn CompletionProvider>,
    cache: HashMap<String, ChannelProduct>,
    retry: RetryPolicy,
    stats: MappingStats,
    last_ai_ok: Option<bool>,
}

impl ProductMapper {
    /// `retry.max_attempts` bounds provider invocations per product; the
    /// backoff is slept between them.
    pub fn new(provider: Box<dyn CompletionProvider>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            cache: HashMap::new(),
            retry,
            stats: MappingStats::default(),
            last_ai_ok: None,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn ai_configured(&self) -> bool {
        self.provider.is_configured()
    }

    pub fn stats(&self) -> MappingStats {
        self.stats
    }

    /// Whether the most recent provider call succeeded; `None` before any call.
    pub fn last_ai_ok(&self) -> Option<bool> {
        self.last_ai_ok
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        let n = self.cache.len();
        self.cache.clear();
        info!("Mapping cache cleared ({} entries)", n);
    }

    /// Map one product. Never fails: any provider problem yields the fallback.
    pub async fn map_product(&mut self, product: &CanonicalProduct, use_cache: bool) -> ChannelProduct {
        let key = fingerprint(product);

        if use_cache {
            if let Some(hit) = self.cache.get(&key) {
                debug!("Using cached mapping for product {}", product.id);
                self.stats.cache_hits += 1;
                return hit.clone();
            }
        }

        let prompt = build_prompt(product);

        match self.request_mapping(&product.id, &prompt).await {
            Ok(ai) => {
                let mapped = merge_ai_mapping(product, ai);
                if use_cache {
                    self.cache.insert(key, mapped.clone());
                }
                info!("Mapped product {} for the channel", product.id);
                mapped
            }
            Err(e) => {
                warn!("Using fallback mapping for product {}: {}", product.id, e);
                self.stats.fallbacks += 1;
                fallback_map(product)
            }
        }
    }

    async fn request_mapping(&mut self, product_id: &str, prompt: &str) -> Result<AiMapping> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.stats.ai_calls += 1;

            let outcome = self.provider.complete(SYSTEM_PROMPT, prompt).await;
            self.last_ai_ok = Some(outcome.is_ok());

            let err = match outcome.and_then(|raw| parse_ai_response(&raw)) {
                Ok(mapping) => return Ok(mapping),
                Err(e) => e,
            };

            // Nothing changes between attempts for these.
            if matches!(err, SyncError::Config(_) | SyncError::Auth { .. }) {
                return Err(err);
            }
            if attempt >= self.retry.max_attempts {
                return Err(err);
            }
            let delay = self.retry.delay_for(attempt - 1);
            warn!(
                "AI mapping for product {} failed (attempt {}/{}), retrying in {:?}: {}",
                product_id, attempt, self.retry.max_attempts, delay, err
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Map every product in order. The output has one entry per input.
    pub async fn batch_map_products(
        &mut self,
        products: &[CanonicalProduct],
        use_cache: bool,
    ) -> Vec<ChannelProduct> {
        let total = products.len();
        let mut results = Vec::with_capacity(total);
        for (i, product) in products.iter().enumerate() {
            info!("Mapping product {}/{}: {}", i + 1, total, product.title);
            results.push(self.map_product(product, use_cache).await);
        }
        results
    }
}

/// Cache key over the fields that influence the rewrite.
///
/// Tag order does not matter; only the first 100 characters of the
/// description count.
pub fn fingerprint(product: &CanonicalProduct) -> String {
    let mut tags = product.tags.clone();
    tags.sort();
    let description: String = product
        .description
        .chars()
        .take(FINGERPRINT_DESCRIPTION_CHARS)
        .collect();

    // serde_json objects serialize with sorted keys.
    let stable = json!({
        "id": product.id,
        "title": product.title,
        "description": description,
        "product_type": product.product_type,
        "tags": tags,
    });

    let mut hasher = Sha256::new();
    hasher.update(stable.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// The user message sent to the provider.
pub fn build_prompt(product: &CanonicalProduct) -> String {
    let description: String = product.description.chars().take(MAX_DESCRIPTION_CHARS).collect();
    let variants: Vec<Value> = product
        .variants
        .iter()
        .take(PROMPT_VARIANTS)
        .map(|v| json!({"title": v.title, "price": v.price}))
        .collect();

    let summary = json!({
        "title": product.title,
        "description": description,
        "product_type": product.product_type,
        "vendor": product.vendor,
        "tags": product.tags,
        "variants": variants,
    });
    let summary = serde_json::to_string_pretty(&summary).unwrap_or_else(|_| summary.to_string());

    format!(
        "Optimize this product for TikTok Shop:\n\n{}\n\n\
         Provide a TikTok-optimized title, a description with hashtags, and trending hashtags.\n\
         Include hashtags like #TikTokMadeMeBuyIt where relevant.",
        summary
    )
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Decode completion text into an [`AiMapping`].
pub fn parse_ai_response(raw: &str) -> Result<AiMapping> {
    let text = strip_code_fence(raw);
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SyncError::AiResponse(format!("invalid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(SyncError::AiResponse("expected a JSON object".into()));
    }
    serde_json::from_value(value).map_err(|e| SyncError::AiResponse(e.to_string()))
}

/// Deterministic mapping with no network call.
///
/// Up to five tags become hashtags; a product without tags gets
/// [`DEFAULT_HASHTAGS`]. The hashtags are appended to the description
/// after a blank line.
pub fn fallback_map(product: &CanonicalProduct) -> ChannelProduct {
    let mut hashtags: Vec<String> = product
        .tags
        .iter()
        .filter_map(|t| to_hashtag(t))
        .take(MAX_HASHTAGS)
        .collect();
    if hashtags.is_empty() {
        hashtags = DEFAULT_HASHTAGS.iter().map(|h| h.to_string()).collect();
    }

    let joined = hashtags.join(" ");
    let description = if product.description.is_empty() {
        joined
    } else {
        format!("{}\n\n{}", product.description, joined)
    };

    ChannelProduct {
        title: product.title.clone(),
        description,
        hashtags,
        images: product.images.clone(),
        variants: product.variants.iter().map(ChannelVariant::from).collect(),
        source_id: product.id.clone(),
        source_handle: product.handle.clone(),
    }
}

fn to_hashtag(tag: &str) -> Option<String> {
    let compact: String = tag.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || compact == "#" {
        return None;
    }
    if compact.starts_with('#') {
        Some(compact)
    } else {
        Some(format!("#{}", compact))
    }
}

/// Combine a completion with the product. Blank AI fields are filled from
/// the fallback.
fn merge_ai_mapping(product: &CanonicalProduct, ai: AiMapping) -> ChannelProduct {
    let mut mapped = fallback_map(product);

    if let Some(title) = ai.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        mapped.title = truncate_chars(&title, MAX_TITLE_CHARS);
    }
    if let Some(desc) = ai
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
    {
        mapped.description = truncate_chars(&desc, MAX_DESCRIPTION_CHARS);
    }

    let hashtags: Vec<String> = ai
        .hashtags
        .iter()
        .filter_map(|h| to_hashtag(h))
        .take(MAX_HASHTAGS)
        .collect();
    if !hashtags.is_empty() {
        mapped.hashtags = hashtags;
    }

    mapped
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
