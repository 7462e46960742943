//! Channel (TikTok Shop partner API) client.
//!
//! Pushes inventory, listings, and tracking numbers; reads channel orders.
//!
//! # Modes
//!
//! | Mode | Selected when | Network |
//! |------|---------------|---------|
//! | `DryRun` | `--dry-run` | none, every call logged |
//! | `Mock` | app key missing or without the `app_` prefix, or no secret | none, every call logged |
//! | `Live` | valid credentials | signed requests |
//!
//! # Signing
//!
//! Every live request carries `app_key`, a millisecond `timestamp`, and
//! `sign`, the hex HMAC-SHA256 (keyed with the app secret) of
//!
//! ```text
//! METHOD\nPATH\nSORTED_QUERY\nTIMESTAMP\nBODY
//! ```
//!
//! Query parameters are sorted by key and RFC 3986-encoded, for signing and
//! on the wire alike.
//!
//! # Batching
//!
//! Inventory bulk updates stop at the first rejected chunk. Product bulk
//! creation keeps going and counts a rejected chunk as failed items.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::ChannelConfig;
use crate::error::{Result, SyncError};
use crate::http::{encode_query, HttpMethod, HttpRequest, HttpTransport};
use crate::models::{CanonicalOrder, ChannelProduct, InventoryUpdate, OrderLineItem, SyncResult};
use crate::retry::RetryPolicy;
use crate::store::{clamp_quantity, optional_scalar, scalar_string};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Live,
    Mock,
    DryRun,
}

impl ChannelMode {
    pub fn resolve(config: &ChannelConfig, dry_run: bool) -> Self {
        if dry_run {
            ChannelMode::DryRun
        } else if config.has_live_credentials() {
            ChannelMode::Live
        } else {
            ChannelMode::Mock
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelMode::Live => "live",
            ChannelMode::Mock => "mock",
            ChannelMode::DryRun => "dry-run",
        }
    }

    fn log_tag(self) -> &'static str {
        match self {
            ChannelMode::DryRun => "[DRY RUN]",
            _ => "[MOCK]",
        }
    }
}

/// Response envelope shared by every channel endpoint. `code == 0` is success.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

pub struct ChannelClient {
    mode: ChannelMode,
    api_base: String,
    app_key: String,
    secret: String,
    access_token: Option<String>,
    batch_size: usize,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
}

impl ChannelClient {
    pub fn new(
        config: &ChannelConfig,
        batch_size: usize,
        retry: RetryPolicy,
        transport: Arc<dyn HttpTransport>,
        dry_run: bool,
    ) -> Self {
        let mode = ChannelMode::resolve(config, dry_run);
        if mode == ChannelMode::Mock {
            info!("Channel client initialized in MOCK MODE; calls are logged only");
        }

        Self {
            mode,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            app_key: config.app_key.clone().unwrap_or_default(),
            secret: config.secret.clone().unwrap_or_default(),
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
            batch_size: batch_size.max(1),
            transport,
            retry,
        }
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    fn is_simulated(&self) -> bool {
        self.mode != ChannelMode::Live
    }

    /// Set one SKU's stock.
    pub async fn update_inventory(&self, sku: &str, quantity: u32) -> Result<bool> {
        if self.is_simulated() {
            info!("{} Channel: SKU {} -> stock {}", self.mode.log_tag(), sku, quantity);
            return Ok(true);
        }

        let payload = json!({"sku_id": sku, "quantity": quantity});
        let outcome = self
            .call(HttpMethod::Post, "/inventory/update", Vec::new(), Some(&payload))
            .await;
        match settle("update inventory", outcome)? {
            Some(_) => {
                info!("Updated inventory for SKU {} to {}", sku, quantity);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Push stock levels in chunks. Returns `false` at the first failed chunk.
    pub async fn bulk_update_inventory(&self, updates: &[InventoryUpdate]) -> Result<bool> {
        if self.is_simulated() {
            let tag = self.mode.log_tag();
            info!("{} Channel: bulk update {} inventory items", tag, updates.len());
            for item in updates.iter().take(5) {
                info!("{}   SKU {} -> stock {}", tag, item.sku, item.quantity);
            }
            if updates.len() > 5 {
                info!("{}   ... and {} more items", tag, updates.len() - 5);
            }
            return Ok(true);
        }

        let total_batches = updates.len().div_ceil(self.batch_size);
        for (i, batch) in updates.chunks(self.batch_size).enumerate() {
            let batch_num = i + 1;
            info!(
                "Processing inventory batch {}/{} ({} items)",
                batch_num,
                total_batches,
                batch.len()
            );

            let inventory_list: Vec<Value> = batch
                .iter()
                .map(|u| json!({"sku_id": u.sku, "quantity": u.quantity}))
                .collect();
            let payload = json!({ "inventory_list": inventory_list });

            let outcome = self
                .call(HttpMethod::Post, "/inventory/bulk_update", Vec::new(), Some(&payload))
                .await;
            if settle("bulk update inventory", outcome)?.is_none() {
                error!("Inventory batch {}/{} failed, stopping", batch_num, total_batches);
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Create one listing. Returns the channel product id.
    pub async fn create_product(&self, product: &ChannelProduct) -> Result<Option<String>> {
        if self.is_simulated() {
            info!("{} Channel: create product '{}'", self.mode.log_tag(), product.title);
            return Ok(Some("mock_id_0".to_string()));
        }

        let payload = serde_json::to_value(product)?;
        let outcome = self
            .call(HttpMethod::Post, "/products/create", Vec::new(), Some(&payload))
            .await;
        match settle("create product", outcome)? {
            Some(data) => {
                let id = data.get("product_id").and_then(optional_scalar);
                info!("Created product {}", id.as_deref().unwrap_or("(no id returned)"));
                Ok(id)
            }
            None => Ok(None),
        }
    }

    /// Create listings in chunks, counting per-item outcomes.
    ///
    /// A rejected chunk counts all its items as failed and the next chunk is
    /// still attempted. Items the channel does not acknowledge count as failed.
    pub async fn bulk_create_products(&self, products: &[ChannelProduct]) -> Result<SyncResult> {
        let mut result = SyncResult::with_total(products.len());

        if self.is_simulated() {
            let tag = self.mode.log_tag();
            info!("{} Channel: would create {} products", tag, products.len());
            for (i, p) in products.iter().take(3).enumerate() {
                info!("{}   Product {}: {}", tag, i + 1, p.title);
            }
            if products.len() > 3 {
                info!("{}   ... and {} more products", tag, products.len() - 3);
            }
            result.success_count = products.len();
            result.ids = (0..products.len()).map(|i| format!("mock_id_{}", i)).collect();
            return Ok(result);
        }

        let total_batches = products.len().div_ceil(self.batch_size);
        for (i, batch) in products.chunks(self.batch_size).enumerate() {
            let batch_num = i + 1;
            info!(
                "Processing product batch {}/{} ({} products)",
                batch_num,
                total_batches,
                batch.len()
            );

            let payload = json!({ "products": batch });
            let outcome = self
                .call(HttpMethod::Post, "/products/bulk_create", Vec::new(), Some(&payload))
                .await;

            let Some(data) = settle("bulk create products", outcome)? else {
                error!("Product batch {}/{} failed", batch_num, total_batches);
                result.failed_count += batch.len();
                continue;
            };

            let items = data
                .get("results")
                .and_then(|r| r.as_array())
                .cloned()
                .unwrap_or_default();
            let mut succeeded = 0;
            for item in items.iter().take(batch.len()) {
                if item.get("success").and_then(|s| s.as_bool()).unwrap_or(false) {
                    succeeded += 1;
                    if let Some(id) = item.get("product_id").and_then(optional_scalar) {
                        result.ids.push(id);
                    }
                } else {
                    warn!(
                        "Failed to create product: {}",
                        item.get("message").and_then(|m| m.as_str()).unwrap_or("unknown error")
                    );
                }
            }
            if items.len() < batch.len() {
                warn!(
                    "Channel acknowledged {} of {} products in batch {}",
                    items.len(),
                    batch.len(),
                    batch_num
                );
            }
            result.success_count += succeeded;
            result.failed_count += batch.len() - succeeded;
        }

        info!(
            "Bulk create completed: {} success, {} failed",
            result.success_count, result.failed_count
        );
        Ok(result)
    }

    /// Replace an existing listing's content.
    pub async fn update_product(&self, product_id: &str, product: &ChannelProduct) -> Result<bool> {
        if self.is_simulated() {
            info!(
                "{} Channel: update product {} ('{}')",
                self.mode.log_tag(),
                product_id,
                product.title
            );
            return Ok(true);
        }

        let mut payload = serde_json::to_value(product)?;
        if let Value::Object(ref mut map) = payload {
            map.insert("product_id".to_string(), Value::String(product_id.to_string()));
        }

        let outcome = self
            .call(HttpMethod::Put, "/products/update", Vec::new(), Some(&payload))
            .await;
        match settle("update product", outcome)? {
            Some(_) => {
                info!("Updated product {}", product_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// List channel orders, optionally bounded by millisecond timestamps.
    pub async fn get_orders(
        &self,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: usize,
    ) -> Result<Vec<CanonicalOrder>> {
        if self.is_simulated() {
            info!("{} Channel: would fetch up to {} orders", self.mode.log_tag(), limit);
            return Ok(Vec::new());
        }

        let mut params = vec![("limit".to_string(), limit.to_string())];
        if let Some(t) = start_time {
            params.push(("start_time".to_string(), t.to_string()));
        }
        if let Some(t) = end_time {
            params.push(("end_time".to_string(), t.to_string()));
        }

        let outcome = self.call(HttpMethod::Get, "/orders/list", params, None).await;
        let Some(data) = settle("fetch orders", outcome)? else {
            return Ok(Vec::new());
        };

        let raw: Vec<RawChannelOrder> = match data.get("orders") {
            Some(orders) => match serde_json::from_value(orders.clone()) {
                Ok(orders) => orders,
                Err(e) => {
                    error!("Could not decode channel orders: {}", e);
                    return Ok(Vec::new());
                }
            },
            None => Vec::new(),
        };

        let orders: Vec<CanonicalOrder> = raw.into_iter().map(decode_order).collect();
        info!("Fetched {} orders from the channel", orders.len());
        Ok(orders)
    }

    /// Attach shipment tracking to a channel order.
    pub async fn update_order_tracking(
        &self,
        order_id: &str,
        tracking_number: &str,
        tracking_url: Option<&str>,
        carrier: Option<&str>,
    ) -> Result<bool> {
        if self.is_simulated() {
            info!(
                "{} Channel: order {} tracking {} ({})",
                self.mode.log_tag(),
                order_id,
                tracking_number,
                carrier.unwrap_or("unknown carrier")
            );
            return Ok(true);
        }

        let mut payload = json!({
            "order_id": order_id,
            "tracking_number": tracking_number,
        });
        if let Some(url) = tracking_url {
            payload["tracking_url"] = Value::String(url.to_string());
        }
        if let Some(c) = carrier {
            payload["carrier"] = Value::String(c.to_string());
        }

        let outcome = self
            .call(HttpMethod::Post, "/orders/update_tracking", Vec::new(), Some(&payload))
            .await;
        match settle("update order tracking", outcome)? {
            Some(_) => {
                info!("Updated tracking for order {}", order_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// One signed request through the retry policy.
    ///
    /// Each attempt is re-signed with a fresh timestamp.
    async fn call(
        &self,
        method: HttpMethod,
        path: &str,
        params: Vec<(String, String)>,
        payload: Option<&Value>,
    ) -> Result<Envelope> {
        let body = payload.map(|p| p.to_string()).unwrap_or_default();
        let label = format!("{} {}", method.as_str(), path);

        self.retry
            .run(&label, move || {
                let timestamp = chrono::Utc::now().timestamp_millis();
                let request = self.signed_request(method, path, params.clone(), &body, timestamp);
                async move {
                    let resp = self.transport.send(request?).await?;
                    if !resp.is_success() {
                        return Err(SyncError::from_status(resp.status, &resp.text()));
                    }
                    Ok(serde_json::from_slice::<Envelope>(&resp.body)?)
                }
            })
            .await
    }

    fn signed_request(
        &self,
        method: HttpMethod,
        path: &str,
        mut params: Vec<(String, String)>,
        body: &str,
        timestamp: i64,
    ) -> Result<HttpRequest> {
        params.push(("app_key".to_string(), self.app_key.clone()));
        params.push(("timestamp".to_string(), timestamp.to_string()));
        params.sort();

        let sign = sign_request(
            &self.secret,
            method,
            path,
            &encode_query(&params),
            timestamp,
            body,
        )?;
        params.push(("sign".to_string(), sign));

        let url = format!("{}{}?{}", self.api_base, path, encode_query(&params));
        let mut request = HttpRequest::new(method, url)
            .header("Content-Type", "application/json")
            .body(body.as_bytes().to_vec());
        if let Some(ref token) = self.access_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        Ok(request)
    }
}

/// Hex HMAC-SHA256 over the canonical request string.
///
/// `sorted_query` must already be sorted by key and encoded.
pub fn sign_request(
    secret: &str,
    method: HttpMethod,
    path: &str,
    sorted_query: &str,
    timestamp: i64,
    body: &str,
) -> Result<String> {
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        path,
        sorted_query,
        timestamp,
        body
    );
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SyncError::Config(format!("invalid channel secret: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Turn a call outcome into `Some(data)` on success and `None` on a failure
/// that callers count rather than raise. Auth errors pass through.
fn settle(label: &str, outcome: Result<Envelope>) -> Result<Option<Value>> {
    match outcome {
        Ok(env) if env.code == 0 => Ok(Some(env.data)),
        Ok(env) => {
            let err = SyncError::Rejected(format!("code {}: {}", env.code, env.message));
            error!("Channel {} failed: {}", label, err);
            Ok(None)
        }
        Err(e) if e.is_auth() => Err(e),
        Err(e) => {
            error!("Channel {} failed: {}", label, e);
            Ok(None)
        }
    }
}

// ============ Raw channel orders ============

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawChannelOrder {
    #[serde(alias = "order_id")]
    id: Value,
    order_number: Value,
    #[serde(alias = "buyer_email")]
    email: Option<String>,
    #[serde(alias = "payment_status")]
    financial_status: Option<String>,
    #[serde(alias = "order_status")]
    fulfillment_status: Option<String>,
    #[serde(alias = "item_list")]
    line_items: Vec<RawChannelLineItem>,
    #[serde(alias = "total_amount")]
    total_price: Value,
    #[serde(alias = "create_time")]
    created_at: Value,
    #[serde(alias = "update_time")]
    updated_at: Value,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawChannelLineItem {
    #[serde(alias = "seller_sku")]
    sku: Option<String>,
    #[serde(alias = "product_name")]
    title: Option<String>,
    quantity: Option<i64>,
    #[serde(alias = "sale_price")]
    price: Value,
    #[serde(alias = "sku_id")]
    variant_id: Value,
}

fn decode_order(raw: RawChannelOrder) -> CanonicalOrder {
    let id = scalar_string(&raw.id);
    let order_number = Some(scalar_string(&raw.order_number))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| id.clone());

    CanonicalOrder {
        id,
        order_number,
        email: raw.email.unwrap_or_default(),
        financial_status: raw.financial_status.unwrap_or_default(),
        fulfillment_status: raw.fulfillment_status.unwrap_or_default(),
        line_items: raw
            .line_items
            .into_iter()
            .map(|li| OrderLineItem {
                sku: li.sku.unwrap_or_default().trim().to_string(),
                title: li.title.unwrap_or_default(),
                quantity: clamp_quantity(li.quantity),
                price: scalar_string(&li.price),
                variant_id: optional_scalar(&li.variant_id),
            })
            .collect(),
        total_price: scalar_string(&raw.total_price),
        created_at: scalar_string(&raw.created_at),
        updated_at: scalar_string(&raw.updated_at),
    }
}
