//! Store (Shopify Admin REST) client.
//!
//! Reads products, inventory levels, and orders and decodes them into the
//! canonical types of [`crate::models`]. Nothing outside this module sees a
//! raw Shopify payload.
//!
//! # Pagination
//!
//! Product listing uses cursor pagination first: the `page_info` token of
//! the `Link: <...>; rel="next"` response header. If that path fails with a
//! non-auth error, its partial results are discarded and the listing is
//! retried with page numbers, capped at [`MAX_PAGE_NUMBER_PAGES`] pages.
//!
//! # Rate limits
//!
//! Every response's `X-Shopify-Shop-Api-Call-Limit: used/limit` header is
//! inspected. Usage above 75% logs a warning, above 90% an error. Requests
//! are never delayed because of it.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level};

use crate::config::StoreConfig;
use crate::error::{Result, SyncError};
use crate::http::{encode_query, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::models::{
    CanonicalOrder, CanonicalProduct, CanonicalVariant, InventoryLevel, OrderLineItem,
};
use crate::retry::RetryPolicy;

/// Upper bound on page-number pagination.
pub const MAX_PAGE_NUMBER_PAGES: usize = 10;

/// Largest page the Admin API serves.
pub const MAX_PAGE_SIZE: usize = 250;

const CALL_LIMIT_HEADER: &str = "X-Shopify-Shop-Api-Call-Limit";

pub struct StoreClient {
    base_url: String,
    access_token: String,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
    dry_run: bool,
}

impl StoreClient {
    /// Build a client for `https://{domain}/admin/api/{api_version}`.
    ///
    /// Outside dry-run, a domain and an access token are required.
    pub fn new(
        config: &StoreConfig,
        retry: RetryPolicy,
        transport: Arc<dyn HttpTransport>,
        dry_run: bool,
    ) -> Result<Self> {
        let token = config.access_token.clone().unwrap_or_default();
        if !dry_run {
            if config.domain.is_empty() {
                return Err(SyncError::Config("store domain is not configured".into()));
            }
            if token.is_empty() {
                return Err(SyncError::Config(
                    "store access token is not configured".into(),
                ));
            }
        }

        Ok(Self {
            base_url: format!(
                "https://{}/admin/api/{}",
                config.domain, config.api_version
            ),
            access_token: token,
            transport,
            retry,
            dry_run,
        })
    }

    /// Fetch every product in the catalog.
    pub async fn fetch_all_products(&self, page_size: usize) -> Result<Vec<CanonicalProduct>> {
        self.fetch_products(page_size, None).await
    }

    /// Fetch products, stopping once `max_items` have been collected.
    pub async fn fetch_products(
        &self,
        page_size: usize,
        max_items: Option<usize>,
    ) -> Result<Vec<CanonicalProduct>> {
        if self.dry_run {
            info!("[DRY RUN] Would fetch products from the store");
            return Ok(Vec::new());
        }

        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let cap = max_items.unwrap_or(usize::MAX);

        match self.fetch_products_by_cursor(page_size, cap).await {
            Ok(products) => {
                info!("Fetched {} products", products.len());
                Ok(products)
            }
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                warn!(
                    "Cursor pagination failed ({}), falling back to page numbers",
                    e
                );
                let products = self.fetch_products_by_page(page_size, cap).await?;
                info!("Fetched {} products (page-number pagination)", products.len());
                Ok(products)
            }
        }
    }

    async fn fetch_products_by_cursor(
        &self,
        page_size: usize,
        cap: usize,
    ) -> Result<Vec<CanonicalProduct>> {
        let mut products = Vec::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![("limit".to_string(), page_size.to_string())];
            if let Some(ref c) = cursor {
                params.push(("page_info".to_string(), c.clone()));
            }
            let url = format!("{}/products.json?{}", self.base_url, encode_query(&params));

            let resp = self.get(&url, "fetch products").await?;
            let page: ProductsPage = decode_json(&resp)?;
            let count = page.products.len();
            products.extend(page.products.into_iter().filter_map(decode_product));

            if count < page_size || products.len() >= cap {
                break;
            }

            match resp.header("Link").and_then(parse_next_cursor) {
                Some(next) if seen_cursors.insert(next.clone()) => {
                    debug!("Fetched {} products so far", products.len());
                    cursor = Some(next);
                }
                Some(next) => {
                    warn!("Store returned a repeated page cursor '{}', stopping", next);
                    break;
                }
                None => break,
            }
        }

        Ok(products)
    }

    async fn fetch_products_by_page(
        &self,
        page_size: usize,
        cap: usize,
    ) -> Result<Vec<CanonicalProduct>> {
        let mut products = Vec::new();

        for page in 1..=MAX_PAGE_NUMBER_PAGES {
            let params = vec![
                ("limit".to_string(), page_size.to_string()),
                ("page".to_string(), page.to_string()),
            ];
            let url = format!("{}/products.json?{}", self.base_url, encode_query(&params));

            let resp = self.get(&url, "fetch products").await?;
            let page_products: ProductsPage = decode_json(&resp)?;
            let count = page_products.products.len();
            products.extend(page_products.products.into_iter().filter_map(decode_product));

            if count < page_size || products.len() >= cap {
                return Ok(products);
            }
        }

        warn!(
            "Stopped product listing after {} pages; the catalog may be incomplete",
            MAX_PAGE_NUMBER_PAGES
        );
        Ok(products)
    }

    /// Fetch a single product. A missing product is `Ok(None)`.
    pub async fn fetch_product(&self, id: &str) -> Result<Option<CanonicalProduct>> {
        if self.dry_run {
            info!("[DRY RUN] Would fetch product {}", id);
            return Ok(None);
        }

        let url = format!("{}/products/{}.json", self.base_url, id);
        match self.get(&url, "fetch product").await {
            Ok(resp) => {
                let single: SingleProduct = decode_json(&resp)?;
                Ok(decode_product(single.product))
            }
            Err(SyncError::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch stock levels.
    ///
    /// With `item_ids`, each inventory item is looked up on its own, its SKU
    /// is read from the inventory item record, and failed lookups (other
    /// than auth failures) are skipped. Without ids, levels are derived from
    /// the product listing.
    pub async fn fetch_inventory_levels(
        &self,
        item_ids: Option<&[String]>,
    ) -> Result<Vec<InventoryLevel>> {
        if self.dry_run {
            info!("[DRY RUN] Would fetch inventory levels from the store");
            return Ok(Vec::new());
        }

        match item_ids {
            Some(ids) => self.fetch_levels_by_id(ids).await,
            None => {
                let products = self.fetch_all_products(MAX_PAGE_SIZE).await?;
                Ok(inventory_from_products(&products))
            }
        }
    }

    async fn fetch_levels_by_id(&self, ids: &[String]) -> Result<Vec<InventoryLevel>> {
        let mut levels = Vec::new();

        for id in ids {
            let params = vec![("inventory_item_ids".to_string(), id.clone())];
            let url = format!(
                "{}/inventory_levels.json?{}",
                self.base_url,
                encode_query(&params)
            );

            let page = match self.get(&url, "fetch inventory level").await {
                Ok(resp) => decode_json::<InventoryLevelsPage>(&resp),
                Err(e) => Err(e),
            };

            let found: Vec<InventoryLevel> = match page {
                Ok(page) => page.inventory_levels.into_iter().map(decode_level).collect(),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    warn!("Could not fetch inventory for item {}: {}", id, e);
                    continue;
                }
            };
            if found.is_empty() {
                continue;
            }

            let sku = self.fetch_item_sku(id).await?;
            levels.extend(found.into_iter().map(|mut level| {
                level.sku = sku.clone();
                level
            }));
        }

        Ok(levels)
    }

    /// SKU of an inventory item. Lookup failures other than auth are `None`.
    async fn fetch_item_sku(&self, id: &str) -> Result<Option<String>> {
        let url = format!("{}/inventory_items/{}.json", self.base_url, id);
        let item = match self.get(&url, "fetch inventory item").await {
            Ok(resp) => decode_json::<SingleInventoryItem>(&resp),
            Err(e) => Err(e),
        };

        match item {
            Ok(item) => Ok(item
                .inventory_item
                .sku
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())),
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                warn!("Could not resolve SKU for inventory item {}: {}", id, e);
                Ok(None)
            }
        }
    }

    /// Fetch the most recent orders, newest first.
    pub async fn fetch_recent_orders(
        &self,
        limit: usize,
        status: &str,
    ) -> Result<Vec<CanonicalOrder>> {
        if self.dry_run {
            info!(
                "[DRY RUN] Would fetch {} recent orders with status {}",
                limit, status
            );
            return Ok(Vec::new());
        }

        let params = vec![
            ("limit".to_string(), limit.clamp(1, MAX_PAGE_SIZE).to_string()),
            ("status".to_string(), status.to_string()),
            ("order".to_string(), "created_at desc".to_string()),
        ];
        let url = format!("{}/orders.json?{}", self.base_url, encode_query(&params));

        let resp = self.get(&url, "fetch orders").await?;
        let page: OrdersPage = decode_json(&resp)?;
        let orders: Vec<CanonicalOrder> = page.orders.into_iter().map(decode_order).collect();

        info!("Fetched {} orders", orders.len());
        Ok(orders)
    }

    /// One GET through the retry policy. Non-success statuses become errors.
    async fn get(&self, url: &str, label: &str) -> Result<HttpResponse> {
        self.retry
            .run(label, move || async move {
                let req = HttpRequest::new(HttpMethod::Get, url)
                    .header("X-Shopify-Access-Token", self.access_token.clone())
                    .header("Accept", "application/json");
                let resp = self.transport.send(req).await?;

                if let Some(usage) = resp.header(CALL_LIMIT_HEADER).and_then(parse_call_limit) {
                    log_call_limit(usage);
                }

                if !resp.is_success() {
                    return Err(SyncError::from_status(resp.status, &resp.text()));
                }
                Ok(resp)
            })
            .await
    }
}

/// Flatten product variants into inventory levels.
///
/// Variants without a SKU or without an inventory item are skipped; the
/// number of each is logged.
pub fn inventory_from_products(products: &[CanonicalProduct]) -> Vec<InventoryLevel> {
    let mut levels = Vec::new();
    let mut missing_sku = 0usize;
    let mut untracked = 0usize;

    for product in products {
        for variant in &product.variants {
            if variant.sku.is_empty() {
                missing_sku += 1;
                continue;
            }
            let Some(ref item_id) = variant.inventory_item_id else {
                untracked += 1;
                continue;
            };
            levels.push(InventoryLevel {
                inventory_item_id: item_id.clone(),
                sku: Some(variant.sku.clone()),
                location_id: None,
                available: variant.inventory_quantity,
                updated_at: product.updated_at.clone(),
            });
        }
    }

    if missing_sku > 0 || untracked > 0 {
        info!(
            "Skipped {} variants without SKU and {} without inventory tracking",
            missing_sku, untracked
        );
    }
    levels
}

/// Extract the `page_info` token of the `rel="next"` entry of a Link header.
pub fn parse_next_cursor(link: &str) -> Option<String> {
    link.split(',')
        .find(|part| part.contains("rel=\"next\""))
        .and_then(|part| {
            let start = part.find('<')? + 1;
            let end = part[start..].find('>')? + start;
            let url = &part[start..end];
            let query = url.split_once('?')?.1;
            query
                .split('&')
                .find_map(|kv| kv.strip_prefix("page_info="))
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        })
}

/// Parse `used/limit` into a usage fraction.
pub fn parse_call_limit(value: &str) -> Option<f64> {
    let (used, limit) = value.trim().split_once('/')?;
    let used: f64 = used.trim().parse().ok()?;
    let limit: f64 = limit.trim().parse().ok()?;
    if limit <= 0.0 {
        return None;
    }
    Some(used / limit)
}

/// Log level for a call-limit usage fraction.
fn call_limit_level(usage: f64) -> Level {
    if usage > 0.9 {
        Level::ERROR
    } else if usage > 0.75 {
        Level::WARN
    } else {
        Level::DEBUG
    }
}

fn log_call_limit(usage: f64) {
    let pct = usage * 100.0;
    let level = call_limit_level(usage);
    if level == Level::ERROR {
        error!("Store API call limit at {:.0}%", pct);
    } else if level == Level::WARN {
        warn!("Store API call limit at {:.0}%", pct);
    } else {
        debug!("Store API call limit at {:.0}%", pct);
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(resp: &HttpResponse) -> Result<T> {
    Ok(serde_json::from_slice(&resp.body)?)
}

// ============ Raw payloads ============

#[derive(Deserialize)]
struct ProductsPage {
    #[serde(default)]
    products: Vec<RawProduct>,
}

#[derive(Deserialize)]
struct SingleProduct {
    product: RawProduct,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawProduct {
    id: Value,
    title: Option<String>,
    body_html: Option<String>,
    handle: Option<String>,
    vendor: Option<String>,
    product_type: Option<String>,
    tags: Option<String>,
    images: Vec<RawImage>,
    variants: Vec<RawVariant>,
    status: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawImage {
    src: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawVariant {
    id: Value,
    sku: Option<String>,
    title: Option<String>,
    price: Value,
    inventory_quantity: Option<i64>,
    inventory_item_id: Value,
    barcode: Option<String>,
    weight: Option<f64>,
    weight_unit: Option<String>,
}

#[derive(Deserialize)]
struct InventoryLevelsPage {
    #[serde(default)]
    inventory_levels: Vec<RawInventoryLevel>,
}

#[derive(Deserialize)]
struct SingleInventoryItem {
    inventory_item: RawInventoryItem,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawInventoryItem {
    sku: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawInventoryLevel {
    inventory_item_id: Value,
    location_id: Value,
    available: Option<i64>,
    updated_at: Option<String>,
}

#[derive(Deserialize)]
struct OrdersPage {
    #[serde(default)]
    orders: Vec<RawOrder>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawOrder {
    id: Value,
    order_number: Value,
    email: Option<String>,
    financial_status: Option<String>,
    fulfillment_status: Option<String>,
    line_items: Vec<RawLineItem>,
    total_price: Value,
    created_at: Option<String>,
    updated_at: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawLineItem {
    sku: Option<String>,
    title: Option<String>,
    quantity: Option<i64>,
    price: Value,
    variant_id: Value,
}

/// Numeric or string JSON scalar as a string; anything else is empty.
pub(crate) fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn optional_scalar(value: &Value) -> Option<String> {
    Some(scalar_string(value)).filter(|s| !s.is_empty())
}

pub(crate) fn clamp_quantity(q: Option<i64>) -> u32 {
    q.unwrap_or(0).clamp(0, u32::MAX as i64) as u32
}

fn decode_product(raw: RawProduct) -> Option<CanonicalProduct> {
    let id = scalar_string(&raw.id);
    if id.is_empty() {
        warn!(
            "Dropping store product without an id (title: '{}')",
            raw.title.as_deref().unwrap_or("")
        );
        return None;
    }

    let tags = raw
        .tags
        .unwrap_or_default()
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    Some(CanonicalProduct {
        id,
        title: raw.title.unwrap_or_default(),
        description: raw.body_html.unwrap_or_default(),
        handle: raw.handle.unwrap_or_default(),
        vendor: raw.vendor.unwrap_or_default(),
        product_type: raw.product_type.unwrap_or_default(),
        tags,
        images: raw
            .images
            .into_iter()
            .filter_map(|i| i.src)
            .filter(|s| !s.is_empty())
            .collect(),
        variants: raw.variants.into_iter().map(decode_variant).collect(),
        status: raw.status.unwrap_or_else(|| "active".to_string()),
        created_at: raw.created_at.unwrap_or_default(),
        updated_at: raw.updated_at.unwrap_or_default(),
    })
}

fn decode_variant(raw: RawVariant) -> CanonicalVariant {
    let price = scalar_string(&raw.price);
    CanonicalVariant {
        id: scalar_string(&raw.id),
        sku: raw.sku.unwrap_or_default().trim().to_string(),
        title: raw.title.unwrap_or_default(),
        price: if price.is_empty() { "0".to_string() } else { price },
        inventory_quantity: clamp_quantity(raw.inventory_quantity),
        inventory_item_id: optional_scalar(&raw.inventory_item_id),
        barcode: raw.barcode.unwrap_or_default(),
        weight: raw.weight.unwrap_or(0.0),
        weight_unit: raw.weight_unit.unwrap_or_else(|| "kg".to_string()),
    }
}

fn decode_level(raw: RawInventoryLevel) -> InventoryLevel {
    InventoryLevel {
        inventory_item_id: scalar_string(&raw.inventory_item_id),
        sku: None,
        location_id: optional_scalar(&raw.location_id),
        available: clamp_quantity(raw.available),
        updated_at: raw.updated_at.unwrap_or_default(),
    }
}

fn decode_order(raw: RawOrder) -> CanonicalOrder {
    CanonicalOrder {
        id: scalar_string(&raw.id),
        order_number: scalar_string(&raw.order_number),
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
        created_at: raw.created_at.unwrap_or_default(),
        updated_at: raw.updated_at.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTransport;
    use serde_json::json;

    const PRODUCTS_URL: &str = "https://demo.myshopify.com/admin/api/2025-10/products.json";

    fn store_config() -> StoreConfig {
        StoreConfig {
            domain: "demo.myshopify.com".into(),
            access_token: Some("shpat_test".into()),
            ..StoreConfig::default()
        }
    }

    fn client(transport: &MockTransport, attempts: u32) -> StoreClient {
        StoreClient::new(
            &store_config(),
            RetryPolicy::new(attempts, 2.0),
            Arc::new(transport.clone()),
            false,
        )
        .unwrap()
    }

    fn raw_product(id: u64, tags: &str) -> Value {
        json!({
            "id": id,
            "title": format!("Product {id}"),
            "body_html": "<p>Soft cotton</p>",
            "handle": format!("product-{id}"),
            "vendor": "Acme",
            "product_type": "Shirts",
            "tags": tags,
            "images": [{"src": format!("https://cdn.example.com/{id}.jpg")}],
            "variants": [{
                "id": id * 10,
                "sku": format!("SKU-{id}"),
                "title": "Default",
                "price": "19.99",
                "inventory_quantity": -2,
                "inventory_item_id": id * 100,
                "barcode": null,
                "weight": 0.3,
                "weight_unit": "kg"
            }],
            "status": "active",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-02T00:00:00Z"
        })
    }

    fn page_response(products: Vec<Value>, next: Option<&str>) -> HttpResponse {
        let mut headers = vec![(CALL_LIMIT_HEADER.to_string(), "10/40".to_string())];
        if let Some(token) = next {
            headers.push((
                "Link".to_string(),
                format!("<{PRODUCTS_URL}?limit=2&page_info={token}>; rel=\"next\""),
            ));
        }
        HttpResponse {
            status: 200,
            headers,
            body: json!({ "products": products }).to_string().into_bytes(),
        }
    }

    #[test]
    fn test_parse_next_cursor() {
        let link = "<https://x.myshopify.com/admin/api/2025-10/products.json?page_info=abc&limit=2>; rel=\"previous\", \
                    <https://x.myshopify.com/admin/api/2025-10/products.json?limit=2&page_info=def>; rel=\"next\"";
        assert_eq!(parse_next_cursor(link), Some("def".to_string()));
        assert_eq!(parse_next_cursor("<https://x/y?page_info=abc>; rel=\"previous\""), None);
    }

    #[test]
    fn test_parse_call_limit() {
        assert_eq!(parse_call_limit("30/40"), Some(0.75));
        assert_eq!(parse_call_limit("garbage"), None);
        assert_eq!(parse_call_limit("1/0"), None);
    }

    #[test]
    fn test_call_limit_thresholds() {
        assert_eq!(call_limit_level(0.5), Level::DEBUG);
        assert_eq!(call_limit_level(0.75), Level::DEBUG);
        assert_eq!(call_limit_level(0.76), Level::WARN);
        assert_eq!(call_limit_level(0.9), Level::WARN);
        assert_eq!(call_limit_level(0.91), Level::ERROR);
        assert_eq!(call_limit_level(parse_call_limit("39/40").unwrap()), Level::ERROR);
    }

    #[test]
    fn test_decode_product_normalizes_fields() {
        let raw: RawProduct = serde_json::from_value(raw_product(7, "y2k, trend ,,")).unwrap();
        let product = decode_product(raw).unwrap();

        assert_eq!(product.id, "7");
        assert_eq!(product.description, "<p>Soft cotton</p>");
        assert_eq!(product.tags, vec!["y2k", "trend"]);
        assert_eq!(product.images, vec!["https://cdn.example.com/7.jpg"]);

        let v = &product.variants[0];
        assert_eq!(v.id, "70");
        assert_eq!(v.price, "19.99");
        assert_eq!(v.inventory_quantity, 0);
        assert_eq!(v.inventory_item_id.as_deref(), Some("700"));
        assert_eq!(v.barcode, "");
    }

    #[test]
    fn test_product_without_id_is_dropped() {
        let raw: RawProduct = serde_json::from_value(json!({"title": "ghost"})).unwrap();
        assert!(decode_product(raw).is_none());
    }

    #[tokio::test]
    async fn test_cursor_pagination_follows_link_header() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            PRODUCTS_URL,
            page_response(vec![raw_product(1, ""), raw_product(2, "")], Some("p2")),
        );
        transport.push_response(
            HttpMethod::Get,
            PRODUCTS_URL,
            page_response(vec![raw_product(3, "")], None),
        );

        let products = client(&transport, 1).fetch_all_products(2).await.unwrap();
        let ids: Vec<_> = products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].url.contains("page_info=p2"));
        assert_eq!(
            requests[0].headers[0],
            ("X-Shopify-Access-Token".to_string(), "shpat_test".to_string())
        );
    }

    #[tokio::test]
    async fn test_repeated_cursor_stops_pagination() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.push_response(
                HttpMethod::Get,
                PRODUCTS_URL,
                page_response(vec![raw_product(1, ""), raw_product(2, "")], Some("same")),
            );
        }

        let products = client(&transport, 1).fetch_all_products(2).await.unwrap();
        assert_eq!(transport.request_count(), 2);
        assert_eq!(products.len(), 4);
    }

    #[tokio::test]
    async fn test_cursor_failure_falls_back_to_page_numbers() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            PRODUCTS_URL,
            page_response(vec![raw_product(1, ""), raw_product(2, "")], Some("p2")),
        );
        transport.push_json(HttpMethod::Get, PRODUCTS_URL, 400, json!({"errors": "bad cursor"}));
        transport.push_response(
            HttpMethod::Get,
            PRODUCTS_URL,
            page_response(vec![raw_product(1, ""), raw_product(2, "")], None),
        );
        transport.push_response(
            HttpMethod::Get,
            PRODUCTS_URL,
            page_response(vec![raw_product(3, "")], None),
        );

        let products = client(&transport, 1).fetch_all_products(2).await.unwrap();
        let ids: Vec<_> = products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let requests = transport.requests();
        assert!(requests[2].url.contains("page=1"));
        assert!(requests[3].url.contains("page=2"));
    }

    #[tokio::test]
    async fn test_page_number_fallback_is_capped() {
        let transport = MockTransport::new();
        transport.push_json(HttpMethod::Get, PRODUCTS_URL, 400, json!({}));
        for i in 0..(MAX_PAGE_NUMBER_PAGES as u64 + 2) {
            transport.push_response(
                HttpMethod::Get,
                PRODUCTS_URL,
                page_response(vec![raw_product(i, "")], None),
            );
        }

        let products = client(&transport, 1).fetch_all_products(1).await.unwrap();
        assert_eq!(products.len(), MAX_PAGE_NUMBER_PAGES);
        assert_eq!(transport.request_count(), 1 + MAX_PAGE_NUMBER_PAGES);
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried_and_skips_fallback() {
        let transport = MockTransport::new();
        transport.push_json(HttpMethod::Get, PRODUCTS_URL, 401, json!({"errors": "invalid token"}));

        let err = client(&transport, 3).fetch_all_products(250).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_are_retried() {
        let transport = MockTransport::new();
        transport.push_json(HttpMethod::Get, PRODUCTS_URL, 502, json!({}));
        transport.push_response(HttpMethod::Get, PRODUCTS_URL, page_response(vec![raw_product(1, "")], None));

        let products = client(&transport, 3).fetch_all_products(250).await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_max_items_stops_pagination_early() {
        let transport = MockTransport::new();
        for token in ["p2", "p3"] {
            transport.push_response(
                HttpMethod::Get,
                PRODUCTS_URL,
                page_response(vec![raw_product(1, ""), raw_product(2, "")], Some(token)),
            );
        }

        let products = client(&transport, 1).fetch_products(2, Some(2)).await.unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_product_not_found_is_none() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            "https://demo.myshopify.com/admin/api/2025-10/products/404.json",
            404,
            json!({"errors": "Not Found"}),
        );

        let product = client(&transport, 3).fetch_product("404").await.unwrap();
        assert!(product.is_none());
    }

    #[tokio::test]
    async fn test_inventory_by_id_skips_failed_lookups() {
        let url = "https://demo.myshopify.com/admin/api/2025-10/inventory_levels.json";
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            url,
            200,
            json!({"inventory_levels": [
                {"inventory_item_id": 1, "location_id": 9, "available": 5, "updated_at": "t"}
            ]}),
        );
        transport.push_json(
            HttpMethod::Get,
            "https://demo.myshopify.com/admin/api/2025-10/inventory_items/1.json",
            200,
            json!({"inventory_item": {"id": 1, "sku": " SKU-1 ", "tracked": true}}),
        );
        transport.push_json(HttpMethod::Get, url, 404, json!({}));

        let ids = vec!["1".to_string(), "2".to_string()];
        let levels = client(&transport, 1)
            .fetch_inventory_levels(Some(&ids))
            .await
            .unwrap();

        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].inventory_item_id, "1");
        assert_eq!(levels[0].sku.as_deref(), Some("SKU-1"));
        assert_eq!(levels[0].location_id.as_deref(), Some("9"));
        assert_eq!(levels[0].available, 5);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_inventory_by_id_keeps_level_when_sku_lookup_fails() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            "https://demo.myshopify.com/admin/api/2025-10/inventory_levels.json",
            200,
            json!({"inventory_levels": [{"inventory_item_id": 7, "available": 2}]}),
        );
        transport.push_json(
            HttpMethod::Get,
            "https://demo.myshopify.com/admin/api/2025-10/inventory_items/7.json",
            404,
            json!({"errors": "Not Found"}),
        );

        let ids = vec!["7".to_string()];
        let levels = client(&transport, 1)
            .fetch_inventory_levels(Some(&ids))
            .await
            .unwrap();

        assert_eq!(levels.len(), 1);
        assert!(levels[0].sku.is_none());
    }

    #[test]
    fn test_inventory_from_products_skips_untracked_and_skuless() {
        let mut product = CanonicalProduct {
            id: "1".into(),
            updated_at: "t".into(),
            ..Default::default()
        };
        product.variants = vec![
            CanonicalVariant {
                sku: "A".into(),
                inventory_item_id: Some("11".into()),
                inventory_quantity: 4,
                ..Default::default()
            },
            CanonicalVariant {
                sku: String::new(),
                inventory_item_id: Some("12".into()),
                ..Default::default()
            },
            CanonicalVariant {
                sku: "C".into(),
                inventory_item_id: None,
                ..Default::default()
            },
        ];

        let levels = inventory_from_products(&[product]);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].sku.as_deref(), Some("A"));
        assert_eq!(levels[0].available, 4);
    }

    #[tokio::test]
    async fn test_fetch_recent_orders_decodes_line_items() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            "https://demo.myshopify.com/admin/api/2025-10/orders.json",
            200,
            json!({"orders": [{
                "id": 450789469,
                "order_number": 1001,
                "email": "bob@example.com",
                "financial_status": "paid",
                "fulfillment_status": null,
                "line_items": [{"sku": "SKU-1", "title": "Tee", "quantity": 2, "price": "9.50", "variant_id": 42}],
                "total_price": "19.00"
            }]}),
        );

        let orders = client(&transport, 1).fetch_recent_orders(50, "open").await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_number, "1001");
        assert_eq!(orders[0].fulfillment_status, "");
        assert_eq!(orders[0].line_items[0].variant_id.as_deref(), Some("42"));
        assert!(transport.requests()[0].url.contains("status=open"));
    }

    #[tokio::test]
    async fn test_dry_run_never_touches_the_network() {
        let transport = MockTransport::new();
        let store = StoreClient::new(
            &StoreConfig::default(),
            RetryPolicy::default(),
            Arc::new(transport.clone()),
            true,
        )
        .unwrap();

        assert!(store.fetch_all_products(250).await.unwrap().is_empty());
        assert!(store.fetch_inventory_levels(None).await.unwrap().is_empty());
        assert!(store.fetch_recent_orders(5, "any").await.unwrap().is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_live_client_requires_credentials() {
        let result = StoreClient::new(
            &StoreConfig::default(),
            RetryPolicy::default(),
            Arc::new(MockTransport::new()),
            false,
        );
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
