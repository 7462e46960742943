//! Sync orchestration.
//!
//! [`SyncEngine`] owns the store client, the product mapper, and the channel
//! client, and chains them into the four sync operations. None of them
//! returns an error: per-item failures are counted, and a systemic failure
//! (for example an expired store token) produces a result whose
//! `failed_count` equals its `total_count` and whose `error` is set.
//!
//! | Operation | Pull | Transform | Push |
//! |-----------|------|-----------|------|
//! | [`SyncEngine::sync_inventory`] | store inventory levels | drop entries without SKU | channel bulk inventory update |
//! | [`SyncEngine::sync_products`] | store products | AI mapping | channel bulk create |
//! | [`SyncEngine::sync_orders`] | channel orders | SKU reconciliation against the store catalog | none |
//! | [`SyncEngine::run_full_sync`] | inventory, then products | | |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::channel::{ChannelClient, ChannelMode};
use crate::config::Config;
use crate::error::SyncError;
use crate::http::{HttpTransport, ReqwestTransport};
use crate::mapping::{create_provider, ProductMapper};
use crate::models::{CanonicalOrder, InventoryUpdate, SyncResult};
use crate::retry::RetryPolicy;
use crate::store::{StoreClient, MAX_PAGE_SIZE};

/// Which operation a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SyncMode {
    Full,
    Inventory,
    Products,
    Orders,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Inventory => "inventory",
            SyncMode::Products => "products",
            SyncMode::Orders => "orders",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Results of [`SyncEngine::run_full_sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullSyncReport {
    pub inventory: SyncResult,
    pub products: SyncResult,
}

impl FullSyncReport {
    pub fn is_clean(&self) -> bool {
        self.inventory.is_clean() && self.products.is_clean()
    }
}

/// A store variant an order line item resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CatalogEntry {
    product_id: String,
    variant_id: String,
}

pub struct SyncEngine {
    store: StoreClient,
    mapper: ProductMapper,
    channel: ChannelClient,
    page_size: usize,
    order_limit: usize,
}

impl SyncEngine {
    pub fn new(
        store: StoreClient,
        mapper: ProductMapper,
        channel: ChannelClient,
        page_size: usize,
        order_limit: usize,
    ) -> Self {
        Self {
            store,
            mapper,
            channel,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            order_limit: order_limit.max(1),
        }
    }

    /// Wire every component from a validated configuration.
    ///
    /// All clients share one HTTP transport and one retry policy.
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self, SyncError> {
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::with_timeout(config.sync.timeout())?);
        let retry = config.sync.retry_policy();

        let store = StoreClient::new(&config.store, retry, transport.clone(), dry_run)?;
        let provider = create_provider(&config.ai, dry_run, transport.clone());
        let mapper = ProductMapper::new(
            provider,
            RetryPolicy::new(config.ai.max_retries, config.sync.retry_backoff),
        );
        let channel = ChannelClient::new(
            &config.channel,
            config.sync.batch_size,
            retry,
            transport,
            dry_run,
        );

        info!(
            "Sync engine ready (channel: {}, AI: {}, dry-run: {})",
            channel.mode().as_str(),
            mapper.provider_name(),
            dry_run
        );

        Ok(Self::new(
            store,
            mapper,
            channel,
            config.store.page_size,
            config.sync.order_limit,
        ))
    }

    pub fn channel_mode(&self) -> ChannelMode {
        self.channel.mode()
    }

    pub fn ai_provider(&self) -> &str {
        self.mapper.provider_name()
    }

    /// False when product mapping can only use the fallback transform.
    pub fn ai_configured(&self) -> bool {
        self.mapper.ai_configured()
    }

    /// Whether the last AI call succeeded; `None` until one is made.
    pub fn ai_reachable(&self) -> Option<bool> {
        self.mapper.last_ai_ok()
    }

    /// Push store stock levels to the channel.
    ///
    /// The bulk push is all-or-nothing here: every update counts as a
    /// success or every update counts as a failure.
    pub async fn sync_inventory(&mut self) -> SyncResult {
        info!("Starting inventory sync");

        let levels = match self.store.fetch_inventory_levels(None).await {
            Ok(levels) => levels,
            Err(e) => {
                error!("Inventory sync aborted: {}", e);
                let mut result = SyncResult::default();
                result.fail_all(e);
                return result;
            }
        };

        let updates: Vec<InventoryUpdate> = levels
            .into_iter()
            .filter_map(|level| {
                let sku = level.sku.filter(|s| !s.is_empty())?;
                Some(InventoryUpdate {
                    sku,
                    quantity: level.available,
                })
            })
            .collect();

        if updates.is_empty() {
            warn!("No inventory items with a SKU to sync");
            return SyncResult::default();
        }

        let mut result = SyncResult::with_total(updates.len());
        match self.channel.bulk_update_inventory(&updates).await {
            Ok(true) => {
                result.success_count = updates.len();
                result.ids = updates.into_iter().map(|u| u.sku).collect();
            }
            Ok(false) => {
                result.failed_count = updates.len();
            }
            Err(e) => {
                error!("Inventory push aborted: {}", e);
                result.fail_all(e);
            }
        }

        info!("Inventory sync completed: {}", result);
        result
    }

    /// Map store products and create them on the channel.
    ///
    /// `limit` caps how many products are synced; the channel's counts and
    /// created ids are returned as is.
    pub async fn sync_products(&mut self, limit: Option<usize>) -> SyncResult {
        info!("Starting product sync");

        let page_size = match limit {
            Some(l) => l.clamp(1, self.page_size),
            None => self.page_size,
        };

        let mut products = match self.store.fetch_products(page_size, limit).await {
            Ok(products) => products,
            Err(e) => {
                error!("Product sync aborted: {}", e);
                let mut result = SyncResult::default();
                result.fail_all(e);
                return result;
            }
        };
        if let Some(l) = limit {
            products.truncate(l);
        }

        if products.is_empty() {
            info!("No products to sync");
            return SyncResult::default();
        }

        let mapped = self.mapper.batch_map_products(&products, true).await;

        let result = match self.channel.bulk_create_products(&mapped).await {
            Ok(result) => result,
            Err(e) => {
                error!("Product push aborted: {}", e);
                let mut result = SyncResult::with_total(mapped.len());
                result.fail_all(e);
                result
            }
        };

        let stats = self.mapper.stats();
        info!(
            "Product sync completed: {} (AI calls: {}, cache hits: {}, fallbacks: {})",
            result, stats.ai_calls, stats.cache_hits, stats.fallbacks
        );
        result
    }

    /// Reconcile recent channel orders against the store catalog.
    ///
    /// An order reconciles when it has at least one line item and every line
    /// item's SKU exists in the store. Nothing is written to the store, so
    /// repeated runs give the same outcome.
    pub async fn sync_orders(&mut self) -> SyncResult {
        info!("Starting order sync");

        let orders = match self.channel.get_orders(None, None, self.order_limit).await {
            Ok(orders) => orders,
            Err(e) => {
                error!("Order sync aborted: {}", e);
                let mut result = SyncResult::default();
                result.fail_all(e);
                return result;
            }
        };

        if orders.is_empty() {
            info!("No channel orders to reconcile");
            return SyncResult::default();
        }

        let mut result = SyncResult::with_total(orders.len());

        let catalog = match self.store.fetch_all_products(self.page_size).await {
            Ok(products) => {
                let mut index = HashMap::new();
                for product in products {
                    for variant in product.variants {
                        if variant.sku.is_empty() {
                            continue;
                        }
                        index.entry(variant.sku).or_insert(CatalogEntry {
                            product_id: product.id.clone(),
                            variant_id: variant.id,
                        });
                    }
                }
                index
            }
            Err(e) => {
                error!("Order sync aborted, store catalog unavailable: {}", e);
                result.fail_all(e);
                return result;
            }
        };

        for order in &orders {
            match reconcile_order(order, &catalog) {
                Ok(entries) => {
                    info!(
                        "Order {} reconciled: would create a store draft order with {} line items ({})",
                        order.order_number,
                        entries.len(),
                        entries
                            .iter()
                            .map(|(sku, qty, entry)| format!(
                                "{} x{} -> variant {} of product {}",
                                sku, qty, entry.variant_id, entry.product_id
                            ))
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    result.success_count += 1;
                    result.ids.push(order.id.clone());
                }
                Err(reason) => {
                    warn!("Order {} not reconciled: {}", order.order_number, reason);
                    result.failed_count += 1;
                }
            }
        }

        info!("Order sync completed: {}", result);
        result
    }

    /// Push tracking details for a channel order.
    pub async fn update_order_tracking(
        &self,
        order_id: &str,
        tracking_number: &str,
        tracking_url: Option<&str>,
        carrier: Option<&str>,
    ) -> bool {
        match self
            .channel
            .update_order_tracking(order_id, tracking_number, tracking_url, carrier)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                error!("Tracking update for order {} aborted: {}", order_id, e);
                false
            }
        }
    }

    /// Inventory sync, then product sync. The second runs even if the first failed.
    pub async fn run_full_sync(&mut self) -> FullSyncReport {
        info!("Starting full sync");
        let inventory = self.sync_inventory().await;
        let products = self.sync_products(None).await;

        info!("Full sync completed");
        info!("  Inventory: {}", inventory);
        info!("  Products: {}", products);

        FullSyncReport {
            inventory,
            products,
        }
    }

    /// Run one mode and return its results, labelled.
    pub async fn run_mode(
        &mut self,
        mode: SyncMode,
        limit: Option<usize>,
    ) -> Vec<(&'static str, SyncResult)> {
        match mode {
            SyncMode::Full => {
                let report = self.run_full_sync().await;
                vec![
                    ("inventory", report.inventory),
                    ("products", report.products),
                ]
            }
            SyncMode::Inventory => vec![("inventory", self.sync_inventory().await)],
            SyncMode::Products => vec![("products", self.sync_products(limit).await)],
            SyncMode::Orders => vec![("orders", self.sync_orders().await)],
        }
    }
}

fn reconcile_order<'a>(
    order: &'a CanonicalOrder,
    catalog: &'a HashMap<String, CatalogEntry>,
) -> Result<Vec<(&'a str, u32, &'a CatalogEntry)>, String> {
    if order.line_items.is_empty() {
        return Err("order has no line items".to_string());
    }

    order
        .line_items
        .iter()
        .map(|item| {
            if item.sku.is_empty() {
                return Err(format!("line item '{}' has no SKU", item.title));
            }
            catalog
                .get(&item.sku)
                .map(|entry| (item.sku.as_str(), item.quantity, entry))
                .ok_or_else(|| format!("SKU {} is not in the store catalog", item.sku))
        })
        .collect()
}
