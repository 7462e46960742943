//! # Storefront Sync
//!
//! Keeps a marketplace channel (TikTok Shop) in step with an e-commerce
//! store (Shopify): stock levels, product listings rewritten by an AI model
//! for the channel audience, and order reconciliation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐
//! │  Store   │──▶│   Mapping    │──▶│  Channel  │
//! │  (pull)  │   │ AI + cache + │   │  (signed, │
//! │          │   │   fallback   │   │  batched) │
//! └──────────┘   └──────────────┘   └───────────┘
//!        ▲              ▲                 ▲
//!        └──────── SyncEngine ────────────┘
//!                       │
//!            ┌──────────┴──────────┐
//!            ▼                     ▼
//!       ┌──────────┐         ┌──────────┐
//!       │   CLI    │         │ /health  │
//!       │ (sfsync) │         │  (HTTP)  │
//!       └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sfsync check --dry-run              # resolve config, no network
//! sfsync sync full --dry-run          # exercise the whole pipeline
//! sfsync sync products --limit 10     # push ten listings
//! sfsync serve                        # periodic full sync + /health
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`models`] | Canonical data types |
//! | [`error`] | Error taxonomy |
//! | [`http`] | Transport trait and reqwest implementation |
//! | [`retry`] | Exponential-backoff retry policy |
//! | [`store`] | Store client |
//! | [`mapping`] | AI product mapping with cache and fallback |
//! | [`channel`] | Channel client |
//! | [`sync`] | Sync orchestration |
//! | [`scheduler`] | Periodic sync loop |
//! | [`server`] | Health endpoint |

pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod mapping;
pub mod models;
pub mod retry;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod sync;
