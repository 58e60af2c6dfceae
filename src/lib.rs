//! # Ticker Mirror
//!
//! Keeps a searchable vector index in exact sync with locally held
//! per-company financial data, and serves read-only retrieval over it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Fetchers │──▶│ Control plane │──▶│ Local store  │──▶│    Index    │
//! │ HTTP/SEC │   │ ensure_fresh  │   │ (truth)      │   │ (mirror)    │
//! └──────────┘   └───────────────┘   └──────────────┘   └──────┬──────┘
//!                                                              │ read-only
//!                      ┌──────────┐       ┌──────────┐   ┌─────▼──────┐
//!                      │   CLI    │       │   HTTP   │──▶│   Reader   │
//!                      │  (tmx)   │       │  (axum)  │   │  retrieve  │
//!                      └──────────┘       └──────────┘   └────────────┘
//! ```
//!
//! Domain types, the freshness policy, the entity registry, staleness
//! classification, and chunking live in the `ticker-mirror-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! tmx init                               # create databases
//! tmx status AAPL                        # freshness per component
//! tmx ensure AAPL --component price      # bring price up to policy
//! tmx retrieve AAPL "services revenue"   # read-only search
//! tmx serve                              # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Local store backend |
//! | [`sqlite_index`] | Index backend |
//! | [`embedding`] | Embedding providers |
//! | [`fetchers`] | HTTP and SEC EDGAR fetchers |
//! | [`pipeline`] | Fetch, persist, and mirror one component |
//! | [`manager`] | `ensure_fresh` orchestration |
//! | [`reader`] | Read-only retrieval |
//! | [`orchestrate`] | Ensure-then-retrieve |
//! | [`server`] | HTTP server |

pub mod app;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod fetchers;
pub mod locks;
pub mod manager;
pub mod migrate;
pub mod orchestrate;
pub mod pipeline;
pub mod reader;
pub mod server;
pub mod sqlite_index;
pub mod sqlite_store;
pub mod stats;
