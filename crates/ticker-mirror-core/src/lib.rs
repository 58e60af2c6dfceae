//! # Ticker Mirror Core
//!
//! Runtime-agnostic logic for Ticker Mirror: data models, the error
//! taxonomy, the freshness policy table, entity registry, staleness
//! evaluation, stable-id chunking, and the collaborator traits (local store,
//! index, embedder, fetcher) with in-memory implementations.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! `ticker-mirror` app crate provides the SQLite and network backends and
//! the control plane that drives them.

pub mod chunk;
pub mod clock;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod index;
pub mod models;
pub mod outcome;
pub mod policy;
pub mod registry;
pub mod staleness;
pub mod store;

pub use error::{Error, Result, Step};
