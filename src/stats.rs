//! Store and index overview.
//!
//! Summarizes what is mirrored: artifacts per ticker, how many of them are
//! in sync with the index, and the index unit count per ticker namespace.
//! Used by `tmx stats`.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};

use ticker_mirror_core::store::LocalStore;

use crate::app::App;
use crate::config::Config;

/// Per-ticker breakdown.
#[derive(Default)]
struct TickerStats {
    artifacts: usize,
    synced: usize,
    bytes: usize,
    units: i64,
    last_fetch: Option<DateTime<Utc>>,
}

/// Run the stats command: query both databases and print a summary.
pub async fn run_stats(config: &Config, app: &App) -> Result<()> {
    let artifacts = app.store.list(None).await?;
    let unit_counts = app.index.counts_by_ticker().await?;

    let mut by_ticker: BTreeMap<String, TickerStats> = BTreeMap::new();
    for a in &artifacts {
        let s = by_ticker.entry(a.ticker.clone()).or_default();
        s.artifacts += 1;
        s.bytes += a.bytes;
        if a.index_synced {
            s.synced += 1;
        }
        s.last_fetch = s.last_fetch.max(Some(a.fetched_at));
    }
    for (ticker, n) in &unit_counts {
        by_ticker.entry(ticker.clone()).or_default().units = *n;
    }

    let total_units: i64 = unit_counts.iter().map(|(_, n)| n).sum();
    let total_synced = artifacts.iter().filter(|a| a.index_synced).count();

    println!("Ticker Mirror Stats");
    println!("===================");
    println!();
    println!(
        "  Store:       {} ({})",
        config.db.path.display(),
        format_bytes(file_size(&config.db.path))
    );
    println!(
        "  Index:       {} ({})",
        config.index.path.display(),
        format_bytes(file_size(&config.index.path))
    );
    println!();
    println!("  Artifacts:   {}", artifacts.len());
    println!("  In sync:     {} / {}", total_synced, artifacts.len());
    println!("  Units:       {}", total_units);

    if !by_ticker.is_empty() {
        println!();
        println!("  By ticker:");
        println!(
            "  {:<12} {:>9} {:>7} {:>6} {:>10}   {}",
            "TICKER", "ARTIFACTS", "SYNCED", "UNITS", "SIZE", "LAST FETCH"
        );
        println!("  {}", "-".repeat(70));
        for (ticker, s) in &by_ticker {
            let fetched = s
                .last_fetch
                .map(format_relative)
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<12} {:>9} {:>7} {:>6} {:>10}   {}",
                ticker,
                s.artifacts,
                s.synced,
                s.units,
                format_bytes(s.bytes as u64),
                fetched
            );
        }
    }

    println!();
    Ok(())
}

fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" style, falling back to a date past 30 days or in the future.
fn format_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();
    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
