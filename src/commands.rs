//! CLI command bodies. Each prints a plain-text report to stdout.

use anyhow::Result;

use ticker_mirror_core::models::{DataCategory, ExternalId};
use ticker_mirror_core::outcome::{ComponentStatus, OrchestrationResult};
use ticker_mirror_core::Error;

use crate::app::App;
use crate::orchestrate::checklist_from;
use crate::pipeline::deadline_after;
use crate::reader::RetrievalResult;

/// Checklist and identity flags shared by `ensure` and `ask`.
pub struct EnsureArgs {
    pub components: Vec<String>,
    pub unstructured: Option<bool>,
    pub force_refresh: bool,
    pub cik: Option<String>,
    pub scrip_code: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl EnsureArgs {
    fn external(&self, ticker: &str) -> Result<Option<ExternalId>> {
        Ok(ExternalId::from_parts(
            ticker,
            self.cik.clone(),
            self.scrip_code.clone(),
        )?)
    }
}

pub fn run_entities(app: &App) -> Result<()> {
    let registry = app.control().registry();
    println!("{:<12} {:<7} FILING ID", "TICKER", "MARKET");
    for entity in registry.entities() {
        println!(
            "{:<12} {:<7} {}",
            entity.ticker,
            entity.market,
            entity.filing_id().unwrap_or("-")
        );
    }
    println!();
    println!("{} entities", registry.len());
    Ok(())
}

pub async fn run_status(
    app: &App,
    ticker: &str,
    cik: Option<String>,
    scrip_code: Option<String>,
) -> Result<()> {
    let external = ExternalId::from_parts(ticker, cik, scrip_code)?;
    let report = app.control().status(ticker, external.as_ref()).await?;
    println!("status {}", report.ticker);
    print!("{}", report);
    Ok(())
}

pub async fn run_ensure(app: &App, ticker: &str, args: &EnsureArgs) -> Result<()> {
    let checklist = checklist_from(&args.components, args.unstructured)?;
    let external = args.external(ticker)?;
    let deadline = args
        .timeout_secs
        .map(|secs| {
            deadline_after(secs)
                .ok_or_else(|| anyhow::anyhow!("--timeout-secs {} is out of range", secs))
        })
        .transpose()?;

    let outcome = app
        .control()
        .ensure_fresh(
            ticker,
            &checklist,
            args.force_refresh,
            external.as_ref(),
            deadline,
        )
        .await;

    match outcome {
        Ok(result) => {
            print_result(&result);
            println!("ok");
            Ok(())
        }
        Err(Error::AllComponentsFailed { ticker, report }) => {
            print_result(&report);
            Err(Error::AllComponentsFailed { ticker, report }.into())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn run_retrieve(
    app: &App,
    ticker: &str,
    query: &str,
    top_k: usize,
    category: Option<String>,
) -> Result<()> {
    let category = category
        .as_deref()
        .map(str::parse::<DataCategory>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let result = app.reader().retrieve(ticker, query, top_k, category).await?;
    print_matches(&result);
    Ok(())
}

pub async fn run_ask(
    app: &App,
    ticker: &str,
    query: &str,
    top_k: usize,
    args: &EnsureArgs,
) -> Result<()> {
    let checklist = checklist_from(&args.components, args.unstructured)?;
    let external = args.external(ticker)?;
    let report = app
        .orchestrator
        .orchestrate(
            ticker,
            query,
            &checklist,
            args.force_refresh,
            external.as_ref(),
            top_k,
        )
        .await?;

    print_result(&report.control);
    println!();
    print_matches(&report.retrieval);
    if !report.context.is_empty() {
        println!();
        println!("--- Context ---");
        println!("{}", report.context);
    }
    Ok(())
}

fn print_result(result: &OrchestrationResult) {
    println!("ensure {} ({})", result.ticker, result.market);
    for report in result.components.values() {
        let mut line = format!("  {}: {}", report.component, report.status);
        match report.status {
            ComponentStatus::Updated | ComponentStatus::Reindexed => {
                line.push_str(&format!(
                    " (upserted: {}, deleted: {})",
                    report.units_upserted, report.units_deleted
                ));
            }
            ComponentStatus::FetchFailed | ComponentStatus::PartiallyUpdated => {
                if let Some(detail) = &report.detail {
                    line.push_str(&format!(" ({})", detail));
                }
            }
            ComponentStatus::Fresh => {}
        }
        println!("{}", line);
    }
    println!("  run: {}", result.run_id);
    println!(
        "  elapsed: {}ms",
        (result.finished_at - result.started_at).num_milliseconds()
    );
}

fn print_matches(result: &RetrievalResult) {
    println!("retrieve {} \"{}\"", result.ticker, result.query);
    if !result.has_results() {
        println!("  no matches");
        return;
    }
    for (i, m) in result.matches.iter().enumerate() {
        let preview: String = m.metadata.text.chars().take(100).collect();
        let ellipsis = if m.metadata.text.chars().count() > 100 {
            "..."
        } else {
            ""
        };
        println!(
            "  {}. [{:.3}] {} {}: {}{}",
            i + 1,
            m.score,
            m.metadata.component,
            m.metadata.position,
            preview.replace('\n', " "),
            ellipsis
        );
    }
}
