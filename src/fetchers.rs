//! Concrete fetchers for the control plane.
//!
//! | Fetcher | Components | Source |
//! |---------|------------|--------|
//! | [`HttpJsonFetcher`] | structured (and non-US filings) | any URL template |
//! | [`SecFilingFetcher`] | `unstructured`, US entities | SEC EDGAR latest 10-K |
//! | [`MarketFilingFetcher`] | `unstructured` | routes by entity market |
//!
//! # SEC filing flow
//!
//! ```text
//! submissions/CIK##########.json ─▶ first "10-K" accession
//!        │
//!        ▼
//! Archives/edgar/data/{cik}/{accession}/index.json ─▶ largest narrative .htm
//!        │
//!        ▼
//! HTML ─▶ text ─▶ cut at cover page ─▶ Items 1, 1A, 7, 7A ─▶ cap at max_chars
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use ticker_mirror_core::fetch::{Fetcher, FetcherRegistry};
use ticker_mirror_core::models::{Component, Entity, Market, Payload};

use crate::config::{FetchersConfig, HttpFetcherConfig, SecFetcherConfig};

/// Sections shorter than this are treated as table-of-contents hits.
const MIN_SECTION_CHARS: usize = 5_000;
/// Documents shorter than this are exhibits or stubs, not a full annual report.
const MIN_NARRATIVE_CHARS: usize = 100_000;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("no {kind} available for {ticker}")]
    MissingId { ticker: String, kind: &'static str },

    #[error("no fetcher for {market} entities")]
    UnsupportedMarket { market: Market },

    #[error("no 10-K filing found for CIK {0}")]
    NoAnnualReport(String),

    #[error("no narrative HTML document in filing {0}")]
    NoNarrativeDocument(String),

    #[error("document is {0} chars, too short to be a full annual report")]
    NotFullNarrative(usize),
}

/// Build the component → fetcher table from `[fetchers]`.
///
/// Components without a configured source are left unbound; the pipeline
/// reports them as `fetch_failed`.
pub fn build_fetchers(config: &FetchersConfig) -> Result<FetcherRegistry> {
    let mut registry = FetcherRegistry::new();

    if let Some(structured) = &config.structured {
        let fetcher = Arc::new(HttpJsonFetcher::new("structured", structured.clone())?);
        registry = registry.with_all(Component::STRUCTURED, fetcher);
    }

    let us: Option<Arc<dyn Fetcher>> = match &config.sec {
        Some(sec) => Some(Arc::new(SecFilingFetcher::new(sec.clone())?)),
        None => None,
    };
    let other: Option<Arc<dyn Fetcher>> = match &config.filings {
        Some(filings) => Some(Arc::new(HttpJsonFetcher::new("filings", filings.clone())?)),
        None => None,
    };
    if us.is_some() || other.is_some() {
        registry = registry.with(
            Component::Unstructured,
            Arc::new(MarketFilingFetcher { us, other }),
        );
    }

    Ok(registry)
}

// ============ HTTP JSON ============

/// Fetches one URL per (entity, component), rendered from a template.
///
/// JSON responses are stored as JSON; anything else is stored as text.
pub struct HttpJsonFetcher {
    name: String,
    config: HttpFetcherConfig,
    client: reqwest::Client,
}

impl HttpJsonFetcher {
    pub fn new(name: &str, config: HttpFetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            name: name.to_string(),
            config,
            client,
        })
    }
}

/// Substitute `{ticker}`, `{component}`, `{cik}`, `{scrip_code}`.
/// A placeholder whose value the entity lacks is an error.
pub fn render_url(template: &str, entity: &Entity, component: Component) -> Result<String> {
    let mut url = template
        .replace("{ticker}", &entity.ticker)
        .replace("{component}", component.as_str());
    for (placeholder, value, kind) in [
        ("{cik}", entity.cik.as_deref(), "CIK"),
        ("{scrip_code}", entity.scrip_code.as_deref(), "scrip code"),
    ] {
        if url.contains(placeholder) {
            let value = value.ok_or_else(|| FetchError::MissingId {
                ticker: entity.ticker.clone(),
                kind,
            })?;
            url = url.replace(placeholder, value);
        }
    }
    Ok(url)
}

#[async_trait]
impl Fetcher for HttpJsonFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, entity: &Entity, component: Component) -> Result<Payload> {
        let url = render_url(&self.config.url_template, entity, component)?;
        let mut request = self.client.get(&url);
        for (k, v) in &self.config.headers {
            request = request.header(k.as_str(), v.as_str());
        }
        let body = get_text_with_retry(request, &url, self.config.max_retries).await?;

        let metadata = serde_json::json!({ "url": url });
        Ok(match serde_json::from_str::<Value>(&body) {
            Ok(value) => Payload::json(&url, &value).with_metadata(metadata),
            Err(_) => Payload::text(&url, body).with_metadata(metadata),
        })
    }
}

/// GET with up to `retries` attempts and 1s, 2s, 4s, ... backoff between them.
/// 4xx other than 429 fails immediately.
async fn get_text_with_retry(
    request: reqwest::RequestBuilder,
    url: &str,
    retries: u32,
) -> Result<String> {
    let attempts = retries.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(url, attempt, ?delay, "retrying fetch");
            tokio::time::sleep(delay).await;
        }

        let Some(req) = request.try_clone() else {
            anyhow::bail!("request to {} cannot be retried", url);
        };
        match req.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.text().await?);
                }
                let err = FetchError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                };
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(url, %status, attempt, "fetch failed, will retry");
                    last_err = Some(err.into());
                    continue;
                }
                return Err(err.into());
            }
            Err(e) => {
                warn!(url, error = %e, attempt, "fetch failed, will retry");
                last_err = Some(e.into());
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("fetch of {} failed after retries", url)))
}

// ============ SEC EDGAR ============

pub struct SecFilingFetcher {
    config: SecFetcherConfig,
    client: reqwest::Client,
    text: FilingText,
}

impl SecFilingFetcher {
    pub fn new(config: SecFetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            config,
            client,
            text: FilingText::new()?,
        })
    }

    async fn get(&self, url: &str) -> Result<String> {
        get_text_with_retry(self.client.get(url), url, self.config.max_retries).await
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let body = self.get(url).await?;
        serde_json::from_str(&body).with_context(|| format!("invalid JSON from {}", url))
    }
}

#[async_trait]
impl Fetcher for SecFilingFetcher {
    fn name(&self) -> &str {
        "sec-edgar"
    }

    async fn fetch(&self, entity: &Entity, _component: Component) -> Result<Payload> {
        let cik = entity.cik.as_deref().ok_or_else(|| FetchError::MissingId {
            ticker: entity.ticker.clone(),
            kind: "CIK",
        })?;

        let submissions_url = format!(
            "{}/submissions/CIK{:0>10}.json",
            self.config.data_url.trim_end_matches('/'),
            cik
        );
        let submissions = self.get_json(&submissions_url).await?;
        let filing = latest_annual_report(&submissions)
            .ok_or_else(|| FetchError::NoAnnualReport(cik.to_string()))?;
        info!(ticker = %entity.ticker, filing_date = %filing.filing_date, "found 10-K");

        let folder = format!(
            "{}/Archives/edgar/data/{}/{}",
            self.config.archives_url.trim_end_matches('/'),
            cik.trim_start_matches('0'),
            filing.accession
        );
        let index = self.get_json(&format!("{}/index.json", folder)).await?;
        let document = primary_document(&index)
            .ok_or_else(|| FetchError::NoNarrativeDocument(filing.accession.clone()))?;
        let document_url = format!("{}/{}", folder, document);

        let html = self.get(&document_url).await?;
        let text = self.text.cut_at_cover_page(&self.text.html_to_text(&html));
        let chars = text.chars().count();
        if chars < MIN_NARRATIVE_CHARS {
            return Err(FetchError::NotFullNarrative(chars).into());
        }
        let text = self.text.extract_high_signal(&text, self.config.max_chars);

        Ok(Payload::text("SEC EDGAR", text).with_metadata(serde_json::json!({
            "filing_type": "10-K",
            "filing_date": filing.filing_date,
            "accession": filing.accession,
            "url": document_url,
        })))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingRef {
    /// Accession number without dashes.
    pub accession: String,
    pub filing_date: String,
}

/// First `10-K` in the submissions feed's `filings.recent` columns.
pub fn latest_annual_report(submissions: &Value) -> Option<FilingRef> {
    let recent = submissions.get("filings")?.get("recent")?;
    let forms = recent.get("form")?.as_array()?;
    let accessions = recent.get("accessionNumber")?.as_array()?;
    let dates = recent.get("filingDate")?.as_array()?;

    forms
        .iter()
        .zip(accessions)
        .zip(dates)
        .find(|((form, _), _)| form.as_str() == Some("10-K"))
        .and_then(|((_, acc), date)| {
            Some(FilingRef {
                accession: acc.as_str()?.replace('-', ""),
                filing_date: date.as_str()?.to_string(),
            })
        })
}

/// Largest `.htm`/`.html` in a filing index that is not an inline-XBRL
/// rendition.
pub fn primary_document(index: &Value) -> Option<String> {
    let items = index.get("directory")?.get("item")?.as_array()?;
    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_lowercase();
            if !(name.ends_with(".htm") || name.ends_with(".html")) {
                return None;
            }
            if name.contains("ix") || name.contains("xbrl") {
                return None;
            }
            let size = match item.get("size") {
                Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
                Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
                _ => 0,
            };
            Some((size, name))
        })
        .max()
        .map(|(_, name)| name)
}

/// Compiled patterns for turning a 10-K HTML document into narrative text.
pub struct FilingText {
    drop: Regex,
    block: Regex,
    tag: Regex,
    entity: Regex,
    spaces: Regex,
    breaks: Regex,
    cover: Regex,
    business: Regex,
    risk: Regex,
    unresolved: Regex,
    mdna: Regex,
    market_risk: Regex,
    statements: Regex,
}

impl FilingText {
    pub fn new() -> Result<Self> {
        Ok(Self {
            drop: Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<head\b.*?</head\s*>|<!--.*?-->")?,
            block: Regex::new(r"(?i)<br\s*/?>|</?(p|div|tr|li|h[1-6]|table|section)\b[^>]*>")?,
            tag: Regex::new(r"(?s)<[^>]*>")?,
            entity: Regex::new(r"&(#[xX]?[0-9a-fA-F]+|[a-zA-Z]+);")?,
            spaces: Regex::new(r"[ \t\r\u{a0}]+")?,
            breaks: Regex::new(r"\n{3,}")?,
            cover: Regex::new(r"(?i)UNITED STATES\s+SECURITIES AND EXCHANGE COMMISSION")?,
            business: Regex::new(r"(?is)Item\s+1\b.*?Business")?,
            risk: Regex::new(r"(?i)Item\s+1A\b")?,
            unresolved: Regex::new(r"(?i)Item\s+1B\b")?,
            mdna: Regex::new(r"(?is)Item\s+7\b.*?Management")?,
            market_risk: Regex::new(r"(?i)Item\s+7A\b")?,
            statements: Regex::new(r"(?i)Item\s+8\b")?,
        })
    }

    /// Strip markup to plain text, keeping paragraph breaks at block elements.
    pub fn html_to_text(&self, html: &str) -> String {
        let text = self.drop.replace_all(html, " ");
        let text = self.block.replace_all(&text, "\n\n");
        let text = self.tag.replace_all(&text, " ");
        let text = self
            .entity
            .replace_all(&text, |caps: &regex::Captures| decode_entity(&caps[1]));
        let text = self.spaces.replace_all(&text, " ");

        let lines: Vec<&str> = text.split('\n').map(str::trim).collect();
        let joined = lines.join("\n");
        self.breaks.replace_all(&joined, "\n\n").trim().to_string()
    }

    /// Drop everything before the cover page heading, when present.
    pub fn cut_at_cover_page(&self, text: &str) -> String {
        match self.cover.find(text) {
            Some(m) => text[m.start()..].to_string(),
            None => text.to_string(),
        }
    }

    /// Keep Items 1, 1A, 7, and 7A when each is substantial; fall back to the
    /// head of the document. Output is capped at `max_chars` characters.
    pub fn extract_high_signal(&self, text: &str, max_chars: usize) -> String {
        let sections: Vec<&str> = [
            (&self.business, &self.risk),
            (&self.risk, &self.unresolved),
            (&self.mdna, &self.market_risk),
            (&self.market_risk, &self.statements),
        ]
        .into_iter()
        .filter_map(|(start, end)| {
            let s = start.find(text)?;
            let e = end.find_at(text, s.end())?;
            Some(text[s.start()..e.start()].trim())
        })
        .filter(|section| section.chars().count() > MIN_SECTION_CHARS)
        .collect();

        let out = if sections.is_empty() {
            text.to_string()
        } else {
            sections.join("\n\n")
        };
        truncate_chars(&out, max_chars)
    }
}

fn decode_entity(name: &str) -> String {
    let numeric = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = name.strip_prefix('#') {
        dec.parse::<u32>().ok()
    } else {
        None
    };
    if let Some(c) = numeric.and_then(char::from_u32) {
        return if c == '\u{a0}' { " ".into() } else { c.to_string() };
    }
    match name {
        "nbsp" => " ",
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "rsquo" | "lsquo" => "'",
        "rdquo" | "ldquo" => "\"",
        "mdash" | "ndash" => "-",
        _ => return format!("&{};", name),
    }
    .to_string()
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => s[..i].to_string(),
        None => s.to_string(),
    }
}

// ============ Market routing ============

/// Sends US entities to the SEC fetcher and everyone else to the generic
/// filings source.
pub struct MarketFilingFetcher {
    pub us: Option<Arc<dyn Fetcher>>,
    pub other: Option<Arc<dyn Fetcher>>,
}

#[async_trait]
impl Fetcher for MarketFilingFetcher {
    fn name(&self) -> &str {
        "filings"
    }

    async fn fetch(&self, entity: &Entity, component: Component) -> Result<Payload> {
        let fetcher = match entity.market {
            Market::Us => self.us.as_ref(),
            Market::India | Market::Other => self.other.as_ref(),
        };
        let fetcher = fetcher.ok_or(FetchError::UnsupportedMarket {
            market: entity.market,
        })?;
        fetcher.fetch(entity, component).await
    }
}
