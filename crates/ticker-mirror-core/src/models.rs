//! Core data models used throughout Ticker Mirror.
//!
//! These types describe the entities, data components, local artifacts, and
//! index units that flow between the control plane and the inference reader.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Listing market of an entity. Decides which filing identifier applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Us,
    India,
    Other,
}

impl Market {
    pub fn as_str(self) -> &'static str {
        match self {
            Market::Us => "US",
            Market::India => "INDIA",
            Market::Other => "OTHER",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Market::Us),
            "INDIA" | "IN" => Ok(Market::India),
            "OTHER" => Ok(Market::Other),
            other => Err(format!("unknown market: '{}'", other)),
        }
    }
}

/// A company resolved to its canonical identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub ticker: String,
    pub market: Market,
    /// SEC Central Index Key (US filings).
    pub cik: Option<String>,
    /// BSE scrip code (Indian filings).
    pub scrip_code: Option<String>,
}

impl Entity {
    pub fn us(ticker: &str, cik: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            market: Market::Us,
            cik: Some(cik.to_string()),
            scrip_code: None,
        }
    }

    pub fn india(ticker: &str, scrip_code: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            market: Market::India,
            cik: None,
            scrip_code: Some(scrip_code.to_string()),
        }
    }

    /// The filing identifier relevant to this entity's market.
    pub fn filing_id(&self) -> Option<&str> {
        match self.market {
            Market::Us => self.cik.as_deref(),
            Market::India => self.scrip_code.as_deref(),
            Market::Other => self.cik.as_deref().or(self.scrip_code.as_deref()),
        }
    }
}

/// Caller-supplied external filing identifier for entity resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ExternalId {
    Cik(String),
    ScripCode(String),
}

impl ExternalId {
    /// Build from the two optional CLI/API fields. Supplying both is
    /// ambiguous (they imply different markets) and is rejected.
    pub fn from_parts(
        identifier: &str,
        cik: Option<String>,
        scrip_code: Option<String>,
    ) -> Result<Option<Self>> {
        match (cik, scrip_code) {
            (Some(_), Some(_)) => Err(Error::unresolved(
                identifier,
                "supply either a CIK or a scrip code, not both",
            )),
            (Some(cik), None) => Ok(Some(ExternalId::Cik(cik))),
            (None, Some(code)) => Ok(Some(ExternalId::ScripCode(code))),
            (None, None) => Ok(None),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            ExternalId::Cik(v) | ExternalId::ScripCode(v) => v,
        }
    }
}

/// A named category of per-entity data with its own freshness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Price,
    IncomeStmt,
    BalanceSheet,
    CashFlow,
    Info,
    Unstructured,
}

impl Component {
    pub const ALL: [Component; 6] = [
        Component::Price,
        Component::IncomeStmt,
        Component::BalanceSheet,
        Component::CashFlow,
        Component::Info,
        Component::Unstructured,
    ];

    pub const STRUCTURED: [Component; 5] = [
        Component::Price,
        Component::IncomeStmt,
        Component::BalanceSheet,
        Component::CashFlow,
        Component::Info,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Component::Price => "price",
            Component::IncomeStmt => "income_stmt",
            Component::BalanceSheet => "balance_sheet",
            Component::CashFlow => "cash_flow",
            Component::Info => "info",
            Component::Unstructured => "unstructured",
        }
    }

    /// Label used as the header line of structured index units.
    pub fn label(self) -> &'static str {
        match self {
            Component::Price => "price history",
            Component::IncomeStmt => "income statement",
            Component::BalanceSheet => "balance sheet",
            Component::CashFlow => "cash flow statement",
            Component::Info => "company info",
            Component::Unstructured => "annual filing",
        }
    }

    pub fn is_structured(self) -> bool {
        self != Component::Unstructured
    }

    pub fn category(self) -> DataCategory {
        if self.is_structured() {
            DataCategory::NarratedNumeric
        } else {
            DataCategory::Narrative
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Component::ALL
            .into_iter()
            .find(|c| c.as_str() == name)
            .ok_or_else(|| Error::UnknownComponent(s.trim().to_string()))
    }
}

/// Retrieval category of an index unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    /// Filing prose.
    Narrative,
    /// Financial tables rendered as text.
    NarratedNumeric,
}

impl DataCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            DataCategory::Narrative => "narrative",
            DataCategory::NarratedNumeric => "narrated_numeric",
        }
    }
}

impl FromStr for DataCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "narrative" => Ok(DataCategory::Narrative),
            "narrated_numeric" => Ok(DataCategory::NarratedNumeric),
            other => Err(format!(
                "unknown data category: '{}'. Use narrative or narrated_numeric.",
                other
            )),
        }
    }
}

/// The set of components one orchestration call must ensure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChecklist {
    structured: BTreeSet<Component>,
    unstructured: bool,
}

impl DataChecklist {
    /// `Component::Unstructured` inside `structured` is folded into the flag.
    pub fn new(structured: impl IntoIterator<Item = Component>, unstructured: bool) -> Self {
        let mut set = BTreeSet::new();
        let mut unstructured = unstructured;
        for c in structured {
            if c.is_structured() {
                set.insert(c);
            } else {
                unstructured = true;
            }
        }
        Self {
            structured: set,
            unstructured,
        }
    }

    pub fn all() -> Self {
        Self::new(Component::STRUCTURED, true)
    }

    pub fn only(component: Component) -> Self {
        Self::new([component], false)
    }

    pub fn from_names<S: AsRef<str>>(names: &[S], unstructured: bool) -> Result<Self> {
        let parsed = names
            .iter()
            .map(|n| n.as_ref().parse::<Component>())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(parsed, unstructured))
    }

    pub fn structured(&self) -> impl Iterator<Item = Component> + '_ {
        self.structured.iter().copied()
    }

    pub fn wants_unstructured(&self) -> bool {
        self.unstructured
    }

    /// All requested components, structured first.
    pub fn components(&self) -> Vec<Component> {
        let mut out: Vec<Component> = self.structured.iter().copied().collect();
        if self.unstructured {
            out.push(Component::Unstructured);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.structured.is_empty() && !self.unstructured
    }
}

impl Default for DataChecklist {
    fn default() -> Self {
        Self::all()
    }
}

/// Raw data produced by a fetcher before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Where the data came from (e.g. `"SEC EDGAR"` or a URL).
    pub source: String,
    /// Text for filings, JSON for structured components.
    pub body: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Payload {
    pub fn text(source: &str, body: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            body: body.into(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn json(source: &str, value: &serde_json::Value) -> Self {
        Self {
            source: source.to_string(),
            body: value.to_string(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A persisted payload for one (entity, component). Disk is the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalArtifact {
    pub ticker: String,
    pub component: Component,
    pub payload: Payload,
    pub fetched_at: DateTime<Utc>,
    /// `fetched_at` of the artifact version last mirrored into the index.
    pub indexed_version: Option<DateTime<Utc>>,
}

impl LocalArtifact {
    pub fn is_index_synced(&self) -> bool {
        self.indexed_version == Some(self.fetched_at)
    }
}

/// Result of inspecting the local store for one (entity, component).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inspection {
    Absent,
    Present {
        last_modified: DateTime<Utc>,
        index_synced: bool,
    },
}

impl Inspection {
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        match self {
            Inspection::Absent => None,
            Inspection::Present { last_modified, .. } => Some(*last_modified),
        }
    }
}

/// A chunk of a local artifact, addressed by a stable id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexUnit {
    pub id: String,
    pub ticker: String,
    pub component: Component,
    pub position: u32,
    pub text: String,
    /// SHA-256 of the whitespace-normalized text.
    pub hash: String,
}

/// Metadata stored next to each vector in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub ticker: String,
    pub component: Component,
    pub category: DataCategory,
    pub position: u32,
    pub text: String,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// One vector ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: UnitMetadata,
}

/// Scope of an index read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFilter {
    pub ticker: String,
    pub component: Option<Component>,
    pub category: Option<DataCategory>,
}

impl IndexFilter {
    pub fn ticker(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            component: None,
            category: None,
        }
    }

    pub fn component(ticker: &str, component: Component) -> Self {
        Self {
            ticker: ticker.to_string(),
            component: Some(component),
            category: None,
        }
    }

    pub fn with_category(mut self, category: Option<DataCategory>) -> Self {
        self.category = category;
        self
    }

    pub fn matches(&self, meta: &UnitMetadata) -> bool {
        meta.ticker == self.ticker
            && self.component.map_or(true, |c| c == meta.component)
            && self.category.map_or(true, |c| c == meta.category)
    }
}

/// A scored index hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub metadata: UnitMetadata,
}
