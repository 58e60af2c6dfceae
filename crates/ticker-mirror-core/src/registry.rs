//! Entity registry: resolves ticker-like identifiers to canonical entities.
//!
//! The registry is an immutable value built once at startup from the built-in
//! table plus any configured extras. Resolution never performs I/O; entities
//! that are not registered must be resolved with an explicit filing id.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::models::{Entity, ExternalId, Market};

const BUILTIN_US: &[(&str, &str)] = &[
    ("AAPL", "0000320193"),
    ("MSFT", "0000789019"),
    ("GOOGL", "0001652044"),
    ("AMZN", "0001018724"),
    ("META", "0001326801"),
    ("NVDA", "0001045810"),
    ("TSLA", "0001318605"),
    ("JPM", "0000019617"),
    ("V", "0001403161"),
    ("JNJ", "0000200406"),
];

const BUILTIN_INDIA: &[(&str, &str)] = &[
    ("TCS", "532540"),
    ("RELIANCE", "500325"),
    ("INFY", "500209"),
    ("HDFCBANK", "500180"),
    ("ICICIBANK", "532174"),
    ("HINDUNILVR", "500696"),
    ("ITC", "500875"),
    ("SBIN", "500112"),
    ("BHARTIARTL", "532454"),
    ("KOTAKBANK", "500247"),
];

#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entries: BTreeMap<String, Entity>,
}

impl EntityRegistry {
    /// An empty registry: every identifier needs an explicit filing id.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in table of well-known US and Indian listings.
    pub fn builtin() -> Self {
        let us = BUILTIN_US.iter().map(|(t, cik)| Entity::us(t, cik));
        let india = BUILTIN_INDIA.iter().map(|(t, code)| Entity::india(t, code));
        Self::empty().with_entries(us.chain(india))
    }

    /// Returns a new registry with `entries` added (later entries win).
    pub fn with_entries(mut self, entries: impl IntoIterator<Item = Entity>) -> Self {
        for mut entity in entries {
            entity.ticker = normalize_identifier(&entity.ticker);
            self.entries.insert(entity.ticker.clone(), entity);
        }
        self
    }

    pub fn get(&self, identifier: &str) -> Option<&Entity> {
        self.entries.get(&normalize_identifier(identifier))
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve an identifier to an [`Entity`].
    ///
    /// Registered identifiers resolve on their own; an explicit filing id
    /// overrides the registered one and fixes the market (CIK ⇒ US,
    /// scrip code ⇒ India). Unregistered identifiers require one.
    pub fn resolve(&self, identifier: &str, external: Option<&ExternalId>) -> Result<Entity> {
        let ticker = normalize_identifier(identifier);
        if ticker.is_empty() {
            return Err(Error::unresolved(identifier, "identifier is empty"));
        }
        if let Some(ext) = external {
            validate_external_id(&ticker, ext)?;
        }

        match (self.entries.get(&ticker), external) {
            (Some(known), None) => Ok(known.clone()),
            (Some(known), Some(ext)) => Ok(apply_external(known.clone(), ext)),
            (None, Some(ext)) => Ok(apply_external(
                Entity {
                    ticker,
                    market: Market::Other,
                    cik: None,
                    scrip_code: None,
                },
                ext,
            )),
            (None, None) => Err(Error::unresolved(
                ticker,
                "not registered; provide a CIK (US) or scrip code (India)",
            )),
        }
    }
}

fn apply_external(mut entity: Entity, ext: &ExternalId) -> Entity {
    match ext {
        ExternalId::Cik(cik) => {
            entity.market = Market::Us;
            entity.cik = Some(cik.clone());
        }
        ExternalId::ScripCode(code) => {
            entity.market = Market::India;
            entity.scrip_code = Some(code.clone());
        }
    }
    entity
}

fn validate_external_id(ticker: &str, ext: &ExternalId) -> Result<()> {
    let value = ext.value();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        let kind = match ext {
            ExternalId::Cik(_) => "CIK",
            ExternalId::ScripCode(_) => "scrip code",
        };
        return Err(Error::unresolved(
            ticker,
            format!("invalid {}: '{}' (digits only)", kind, value),
        ));
    }
    Ok(())
}

pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_ascii_uppercase()
}
