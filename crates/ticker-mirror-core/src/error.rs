use std::error::Error as StdError;

use crate::models::Component;
use crate::outcome::OrchestrationResult;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The external call a timeout fired on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Storage,
    Fetch,
    Embed,
    Index,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::Storage => "storage",
            Step::Fetch => "fetch",
            Step::Embed => "embed",
            Step::Index => "index",
        };
        f.write_str(name)
    }
}

/// Error taxonomy for the control plane and the inference reader.
///
/// Collaborators (stores, fetchers, embedders, index clients) report plain
/// `anyhow` errors; the engine wraps them into one of these variants at the
/// call site so that callers can tell component-scoped failures from fatal
/// ones via [`Error::is_fatal`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unresolved entity '{identifier}': {reason}")]
    UnresolvedEntity { identifier: String, reason: String },

    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("max age of {hours}h for {component} is out of range")]
    InvalidMaxAge { component: Component, hours: u64 },

    #[error("storage unavailable: {context}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("fetch failed for {component}: {source}")]
    FetchFailed {
        component: Component,
        #[source]
        source: BoxError,
    },

    #[error("embedding error: {context}")]
    Embedding {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("index error: {context}")]
    Index {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("{step} step timed out after {after_ms}ms")]
    Timeout { step: Step, after_ms: u128 },

    #[error("every requested component failed for {ticker}")]
    AllComponentsFailed {
        ticker: String,
        report: Box<OrchestrationResult>,
    },
}

impl Error {
    pub fn unresolved(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnresolvedEntity {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::StorageUnavailable {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn fetch(component: Component, source: impl Into<BoxError>) -> Self {
        Self::FetchFailed {
            component,
            source: source.into(),
        }
    }

    pub fn embedding(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Embedding {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn index(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Index {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Fatal errors abort the whole call: no component can proceed without
    /// a resolved entity or a readable local store.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnresolvedEntity { .. }
                | Error::UnknownComponent(_)
                | Error::InvalidMaxAge { .. }
                | Error::StorageUnavailable { .. }
                | Error::Timeout {
                    step: Step::Storage,
                    ..
                }
        )
    }

    /// Human-readable message including the full cause chain.
    pub fn detail(&self) -> String {
        let mut out = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            let msg = err.to_string();
            if !out.contains(&msg) {
                out.push_str(": ");
                out.push_str(&msg);
            }
            cause = err.source();
        }
        out
    }
}

pub type Result<T> = std::result::Result<T, Error>;
