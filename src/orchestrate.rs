//! Ensure-then-retrieve in one call.
//!
//! The control plane runs first; retrieval then reads whatever the index
//! holds for the ticker. A run where every component failed still retrieves,
//! since units from an earlier run may be present.

use serde::Serialize;
use tracing::warn;

use ticker_mirror_core::models::{DataChecklist, ExternalId};
use ticker_mirror_core::outcome::OrchestrationResult;
use ticker_mirror_core::{Error, Result};

use crate::manager::ControlPlane;
use crate::reader::{InferenceReader, RetrievalResult};

/// Build a checklist from request fields.
///
/// No component names and no flag means everything. With names given, the
/// unstructured flag defaults to off.
pub fn checklist_from(components: &[String], unstructured: Option<bool>) -> Result<DataChecklist> {
    if components.is_empty() {
        return Ok(match unstructured {
            None => DataChecklist::all(),
            Some(flag) => DataChecklist::new([], flag),
        });
    }
    DataChecklist::from_names(components, unstructured.unwrap_or(false))
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationReport {
    pub control: OrchestrationResult,
    pub retrieval: RetrievalResult,
    pub context: String,
}

#[derive(Clone)]
pub struct Orchestrator {
    control: ControlPlane,
    reader: InferenceReader,
    max_context_chars: usize,
}

impl Orchestrator {
    pub fn new(control: ControlPlane, reader: InferenceReader, max_context_chars: usize) -> Self {
        Self {
            control,
            reader,
            max_context_chars,
        }
    }

    pub fn control(&self) -> &ControlPlane {
        &self.control
    }

    pub fn reader(&self) -> &InferenceReader {
        &self.reader
    }

    pub fn max_context_chars(&self) -> usize {
        self.max_context_chars
    }

    pub async fn orchestrate(
        &self,
        identifier: &str,
        query: &str,
        checklist: &DataChecklist,
        force_refresh: bool,
        external: Option<&ExternalId>,
        top_k: usize,
    ) -> Result<OrchestrationReport> {
        let control = match self
            .control
            .ensure_fresh(identifier, checklist, force_refresh, external, None)
            .await
        {
            Ok(result) => result,
            Err(Error::AllComponentsFailed { ticker, report }) => {
                warn!(%ticker, "every component failed; retrieving from the existing index");
                *report
            }
            Err(e) => return Err(e),
        };

        let retrieval = self
            .reader
            .retrieve(&control.ticker, query, top_k, None)
            .await?;
        let context = retrieval.context(self.max_context_chars);

        Ok(OrchestrationReport {
            control,
            retrieval,
            context,
        })
    }
}
