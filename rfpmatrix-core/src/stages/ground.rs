use super::align::{align, Indexed};
use super::{call_with_retry, index_from, locate_quote, string_field, CallOutcome};
use crate::error::{ModelError, PipelineError};
use crate::model::{items_array, ModelClient};
use crate::observability::{Stage, StageOutcome};
use crate::prompts;
use crate::types::{
    CandidateFlag, CharSpan, Chunk, Document, GroundingStatus, RequirementCandidate, Source,
};
use serde_json::{json, Value};

/// Typed partial update produced by one Ground response item
#[derive(Debug, Clone, PartialEq)]
pub struct GroundPatch {
    pub idx: Option<usize>,
    pub evidence_quote: Option<String>,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
}

impl GroundPatch {
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return GroundPatch {
                idx: None,
                evidence_quote: None,
                page_start: None,
                page_end: None,
            };
        };
        let page = |key: &str| index_from(object.get(key)).and_then(|p| u32::try_from(p).ok());
        let page_start = page("page_start");
        GroundPatch {
            idx: index_from(object.get("_idx")),
            evidence_quote: string_field(object, "evidence_quote")
                .or_else(|| string_field(object, "evidence")),
            page_start,
            page_end: page("page_end").or(page_start),
        }
    }

    /// Resolve the candidate's page span. A located evidence quote wins over
    /// model-asserted pages inside the chunk, which win over the chunk fallback.
    pub fn apply(&self, candidate: &mut RequirementCandidate, document: &Document, chunk: &Chunk) {
        if candidate.source == Source::Regex && candidate.grounding.is_grounded() {
            if candidate.evidence_quote.is_none() {
                candidate.evidence_quote = self.evidence_quote.clone();
            }
            return;
        }

        if let Some(evidence) = &self.evidence_quote {
            if let Some(span) = locate_quote(&chunk.text, evidence) {
                let absolute = CharSpan::new(chunk.start + span.start, chunk.start + span.end);
                let (page_start, page_end) = document.page_range(absolute.start, absolute.end);
                candidate.page_start = Some(page_start);
                candidate.page_end = Some(page_end);
                candidate.evidence_quote =
                    Some(document.slice(absolute.start, absolute.end).to_string());
                candidate.grounding = GroundingStatus::Verified;
                candidate.span.get_or_insert(absolute);
                return;
            }
        }

        match (self.page_start, self.page_end) {
            (Some(start), Some(end))
                if chunk.page_start <= start && start <= end && end <= chunk.page_end =>
            {
                candidate.page_start = Some(start);
                candidate.page_end = Some(end);
                candidate.evidence_quote = self.evidence_quote.clone();
                candidate.grounding = GroundingStatus::Asserted;
            }
            _ => fallback_grounding(candidate, chunk),
        }
    }
}

impl Indexed for GroundPatch {
    fn batch_index(&self) -> Option<usize> {
        self.idx
    }
}

/// Chunk page range with the ungrounded flag
pub fn fallback_grounding(candidate: &mut RequirementCandidate, chunk: &Chunk) {
    candidate.page_start = Some(chunk.page_start);
    candidate.page_end = Some(chunk.page_end);
    candidate.grounding = GroundingStatus::Ungrounded;
    candidate.add_flag(CandidateFlag::Ungrounded);
}

fn parse_patches(value: Value) -> Result<Vec<GroundPatch>, ModelError> {
    Ok(items_array(value)?.iter().map(GroundPatch::from_value).collect())
}

fn batch_items(batch: &[RequirementCandidate]) -> Value {
    Value::Array(
        batch
            .iter()
            .enumerate()
            .map(|(idx, candidate)| {
                json!({
                    "_idx": idx,
                    "quote": candidate.quote,
                    "category": candidate.category,
                })
            })
            .collect(),
    )
}

#[derive(Debug)]
pub struct GroundOutcome {
    pub candidates: Vec<RequirementCandidate>,
    pub misses: Vec<usize>,
    pub outcome: StageOutcome,
    pub calls: usize,
    pub error: Option<PipelineError>,
}

/// Attaches page numbers and evidence to a batch from one chunk
pub struct GroundStage<'a> {
    model: &'a dyn ModelClient,
}

impl<'a> GroundStage<'a> {
    pub fn new(model: &'a dyn ModelClient) -> Self {
        Self { model }
    }

    pub fn run(
        &self,
        document: &Document,
        chunk: &Chunk,
        mut batch: Vec<RequirementCandidate>,
    ) -> GroundOutcome {
        let marked = document.render_with_page_markers(chunk.start, chunk.end);
        let prompt = prompts::ground_prompt(&marked, &batch_items(&batch));
        let schema = prompts::ground_schema();
        let call = call_with_retry(self.model, Stage::Ground, &prompt, &schema, parse_patches);
        let outcome = call.stage_outcome();
        let calls = call.calls();

        let patches = match call {
            CallOutcome::Ok(patches) | CallOutcome::Retried(patches) => patches,
            CallOutcome::Failed(error) => {
                for candidate in &mut batch {
                    fallback_grounding(candidate, chunk);
                    candidate.add_flag(CandidateFlag::GroundFailed);
                }
                return GroundOutcome {
                    candidates: batch,
                    misses: Vec::new(),
                    outcome,
                    calls,
                    error: Some(error),
                };
            }
        };

        let alignment = align(batch.len(), patches);
        for (candidate, patch) in batch.iter_mut().zip(&alignment.patches) {
            match patch {
                Some(patch) => patch.apply(candidate, document, chunk),
                None => {
                    fallback_grounding(candidate, chunk);
                    candidate.add_flag(CandidateFlag::GroundAlignmentMiss);
                }
            }
        }
        if !alignment.misses.is_empty() {
            tracing::warn!(
                misses = alignment.misses.len(),
                batch = batch.len(),
                chunk = chunk.index,
                "ground response missing items"
            );
        }

        GroundOutcome {
            candidates: batch,
            misses: alignment.misses,
            outcome,
            calls,
            error: None,
        }
    }
}
