use super::{call_with_retry, locate_quote, string_field, CallOutcome};
use crate::error::{ModelError, PipelineError};
use crate::model::{items_array, ModelClient};
use crate::observability::{Stage, StageOutcome};
use crate::prompts;
use crate::types::{CharSpan, Chunk, Document, Modality, RequirementCandidate};
use serde_json::Value;

/// One requirement as returned by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedItem {
    pub quote: String,
    pub label: Option<String>,
    pub category_hint: Option<String>,
    pub modality_hint: Option<Modality>,
}

impl ExtractedItem {
    /// Accepts an object with a `quote` field or a bare quote string.
    /// Items without a usable quote yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(quote) => {
                let quote = quote.trim();
                (!quote.is_empty()).then(|| ExtractedItem {
                    quote: quote.to_string(),
                    label: None,
                    category_hint: None,
                    modality_hint: None,
                })
            }
            Value::Object(object) => {
                let quote = object
                    .get("quote")
                    .or_else(|| object.get("text"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|q| !q.is_empty())?;
                Some(ExtractedItem {
                    quote: quote.to_string(),
                    label: string_field(object, "label"),
                    category_hint: string_field(object, "category_hint")
                        .or_else(|| string_field(object, "category")),
                    modality_hint: string_field(object, "modality_hint")
                        .or_else(|| string_field(object, "modality"))
                        .and_then(|m| Modality::parse(&m)),
                })
            }
            _ => None,
        }
    }
}

fn parse_items(value: Value) -> Result<Vec<ExtractedItem>, ModelError> {
    let items = items_array(value)?;
    let total = items.len();
    let parsed: Vec<ExtractedItem> = items.iter().filter_map(ExtractedItem::from_value).collect();
    if parsed.len() < total {
        tracing::debug!(skipped = total - parsed.len(), "skipping extract items without a quote");
    }
    Ok(parsed)
}

#[derive(Debug)]
pub struct ExtractOutcome {
    pub candidates: Vec<RequirementCandidate>,
    pub outcome: StageOutcome,
    pub calls: usize,
    pub error: Option<PipelineError>,
}

/// One model call per chunk producing LLM-sourced candidates
pub struct ExtractStage<'a> {
    model: &'a dyn ModelClient,
}

impl<'a> ExtractStage<'a> {
    pub fn new(model: &'a dyn ModelClient) -> Self {
        Self { model }
    }

    pub fn run(&self, document: &Document, chunk: &Chunk) -> ExtractOutcome {
        let prompt = prompts::extract_prompt(&chunk.section, &chunk.text);
        let schema = prompts::extract_schema();
        let call = call_with_retry(self.model, Stage::Extract, &prompt, &schema, parse_items);
        let outcome = call.stage_outcome();
        let calls = call.calls();

        let items = match call {
            CallOutcome::Ok(items) | CallOutcome::Retried(items) => items,
            CallOutcome::Failed(error) => {
                return ExtractOutcome {
                    candidates: Vec::new(),
                    outcome,
                    calls,
                    error: Some(error),
                }
            }
        };

        let candidates = items
            .into_iter()
            .enumerate()
            .map(|(position, item)| candidate_from_item(document, chunk, position, item))
            .collect();

        ExtractOutcome {
            candidates,
            outcome,
            calls,
            error: None,
        }
    }
}

fn candidate_from_item(
    document: &Document,
    chunk: &Chunk,
    position: usize,
    item: ExtractedItem,
) -> RequirementCandidate {
    let mut candidate =
        RequirementCandidate::extracted(document.name(), chunk, position, item.quote);
    candidate.label = item.label;
    candidate.category_hint = item.category_hint;
    candidate.modality_hint = item.modality_hint;
    candidate.span = locate_quote(&chunk.text, &candidate.quote)
        .map(|span| CharSpan::new(chunk.start + span.start, chunk.start + span.end));
    candidate
}
