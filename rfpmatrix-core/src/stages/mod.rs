//! Model-backed pipeline stages
//!
//! ```text
//! Chunk ──► Extract (one call per chunk)
//!             │  candidates, source=llm
//!             ▼
//!           Classify (batches of `batch_size`, re-aligned by `_idx`)
//!             │  validation gate
//!             ▼
//!           Ground (same batches, chunk text with page markers)
//! ```
//!
//! Every call goes through [`call_with_retry`]: one retry with identical
//! input, then the batch is marked failed and its candidates pass through.

pub mod align;
pub mod classify;
pub mod extract;
pub mod ground;

pub use align::{align, Alignment, Indexed};
pub use classify::{
    classify_from_hints, validation_gate, ClassifyOutcome, ClassifyPatch, ClassifyStage,
};
pub use extract::{ExtractOutcome, ExtractStage, ExtractedItem};
pub use ground::{fallback_grounding, GroundOutcome, GroundPatch, GroundStage};

use crate::error::{ModelError, PipelineError};
use crate::model::{ModelClient, Prompt, ResponseSchema};
use crate::observability::{Stage, StageOutcome};
use crate::types::CharSpan;
use serde_json::Value;

/// Result of a model call with one retry
#[derive(Debug)]
pub enum CallOutcome<T> {
    Ok(T),
    Retried(T),
    Failed(PipelineError),
}

impl<T> CallOutcome<T> {
    pub fn calls(&self) -> usize {
        match self {
            CallOutcome::Ok(_) => 1,
            CallOutcome::Retried(_) | CallOutcome::Failed(_) => 2,
        }
    }

    pub fn stage_outcome(&self) -> StageOutcome {
        match self {
            CallOutcome::Ok(_) => StageOutcome::Ok,
            CallOutcome::Retried(_) => StageOutcome::Retried,
            CallOutcome::Failed(_) => StageOutcome::Failed,
        }
    }
}

/// Call the model and validate the response, retrying once on any failure.
/// Timeouts and transport errors are treated like malformed output.
pub fn call_with_retry<T>(
    model: &dyn ModelClient,
    stage: Stage,
    prompt: &Prompt,
    schema: &ResponseSchema,
    parse: impl Fn(Value) -> Result<T, ModelError>,
) -> CallOutcome<T> {
    let attempt = || model.complete(prompt, schema).and_then(&parse);

    match attempt() {
        Ok(value) => return CallOutcome::Ok(value),
        Err(e) => tracing::warn!(stage = %stage, error = %e, "model call failed, retrying once"),
    }

    match attempt() {
        Ok(value) => CallOutcome::Retried(value),
        Err(e) => {
            tracing::warn!(stage = %stage, error = %e, "model call failed after retry, marking batch failed");
            CallOutcome::Failed(e.at_stage(stage))
        }
    }
}

/// Byte span of `needle` within `haystack`: exact match first, then a
/// case-insensitive match that ignores whitespace differences
pub fn locate_quote(haystack: &str, needle: &str) -> Option<CharSpan> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    if let Some(pos) = haystack.find(needle) {
        return Some(CharSpan::new(pos, pos + needle.len()));
    }

    let (norm_hay, offsets) = normalize_with_offsets(haystack);
    let (norm_needle, _) = normalize_with_offsets(needle);
    let norm_needle = norm_needle.trim();
    if norm_needle.is_empty() {
        return None;
    }

    let pos = norm_hay.find(norm_needle)?;
    let last = pos + norm_needle.len() - 1;
    let start = offsets[pos];
    let last_char_start = offsets[last];
    let last_len = haystack[last_char_start..]
        .chars()
        .next()
        .map(|c| c.len_utf8())
        .unwrap_or(0);
    Some(CharSpan::new(start, last_char_start + last_len))
}

/// Lowercased, whitespace-collapsed text plus the source byte offset of every output byte
fn normalize_with_offsets(text: &str) -> (String, Vec<usize>) {
    let mut normalized = String::with_capacity(text.len());
    let mut offsets = Vec::with_capacity(text.len());
    let mut last_was_space = false;

    for (offset, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if !last_was_space {
                normalized.push(' ');
                offsets.push(offset);
            }
            last_was_space = true;
            continue;
        }
        last_was_space = false;
        for lower in ch.to_lowercase() {
            let before = normalized.len();
            normalized.push(lower);
            offsets.extend(std::iter::repeat(offset).take(normalized.len() - before));
        }
    }

    (normalized, offsets)
}

/// Non-negative integer from a JSON number or numeric string
pub(crate) fn index_from(value: Option<&Value>) -> Option<usize> {
    match value? {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Trimmed, whitespace-collapsed string field; blank strings become None
pub(crate) fn string_field(object: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    let raw = object.get(key)?.as_str()?;
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}
