use super::align::{align, Indexed};
use super::{call_with_retry, index_from, string_field, CallOutcome};
use crate::error::{ModelError, PipelineError};
use crate::model::{items_array, ModelClient};
use crate::observability::{Stage, StageOutcome};
use crate::prompts;
use crate::types::{CandidateFlag, Modality, RequirementCandidate, Source};
use serde_json::{json, Value};

/// Typed partial update produced by one Classify response item
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyPatch {
    pub idx: Option<usize>,
    pub category: Option<String>,
    pub modality: Option<Modality>,
}

impl ClassifyPatch {
    pub fn from_value(value: &Value) -> Self {
        match value.as_object() {
            Some(object) => ClassifyPatch {
                idx: index_from(object.get("_idx")),
                category: string_field(object, "category"),
                modality: string_field(object, "modality").and_then(|m| Modality::parse(&m)),
            },
            None => ClassifyPatch {
                idx: None,
                category: None,
                modality: None,
            },
        }
    }

    /// Field-level merge. Regex-derived values are only ever filled, never replaced.
    pub fn apply(&self, candidate: &mut RequirementCandidate, categories: &[String]) {
        let may_replace = candidate.source == Source::Llm;
        if let Some(category) = &self.category {
            if may_replace || candidate.category.is_none() {
                candidate.category = Some(canonical_category(category, categories));
            }
        }
        if let Some(modality) = self.modality {
            if may_replace || candidate.modality.is_none() {
                candidate.modality = Some(modality);
            }
        }
    }
}

impl Indexed for ClassifyPatch {
    fn batch_index(&self) -> Option<usize> {
        self.idx
    }
}

/// Vocabulary spelling of `category` when it matches case-insensitively
fn canonical_category(category: &str, categories: &[String]) -> String {
    categories
        .iter()
        .find(|known| known.eq_ignore_ascii_case(category))
        .cloned()
        .unwrap_or_else(|| category.to_string())
}

fn parse_patches(value: Value) -> Result<Vec<ClassifyPatch>, ModelError> {
    Ok(items_array(value)?.iter().map(ClassifyPatch::from_value).collect())
}

/// Wire form of a batch; `_idx` exists only here, never on the candidates
fn batch_items(batch: &[RequirementCandidate]) -> Value {
    Value::Array(
        batch
            .iter()
            .enumerate()
            .map(|(idx, candidate)| {
                json!({
                    "_idx": idx,
                    "quote": candidate.quote,
                    "section": candidate.section,
                    "category_hint": candidate.category_hint,
                    "modality_hint": candidate.modality_hint.map(|m| m.as_str()),
                })
            })
            .collect(),
    )
}

#[derive(Debug)]
pub struct ClassifyOutcome {
    pub candidates: Vec<RequirementCandidate>,
    /// Batch positions that received no response item
    pub misses: Vec<usize>,
    pub outcome: StageOutcome,
    pub calls: usize,
    pub error: Option<PipelineError>,
}

/// Assigns category and modality to a batch of candidates in one call
pub struct ClassifyStage<'a> {
    model: &'a dyn ModelClient,
    categories: &'a [String],
}

impl<'a> ClassifyStage<'a> {
    pub fn new(model: &'a dyn ModelClient, categories: &'a [String]) -> Self {
        Self { model, categories }
    }

    pub fn run(&self, mut batch: Vec<RequirementCandidate>) -> ClassifyOutcome {
        let prompt = prompts::classify_prompt(self.categories, &batch_items(&batch));
        let schema = prompts::classify_schema(self.categories);
        let call = call_with_retry(self.model, Stage::Classify, &prompt, &schema, parse_patches);
        let outcome = call.stage_outcome();
        let calls = call.calls();

        let patches = match call {
            CallOutcome::Ok(patches) | CallOutcome::Retried(patches) => patches,
            CallOutcome::Failed(error) => {
                for candidate in &mut batch {
                    candidate.add_flag(CandidateFlag::ClassifyFailed);
                }
                return ClassifyOutcome {
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
                Some(patch) => patch.apply(candidate, self.categories),
                None => candidate.add_flag(CandidateFlag::ClassifyAlignmentMiss),
            }
        }
        if !alignment.misses.is_empty() {
            tracing::warn!(
                misses = alignment.misses.len(),
                batch = batch.len(),
                "classify response missing items"
            );
        }

        ClassifyOutcome {
            candidates: batch,
            misses: alignment.misses,
            outcome,
            calls,
            error: None,
        }
    }
}

/// Fill classification from Extract hints when the Classify stage is disabled
pub fn classify_from_hints(candidate: &mut RequirementCandidate) {
    if candidate.category.is_none() {
        candidate.category = candidate.category_hint.clone();
    }
    if candidate.modality.is_none() {
        candidate.modality = candidate.modality_hint;
    }
}

/// Drop candidates missing required fields. Candidates of a failed batch pass
/// through unclassified. Returns the survivors and the drop count.
pub fn validation_gate(candidates: Vec<RequirementCandidate>) -> (Vec<RequirementCandidate>, usize) {
    let before = candidates.len();
    let kept: Vec<_> = candidates
        .into_iter()
        .filter(|c| c.passes_validation() || c.has_flag(CandidateFlag::ClassifyFailed))
        .collect();
    let dropped = before - kept.len();
    if dropped > 0 {
        tracing::debug!(dropped, "validation gate dropped candidates");
    }
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::testing::ScriptedModel;
    use crate::types::Chunk;
    use pretty_assertions::assert_eq;

    fn chunk() -> Chunk {
        Chunk {
            index: 0,
            section: "SECTION C".to_string(),
            start: 0,
            end: 0,
            page_start: 1,
            page_end: 1,
            overlap_prefix: 0,
            text: String::new(),
        }
    }

    fn batch(n: usize) -> Vec<RequirementCandidate> {
        (0..n)
            .map(|i| {
                RequirementCandidate::extracted(
                    "sow.pdf",
                    &chunk(),
                    i,
                    format!("The Contractor shall perform task {i}."),
                )
            })
            .collect()
    }

    /// Echo every `_idx` with a category derived from it, optionally reversed or with gaps
    fn echo_model(reverse: bool, skip: Option<usize>) -> ScriptedModel {
        ScriptedModel::new().on("classify", move |prompt| {
            let items = ScriptedModel::batch_items(prompt);
            let mut out: Vec<Value> = items
                .iter()
                .filter_map(|item| item["_idx"].as_u64())
                .filter(|idx| Some(*idx as usize) != skip)
                .map(|idx| {
                    json!({
                        "_idx": idx,
                        "category": if idx % 2 == 0 { "submission" } else { "Technology" },
                        "modality": "SHALL",
                    })
                })
                .collect();
            if reverse {
                out.reverse();
            }
            Ok(Value::Array(out))
        })
    }

    #[test]
    fn test_classify_is_permutation_invariant() {
        let categories = ModelConfig::default().categories;
        let in_order = echo_model(false, None);
        let reversed = echo_model(true, None);

        let a = ClassifyStage::new(&in_order, &categories).run(batch(5));
        let b = ClassifyStage::new(&reversed, &categories).run(batch(5));

        assert_eq!(a.candidates, b.candidates);
        assert!(a.misses.is_empty());
        assert_eq!(a.candidates[0].category.as_deref(), Some("Submission"));
        assert_eq!(a.candidates[1].category.as_deref(), Some("Technology"));
        assert!(a.candidates.iter().all(|c| c.modality == Some(Modality::Shall)));
    }

    #[test]
    fn test_alignment_miss_leaves_candidate_untouched() {
        let categories = ModelConfig::default().categories;
        let model = echo_model(true, Some(3));
        let original = batch(5);

        let outcome = ClassifyStage::new(&model, &categories).run(original.clone());
        assert_eq!(outcome.misses, vec![3]);

        let missed = &outcome.candidates[3];
        assert!(missed.has_flag(CandidateFlag::ClassifyAlignmentMiss));
        let mut unflagged = missed.clone();
        unflagged.flags.clear();
        assert_eq!(unflagged, original[3]);

        for (i, candidate) in outcome.candidates.iter().enumerate().filter(|(i, _)| *i != 3) {
            assert!(candidate.flags.is_empty(), "candidate {i} flagged");
            assert!(candidate.is_classified());
        }

        let (kept, dropped) = validation_gate(outcome.candidates);
        assert_eq!(kept.len(), 4);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_failed_batch_passes_gate_unclassified() {
        let categories = ModelConfig::default().categories;
        let model = ScriptedModel::new().on("classify", |_| Ok(json!("nope")));

        let outcome = ClassifyStage::new(&model, &categories).run(batch(2));
        assert_eq!(outcome.outcome, StageOutcome::Failed);
        assert!(outcome.error.is_some());

        let (kept, dropped) = validation_gate(outcome.candidates);
        assert_eq!((kept.len(), dropped), (2, 0));
        assert!(kept.iter().all(|c| c.has_flag(CandidateFlag::ClassifyFailed)));
        assert!(kept.iter().all(|c| c.category.is_none()));
    }

    #[test]
    fn test_patch_never_replaces_regex_fields() {
        let mut candidate = batch(1).remove(0);
        candidate.source = Source::Regex;
        candidate.category = Some("Submission".to_string());

        let patch = ClassifyPatch {
            idx: Some(0),
            category: Some("Technology".to_string()),
            modality: Some(Modality::Must),
        };
        patch.apply(&mut candidate, &[]);
        assert_eq!(candidate.category.as_deref(), Some("Submission"));
        assert_eq!(candidate.modality, Some(Modality::Must));
    }

    #[test]
    fn test_hints_fill_classification() {
        let mut candidate = batch(1).remove(0);
        candidate.category_hint = Some("Submission".to_string());
        candidate.modality_hint = Some(Modality::May);
        classify_from_hints(&mut candidate);
        assert!(candidate.passes_validation());
    }
}
