use crate::config::ConfidenceConfig;
use crate::types::{CandidateFlag, RequirementCandidate, Source};

/// Deterministic confidence from source, classification, grounding and
/// corroboration. The same candidate always gets the same score.
pub struct ConfidenceTable {
    table: ConfidenceConfig,
}

impl ConfidenceTable {
    pub fn new(table: ConfidenceConfig) -> Self {
        Self { table }
    }

    pub fn score(&self, candidate: &RequirementCandidate) -> f32 {
        let base = match (candidate.source, candidate.pattern_class) {
            (Source::Regex, Some(class)) => self.table.regex_preset(class, candidate.modality),
            (Source::Regex, None) => self.table.regex_weak,
            (Source::Llm, _) if !candidate.is_classified() => self.table.llm_unclassified,
            (Source::Llm, _) if candidate.grounding.is_grounded() => {
                self.table.llm_classified_grounded
            }
            (Source::Llm, _) => self.table.llm_classified_ungrounded,
        };

        let boost = if candidate.has_flag(CandidateFlag::Corroborated) {
            self.table.corroboration_boost
        } else {
            0.0
        };

        (base + boost).clamp(0.0, 1.0)
    }

    /// Score every candidate in place
    pub fn apply(&self, candidates: &mut [RequirementCandidate]) {
        for candidate in candidates {
            candidate.confidence = Some(self.score(candidate));
        }
    }
}

impl Default for ConfidenceTable {
    fn default() -> Self {
        Self::new(ConfidenceConfig::default())
    }
}
