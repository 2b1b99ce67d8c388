//! Merge, corroboration, dedupe and finalization.
//!
//! Regex and LLM candidates are merged chunk by chunk. Within a chunk regex
//! hits come first (by offset), then LLM findings (in extract order). Dedupe
//! keys are produced by an injectable [`EquivalencePredicate`].

use crate::stages::fallback_grounding;
use crate::types::{
    CandidateFlag, Chunk, Citation, PatternClass, RequirementCandidate, RequirementRecord, Source,
};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Lowercase, collapse whitespace and strip trailing punctuation
pub fn normalize_quote(quote: &str) -> String {
    let collapsed = quote
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}

/// Canonical record id: `R-` plus 10 hex digits of SHA-256(normalized quote, category)
pub fn canonical_id(quote: &str, category: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_quote(quote).as_bytes());
    hasher.update([0x1f]);
    hasher.update(category.unwrap_or("").as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("R-{}", &digest[..10])
}

/// Decides which findings are duplicates. Findings with equal keys are
/// equivalent; returning distinct keys keeps both.
pub trait EquivalencePredicate: Send + Sync {
    fn key(&self, quote: &str, category: Option<&str>) -> String;

    fn name(&self) -> &str;
}

/// Exact match on (normalized quote, category)
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactMatch;

impl EquivalencePredicate for ExactMatch {
    fn key(&self, quote: &str, category: Option<&str>) -> String {
        format!("{}\u{1f}{}", normalize_quote(quote), category.unwrap_or(""))
    }

    fn name(&self) -> &str {
        "exact"
    }
}

/// Anything dedupe can compare and fold
pub trait Finding {
    fn quote(&self) -> &str;
    fn category(&self) -> Option<&str>;
    fn confidence(&self) -> f32;
    /// Append the loser's provenance and its citations to `self`
    fn absorb(&mut self, loser: Self);
}

impl Finding for RequirementCandidate {
    fn quote(&self) -> &str {
        &self.quote
    }

    fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    fn confidence(&self) -> f32 {
        self.confidence.unwrap_or(0.0)
    }

    fn absorb(&mut self, loser: Self) {
        self.citations.push(loser.citation());
        self.citations.extend(loser.citations);
    }
}

impl Finding for RequirementRecord {
    fn quote(&self) -> &str {
        &self.quote
    }

    fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }

    fn absorb(&mut self, loser: Self) {
        self.citations.push(Citation {
            origin_id: loser.origin_id,
            source: loser.source,
            document: loser.document,
            section: loser.section,
            page_start: Some(loser.page_start),
            page_end: Some(loser.page_end),
            quote: loser.quote,
        });
        self.citations.extend(loser.citations);
    }
}

/// Collapse equivalent findings. The survivor holds the earlier position and
/// the higher confidence (ties keep the earlier finding). Returns the
/// survivors and the number removed.
pub fn dedupe<T: Finding>(findings: Vec<T>, predicate: &dyn EquivalencePredicate) -> (Vec<T>, usize) {
    let mut survivors: Vec<T> = Vec::with_capacity(findings.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut removed = 0;

    for mut finding in findings {
        let key = predicate.key(finding.quote(), finding.category());
        match positions.get(&key) {
            Some(&pos) => {
                removed += 1;
                if finding.confidence() > survivors[pos].confidence() {
                    std::mem::swap(&mut survivors[pos], &mut finding);
                }
                survivors[pos].absorb(finding);
            }
            None => {
                positions.insert(key, survivors.len());
                survivors.push(finding);
            }
        }
    }

    (survivors, removed)
}

/// Result of merging one document's regex and LLM candidates
#[derive(Debug, Default)]
pub struct MergeReport {
    pub candidates: Vec<RequirementCandidate>,
    /// LLM findings confirmed by an overlapping regex hit
    pub corroborated: usize,
    /// Obligation hits folded into a corroborated LLM finding
    pub folded: usize,
}

/// Merge both candidate streams of one document in chunk order, marking
/// corroborated LLM findings and folding their overlapping obligation hits
pub fn merge_document(
    regex: Vec<RequirementCandidate>,
    llm: Vec<RequirementCandidate>,
) -> MergeReport {
    let mut by_chunk: BTreeMap<usize, (Vec<RequirementCandidate>, Vec<RequirementCandidate>)> =
        BTreeMap::new();
    for candidate in regex {
        by_chunk.entry(candidate.chunk_index).or_default().0.push(candidate);
    }
    for candidate in llm {
        by_chunk.entry(candidate.chunk_index).or_default().1.push(candidate);
    }

    let mut report = MergeReport::default();
    for (_, (mut regex, mut llm)) in by_chunk {
        regex.sort_by_key(|c| c.span.map(|s| s.start).unwrap_or(0));
        let mut folded = vec![false; regex.len()];

        for finding in llm.iter_mut().filter(|c| c.source == Source::Llm) {
            let Some(span) = finding.span else { continue };
            let mut corroborated = false;
            for (i, hit) in regex.iter().enumerate() {
                if !hit.span.is_some_and(|s| s.overlaps(&span)) {
                    continue;
                }
                corroborated = true;
                if hit.pattern_class == Some(PatternClass::Obligation) && !folded[i] {
                    folded[i] = true;
                    finding.citations.push(hit.citation());
                }
            }
            if corroborated {
                finding.add_flag(CandidateFlag::Corroborated);
                report.corroborated += 1;
            }
        }

        report.folded += folded.iter().filter(|f| **f).count();
        report.candidates.extend(
            regex
                .into_iter()
                .zip(folded)
                .filter(|(_, folded)| !folded)
                .map(|(hit, _)| hit),
        );
        report.candidates.extend(llm);
    }

    report
}

/// Freeze a scored candidate into an export record.
///
/// A candidate still missing pages takes its chunk's range as an ungrounded
/// record. Without a known chunk there is no page to cite and `None` is returned.
pub fn finalize(mut candidate: RequirementCandidate, chunks: &[Chunk]) -> Option<RequirementRecord> {
    if candidate.page_start.is_none() {
        let chunk = chunks.iter().find(|c| c.index == candidate.chunk_index)?;
        fallback_grounding(&mut candidate, chunk);
    }
    let page_start = candidate.page_start?;
    Some(RequirementRecord {
        id: canonical_id(&candidate.quote, candidate.category.as_deref()),
        origin_id: candidate.id,
        source: candidate.source,
        document: candidate.document,
        section: candidate.section,
        label: candidate.label,
        category: candidate.category,
        modality: candidate.modality,
        pattern_class: candidate.pattern_class,
        quote: candidate.quote,
        evidence_quote: candidate.evidence_quote,
        page_start,
        page_end: candidate.page_end.unwrap_or(page_start).max(page_start),
        confidence: candidate.confidence.unwrap_or(0.0),
        grounding: candidate.grounding,
        flags: candidate.flags,
        citations: candidate.citations,
    })
}
