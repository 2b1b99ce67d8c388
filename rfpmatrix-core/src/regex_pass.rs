// Deterministic regex pre-pass
//
// High-precision patterns run over each chunk before any model call. Every
// hit is expanded to its sentence and emitted as a fully populated candidate
// with exact span and page provenance.

use crate::config::{ConfidenceConfig, PipelineConfig};
use crate::segmenter::floor_char_boundary;
use crate::types::{
    CharSpan, Chunk, Document, GroundingStatus, Modality, PatternClass, RequirementCandidate,
    Source,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

const DATE: &str = r"(?:(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?|Jul(?:y)?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\.?\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4}|\d{1,2}/\d{1,2}/\d{2,4}|\d{4}-\d{2}-\d{2})";

const TIME_ZONE: &str = r"(?:EST|EDT|ET|CST|CDT|CT|MST|MDT|MT|PST|PDT|PT|AKST|HST|UTC|GMT|Zulu|local time)";

fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
}

static MODAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?i:must\s+not|shall\s+not|shall|must|should|will|required|prohibited)|MAY|[Mm]ay\s+(?:not|only|be|submit|include|request|propose|elect))\b")
        .unwrap()
});

static OBLIGATION: LazyLock<Vec<Regex>> = LazyLock::new(|| vec![MODAL.clone()]);

static DEADLINE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        format!(r"(?i)\b(?:due|deadline|no later than|not later than|NLT|by|before|on or before|prior to|received|submitted|closing date)\b[^.!?\n]{{0,80}}?{DATE}"),
        r"(?i)\b(?:within|no later than|not later than|NLT|prior to|by|before|after)\s+(?:the\s+)?\d{1,3}(?:st|nd|rd|th)?\s*(?:calendar\s+|business\s+|working\s+)?(?:days?|weeks?|months?|hours?)\b".to_string(),
        format!(r"\b\d{{1,2}}(?::\d{{2}})?\s*(?i:a\.?m\.?|p\.?m\.?)\s*\(?{TIME_ZONE}\)?"),
        format!(r"\b\d{{1,2}}:\d{{2}}\s*\(?{TIME_ZONE}\)?"),
    ])
});

static EVALUATION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(?:evaluation (?:factors?|criteria)|will be evaluated|basis (?:for|of) award|best value|lowest price technically acceptable|LPTA|trade-?off|adjectival rating|sub-?factors?)\b".to_string(),
        r"(?i)\b(?:significantly |slightly |approximately )?(?:more|less) important than\b".to_string(),
        r"(?i)\bfactor\s+\d+\b".to_string(),
        r"(?i)\b\d{1,3}\s*(?:points|%)\s+(?:weight|of the (?:total|overall))".to_string(),
    ])
});

static CERTIFICATION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(?:FAR|DFARS)\s*(?:clause\s*)?(?:52|252)\.\d{3}-\d{1,4}\b".to_string(),
        r"\b(?:52|252)\.\d{3}-\d{3,4}\b".to_string(),
        r"(?i)\b(?:certif(?:y|ies|ied|ication|ications)|representations? and certifications?|registered in SAM|SAM registration|CMMC(?:\s+Level\s+\d)?|NIST\s+SP\s+800-\d+|FedRAMP|FISMA|ISO\s*\d{4,5}|Section 508)\b".to_string(),
    ])
});

static FORMATTING: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(?:page|slide) limit(?:ation)?s?\b".to_string(),
        r"(?i)\b(?:not|no)\s+(?:to\s+)?(?:exceed|more than)\s+\d{1,3}\s+(?:pages|slides)\b".to_string(),
        r"(?i)\b\d{1,3}\s*-?\s*(?:page|slide)s?\s+(?:limit|maximum|max)\b".to_string(),
        r"(?i)\b\d{1,2}(?:\.\d)?\s*-?\s*(?:point|pt)\.?\s+(?:font|type)\b".to_string(),
        r"(?i)\b(?:font (?:size|type)|Times New Roman|Arial|Calibri|Courier New)\b".to_string(),
        r#"(?i)\b(?:\d(?:\.\d+)?|one)[- ]?(?:inch|in\.|")\s+margins?\b"#.to_string(),
        r#"(?i)\bmargins?\s+of\s+(?:at least\s+)?(?:\d(?:\.\d+)?|one)[- ]?(?:inch|in\.|")"#.to_string(),
        r"(?i)\b(?:single|double|1\.5)[- ]spac(?:ed|ing)\b".to_string(),
        r"(?i)\b(?:8\.5\s*(?:x|by)\s*11|letter[- ]size)\b".to_string(),
    ])
});

static SUBMISSION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(?:SAM\.gov|PIEE|GSA eBuy|eBuy|submission portal|e-?mail(?:ed)? to)\b".to_string(),
        r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.(?:gov|mil|com|org|net|us)\b".to_string(),
        r"(?i)\b(?:zip(?:ped)?|compressed) files?\b".to_string(),
        r"(?i)\bfile (?:name|naming|label(?:ing)?)\b".to_string(),
        r"(?i)\b\d{1,3}\s*(?:MB|megabytes?)\b".to_string(),
    ])
});

fn patterns_for(class: PatternClass) -> &'static [Regex] {
    match class {
        PatternClass::Obligation => OBLIGATION.as_slice(),
        PatternClass::Deadline => DEADLINE.as_slice(),
        PatternClass::Evaluation => EVALUATION.as_slice(),
        PatternClass::Certification => CERTIFICATION.as_slice(),
        PatternClass::Formatting => FORMATTING.as_slice(),
        PatternClass::Submission => SUBMISSION.as_slice(),
    }
}

/// Strongest modal keyword in `text`
pub fn strongest_modality(text: &str) -> Option<Modality> {
    MODAL
        .find_iter(text)
        .filter_map(|m| {
            let word = m.as_str().split_whitespace().take(2).collect::<Vec<_>>();
            Modality::parse(&word.join(" ")).or_else(|| Modality::parse(word[0]))
        })
        .max_by_key(|m| m.strength())
}

/// Byte range of the sentence containing `[start, end)` within `text`
pub fn sentence_bounds(text: &str, start: usize, end: usize) -> (usize, usize) {
    let bytes = text.as_bytes();
    let len = bytes.len();

    let followed_by_ws = |i: usize| i + 1 >= len || bytes[i + 1].is_ascii_whitespace();
    let is_terminator = |i: usize| match bytes[i] {
        b'!' | b'?' => followed_by_ws(i),
        // "p.m." and "U.S." are abbreviations, not sentence ends
        b'.' => followed_by_ws(i) && !(i >= 2 && bytes[i - 1].is_ascii_alphabetic() && bytes[i - 2] == b'.'),
        b'\n' => i + 1 < len && bytes[i + 1] == b'\n',
        _ => false,
    };

    let sentence_start = (0..start)
        .rev()
        .find(|&i| is_terminator(i))
        .map(|i| i + 1)
        .unwrap_or(0);

    let sentence_end = (end.max(start)..len)
        .find(|&i| is_terminator(i))
        .map(|i| if bytes[i] == b'\n' { i } else { i + 1 })
        .unwrap_or(len);

    (sentence_start, sentence_end.max(end))
}

/// Counts of requirement-language keywords across a document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequirementSummary {
    pub counts: BTreeMap<String, usize>,
    pub total: usize,
}

pub fn summarize_requirement_language(text: &str) -> RequirementSummary {
    let mut summary = RequirementSummary::default();
    for m in MODAL.find_iter(text) {
        let key = m
            .as_str()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        *summary.counts.entry(key).or_insert(0) += 1;
        summary.total += 1;
    }
    summary
}

/// Runs the enabled pattern groups over a chunk
pub struct RegexPrePass {
    groups: Vec<PatternClass>,
    confidence: ConfidenceConfig,
    max_quote_chars: usize,
    min_match_chars: usize,
}

impl RegexPrePass {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            groups: config.regex.enabled_groups(),
            confidence: config.confidence.clone(),
            max_quote_chars: config.regex.max_quote_chars,
            min_match_chars: config.regex.min_match_chars,
        }
    }

    /// Candidates for one chunk, ordered by offset then group order
    pub fn scan(&self, document: &Document, chunk: &Chunk) -> Vec<RequirementCandidate> {
        let mut candidates: Vec<(usize, usize, RequirementCandidate)> = Vec::new();

        for (group_order, class) in self.groups.iter().enumerate() {
            let mut matches: Vec<(usize, usize)> = patterns_for(*class)
                .iter()
                .flat_map(|pattern| pattern.find_iter(&chunk.text).map(|m| (m.start(), m.end())))
                .collect();
            matches.sort();

            let mut emitted: Vec<CharSpan> = Vec::new();
            for (m_start, m_end) in matches {
                // Sentences are expanded over the whole document so a hit near a
                // hard cut yields the same quote from both sides of the overlap
                let Some(span) =
                    self.quote_span(&document.text, chunk.start + m_start, chunk.start + m_end)
                else {
                    continue;
                };
                if emitted.iter().any(|prev| prev.overlaps(&span)) {
                    continue;
                }
                emitted.push(span);

                let candidate = self.build_candidate(document, chunk, *class, span);
                candidates.push((span.start, group_order, candidate));
            }
        }

        candidates.sort_by_key(|(offset, group_order, _)| (*offset, *group_order));
        candidates.into_iter().map(|(_, _, c)| c).collect()
    }

    /// Sentence-expanded, trimmed and capped span in document offsets
    fn quote_span(&self, text: &str, m_start: usize, m_end: usize) -> Option<CharSpan> {
        let (s, e) = sentence_bounds(text, m_start, m_end);
        let raw = &text[s..e];
        let start = s + (raw.len() - raw.trim_start().len());
        let mut end = s + raw.trim_end().len();
        if end <= start {
            return None;
        }
        if end - start > self.max_quote_chars {
            end = floor_char_boundary(text, start + self.max_quote_chars);
        }
        if end - start < self.min_match_chars {
            return None;
        }
        Some(CharSpan::new(start, end))
    }

    fn build_candidate(
        &self,
        document: &Document,
        chunk: &Chunk,
        class: PatternClass,
        span: CharSpan,
    ) -> RequirementCandidate {
        let quote = document.text[span.start..span.end].to_string();
        let modality = strongest_modality(&quote).or(Some(Modality::Info));
        let (page_start, page_end) = document.page_range(span.start, span.end);

        RequirementCandidate {
            id: format!("RX-{}-{}-{}", chunk.index, span.start, class.name()),
            source: Source::Regex,
            document: document.name().to_string(),
            chunk_index: chunk.index,
            section: chunk.section.clone(),
            quote,
            label: None,
            category_hint: None,
            modality_hint: None,
            category: Some(class.default_category().to_string()),
            modality,
            pattern_class: Some(class),
            span: Some(span),
            page_start: Some(page_start),
            page_end: Some(page_end),
            evidence_quote: None,
            grounding: GroundingStatus::Verified,
            confidence: Some(self.confidence.regex_preset(class, modality)),
            flags: Vec::new(),
            citations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentSource;

    fn single_chunk(text: &str) -> (Document, Chunk) {
        let doc = Document::from_pages(DocumentSource::named("rfp.txt", "h"), vec![text.to_string()]);
        let chunk = Chunk {
            index: 0,
            section: "SECTION C".to_string(),
            start: 0,
            end: doc.text.len(),
            page_start: 1,
            page_end: 1,
            overlap_prefix: 0,
            text: doc.text.clone(),
        };
        (doc, chunk)
    }

    fn scan(text: &str) -> Vec<RequirementCandidate> {
        let (doc, chunk) = single_chunk(text);
        RegexPrePass::new(&PipelineConfig::default()).scan(&doc, &chunk)
    }

    #[test]
    fn test_fixture_sentence_yields_obligation_and_deadline() {
        let sentence = "The Contractor SHALL submit monthly reports by the 5th business day, EST.";
        let candidates = scan(sentence);

        assert_eq!(candidates.len(), 2, "{candidates:#?}");
        let obligation: Vec<_> = candidates
            .iter()
            .filter(|c| c.pattern_class == Some(PatternClass::Obligation))
            .collect();
        let deadline: Vec<_> = candidates
            .iter()
            .filter(|c| c.pattern_class == Some(PatternClass::Deadline))
            .collect();

        assert_eq!(obligation.len(), 1);
        assert_eq!(obligation[0].confidence, Some(0.65));
        assert_eq!(obligation[0].modality, Some(Modality::Shall));
        assert_eq!(obligation[0].quote, sentence);
        assert_eq!(deadline.len(), 1);
        assert_eq!(deadline[0].quote, sentence);
    }

    #[test]
    fn test_weak_modal_preset() {
        let candidates = scan("The Offeror should describe its staffing approach in detail.");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].modality, Some(Modality::Should));
        assert_eq!(candidates[0].confidence, Some(0.55));
    }

    #[test]
    fn test_no_overlapping_hits_within_group() {
        // Two modals in one sentence expand to the same span
        let candidates = scan("The Contractor shall deliver the plan and should brief the COR.");
        let obligations = candidates
            .iter()
            .filter(|c| c.pattern_class == Some(PatternClass::Obligation))
            .count();
        assert_eq!(obligations, 1);
        assert_eq!(candidates[0].modality, Some(Modality::Shall));
    }

    #[test]
    fn test_candidates_ordered_by_offset() {
        let candidates = scan(
            "Proposals are limited to a 20 page limit. The Contractor shall comply with FAR 52.212-4.",
        );
        let offsets: Vec<usize> = candidates.iter().map(|c| c.span.unwrap().start).collect();
        let mut sorted = offsets.clone();
        sorted.sort();
        assert_eq!(offsets, sorted);
        assert!(candidates
            .iter()
            .any(|c| c.pattern_class == Some(PatternClass::Formatting)));
        assert!(candidates
            .iter()
            .any(|c| c.pattern_class == Some(PatternClass::Certification)));
    }

    #[test]
    fn test_sentence_bounds_skip_abbreviations() {
        let text = "Intro. Questions are due by 2:00 p.m. EST on Friday. Next.";
        let at = text.find("due").unwrap();
        let (s, e) = sentence_bounds(text, at, at + 3);
        assert_eq!(&text[s..e], " Questions are due by 2:00 p.m. EST on Friday.");
    }

    #[test]
    fn test_short_matches_are_skipped() {
        assert!(scan("Shall.").is_empty());
    }

    #[test]
    fn test_month_may_is_not_a_modal() {
        let candidates = scan("The kickoff meeting occurred on May 5, 2024 at headquarters.");
        assert!(candidates
            .iter()
            .all(|c| c.pattern_class != Some(PatternClass::Obligation)));
    }

    #[test]
    fn test_regex_candidates_carry_pages() {
        let doc = Document::from_pages(
            DocumentSource::named("rfp.txt", "h"),
            vec!["Intro page.".to_string(), "The Offeror must sign the SF 1449.".to_string()],
        );
        let chunk = Chunk {
            index: 0,
            section: "UNSECTIONED".to_string(),
            start: 0,
            end: doc.text.len(),
            page_start: 1,
            page_end: 2,
            overlap_prefix: 0,
            text: doc.text.clone(),
        };
        let candidates = RegexPrePass::new(&PipelineConfig::default()).scan(&doc, &chunk);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].page_start, Some(2));
        assert_eq!(candidates[0].page_end, Some(2));
        assert_eq!(candidates[0].grounding, GroundingStatus::Verified);
    }

    #[test]
    fn test_sentence_expands_past_chunk_cut() {
        let text = "Intro text here. The Contractor shall deliver the monthly status report to the COR.";
        let doc = Document::from_pages(DocumentSource::named("rfp.txt", "h"), vec![text.to_string()]);
        let cut = doc.text.find("monthly").unwrap();
        let head = Chunk {
            index: 0,
            section: "UNSECTIONED".to_string(),
            start: 0,
            end: cut,
            page_start: 1,
            page_end: 1,
            overlap_prefix: 0,
            text: doc.text[..cut].to_string(),
        };

        let candidates = RegexPrePass::new(&PipelineConfig::default()).scan(&doc, &head);
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].quote,
            "The Contractor shall deliver the monthly status report to the COR."
        );
        let span = candidates[0].span.unwrap();
        assert!(span.end > head.end);
        assert_eq!(doc.slice(span.start, span.end), candidates[0].quote);
    }

    #[test]
    fn test_requirement_summary_counts() {
        let summary = summarize_requirement_language(
            "The Contractor shall report. The Contractor SHALL NOT subcontract. Offerors should ask.",
        );
        assert_eq!(summary.counts.get("shall"), Some(&2));
        assert_eq!(summary.counts.get("should"), Some(&1));
        assert_eq!(summary.total, 3);
    }
}
