use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Section label for chunks that precede the first detected heading
pub const UNSECTIONED: &str = "UNSECTIONED";

// ============================================================================
// Documents and chunks
// ============================================================================

/// Page anchor: byte range of the document text that belongs to one page
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageAnchor {
    pub page: u32,
    pub start: usize,
    pub end: usize,
}

/// Identity of a loaded source file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentSource {
    pub name: String,
    pub path: Option<PathBuf>,
    pub content_hash: String,
}

impl DocumentSource {
    pub fn named(name: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            content_hash: content_hash.into(),
        }
    }
}

/// Extracted document text with its page map. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source: DocumentSource,
    pub text: String,
    pub pages: Vec<PageAnchor>,
}

impl Document {
    /// Separator inserted between consecutive pages; it belongs to the preceding page
    pub const PAGE_SEPARATOR: &'static str = "\n\n";

    /// Build a document from per-page text. Anchors are contiguous and cover the
    /// whole text so every offset resolves to a page.
    pub fn from_pages(source: DocumentSource, pages: Vec<String>) -> Self {
        let mut text = String::new();
        let mut anchors = Vec::with_capacity(pages.len().max(1));
        let page_total = pages.len();

        for (i, page_text) in pages.into_iter().enumerate() {
            let start = text.len();
            text.push_str(&page_text);
            if i + 1 < page_total {
                text.push_str(Self::PAGE_SEPARATOR);
            }
            anchors.push(PageAnchor {
                page: (i + 1) as u32,
                start,
                end: text.len(),
            });
        }

        if anchors.is_empty() {
            anchors.push(PageAnchor {
                page: 1,
                start: 0,
                end: 0,
            });
        }

        Self {
            source,
            text,
            pages: anchors,
        }
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    /// Page containing the byte at `offset`; offsets past the end map to the last page
    pub fn page_at(&self, offset: usize) -> u32 {
        let idx = self.pages.partition_point(|anchor| anchor.start <= offset);
        self.pages[idx.saturating_sub(1)].page
    }

    /// First and last page whose range intersects `[start, end)`
    pub fn page_range(&self, start: usize, end: usize) -> (u32, u32) {
        let last_byte = if end > start { end - 1 } else { start };
        (self.page_at(start), self.page_at(last_byte))
    }

    pub fn slice(&self, start: usize, end: usize) -> &str {
        &self.text[start.min(self.text.len())..end.min(self.text.len())]
    }

    /// Text of `[start, end)` with a `[Page N]` marker at each page boundary
    pub fn render_with_page_markers(&self, start: usize, end: usize) -> String {
        let mut rendered = String::with_capacity(end.saturating_sub(start) + 64);
        let (first, last) = self.page_range(start, end);
        for anchor in &self.pages[(first - 1) as usize..last as usize] {
            let from = anchor.start.max(start);
            let to = anchor.end.min(end);
            if from >= to {
                continue;
            }
            rendered.push_str(&format!("[Page {}]\n", anchor.page));
            rendered.push_str(self.slice(from, to));
            if !rendered.ends_with('\n') {
                rendered.push('\n');
            }
        }
        rendered
    }
}

/// Heading-scoped span of document text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub section: String,
    pub start: usize,
    pub end: usize,
    pub page_start: u32,
    pub page_end: u32,
    /// Leading bytes duplicated from the previous chunk after a hard cut
    pub overlap_prefix: usize,
    pub text: String,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &CharSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ============================================================================
// Requirement vocabulary
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Regex,
    Llm,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Regex => write!(f, "regex"),
            Source::Llm => write!(f, "llm"),
        }
    }
}

/// Obligation strength of a requirement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Shall,
    Must,
    Should,
    May,
    Will,
    Required,
    Prohibited,
    /// Informational statement with no modal verb (regex-only)
    Info,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Shall => "SHALL",
            Modality::Must => "MUST",
            Modality::Should => "SHOULD",
            Modality::May => "MAY",
            Modality::Will => "WILL",
            Modality::Required => "REQUIRED",
            Modality::Prohibited => "PROHIBITED",
            Modality::Info => "INFO",
        }
    }

    /// Binding modals carry the higher regex preset
    pub fn is_binding(&self) -> bool {
        matches!(
            self,
            Modality::Shall | Modality::Must | Modality::Required | Modality::Prohibited
        )
    }

    pub fn strength(&self) -> u8 {
        match self {
            Modality::Prohibited => 6,
            Modality::Shall | Modality::Must => 5,
            Modality::Required => 4,
            Modality::Will => 3,
            Modality::Should => 2,
            Modality::May => 1,
            Modality::Info => 0,
        }
    }

    /// Lenient parse of a modal phrase as produced by the model or the regex pass
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        match upper.as_str() {
            "SHALL" => Some(Modality::Shall),
            "MUST" => Some(Modality::Must),
            "SHOULD" => Some(Modality::Should),
            "MAY" => Some(Modality::May),
            "WILL" => Some(Modality::Will),
            "REQUIRED" | "REQUIRE" | "REQUIRES" => Some(Modality::Required),
            "PROHIBITED" | "PROHIBIT" | "MUST NOT" | "SHALL NOT" => Some(Modality::Prohibited),
            "INFO" => Some(Modality::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named regex pattern group, in scan order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PatternClass {
    Obligation,
    Deadline,
    Evaluation,
    Certification,
    Formatting,
    Submission,
}

impl PatternClass {
    pub const ALL: [PatternClass; 6] = [
        PatternClass::Obligation,
        PatternClass::Deadline,
        PatternClass::Evaluation,
        PatternClass::Certification,
        PatternClass::Formatting,
        PatternClass::Submission,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PatternClass::Obligation => "obligation",
            PatternClass::Deadline => "deadline",
            PatternClass::Evaluation => "evaluation",
            PatternClass::Certification => "certification",
            PatternClass::Formatting => "formatting",
            PatternClass::Submission => "submission",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.name() == name)
    }

    /// Category assigned to regex hits of this group
    pub fn default_category(&self) -> &'static str {
        match self {
            PatternClass::Obligation => "General Administrative",
            PatternClass::Deadline => "Schedule & Milestones",
            PatternClass::Evaluation => "Evaluation & Award",
            PatternClass::Certification => "Compliance & Regulatory",
            PatternClass::Formatting | PatternClass::Submission => "Submission",
        }
    }
}

impl fmt::Display for PatternClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroundingStatus {
    /// Not grounded yet
    Pending,
    /// Evidence located verbatim in the chunk text
    Verified,
    /// Page span asserted by the model but evidence not located
    Asserted,
    /// Fallback to the chunk's page range
    Ungrounded,
}

impl GroundingStatus {
    pub fn is_grounded(&self) -> bool {
        matches!(self, GroundingStatus::Verified | GroundingStatus::Asserted)
    }
}

impl fmt::Display for GroundingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GroundingStatus::Pending => "pending",
            GroundingStatus::Verified => "verified",
            GroundingStatus::Asserted => "asserted",
            GroundingStatus::Ungrounded => "ungrounded",
        };
        f.write_str(label)
    }
}

/// Degraded outcomes recorded on a candidate rather than raised
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CandidateFlag {
    ClassifyAlignmentMiss,
    GroundAlignmentMiss,
    ClassifyFailed,
    GroundFailed,
    Ungrounded,
    Corroborated,
}

impl CandidateFlag {
    pub fn is_alignment_miss(&self) -> bool {
        matches!(
            self,
            CandidateFlag::ClassifyAlignmentMiss | CandidateFlag::GroundAlignmentMiss
        )
    }
}

impl fmt::Display for CandidateFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CandidateFlag::ClassifyAlignmentMiss => "classify_alignment_miss",
            CandidateFlag::GroundAlignmentMiss => "ground_alignment_miss",
            CandidateFlag::ClassifyFailed => "classify_failed",
            CandidateFlag::GroundFailed => "ground_failed",
            CandidateFlag::Ungrounded => "ungrounded",
            CandidateFlag::Corroborated => "corroborated",
        };
        f.write_str(label)
    }
}

/// Provenance of a finding folded into another by corroboration or dedupe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub origin_id: String,
    pub source: Source,
    pub document: String,
    pub section: String,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    pub quote: String,
}

// ============================================================================
// Requirement candidates
// ============================================================================

/// Requirement progressively enriched across stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequirementCandidate {
    pub id: String,
    pub source: Source,
    pub document: String,
    pub chunk_index: usize,
    pub section: String,
    pub quote: String,
    pub label: Option<String>,
    pub category_hint: Option<String>,
    pub modality_hint: Option<Modality>,
    pub category: Option<String>,
    pub modality: Option<Modality>,
    pub pattern_class: Option<PatternClass>,
    pub span: Option<CharSpan>,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    pub evidence_quote: Option<String>,
    pub grounding: GroundingStatus,
    pub confidence: Option<f32>,
    pub flags: Vec<CandidateFlag>,
    pub citations: Vec<Citation>,
}

impl RequirementCandidate {
    /// Candidate produced by the Extract stage; classification and grounding pending
    pub fn extracted(document: &str, chunk: &Chunk, position: usize, quote: String) -> Self {
        Self {
            id: format!("LLM-{}-{}", chunk.index, position),
            source: Source::Llm,
            document: document.to_string(),
            chunk_index: chunk.index,
            section: chunk.section.clone(),
            quote,
            label: None,
            category_hint: None,
            modality_hint: None,
            category: None,
            modality: None,
            pattern_class: None,
            span: None,
            page_start: None,
            page_end: None,
            evidence_quote: None,
            grounding: GroundingStatus::Pending,
            confidence: None,
            flags: Vec::new(),
            citations: Vec::new(),
        }
    }

    pub fn has_flag(&self, flag: CandidateFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn add_flag(&mut self, flag: CandidateFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    pub fn is_classified(&self) -> bool {
        self.category.as_deref().is_some_and(|c| !c.trim().is_empty()) && self.modality.is_some()
    }

    /// Minimum fields required past the Classify validation gate
    pub fn passes_validation(&self) -> bool {
        !self.quote.trim().is_empty() && self.is_classified()
    }

    pub fn citation(&self) -> Citation {
        Citation {
            origin_id: self.id.clone(),
            source: self.source,
            document: self.document.clone(),
            section: self.section.clone(),
            page_start: self.page_start,
            page_end: self.page_end,
            quote: self.quote.clone(),
        }
    }
}

/// Finalized, immutable export record. Carries no transient batch fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequirementRecord {
    pub id: String,
    pub origin_id: String,
    pub source: Source,
    pub document: String,
    pub section: String,
    pub label: Option<String>,
    pub category: Option<String>,
    pub modality: Option<Modality>,
    pub pattern_class: Option<PatternClass>,
    pub quote: String,
    pub evidence_quote: Option<String>,
    pub page_start: u32,
    pub page_end: u32,
    pub confidence: f32,
    pub grounding: GroundingStatus,
    pub flags: Vec<CandidateFlag>,
    pub citations: Vec<Citation>,
}

impl RequirementRecord {
    pub fn is_missing_classification(&self) -> bool {
        self.category.is_none() || self.modality.is_none()
    }
}

/// Per-document failure recorded in a multi-document run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub path: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_pages() -> Document {
        Document::from_pages(
            DocumentSource::named("rfp.txt", "h"),
            vec!["Page one text.".to_string(), "Page two text.".to_string()],
        )
    }

    #[test]
    fn test_page_anchors_are_contiguous() {
        let doc = two_pages();
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[0].start, 0);
        assert_eq!(doc.pages[0].end, doc.pages[1].start);
        assert_eq!(doc.pages[1].end, doc.text.len());
    }

    #[test]
    fn test_page_lookup() {
        let doc = two_pages();
        assert_eq!(doc.page_at(0), 1);
        assert_eq!(doc.page_at(doc.pages[1].start), 2);
        assert_eq!(doc.page_at(doc.text.len() + 10), 2);
        assert_eq!(doc.page_range(0, doc.text.len()), (1, 2));
        assert_eq!(doc.page_range(0, 5), (1, 1));
    }

    #[test]
    fn test_page_markers() {
        let doc = two_pages();
        let rendered = doc.render_with_page_markers(0, doc.text.len());
        assert!(rendered.starts_with("[Page 1]\nPage one text."));
        assert!(rendered.contains("[Page 2]\nPage two text."));
    }

    #[test]
    fn test_modality_parse() {
        assert_eq!(Modality::parse("shall"), Some(Modality::Shall));
        assert_eq!(Modality::parse(" Must  Not "), Some(Modality::Prohibited));
        assert_eq!(Modality::parse("SHALL NOT"), Some(Modality::Prohibited));
        assert_eq!(Modality::parse("perhaps"), None);
        assert!(Modality::Must.is_binding());
        assert!(!Modality::Should.is_binding());
    }

    #[test]
    fn test_empty_document_has_one_page() {
        let doc = Document::from_pages(DocumentSource::named("empty", "h"), vec![]);
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.page_at(0), 1);
    }
}
