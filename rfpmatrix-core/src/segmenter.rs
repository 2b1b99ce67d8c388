use crate::config::PipelineConfig;
use crate::types::{Chunk, Document, UNSECTIONED};
use anyhow::{Context, Result};
use regex::Regex;

/// Heading-like line detected in the document text
#[derive(Debug, Clone, PartialEq)]
pub struct Heading {
    pub offset: usize,
    pub label: String,
}

/// Splits document text into heading-aware chunks.
///
/// A chunk closes at the first heading after its start once it covers at least
/// `pages_per_chunk` pages, or at `max_chars`. Hard cuts back off to whitespace
/// and the next chunk re-reads the last `overlap` bytes so a requirement
/// sentence is never only seen split in half.
pub struct Segmenter {
    heading_patterns: Vec<Regex>,
    max_heading_chars: usize,
    pages_per_chunk: usize,
    max_chars: usize,
    overlap: usize,
    max_chunks: usize,
}

impl Segmenter {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        // Compile patterns from config
        let mut heading_patterns = Vec::new();
        for pattern_str in &config.segmenter.heading_patterns {
            heading_patterns.push(
                Regex::new(pattern_str)
                    .with_context(|| format!("Invalid heading pattern: {pattern_str}"))?,
            );
        }

        Ok(Self {
            heading_patterns,
            max_heading_chars: config.segmenter.max_heading_chars,
            pages_per_chunk: config.pages_per_chunk.max(1),
            max_chars: config.max_chars.max(1),
            overlap: config.overlap,
            max_chunks: config.max_chunks,
        })
    }

    pub fn is_heading(&self, line: &str) -> bool {
        let trimmed = line.trim();
        !trimmed.is_empty()
            && trimmed.len() <= self.max_heading_chars
            && self.heading_patterns.iter().any(|p| p.is_match(trimmed))
    }

    pub fn detect_headings(&self, text: &str) -> Vec<Heading> {
        let mut headings = Vec::new();
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            if self.is_heading(line) {
                let leading = line.len() - line.trim_start().len();
                headings.push(Heading {
                    offset: offset + leading,
                    label: line.trim().to_string(),
                });
            }
            offset += line.len();
        }
        headings
    }

    pub fn segment(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text.as_str();
        let len = text.len();
        let headings = self.detect_headings(text);

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut overlap_prefix = 0;

        while start < len {
            let hard_limit = start + self.max_chars;

            let heading_boundary = headings
                .iter()
                .filter(|h| h.offset > start && h.offset < hard_limit)
                .find(|h| {
                    let (first, last) = document.page_range(start, h.offset);
                    (last - first + 1) as usize >= self.pages_per_chunk
                })
                .map(|h| h.offset);

            let (end, next_start) = match heading_boundary {
                Some(boundary) => (boundary, boundary),
                None if len <= hard_limit => (len, len),
                None => {
                    let end = cut_point(text, start, hard_limit);
                    (end, self.overlap_start(text, start, end))
                }
            };

            let (page_start, page_end) = document.page_range(start, end);
            chunks.push(Chunk {
                index: chunks.len(),
                section: section_label(&headings, text, start, end),
                start,
                end,
                page_start,
                page_end,
                overlap_prefix,
                text: text[start..end].to_string(),
            });

            overlap_prefix = end - next_start;
            start = next_start;
        }

        if self.max_chunks > 0 && chunks.len() > self.max_chunks {
            tracing::warn!(
                document = document.name(),
                total = chunks.len(),
                kept = self.max_chunks,
                "chunk limit reached, truncating"
            );
            chunks.truncate(self.max_chunks);
        }

        chunks
    }

    /// Start of the chunk following a hard cut at `end`
    fn overlap_start(&self, text: &str, start: usize, end: usize) -> usize {
        if self.overlap == 0 {
            return end;
        }
        let mut next = floor_char_boundary(text, end.saturating_sub(self.overlap));
        // Begin the overlap on a word boundary when one exists
        if let Some((i, ch)) = text[next..end].char_indices().find(|(_, c)| c.is_whitespace()) {
            next += i + ch.len_utf8();
        }
        if next <= start || next >= end {
            end
        } else {
            next
        }
    }
}

/// Hard cut position: the last whitespace in the second half of the window, or the window end
fn cut_point(text: &str, start: usize, hard_limit: usize) -> usize {
    let mut limit = floor_char_boundary(text, hard_limit.min(text.len()));
    if limit <= start {
        limit = ceil_char_boundary(text, start + 1);
    }
    let half = ceil_char_boundary(text, start + (limit - start) / 2);
    if half >= limit {
        return limit;
    }
    match text[half..limit].char_indices().rev().find(|(_, c)| c.is_whitespace()) {
        Some((i, ch)) => half + i + ch.len_utf8(),
        None => limit,
    }
}

/// Heading at the chunk start, else the nearest preceding heading, else the
/// first heading inside the chunk, else UNSECTIONED
fn section_label(headings: &[Heading], text: &str, start: usize, end: usize) -> String {
    let leading = text[start..end].len() - text[start..end].trim_start().len();
    headings
        .iter()
        .rev()
        .find(|h| h.offset <= start + leading)
        .or_else(|| headings.iter().find(|h| h.offset < end))
        .map(|h| h.label.clone())
        .unwrap_or_else(|| UNSECTIONED.to_string())
}

pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

pub(crate) fn ceil_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentSource;
    use proptest::prelude::*;

    fn document(pages: &[&str]) -> Document {
        Document::from_pages(
            DocumentSource::named("rfp.txt", "hash"),
            pages.iter().map(|p| p.to_string()).collect(),
        )
    }

    fn segmenter(pages_per_chunk: usize, max_chars: usize, overlap: usize) -> Segmenter {
        let config = PipelineConfig {
            pages_per_chunk,
            max_chars,
            overlap,
            ..Default::default()
        };
        Segmenter::new(&config).unwrap()
    }

    /// Chunks start at 0, end at the text length, never leave a gap and always advance
    fn assert_complete_coverage(doc: &Document, chunks: &[Chunk]) {
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, doc.text.len());
        for pair in chunks.windows(2) {
            assert!(pair[1].start <= pair[0].end, "gap between chunks");
            assert!(pair[1].start > pair[0].start, "chunk did not advance");
            assert_eq!(pair[1].overlap_prefix, pair[0].end - pair[1].start);
        }
        let mut rebuilt = String::new();
        for chunk in chunks {
            assert_eq!(chunk.text, &doc.text[chunk.start..chunk.end]);
            assert!(chunk.page_start >= 1 && chunk.page_start <= chunk.page_end);
            assert!(chunk.page_end <= doc.page_count());
            rebuilt.push_str(&chunk.text[chunk.overlap_prefix..]);
        }
        assert_eq!(rebuilt, doc.text);
    }

    #[test]
    fn test_heading_detection() {
        let seg = segmenter(1, 6000, 600);
        assert!(seg.is_heading("SECTION L - INSTRUCTIONS TO OFFERORS"));
        assert!(seg.is_heading("Section M Evaluation Factors"));
        assert!(seg.is_heading("3.2.1 Monthly Reporting"));
        assert!(seg.is_heading("C.4.2 Transition"));
        assert!(seg.is_heading("ATTACHMENT J-1"));
        assert!(!seg.is_heading("The Contractor shall submit monthly reports."));
        assert!(!seg.is_heading(""));
    }

    #[test]
    fn test_splits_at_headings_once_page_threshold_met() {
        let doc = document(&[
            "SECTION L\nThe Offeror shall submit a proposal.",
            "SECTION M\nProposals will be evaluated on price.",
        ]);
        let chunks = segmenter(1, 6000, 600).segment(&doc);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section, "SECTION L");
        assert_eq!((chunks[0].page_start, chunks[0].page_end), (1, 1));
        assert_eq!(chunks[1].section, "SECTION M");
        assert_eq!((chunks[1].page_start, chunks[1].page_end), (2, 2));
        assert_complete_coverage(&doc, &chunks);
    }

    #[test]
    fn test_heading_below_page_threshold_does_not_split() {
        let doc = document(&[
            "SECTION L\nThe Offeror shall submit a proposal.",
            "SECTION M\nProposals will be evaluated on price.",
        ]);
        let chunks = segmenter(3, 6000, 600).segment(&doc);

        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].page_start, chunks[0].page_end), (1, 2));
        assert_complete_coverage(&doc, &chunks);
    }

    #[test]
    fn test_unsectioned_and_inherited_labels() {
        let body = "word ".repeat(60);
        let doc = document(&[&format!("Preamble text without heading. {body}")]);
        let chunks = segmenter(1, 100, 20).segment(&doc);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.section == UNSECTIONED));

        let doc = document(&[&format!("SECTION C\n{body}")]);
        let chunks = segmenter(1, 100, 20).segment(&doc);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.section == "SECTION C"));
    }

    #[test]
    fn test_hard_cut_carries_overlap() {
        let doc = document(&[&"The Contractor shall deliver the report. ".repeat(20)]);
        let chunks = segmenter(1, 200, 50).segment(&doc);

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].overlap_prefix, 0);
        assert!(chunks[1].overlap_prefix > 0 && chunks[1].overlap_prefix <= 50);
        assert!(chunks.iter().all(|c| c.len() <= 200));
        assert_complete_coverage(&doc, &chunks);
    }

    #[test]
    fn test_max_chunks_truncates() {
        let doc = document(&[&"word ".repeat(500)]);
        let config = PipelineConfig {
            max_chars: 100,
            overlap: 10,
            max_chunks: 2,
            ..Default::default()
        };
        let chunks = Segmenter::new(&config).unwrap().segment(&doc);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_multibyte_text_cuts_on_char_boundaries() {
        let doc = document(&[&"Überprüfung der Anforderungen — ".repeat(30)]);
        let chunks = segmenter(1, 64, 16).segment(&doc);
        assert_complete_coverage(&doc, &chunks);
    }

    fn page_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                Just("SECTION L".to_string()),
                Just("3.1 Reporting".to_string()),
                "[a-z]{1,12}( [a-z]{1,12}){0,12}\\.",
                Just(String::new()),
            ],
            0..20,
        )
        .prop_map(|lines| lines.join("\n"))
    }

    proptest! {
        #[test]
        fn prop_segmentation_covers_document(
            pages in prop::collection::vec(page_strategy(), 1..6),
            pages_per_chunk in 1usize..4,
            max_chars in 40usize..400,
            overlap_ratio in 0.0f64..0.45,
        ) {
            let overlap = (max_chars as f64 * overlap_ratio) as usize;
            let doc = Document::from_pages(DocumentSource::named("p", "h"), pages);
            prop_assume!(!doc.text.is_empty());
            let chunks = segmenter(pages_per_chunk, max_chars, overlap).segment(&doc);
            assert_complete_coverage(&doc, &chunks);
        }
    }
}
