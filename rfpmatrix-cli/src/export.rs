// Compliance matrix writers

use anyhow::{Context, Result};
use rfpmatrix_core::RequirementRecord;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Placeholder for a classification the pipeline could not determine
pub const MISSING: &str = "MISSING";

pub const CSV_COLUMNS: [&str; 13] = [
    "id",
    "label",
    "category",
    "modality",
    "section",
    "page_start",
    "page_end",
    "quote",
    "confidence",
    "source",
    "document",
    "grounding",
    "flags",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unknown output format '{other}' (expected json or csv)")),
        }
    }
}

pub fn write_json<W: Write>(records: &[RequirementRecord], writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, records).context("Failed to serialize records")?;
    Ok(())
}

pub fn write_csv<W: Write>(records: &[RequirementRecord], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_COLUMNS)?;

    for record in records {
        let flags = record
            .flags
            .iter()
            .map(|flag| flag.to_string())
            .collect::<Vec<_>>()
            .join(";");
        csv.write_record([
            record.id.clone(),
            record.label.clone().unwrap_or_default(),
            record.category.clone().unwrap_or_else(|| MISSING.to_string()),
            record
                .modality
                .map(|m| m.to_string())
                .unwrap_or_else(|| MISSING.to_string()),
            record.section.clone(),
            record.page_start.to_string(),
            record.page_end.to_string(),
            record.quote.clone(),
            format!("{:.2}", record.confidence),
            record.source.to_string(),
            record.document.clone(),
            record.grounding.to_string(),
            flags,
        ])?;
    }

    csv.flush()?;
    Ok(())
}

/// Write records to `path` in `format`
pub fn save_records(records: &[RequirementRecord], path: &Path, format: ExportFormat) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    let writer = std::io::BufWriter::new(file);

    match format {
        ExportFormat::Json => write_json(records, writer),
        ExportFormat::Csv => write_csv(records, writer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfpmatrix_core::{CandidateFlag, GroundingStatus, Modality, Source};

    fn record(category: Option<&str>, modality: Option<Modality>) -> RequirementRecord {
        RequirementRecord {
            id: "R-0123456789".to_string(),
            origin_id: "LLM-0-0".to_string(),
            source: Source::Llm,
            document: "rfp.pdf".to_string(),
            section: "SECTION L".to_string(),
            label: Some("Page limit".to_string()),
            category: category.map(str::to_string),
            modality,
            pattern_class: None,
            quote: "The technical volume shall not exceed 20 pages, single-spaced.".to_string(),
            evidence_quote: None,
            page_start: 12,
            page_end: 13,
            confidence: 0.85,
            grounding: GroundingStatus::Ungrounded,
            flags: vec![CandidateFlag::GroundFailed, CandidateFlag::Ungrounded],
            citations: Vec::new(),
        }
    }

    #[test]
    fn test_csv_header_and_quoting() {
        let mut out = Vec::new();
        write_csv(&[record(Some("Submission"), Some(Modality::Shall))], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();

        assert_eq!(lines.next().unwrap(), CSV_COLUMNS.join(","));
        let row = lines.next().unwrap();
        assert!(row.contains("\"The technical volume shall not exceed 20 pages, single-spaced.\""));
        assert!(row.contains(",SHALL,"));
        assert!(row.ends_with(",ungrounded,ground_failed;ungrounded"));
    }

    #[test]
    fn test_csv_writes_missing_classification() {
        let mut out = Vec::new();
        write_csv(&[record(None, None)], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.contains("Page limit,MISSING,MISSING,SECTION L"));
    }

    #[test]
    fn test_json_has_no_batch_fields() {
        let mut out = Vec::new();
        write_json(&[record(Some("Submission"), Some(Modality::Must))], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\"modality\": \"MUST\""));
        assert!(!text.contains("_idx"));
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/matrix.csv");
        save_records(&[record(None, None)], &path, ExportFormat::Csv).unwrap();
        assert!(path.exists());
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }
}
