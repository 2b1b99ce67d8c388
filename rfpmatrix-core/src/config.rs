use crate::types::{Modality, PatternClass};
use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_pages_per_chunk() -> usize {
    2
}

fn default_max_chars() -> usize {
    6000
}

fn default_overlap() -> usize {
    600
}

fn default_batch_size() -> usize {
    25
}

/// Pipeline configuration. Threaded into every component's constructor and
/// never mutated once a pipeline is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Minimum pages a chunk must cover before a heading may close it
    #[serde(default = "default_pages_per_chunk")]
    pub pages_per_chunk: usize,
    /// Hard ceiling on chunk length in bytes
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Tail carried into the next chunk after a hard cut
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Candidates per Classify/Ground call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Truncate the chunk list per document (0 = unbounded)
    #[serde(default)]
    pub max_chunks: usize,
    /// Process the documents of a submission in parallel
    #[serde(default)]
    pub parallel_documents: bool,
    /// Store fully successful document results in the result cache
    #[serde(default = "default_true")]
    pub cache_results: bool,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub regex: RegexConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pages_per_chunk: default_pages_per_chunk(),
            max_chars: default_max_chars(),
            overlap: default_overlap(),
            batch_size: default_batch_size(),
            max_chunks: 0,
            parallel_documents: false,
            cache_results: true,
            segmenter: SegmenterConfig::default(),
            stages: StagesConfig::default(),
            regex: RegexConfig::default(),
            confidence: ConfidenceConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Regex patterns matched against trimmed lines to detect headings
    pub heading_patterns: Vec<String>,
    /// Lines longer than this are never headings
    pub max_heading_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            heading_patterns: vec![
                // "3.2.1 Title", "C.4.2 Title", "1. Title"
                r"^(?:[A-Z]\.)?\d+(?:\.\d+)*\.?\s+[A-Z]".to_string(),
                // Known solicitation markers
                r"(?i)^section\s+[A-Z0-9]+\b".to_string(),
                r"^(?:PART|ARTICLE|ATTACHMENT|APPENDIX|EXHIBIT)\s+[A-Z0-9IVX]+\b".to_string(),
                // ALL CAPS short line containing at least one letter
                r"^[A-Z][A-Z0-9 ,&/\-\.\(\):]{2,79}$".to_string(),
            ],
            max_heading_chars: 100,
        }
    }
}

/// Stage switches. Disabling `extract` gives a regex-only run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagesConfig {
    #[serde(default = "default_true")]
    pub regex_prepass: bool,
    #[serde(default = "default_true")]
    pub extract: bool,
    #[serde(default = "default_true")]
    pub classify: bool,
    #[serde(default = "default_true")]
    pub ground: bool,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            regex_prepass: true,
            extract: true,
            classify: true,
            ground: true,
        }
    }
}

impl StagesConfig {
    pub fn regex_only() -> Self {
        Self {
            regex_prepass: true,
            extract: false,
            classify: false,
            ground: false,
        }
    }

    pub fn uses_model(&self) -> bool {
        self.extract
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegexConfig {
    /// Pattern groups in scan order
    pub groups: Vec<PatternGroupConfig>,
    /// Expanded quotes are capped at this many bytes
    pub max_quote_chars: usize,
    /// Expanded quotes shorter than this are skipped
    pub min_match_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternGroupConfig {
    /// Name of the pattern group
    pub name: String,
    /// Whether this group is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RegexConfig {
    fn default() -> Self {
        Self {
            groups: PatternClass::ALL
                .iter()
                .map(|class| PatternGroupConfig {
                    name: class.name().to_string(),
                    enabled: true,
                })
                .collect(),
            max_quote_chars: 500,
            min_match_chars: 10,
        }
    }
}

impl RegexConfig {
    /// Enabled groups in configured order; unknown names are skipped
    pub fn enabled_groups(&self) -> Vec<PatternClass> {
        self.groups
            .iter()
            .filter(|group| group.enabled)
            .filter_map(|group| PatternClass::from_name(&group.name))
            .collect()
    }
}

/// Confidence constants. Heuristic values kept tunable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Obligation hit with SHALL/MUST/REQUIRED/PROHIBITED
    pub regex_binding: f32,
    /// Obligation hit with a weaker modal
    pub regex_weak: f32,
    pub regex_deadline: f32,
    pub regex_evaluation: f32,
    pub regex_certification: f32,
    pub regex_formatting: f32,
    pub regex_submission: f32,
    pub llm_classified_grounded: f32,
    pub llm_classified_ungrounded: f32,
    pub llm_unclassified: f32,
    pub corroboration_boost: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            regex_binding: 0.65,
            regex_weak: 0.55,
            regex_deadline: 0.70,
            regex_evaluation: 0.60,
            regex_certification: 0.60,
            regex_formatting: 0.70,
            regex_submission: 0.60,
            llm_classified_grounded: 0.95,
            llm_classified_ungrounded: 0.85,
            llm_unclassified: 0.50,
            corroboration_boost: 0.05,
        }
    }
}

impl ConfidenceConfig {
    /// Preset for a regex hit of `class`
    pub fn regex_preset(&self, class: PatternClass, modality: Option<Modality>) -> f32 {
        match class {
            PatternClass::Obligation => {
                if modality.is_some_and(|m| m.is_binding()) {
                    self.regex_binding
                } else {
                    self.regex_weak
                }
            }
            PatternClass::Deadline => self.regex_deadline,
            PatternClass::Evaluation => self.regex_evaluation,
            PatternClass::Certification => self.regex_certification,
            PatternClass::Formatting => self.regex_formatting,
            PatternClass::Submission => self.regex_submission,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Output token ceiling passed to the model client at construction
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Category vocabulary offered to the Classify stage
    pub categories: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 16000,
            temperature: 0.0,
            timeout_secs: 120,
            categories: default_categories(),
        }
    }
}

fn default_categories() -> Vec<String> {
    [
        "Submission",
        "Eligibility & Set-Asides",
        "Contract Type & Terms",
        "Pricing & Payment",
        "Evaluation & Award",
        "Technical Approach & Capability",
        "Management & Staffing",
        "Personnel & Qualifications",
        "Security (Personnel & Facility)",
        "Privacy & Data Protection",
        "Compliance & Regulatory",
        "Flowdowns & Subcontracting",
        "Performance & Deliverables",
        "Schedule & Milestones",
        "Quality Assurance",
        "Operations & Sustainment",
        "Supply Chain & Property Management",
        "Customer Service & Communications",
        "Training & Workforce Development",
        "Risk Management & Oversight Authority",
        "Technology",
        "Accessibility",
        "Sustainability",
        "General Administrative",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl PipelineConfig {
    /// Load configuration from YAML file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: PipelineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from an optional path, falling back to defaults on any error
    pub fn load_with_fallback(config_path: Option<&str>) -> Self {
        match config_path {
            Some(path) => match Self::load_from_file(path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {:#}. Using defaults.", path, e);
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }

    /// Save configuration to YAML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml).with_context(|| format!("Failed to write config file: {path}"))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chars == 0 {
            bail!("max_chars must be greater than 0");
        }
        if self.overlap >= self.max_chars / 2 {
            bail!(
                "overlap ({}) must be less than half of max_chars ({})",
                self.overlap,
                self.max_chars
            );
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.pages_per_chunk == 0 {
            bail!("pages_per_chunk must be at least 1");
        }
        for pattern in &self.segmenter.heading_patterns {
            Regex::new(pattern).with_context(|| format!("Invalid heading pattern: {pattern}"))?;
        }
        for group in &self.regex.groups {
            if PatternClass::from_name(&group.name).is_none() {
                bail!("Unknown regex pattern group: {}", group.name);
            }
        }
        Ok(())
    }
}
