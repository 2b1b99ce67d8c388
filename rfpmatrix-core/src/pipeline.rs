use crate::cache::{ResultCacheKey, ResultCacheValue};
use crate::confidence::ConfidenceTable;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::loaders::LoaderRegistry;
use crate::merge::{self, EquivalencePredicate, ExactMatch};
use crate::model::ModelClient;
use crate::observability::{
    MatrixSummary, NoopObserver, RunStats, Stage, StageEvent, StageObserver, StageOutcome,
};
use crate::regex_pass::{summarize_requirement_language, RegexPrePass, RequirementSummary};
use crate::segmenter::Segmenter;
use crate::stages::{
    classify_from_hints, fallback_grounding, validation_gate, ClassifyStage, ExtractStage,
    GroundStage,
};
use crate::storage::{calculate_config_hash, calculate_content_hash, NoOpStorage, ResultStorage};
use crate::types::*;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Model name recorded in cache keys for runs without a model
const REGEX_ONLY_MODEL: &str = "regex-only";

/// Captured intermediate outputs from each pipeline stage
/// Used for testing and diagnostics. Lets you inspect/compare each boundary
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStages {
    pub chunks: Vec<Chunk>,
    pub regex_candidates: Vec<RequirementCandidate>,
    pub extracted: Vec<RequirementCandidate>,
    pub classified: Vec<RequirementCandidate>,
    pub grounded: Vec<RequirementCandidate>,
    pub records: Vec<RequirementRecord>,
    pub stats: RunStats,
}

/// Requirements extracted from one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    pub document: String,
    pub content_hash: String,
    pub page_count: u32,
    pub records: Vec<RequirementRecord>,
    pub stats: RunStats,
    /// Modal keyword counts over the whole document text
    #[serde(default)]
    pub language: RequirementSummary,
    #[serde(default)]
    pub from_cache: bool,
}

/// Compliance matrix for a multi-document submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub documents: Vec<String>,
    pub records: Vec<RequirementRecord>,
    pub failures: Vec<DocumentFailure>,
    pub stats: RunStats,
}

impl SubmissionResult {
    pub fn summary(&self) -> MatrixSummary {
        MatrixSummary::from_records(&self.records)
    }
}

/// Runs the extraction pipeline over documents.
///
/// Immutable once built, so one extractor can serve several documents in
/// parallel. All collaborators are injected.
pub struct RequirementExtractor {
    loaders: LoaderRegistry,
    model: Option<Box<dyn ModelClient>>,
    storage: Box<dyn ResultStorage>,
    observer: Box<dyn StageObserver>,
    equivalence: Box<dyn EquivalencePredicate>,
    segmenter: Segmenter,
    regex: RegexPrePass,
    confidence: ConfidenceTable,
    config: PipelineConfig,
    config_hash: String,
    skip_cache: bool,
}

impl RequirementExtractor {
    /// Create RequirementExtractor with full dependency injection
    pub fn new_with_dependencies(
        loaders: LoaderRegistry,
        model: Option<Box<dyn ModelClient>>,
        storage: Box<dyn ResultStorage>,
        observer: Box<dyn StageObserver>,
        equivalence: Box<dyn EquivalencePredicate>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(format!("{e:#}")))?;
        let segmenter =
            Segmenter::new(&config).map_err(|e| PipelineError::Config(format!("{e:#}")))?;
        let config_hash =
            calculate_config_hash(&config).map_err(|e| PipelineError::Config(e.to_string()))?;

        if model.is_none() && config.stages.uses_model() {
            tracing::info!("no model client configured, running regex pre-pass only");
        }

        Ok(Self {
            loaders,
            model,
            storage,
            observer,
            equivalence,
            segmenter,
            regex: RegexPrePass::new(&config),
            confidence: ConfidenceTable::new(config.confidence.clone()),
            config,
            config_hash,
            skip_cache: false,
        })
    }

    /// Default loaders, no cache, no observer, exact-match dedupe
    pub fn new(config: PipelineConfig, model: Option<Box<dyn ModelClient>>) -> Result<Self> {
        Self::new_with_dependencies(
            LoaderRegistry::default(),
            model,
            Box::new(NoOpStorage::new()),
            Box::new(NoopObserver),
            Box::new(ExactMatch),
            config,
        )
    }

    /// Bypass result cache lookup and storage
    pub fn with_skip_cache(mut self, skip_cache: bool) -> Self {
        self.skip_cache = skip_cache;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn model_name(&self) -> &str {
        self.active_model()
            .map(|model| model.name())
            .unwrap_or(REGEX_ONLY_MODEL)
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.loaders.supports(path)
    }

    fn active_model(&self) -> Option<&dyn ModelClient> {
        if self.config.stages.uses_model() {
            self.model.as_deref()
        } else {
            None
        }
    }

    fn use_cache(&self) -> bool {
        self.config.cache_results && !self.skip_cache
    }

    /// Process one file with result caching
    pub fn process_document(&self, path: &Path) -> Result<DocumentResult> {
        let start_time = Instant::now();
        let bytes =
            std::fs::read(path).map_err(|e| PipelineError::unreadable(path.display(), e))?;
        let cache_key = ResultCacheKey::new(
            calculate_content_hash(&bytes),
            self.config_hash.clone(),
            self.model_name(),
        );

        if self.use_cache() {
            match self.storage.get_result(&cache_key) {
                Ok(Some(cached)) => {
                    tracing::info!(path = %path.display(), "cache hit");
                    let mut result = cached.result;
                    result.from_cache = true;
                    return Ok(result);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "cache lookup failed"),
            }
        }

        let document = self.load(path, &bytes)?;
        let result = self.process_loaded(&document);

        if self.use_cache() {
            if result.stats.total_failed_batches() == 0 {
                let processing_time = start_time.elapsed().as_millis() as u64;
                let cache_value = ResultCacheValue::new(result.clone(), processing_time);
                if let Err(e) = self.storage.store_result(&cache_key, &cache_value) {
                    tracing::warn!(error = %e, "cache store failed");
                }
            } else {
                tracing::debug!(
                    path = %path.display(),
                    failed_batches = result.stats.total_failed_batches(),
                    "not caching result with failed batches"
                );
            }
        }

        tracing::info!(
            path = %path.display(),
            records = result.records.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "document processed"
        );
        Ok(result)
    }

    /// Process an already-loaded document. Never fails: degraded stages are
    /// reflected in flags and stats.
    pub fn process_loaded(&self, document: &Document) -> DocumentResult {
        let (records, stats) = self.run(document, None);
        DocumentResult {
            document: document.name().to_string(),
            content_hash: document.source.content_hash.clone(),
            page_count: document.page_count(),
            records,
            stats,
            language: summarize_requirement_language(&document.text),
            from_cache: false,
        }
    }

    /// Process document and capture all intermediate stage outputs
    /// Used for pipeline diagnostics and testing stage boundaries
    pub fn process_document_capture_stages(&self, path: &Path) -> Result<PipelineStages> {
        let bytes =
            std::fs::read(path).map_err(|e| PipelineError::unreadable(path.display(), e))?;
        let document = self.load(path, &bytes)?;
        Ok(self.capture_stages(&document))
    }

    pub fn capture_stages(&self, document: &Document) -> PipelineStages {
        let mut stages = PipelineStages::default();
        let (records, stats) = self.run(document, Some(&mut stages));
        stages.records = records;
        stages.stats = stats;
        stages
    }

    /// Process every document independently, then merge in input order and
    /// dedupe across documents. Unreadable documents are recorded as failures.
    pub fn process_submission(&self, paths: &[PathBuf]) -> SubmissionResult {
        let outcomes: Vec<Result<DocumentResult>> = if self.config.parallel_documents {
            paths.par_iter().map(|path| self.process_document(path)).collect()
        } else {
            paths.iter().map(|path| self.process_document(path)).collect()
        };

        let mut stats = RunStats::default();
        let mut documents = Vec::new();
        let mut failures = Vec::new();
        let mut records = Vec::new();

        for (path, outcome) in paths.iter().zip(outcomes) {
            match outcome {
                Ok(result) => {
                    stats.absorb(&result.stats);
                    documents.push(result.document);
                    records.extend(result.records);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "document failed");
                    stats.documents_failed += 1;
                    failures.push(DocumentFailure {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let started = Instant::now();
        let before = records.len();
        let (records, removed) = merge::dedupe(records, self.equivalence.as_ref());
        stats.duplicates_removed += removed;
        self.observer.on_stage(
            &StageEvent::new(Stage::Dedupe, "submission", started).items(before, records.len()),
        );

        SubmissionResult {
            run_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            documents,
            records,
            failures,
            stats,
        }
    }

    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Document> {
        let started = Instant::now();
        let name = path.display().to_string();
        match self.loaders.load_bytes(path, bytes) {
            Ok(document) => {
                self.observer.on_stage(
                    &StageEvent::new(Stage::Load, &name, started)
                        .items(1, document.page_count() as usize),
                );
                Ok(document)
            }
            Err(e) => {
                self.observer.on_stage(
                    &StageEvent::new(Stage::Load, &name, started)
                        .items(1, 0)
                        .outcome(StageOutcome::Failed),
                );
                Err(e)
            }
        }
    }

    fn run(
        &self,
        document: &Document,
        mut capture: Option<&mut PipelineStages>,
    ) -> (Vec<RequirementRecord>, RunStats) {
        let name = document.name();
        let mut stats = RunStats {
            documents_processed: 1,
            ..Default::default()
        };

        let started = Instant::now();
        let chunks = self.segmenter.segment(document);
        stats.chunks = chunks.len();
        self.observer
            .on_stage(&StageEvent::new(Stage::Segment, name, started).items(1, chunks.len()));

        let mut regex_hits = Vec::new();
        let mut llm_findings = Vec::new();

        for chunk in &chunks {
            if self.config.stages.regex_prepass {
                let started = Instant::now();
                let hits = self.regex.scan(document, chunk);
                self.observer.on_stage(
                    &StageEvent::new(Stage::Regex, name, started)
                        .chunk(chunk.index)
                        .items(1, hits.len()),
                );
                stats.regex_candidates += hits.len();
                if let Some(stages) = capture.as_deref_mut() {
                    stages.regex_candidates.extend(hits.iter().cloned());
                }
                regex_hits.extend(hits);
            }

            if let Some(model) = self.active_model() {
                let findings =
                    self.model_stages(model, document, chunk, &mut stats, capture.as_deref_mut());
                llm_findings.extend(findings);
            }
        }

        // Merge
        let started = Instant::now();
        let items_in = regex_hits.len() + llm_findings.len();
        let report = merge::merge_document(regex_hits, llm_findings);
        stats.corroborated += report.corroborated;
        let mut candidates = report.candidates;
        self.observer.on_stage(
            &StageEvent::new(Stage::Merge, name, started).items(items_in, candidates.len()),
        );

        // Score before dedupe so the higher-confidence duplicate survives
        let started = Instant::now();
        self.confidence.apply(&mut candidates);
        self.observer.on_stage(
            &StageEvent::new(Stage::Score, name, started).items(candidates.len(), candidates.len()),
        );

        let started = Instant::now();
        let before = candidates.len();
        let (candidates, removed) = merge::dedupe(candidates, self.equivalence.as_ref());
        stats.duplicates_removed += removed;
        self.observer.on_stage(
            &StageEvent::new(Stage::Dedupe, name, started).items(before, candidates.len()),
        );

        let records: Vec<RequirementRecord> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let origin = candidate.id.clone();
                let record = merge::finalize(candidate, &chunks);
                if record.is_none() {
                    tracing::warn!(document = name, candidate = %origin, "no page provenance, dropping candidate");
                }
                record
            })
            .collect();
        stats.ungrounded = records
            .iter()
            .filter(|r| r.flags.contains(&CandidateFlag::Ungrounded))
            .count();

        if let Some(stages) = capture.as_deref_mut() {
            stages.chunks = chunks;
        }

        tracing::debug!(
            document = name,
            chunks = stats.chunks,
            regex = stats.regex_candidates,
            llm = stats.llm_candidates,
            records = records.len(),
            "pipeline complete"
        );
        (records, stats)
    }

    /// Extract, Classify and Ground for one chunk
    fn model_stages(
        &self,
        model: &dyn ModelClient,
        document: &Document,
        chunk: &Chunk,
        stats: &mut RunStats,
        mut capture: Option<&mut PipelineStages>,
    ) -> Vec<RequirementCandidate> {
        let name = document.name();

        // Extract
        let started = Instant::now();
        let extracted = ExtractStage::new(model).run(document, chunk);
        self.record_call(stats, Stage::Extract, extracted.calls, extracted.outcome);
        self.observer.on_stage(
            &StageEvent::new(Stage::Extract, name, started)
                .chunk(chunk.index)
                .items(1, extracted.candidates.len())
                .outcome(extracted.outcome),
        );
        stats.llm_candidates += extracted.candidates.len();
        if let Some(stages) = capture.as_deref_mut() {
            stages.extracted.extend(extracted.candidates.iter().cloned());
        }
        if extracted.candidates.is_empty() {
            return Vec::new();
        }

        // Classify
        let batch_size = self.config.batch_size.max(1);
        let mut classified = Vec::with_capacity(extracted.candidates.len());
        if self.config.stages.classify {
            let stage = ClassifyStage::new(model, &self.config.model.categories);
            for batch in extracted.candidates.chunks(batch_size) {
                let started = Instant::now();
                let outcome = stage.run(batch.to_vec());
                self.record_call(stats, Stage::Classify, outcome.calls, outcome.outcome);
                stats.alignment_misses += outcome.misses.len();
                self.observer.on_stage(
                    &StageEvent::new(Stage::Classify, name, started)
                        .chunk(chunk.index)
                        .batch(batch.len())
                        .items(batch.len(), outcome.candidates.len() - outcome.misses.len())
                        .outcome(outcome.outcome),
                );
                classified.extend(outcome.candidates);
            }
        } else {
            classified = extracted.candidates;
            classified.iter_mut().for_each(classify_from_hints);
        }

        let (classified, dropped) = validation_gate(classified);
        stats.validation_drops += dropped;
        if let Some(stages) = capture.as_deref_mut() {
            stages.classified.extend(classified.iter().cloned());
        }

        // Ground
        let mut grounded = Vec::with_capacity(classified.len());
        if self.config.stages.ground {
            let stage = GroundStage::new(model);
            for batch in classified.chunks(batch_size) {
                let started = Instant::now();
                let outcome = stage.run(document, chunk, batch.to_vec());
                self.record_call(stats, Stage::Ground, outcome.calls, outcome.outcome);
                stats.alignment_misses += outcome.misses.len();
                self.observer.on_stage(
                    &StageEvent::new(Stage::Ground, name, started)
                        .chunk(chunk.index)
                        .batch(batch.len())
                        .items(batch.len(), outcome.candidates.len() - outcome.misses.len())
                        .outcome(outcome.outcome),
                );
                grounded.extend(outcome.candidates);
            }
        } else {
            grounded = classified;
            for candidate in &mut grounded {
                fallback_grounding(candidate, chunk);
            }
        }

        if let Some(stages) = capture {
            stages.grounded.extend(grounded.iter().cloned());
        }
        grounded
    }

    fn record_call(&self, stats: &mut RunStats, stage: Stage, calls: usize, outcome: StageOutcome) {
        stats.model_calls += calls;
        stats.retries += calls.saturating_sub(1);
        if outcome == StageOutcome::Failed {
            stats.record_failed_batch(stage);
        }
    }
}
