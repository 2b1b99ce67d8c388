// Observability hook and run statistics
//
// The pipeline emits exactly one StageEvent per stage invocation. Observers
// are optional: the default NoopObserver ignores everything and the pipeline
// behaves identically with or without a listener.

use crate::types::{RequirementRecord, Source};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Load,
    Segment,
    Regex,
    Extract,
    Classify,
    Ground,
    Merge,
    Score,
    Dedupe,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Segment => "segment",
            Stage::Regex => "regex",
            Stage::Extract => "extract",
            Stage::Classify => "classify",
            Stage::Ground => "ground",
            Stage::Merge => "merge",
            Stage::Score => "score",
            Stage::Dedupe => "dedupe",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Ok,
    /// Succeeded on the retry
    Retried,
    /// Both attempts failed; the batch passed through degraded
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageEvent {
    pub stage: Stage,
    pub document: String,
    pub chunk_index: Option<usize>,
    pub batch_size: usize,
    pub elapsed: Duration,
    pub items_in: usize,
    pub items_out: usize,
    pub outcome: StageOutcome,
}

impl StageEvent {
    /// Event for `stage` timed from `started`; refine with the builder methods
    pub fn new(stage: Stage, document: &str, started: Instant) -> Self {
        Self {
            stage,
            document: document.to_string(),
            chunk_index: None,
            batch_size: 0,
            elapsed: started.elapsed(),
            items_in: 0,
            items_out: 0,
            outcome: StageOutcome::Ok,
        }
    }

    pub fn chunk(mut self, index: usize) -> Self {
        self.chunk_index = Some(index);
        self
    }

    pub fn batch(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn items(mut self, items_in: usize, items_out: usize) -> Self {
        self.items_in = items_in;
        self.items_out = items_out;
        self
    }

    pub fn outcome(mut self, outcome: StageOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// Listener for stage events
pub trait StageObserver: Send + Sync {
    fn on_stage(&self, event: &StageEvent);
}

impl<T: StageObserver + ?Sized> StageObserver for Arc<T> {
    fn on_stage(&self, event: &StageEvent) {
        (**self).on_stage(event);
    }
}

/// Observer that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StageObserver for NoopObserver {
    fn on_stage(&self, _event: &StageEvent) {}
}

/// Logs each event through `tracing` at debug level (failures at warn)
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl StageObserver for TracingObserver {
    fn on_stage(&self, event: &StageEvent) {
        match event.outcome {
            StageOutcome::Failed => tracing::warn!(
                stage = %event.stage,
                document = %event.document,
                chunk = ?event.chunk_index,
                batch_size = event.batch_size,
                "stage failed after retry"
            ),
            _ => tracing::debug!(
                stage = %event.stage,
                document = %event.document,
                chunk = ?event.chunk_index,
                batch_size = event.batch_size,
                elapsed_ms = event.elapsed.as_millis() as u64,
                items_in = event.items_in,
                items_out = event.items_out,
                outcome = ?event.outcome,
                "stage complete"
            ),
        }
    }
}

/// Aggregates elapsed time per stage and prints a summary table
#[derive(Debug, Default)]
pub struct ProfilingObserver {
    timings: Mutex<BTreeMap<Stage, (usize, Duration)>>,
}

impl ProfilingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// (stage, invocations, total elapsed) in pipeline order
    pub fn timings(&self) -> Vec<(Stage, usize, Duration)> {
        match self.timings.lock() {
            Ok(timings) => timings
                .iter()
                .map(|(stage, (calls, elapsed))| (*stage, *calls, *elapsed))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn print_summary(&self) {
        let timings = self.timings();
        if timings.is_empty() {
            return;
        }

        println!("\n📊 Performance Summary:");
        let total: Duration = timings.iter().map(|(_, _, d)| *d).sum();

        for (stage, calls, duration) in &timings {
            let percentage = if total.is_zero() {
                0.0
            } else {
                (duration.as_secs_f64() / total.as_secs_f64()) * 100.0
            };
            println!(
                "   {:.<35} {:.0}ms ({:.1}%) x{}",
                stage.as_str(),
                duration.as_millis(),
                percentage,
                calls
            );
        }
        println!("   {:.<35} {:.0}ms", "Total", total.as_millis());
    }
}

impl StageObserver for ProfilingObserver {
    fn on_stage(&self, event: &StageEvent) {
        if let Ok(mut timings) = self.timings.lock() {
            let entry = timings.entry(event.stage).or_insert((0, Duration::ZERO));
            entry.0 += 1;
            entry.1 += event.elapsed;
        }
    }
}

/// Forwards every event to each wrapped observer
pub struct FanoutObserver {
    observers: Vec<Box<dyn StageObserver>>,
}

impl FanoutObserver {
    pub fn new(observers: Vec<Box<dyn StageObserver>>) -> Self {
        Self { observers }
    }
}

impl StageObserver for FanoutObserver {
    fn on_stage(&self, event: &StageEvent) {
        for observer in &self.observers {
            observer.on_stage(event);
        }
    }
}

/// Counters surfaced with every document and submission result
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStats {
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub chunks: usize,
    pub regex_candidates: usize,
    pub llm_candidates: usize,
    pub model_calls: usize,
    pub retries: usize,
    pub failed_batches: BTreeMap<Stage, usize>,
    pub alignment_misses: usize,
    pub validation_drops: usize,
    pub ungrounded: usize,
    pub corroborated: usize,
    pub duplicates_removed: usize,
}

impl RunStats {
    pub fn record_failed_batch(&mut self, stage: Stage) {
        *self.failed_batches.entry(stage).or_insert(0) += 1;
    }

    pub fn total_failed_batches(&self) -> usize {
        self.failed_batches.values().sum()
    }

    pub fn absorb(&mut self, other: &RunStats) {
        self.documents_processed += other.documents_processed;
        self.documents_failed += other.documents_failed;
        self.chunks += other.chunks;
        self.regex_candidates += other.regex_candidates;
        self.llm_candidates += other.llm_candidates;
        self.model_calls += other.model_calls;
        self.retries += other.retries;
        for (stage, count) in &other.failed_batches {
            *self.failed_batches.entry(*stage).or_insert(0) += count;
        }
        self.alignment_misses += other.alignment_misses;
        self.validation_drops += other.validation_drops;
        self.ungrounded += other.ungrounded;
        self.corroborated += other.corroborated;
        self.duplicates_removed += other.duplicates_removed;
    }
}

/// Distribution summary of a finished compliance matrix
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MatrixSummary {
    pub total: usize,
    pub by_modality: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub avg_confidence: f32,
    pub missing_classification: usize,
}

impl MatrixSummary {
    pub fn from_records(records: &[RequirementRecord]) -> Self {
        let mut summary = MatrixSummary {
            total: records.len(),
            ..Default::default()
        };

        for record in records {
            let modality = record
                .modality
                .map(|m| m.to_string())
                .unwrap_or_else(|| "MISSING".to_string());
            *summary.by_modality.entry(modality).or_insert(0) += 1;

            let category = record.category.clone().unwrap_or_else(|| "MISSING".to_string());
            *summary.by_category.entry(category).or_insert(0) += 1;

            let source = match record.source {
                Source::Regex => "regex",
                Source::Llm => "llm",
            };
            *summary.by_source.entry(source.to_string()).or_insert(0) += 1;

            if record.is_missing_classification() {
                summary.missing_classification += 1;
            }
        }

        if !records.is_empty() {
            let sum: f32 = records.iter().map(|r| r.confidence).sum();
            summary.avg_confidence = sum / records.len() as f32;
        }

        summary
    }
}
