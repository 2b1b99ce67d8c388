// RFP Matrix Core Library
//
// Extracts cited compliance requirements from solicitation documents.
// Main interface for converting documents into a compliance matrix.

pub mod cache;
pub mod confidence;
pub mod config;
pub mod error;
pub mod loaders;
pub mod merge;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod prompts;
pub mod regex_pass;
pub mod segmenter;
pub mod stages;
pub mod storage;
pub mod testing;
pub mod types;

// Re-export main types and functions for easy use
pub use types::*;
pub use config::PipelineConfig;
pub use error::{ModelError, PipelineError};
pub use loaders::{Loader, LoaderRegistry};
pub use merge::{EquivalencePredicate, ExactMatch};
pub use model::{ModelClient, ModelSettings, Prompt, ResponseSchema};
pub use observability::{
    FanoutObserver, MatrixSummary, NoopObserver, ProfilingObserver, RunStats, Stage, StageEvent,
    StageObserver, TracingObserver,
};
pub use pipeline::{DocumentResult, PipelineStages, RequirementExtractor, SubmissionResult};
pub use storage::{FileStorage, NoOpStorage, ResultStorage};
