use crate::pipeline::DocumentResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version constants for cache invalidation
pub mod versions {
    pub const RFPMATRIX_VERSION: &str = env!("CARGO_PKG_VERSION");
    pub const PIPELINE_VERSION: &str = "1.0.0";
    pub const PROMPT_VERSION: &str = "1.0.0";
}

/// Result cache key (document bytes + config + model → requirements)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResultCacheKey {
    pub content_hash: String,
    pub config_hash: String,
    pub model: String,
    pub pipeline_version: String,
    pub prompt_version: String,
}

impl ResultCacheKey {
    pub fn new(content_hash: String, config_hash: String, model: impl Into<String>) -> Self {
        Self {
            content_hash,
            config_hash,
            model: model.into(),
            pipeline_version: versions::PIPELINE_VERSION.to_string(),
            prompt_version: versions::PROMPT_VERSION.to_string(),
        }
    }

    /// Compute cache key hash for storage
    pub fn to_cache_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(&self.content_hash);
        hasher.update(&self.config_hash);
        hasher.update(&self.model);
        hasher.update(&self.pipeline_version);
        hasher.update(&self.prompt_version);
        format!("{:x}", hasher.finalize())
    }
}

/// Cached document result with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCacheValue {
    pub result: DocumentResult,
    pub created_at: DateTime<Utc>,
    pub processing_time_ms: u64,
    pub cache_version: String,
}

impl ResultCacheValue {
    pub fn new(result: DocumentResult, processing_time_ms: u64) -> Self {
        Self {
            result,
            created_at: Utc::now(),
            processing_time_ms,
            cache_version: versions::RFPMATRIX_VERSION.to_string(),
        }
    }
}
