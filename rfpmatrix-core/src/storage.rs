use crate::cache::{ResultCacheKey, ResultCacheValue};
use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Storage abstraction for caching document results
pub trait ResultStorage: Send + Sync {
    fn get_result(&self, cache_key: &ResultCacheKey) -> Result<Option<ResultCacheValue>>;
    fn store_result(&self, cache_key: &ResultCacheKey, cache_value: &ResultCacheValue) -> Result<()>;
}

/// File-based storage implementation using local cache directory
pub struct FileStorage {
    cache_dir: String,
}

impl FileStorage {
    pub fn new(cache_dir: &str) -> Result<Self> {
        // Ensure cache directory exists
        fs::create_dir_all(format!("{cache_dir}/results"))?;

        Ok(Self {
            cache_dir: cache_dir.to_string(),
        })
    }

    fn result_path(&self, cache_key: &ResultCacheKey) -> String {
        format!("{}/results/{}.json", self.cache_dir, cache_key.to_cache_hash())
    }
}

impl ResultStorage for FileStorage {
    fn get_result(&self, cache_key: &ResultCacheKey) -> Result<Option<ResultCacheValue>> {
        let path = self.result_path(cache_key);
        if Path::new(&path).exists() {
            let json_str = fs::read_to_string(path)?;
            let cache_value: ResultCacheValue = serde_json::from_str(&json_str)
                .map_err(|e| anyhow!("Failed to deserialize cached ResultCacheValue: {}", e))?;
            Ok(Some(cache_value))
        } else {
            Ok(None)
        }
    }

    fn store_result(&self, cache_key: &ResultCacheKey, cache_value: &ResultCacheValue) -> Result<()> {
        let path = self.result_path(cache_key);
        let json_str = serde_json::to_string_pretty(cache_value)
            .map_err(|e| anyhow!("Failed to serialize ResultCacheValue: {}", e))?;
        fs::write(path, json_str)?;
        Ok(())
    }
}

/// Calculate a fast hash for document content using start + end chunks
pub fn calculate_content_hash(bytes: &[u8]) -> String {
    let chunk_size = 1024; // 1KB from start and end
    let mut hasher = Sha256::new();

    // Hash file size first (for quick differentiation)
    hasher.update(bytes.len().to_le_bytes());

    hasher.update(&bytes[..chunk_size.min(bytes.len())]);

    if bytes.len() > chunk_size {
        hasher.update(&bytes[bytes.len() - chunk_size..]);
    }

    format!("{:x}", hasher.finalize())
}

/// Calculate hash for configuration data (for the result cache key)
pub fn calculate_config_hash<T: serde::Serialize>(config: &T) -> Result<String> {
    let config_json = serde_json::to_string(config)
        .map_err(|e| anyhow!("Failed to serialize config for hashing: {}", e))?;

    let mut hasher = Sha256::new();
    hasher.update(config_json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// No-op storage implementation that disables all caching
pub struct NoOpStorage;

impl Default for NoOpStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl NoOpStorage {
    pub fn new() -> Self {
        Self
    }
}

impl ResultStorage for NoOpStorage {
    fn get_result(&self, _cache_key: &ResultCacheKey) -> Result<Option<ResultCacheValue>> {
        Ok(None) // Always cache miss
    }

    fn store_result(&self, _cache_key: &ResultCacheKey, _cache_value: &ResultCacheValue) -> Result<()> {
        Ok(()) // No-op
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::RunStats;
    use crate::pipeline::DocumentResult;

    #[test]
    fn test_content_hash_consistency() {
        let data = b"test document content with some data";
        assert_eq!(calculate_content_hash(data), calculate_content_hash(data));
    }

    #[test]
    fn test_content_hash_uniqueness() {
        assert_ne!(
            calculate_content_hash(b"solicitation 1"),
            calculate_content_hash(b"solicitation 2")
        );
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(temp_dir.path().to_str().unwrap()).unwrap();
        let key = ResultCacheKey::new("doc".into(), "cfg".into(), "scripted");

        assert!(storage.get_result(&key).unwrap().is_none());

        let result = DocumentResult {
            document: "rfp.txt".to_string(),
            content_hash: "doc".to_string(),
            page_count: 2,
            records: Vec::new(),
            stats: RunStats::default(),
            language: Default::default(),
            from_cache: false,
        };
        storage.store_result(&key, &ResultCacheValue::new(result, 12)).unwrap();

        let cached = storage.get_result(&key).unwrap().unwrap();
        assert_eq!(cached.result.document, "rfp.txt");
        assert_eq!(cached.processing_time_ms, 12);
    }

    #[test]
    fn test_noop_storage_always_misses() {
        let storage = NoOpStorage::new();
        let key = ResultCacheKey::new("doc".into(), "cfg".into(), "scripted");
        assert!(storage.get_result(&key).unwrap().is_none());
    }
}
