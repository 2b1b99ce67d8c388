// All core functionality is in rfpmatrix-core
// This CLI acts as a thin wrapper around the core library

// CLI-specific modules
pub mod export;
pub mod model_client;

// Re-export core types for convenience
pub use rfpmatrix_core::*;

// Re-export CLI utilities
pub use export::{save_records, ExportFormat};
pub use model_client::{ChatCompletionsClient, EndpointConfig};
