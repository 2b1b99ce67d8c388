use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// Import from rfpmatrix-core
use rfpmatrix_core::{
    ExactMatch, FanoutObserver, FileStorage, LoaderRegistry, ModelClient, ModelSettings,
    NoOpStorage, PipelineConfig, PipelineStages, ProfilingObserver, RequirementExtractor,
    ResultStorage, StageObserver, TracingObserver,
};
use rfpmatrix_core::config::StagesConfig;

// Import CLI utilities
use rfpmatrix::{save_records, ChatCompletionsClient, EndpointConfig, ExportFormat};

#[derive(Parser)]
#[command(name = "rfpmatrix")]
#[command(about = "Build a cited compliance matrix from RFP, SOW and PWS documents")]
struct Args {
    /// Documents to process (PDF, DOCX, TXT, MD); directories are expanded
    #[arg(required_unless_present = "show_configs")]
    inputs: Vec<PathBuf>,

    /// Path to custom config file (YAML format)
    #[arg(short, long)]
    config: Option<String>,

    /// Output file path (if not specified, auto-generated based on input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: json or csv
    #[arg(short = 'f', long, default_value = "json")]
    format: ExportFormat,

    /// Run the regex pre-pass only, without any model calls
    #[arg(long)]
    regex_only: bool,

    /// Model endpoint base URL (Azure resource URL or OpenAI-compatible base)
    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    endpoint: Option<String>,

    /// API key (falls back to OPENAI_API_KEY)
    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Azure OpenAI deployment name
    #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT")]
    deployment: Option<String>,

    /// Azure OpenAI API version
    #[arg(long, env = "AZURE_OPENAI_API_VERSION")]
    api_version: Option<String>,

    /// Model name for OpenAI-compatible endpoints
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o")]
    model: String,

    /// Enable detailed profiling of all pipeline stages
    #[arg(long)]
    profile: bool,

    /// Skip cache and force fresh processing (useful for development/testing)
    #[arg(long)]
    skip_cache: bool,

    /// Result cache directory (default: <user cache dir>/rfpmatrix)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Dump all intermediate pipeline stage outputs to a directory
    #[arg(long)]
    dump_stages: bool,

    /// Directory for stage dump output
    #[arg(long, default_value = "test_outputs/stages")]
    stages_dir: PathBuf,

    /// Print the matrix distribution summary
    #[arg(long)]
    summary: bool,

    /// Show available config options and exit
    #[arg(long)]
    show_configs: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    println!("🦀 RFP Compliance Matrix");

    if args.show_configs {
        show_help();
        return Ok(());
    }

    let mut config = PipelineConfig::load_with_fallback(args.config.as_deref());
    if let Some(config_path) = &args.config {
        println!("📋 Loaded config from: {}", config_path);
    } else {
        println!("📋 Using default config");
    }

    // Apply CLI overrides to config
    if args.regex_only {
        config.stages = StagesConfig::regex_only();
    }

    let model = create_model_client(&args, &config);
    match &model {
        Some(client) => println!("🤖 Model: {}", client.name()),
        None => println!("🔎 Regex-only run (no model calls)"),
    }

    let profiler = Arc::new(ProfilingObserver::new());
    let observer: Box<dyn StageObserver> = if args.profile {
        Box::new(FanoutObserver::new(vec![
            Box::new(TracingObserver),
            Box::new(profiler.clone()),
        ]))
    } else {
        Box::new(TracingObserver)
    };

    let extractor = RequirementExtractor::new_with_dependencies(
        LoaderRegistry::default(),
        model,
        create_storage(&args),
        observer,
        Box::new(ExactMatch),
        config,
    )?
    .with_skip_cache(args.skip_cache);

    let inputs = collect_inputs(&args.inputs, &extractor)?;
    if inputs.is_empty() {
        eprintln!("❌ No supported documents found in the given inputs");
        std::process::exit(1);
    }

    // Stage dump mode: capture and save all intermediates
    if args.dump_stages {
        println!("\n🔬 Pipeline stage dump mode");
        let mut dumped = 0;
        for input in &inputs {
            println!("📄 Processing: {}", input.display());
            match extractor.process_document_capture_stages(input) {
                Ok(stages) => {
                    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("document");
                    save_stages(&stages, input, &args.stages_dir.join(stem))?;
                    dumped += 1;
                }
                Err(e) => eprintln!("❌ Stage dump failed for {}: {e}", input.display()),
            }
        }
        if dumped == 0 {
            std::process::exit(1);
        }
        println!("\n✅ All stages dumped to: {}", args.stages_dir.display());
        return Ok(());
    }

    for input in &inputs {
        println!("📄 Processing: {}", input.display());
    }
    let result = extractor.process_submission(&inputs);

    for failure in &result.failures {
        eprintln!("⚠️  Skipped {}: {}", failure.path, failure.reason);
    }
    if result.documents.is_empty() {
        eprintln!("❌ No document could be read");
        std::process::exit(1);
    }

    let stats = &result.stats;
    println!("✅ Successfully processed {} document(s)", result.documents.len());
    println!("📊 Matrix metrics:");
    println!("   - Requirements: {}", result.records.len());
    println!("   - Chunks: {}", stats.chunks);
    println!("   - Regex candidates: {}", stats.regex_candidates);
    println!("   - LLM candidates: {}", stats.llm_candidates);
    println!("   - Model calls: {} ({} retries)", stats.model_calls, stats.retries);
    println!("   - Corroborated: {}", stats.corroborated);
    println!("   - Duplicates removed: {}", stats.duplicates_removed);
    if stats.total_failed_batches() > 0 || stats.alignment_misses > 0 {
        println!(
            "⚠️  Degraded: {} failed batch(es), {} alignment miss(es), {} ungrounded",
            stats.total_failed_batches(),
            stats.alignment_misses,
            stats.ungrounded
        );
    }

    if args.summary {
        print_summary(&result.summary());
    }

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&inputs[0], args.format));
    save_records(&result.records, &output_path, args.format)?;
    println!("💾 Compliance matrix saved to: {}", output_path.display());

    if args.profile {
        profiler.print_summary();
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// HTTP model client, or None for a regex-only run
fn create_model_client(args: &Args, config: &PipelineConfig) -> Option<Box<dyn ModelClient>> {
    if !config.stages.uses_model() {
        return None;
    }

    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|key| !key.trim().is_empty());
    let Some(api_key) = api_key else {
        tracing::warn!("no API key configured, falling back to the regex pre-pass only");
        return None;
    };

    let endpoint = EndpointConfig {
        endpoint: args
            .endpoint
            .clone()
            .or_else(|| std::env::var("OPENAI_BASE_URL").ok()),
        api_key,
        deployment: args.deployment.clone(),
        api_version: args.api_version.clone(),
        model: args.model.clone(),
    };
    let settings = ModelSettings::from(&config.model);
    Some(Box::new(ChatCompletionsClient::new(endpoint, settings)))
}

fn create_storage(args: &Args) -> Box<dyn ResultStorage> {
    let cache_dir = args
        .cache_dir
        .clone()
        .or_else(|| dirs::cache_dir().map(|dir| dir.join("rfpmatrix")));

    let Some(cache_dir) = cache_dir else {
        return Box::new(NoOpStorage::new());
    };
    match FileStorage::new(&cache_dir.to_string_lossy()) {
        Ok(storage) => {
            tracing::debug!(dir = %cache_dir.display(), "result cache enabled");
            Box::new(storage)
        }
        Err(e) => {
            tracing::warn!(error = %e, "result cache unavailable, continuing without it");
            Box::new(NoOpStorage::new())
        }
    }
}

/// Files as given; directories expanded to their supported files in name order
fn collect_inputs(inputs: &[PathBuf], extractor: &RequirementExtractor) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to read directory: {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && extractor.supports(path))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn default_output_path(first_input: &Path, format: ExportFormat) -> PathBuf {
    let input_name = first_input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    PathBuf::from(format!("{input_name}_matrix.{}", format.extension()))
}

fn print_summary(summary: &rfpmatrix_core::MatrixSummary) {
    println!("\n📋 Matrix Summary:");
    println!("   Total requirements: {}", summary.total);
    println!("   Average confidence: {:.2}", summary.avg_confidence);
    println!("   Missing classification: {}", summary.missing_classification);
    println!("   By modality:");
    for (modality, count) in &summary.by_modality {
        println!("     {:.<30} {}", modality, count);
    }
    println!("   By category:");
    for (category, count) in &summary.by_category {
        println!("     {:.<30} {}", category, count);
    }
    println!("   By source:");
    for (source, count) in &summary.by_source {
        println!("     {:.<30} {}", source, count);
    }
}

fn show_help() {
    println!("\n📋 Available Configuration Options:");
    println!("  <inputs>...             Documents or directories to process");
    println!("  --config <path>         Load custom config file");
    println!("  --output <path>         Output file path (auto-generated if not specified)");
    println!("  --format <fmt>          Output format: json or csv");
    println!("  --regex-only            Skip Extract/Classify/Ground; regex pre-pass only");
    println!("  --endpoint <url>        Model endpoint (AZURE_OPENAI_ENDPOINT / OPENAI_BASE_URL)");
    println!("  --api-key <key>         API key (AZURE_OPENAI_API_KEY / OPENAI_API_KEY)");
    println!("  --deployment <name>     Azure deployment (AZURE_OPENAI_DEPLOYMENT)");
    println!("  --cache-dir <path>      Result cache directory");
    println!("  --dump-stages           Write every intermediate stage to --stages-dir");

    println!("\n⚙️  Config file keys (YAML):");
    println!("  pages_per_chunk, max_chars, overlap, batch_size, max_chunks");
    println!("  parallel_documents, cache_results");
    println!("  segmenter.heading_patterns");
    println!("  stages.{{regex_prepass, extract, classify, ground}}");
    println!("  regex.groups[{{name, enabled}}], regex.max_quote_chars, regex.min_match_chars");
    println!("  confidence.*, model.{{max_output_tokens, temperature, timeout_secs, categories}}");

    println!("\n📄 Output Formats:");
    println!("  json  - Pretty-printed requirement records with citations (default)");
    println!("  csv   - One row per requirement; unclassified fields read MISSING");

    println!("\n📝 Usage Examples:");
    println!("  rfpmatrix rfp.pdf pws.docx");
    println!("  rfpmatrix ./solicitation -f csv -o matrix.csv --summary");
    println!("  rfpmatrix rfp.pdf --regex-only --profile");
}

fn save_stages(stages: &PipelineStages, input: &Path, output_dir: &Path) -> Result<()> {
    use std::fs;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;

    write_stage(output_dir, "stage1_chunks.json", &stages.chunks, stages.chunks.len())?;
    write_stage(
        output_dir,
        "stage2_regex_candidates.json",
        &stages.regex_candidates,
        stages.regex_candidates.len(),
    )?;
    write_stage(output_dir, "stage3_extracted.json", &stages.extracted, stages.extracted.len())?;
    write_stage(output_dir, "stage4_classified.json", &stages.classified, stages.classified.len())?;
    write_stage(output_dir, "stage5_grounded.json", &stages.grounded, stages.grounded.len())?;
    write_stage(output_dir, "stage6_records.json", &stages.records, stages.records.len())?;

    // Summary file: quick reference for validation scripts
    let summary = serde_json::json!({
        "input": input.display().to_string(),
        "captured_at": chrono::Utc::now().to_rfc3339(),
        "stage_counts": {
            "chunks": stages.chunks.len(),
            "regex_candidates": stages.regex_candidates.len(),
            "extracted": stages.extracted.len(),
            "classified": stages.classified.len(),
            "grounded": stages.grounded.len(),
            "records": stages.records.len(),
        },
        "stats": stages.stats,
    });
    let summary_path = output_dir.join("summary.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;
    println!("  💾 {}", summary_path.display());

    Ok(())
}

fn write_stage<T: serde::Serialize>(output_dir: &Path, file: &str, value: &T, count: usize) -> Result<()> {
    let path = output_dir.join(file);
    std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
    println!("  💾 {} ({} items)", path.display(), count);
    Ok(())
}
