use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

use secmap_core::{
    outline_key, write_jsonl, HeaderDescriptor, InMemoryEmbeddingCache, LineIndex, LineRecord,
    Locator, LocatorConfig, NoiseProfile, ParsedPage, Resolution, SpanMode, StrategyKind,
    SuppressedReason,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CONFIG: &str = "secmap.toml";

#[derive(Parser, Debug)]
#[command(name = "secmap", version = VERSION, about = "Locate outline headers in parsed document lines")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve an outline against a document and emit sections.
    Resolve {
        #[arg(long)]
        lines: PathBuf,
        #[arg(long)]
        outline: PathBuf,
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long = "span-mode")]
        span_mode: Option<String>,
        #[arg(long = "fuzzy-threshold")]
        fuzzy_threshold: Option<f32>,
        #[arg(long = "fill-gaps", action = ArgAction::SetTrue)]
        fill_gaps: bool,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long = "trace-out")]
        trace_out: Option<PathBuf>,
        #[arg(long, action = ArgAction::SetTrue)]
        summary: bool,
    },
    /// Show lines the noise filter would suppress.
    Noise {
        #[arg(long)]
        lines: PathBuf,
    },
    /// Print the idempotency key for a document/outline pair.
    Key {
        #[arg(long)]
        lines: PathBuf,
        #[arg(long)]
        outline: PathBuf,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    locator: LocatorConfig,
}

/// Accepted shapes for `--lines`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LinesFile {
    Pages(Vec<ParsedPage>),
    Records(Vec<LineRecord>),
    Document { doc_id: String, pages: Vec<ParsedPage> },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let file_config = load_config(&config_path)?;

    match cli.command {
        Commands::Resolve {
            lines,
            outline,
            strategy,
            span_mode,
            fuzzy_threshold,
            fill_gaps,
            out,
            trace_out,
            summary,
        } => {
            let mut config = file_config.locator;
            if let Some(value) = strategy {
                config.strategy = StrategyKind::from_str(&value)?;
            }
            if let Some(value) = span_mode {
                config.span_mode = SpanMode::from_str(&value)?;
            }
            if let Some(value) = fuzzy_threshold {
                config.fuzzy_threshold = value;
            }
            if fill_gaps {
                config.fill_numbering_gaps = true;
            }
            let index = load_lines(&lines)?;
            let headers = load_outline(&outline)?;
            let resolution = run_locator(config, &headers, &index)?;

            let payload = json!({
                "doc_id": resolution.doc_id,
                "strategy": resolution.strategy,
                "sections": resolution.sections,
            });
            match out {
                Some(path) => {
                    let mut writer = BufWriter::new(
                        File::create(&path)
                            .with_context(|| format!("failed to create {}", path.display()))?,
                    );
                    serde_json::to_writer_pretty(&mut writer, &payload)?;
                    writer.flush()?;
                }
                None => println!("{}", serde_json::to_string_pretty(&payload)?),
            }
            if let Some(path) = trace_out {
                let writer = BufWriter::new(
                    File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?,
                );
                write_jsonl(&resolution.trace, writer)?;
                info!(path = %path.display(), events = resolution.trace.len(), "trace written");
            }
            if summary {
                let mut stats = resolution.summary();
                stats.decisions.clear();
                eprintln!("{}", serde_json::to_string_pretty(&stats)?);
            }
        }
        Commands::Noise { lines } => {
            let index = load_lines(&lines)?;
            let profile = NoiseProfile::detect(&index, &file_config.locator.noise);
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            for (idx, reason) in profile.suppressed() {
                let label = match reason {
                    SuppressedReason::TableOfContents => "toc",
                    SuppressedReason::RunningHeader => "running",
                };
                let line = index.get(idx).map(|l| l.raw_text.as_str()).unwrap_or_default();
                writeln!(
                    handle,
                    "{idx}\tp{}\t{label}\t{line}",
                    index.page_of(idx).unwrap_or_default()
                )?;
            }
            for text in profile.boilerplate() {
                writeln!(handle, "boilerplate\t{text}")?;
            }
        }
        Commands::Key { lines, outline } => {
            let index = load_lines(&lines)?;
            let headers = load_outline(&outline)?;
            println!("{}", outline_key(&index, &headers));
        }
    }
    Ok(())
}

fn run_locator(config: LocatorConfig, headers: &[HeaderDescriptor], index: &LineIndex) -> Result<Resolution> {
    let strategy = config.strategy;
    let locator = Locator::new(config)?;
    match strategy {
        StrategyKind::Sequential => Ok(locator.resolve(headers, index)?),
        StrategyKind::VectorFused => {
            let provider = secmap_embed::provider_from_env()?;
            let cache = InMemoryEmbeddingCache::new();
            let rt = Runtime::new().context("failed to create tokio runtime")?;
            let resolution = rt.block_on(locator.resolve_with_embeddings(
                headers,
                index,
                provider.as_ref(),
                &cache,
            ))?;
            info!(provider = provider.name(), cached = cache.len(), "vector run finished");
            Ok(resolution)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config: {e}"))
}

fn doc_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

/// Reads `.json` line files in any [`LinesFile`] shape; anything else is plain text
/// with form feeds between pages.
fn load_lines(path: &Path) -> Result<LineIndex> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read lines {}", path.display()))?;
    let doc_id = doc_id_for(path);
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return Ok(LineIndex::from_text(doc_id, &contents));
    }
    let parsed: LinesFile = serde_json::from_str(&contents)
        .with_context(|| format!("unrecognized lines file {}", path.display()))?;
    Ok(match parsed {
        LinesFile::Pages(pages) => LineIndex::from_pages(doc_id, pages),
        LinesFile::Records(records) => LineIndex::from_records(doc_id, records),
        LinesFile::Document { doc_id, pages } => LineIndex::from_pages(doc_id, pages),
    })
}

fn load_outline(path: &Path) -> Result<Vec<HeaderDescriptor>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read outline {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("invalid outline {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_file_accepts_pages_and_records() {
        let pages: LinesFile =
            serde_json::from_str(r#"[{"index": 0, "lines": [{"text": "1 Scope"}]}]"#).unwrap();
        assert!(matches!(pages, LinesFile::Pages(_)));
        let records: LinesFile =
            serde_json::from_str(r#"[{"text": "1 Scope", "page": 0}]"#).unwrap();
        assert!(matches!(records, LinesFile::Records(_)));
        let document: LinesFile =
            serde_json::from_str(r#"{"doc_id": "contract-a", "pages": []}"#).unwrap();
        assert!(matches!(document, LinesFile::Document { .. }));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [locator]
            strategy = "vector_fused"
            fuzzy_threshold = 0.7
            "#,
        )
        .unwrap();
        assert_eq!(config.locator.strategy, StrategyKind::VectorFused);
        assert!((config.locator.fuzzy_threshold - 0.7).abs() < 1e-6);
        assert_eq!(config.locator.window_pad, LocatorConfig::default().window_pad);
    }
}
