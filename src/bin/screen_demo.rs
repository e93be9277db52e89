//! Demo that screens a directory of images and text files with the
//! fallback-only pipeline (no models required) and prints the verdicts.
//!
//! Usage: `screen_demo <dir>`

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use evidence_screener::scanner::{
    EvidenceScanner, FileSource, ScanEvent, ScanEventKind, ScanObserver, SourceFile,
};
use evidence_screener::{
    DecisionSink, EvidenceFilter, EvidenceInput, FilterDecision, PixelBuffer, ScreenError,
    ScreenerConfig,
};
use tracing_subscriber::EnvFilter;

struct DirSource {
    dir: std::path::PathBuf,
}

#[async_trait]
impl FileSource for DirSource {
    async fn list(&self) -> Result<Vec<SourceFile>, ScreenError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| ScreenError::InvalidInput(format!("unreadable directory: {e}")))?;
        let mut files = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let id = path.display().to_string();
            let input = match path.extension().and_then(|e| e.to_str()) {
                Some("txt") => match std::fs::read_to_string(&path) {
                    Ok(text) => EvidenceInput::Texts(text.lines().map(str::to_string).collect()),
                    Err(e) => {
                        tracing::warn!(file = %id, error = %e, "skipping unreadable text file");
                        continue;
                    }
                },
                Some("jpg") | Some("jpeg") | Some("png") => {
                    let blob = match std::fs::read(&path) {
                        Ok(blob) => blob,
                        Err(e) => {
                            tracing::warn!(file = %id, error = %e, "skipping unreadable image");
                            continue;
                        }
                    };
                    match PixelBuffer::decode(&blob) {
                        Ok(image) => EvidenceInput::Image(image),
                        Err(e) => {
                            tracing::warn!(file = %id, error = %e, "skipping undecodable image");
                            continue;
                        }
                    }
                }
                _ => continue,
            };
            files.push(SourceFile { id, input });
        }
        Ok(files)
    }
}

struct StdoutSink;

#[async_trait]
impl DecisionSink for StdoutSink {
    async fn record(&self, decision: &FilterDecision, source_id: &str) {
        println!("APPROVED {source_id}: {}", decision.reasoning);
    }
}

struct ProgressPrinter;

impl ScanObserver for ProgressPrinter {
    fn on_event(&self, event: &ScanEvent) {
        match event.kind {
            ScanEventKind::Started => {
                println!("scan started ({} files)", event.session.total_files)
            }
            ScanEventKind::Progress => {
                println!(
                    "progress: {:.0}% ({}/{})",
                    event.session.progress_percent,
                    event.session.processed_files,
                    event.session.total_files
                )
            }
            ScanEventKind::Completed => println!(
                "scan {:?}: {} approved, {} rejected",
                event.session.status,
                event.session.approved.len(),
                event.session.rejected.len()
            ),
            ScanEventKind::Error => {
                println!("scan error: {}", event.session.error.as_deref().unwrap_or("?"))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("evidence_screener=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let dir = std::env::args()
        .nth(1)
        .context("usage: screen_demo <dir>")?;
    if !Path::new(&dir).is_dir() {
        anyhow::bail!("{dir} is not a directory");
    }

    let config = ScreenerConfig::load_default().context("loading screener config")?;
    let batch_size = config.batch_size;
    let screener = Arc::new(EvidenceFilter::fallback_only(config));

    let mut scanner = EvidenceScanner::new(screener.clone(), batch_size).with_sink(Arc::new(StdoutSink));
    scanner.subscribe(Arc::new(ProgressPrinter));

    let session = scanner.scan(&DirSource { dir: dir.into() }).await;
    for decision in &session.rejected {
        println!("REJECTED: {}", decision.reasoning);
    }

    let stats = screener.stats();
    println!(
        "done: {} images and {} text batches screened",
        stats.images_processed, stats.texts_processed
    );
    Ok(())
}
