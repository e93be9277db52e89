//! Batch/background evidence scanner.
//!
//! Drives the filter across a file source in bounded-size batches,
//! publishes progress to subscribed observers, forwards approved
//! decisions to a downstream sink, and supports cooperative cancellation
//! between batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ScreenError;
use crate::filter::{EvidenceFilter, FilterDecision};
use crate::media::EvidenceInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Idle,
    Scanning,
    Completed,
    Cancelled,
    Error,
}

/// Snapshot of one scan. Mutated only by the scanner; observers and
/// callers get clones.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSession {
    pub status: ScanStatus,
    pub total_files: usize,
    pub processed_files: usize,
    pub approved: Vec<FilterDecision>,
    pub rejected: Vec<FilterDecision>,
    pub progress_percent: f32,
    /// Set when `status == Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanSession {
    fn idle() -> Self {
        Self {
            status: ScanStatus::Idle,
            total_files: 0,
            processed_files: 0,
            approved: Vec::new(),
            rejected: Vec::new(),
            progress_percent: 0.0,
            error: None,
        }
    }
}

/// One candidate file: a stable id plus its decoded content.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: String,
    pub input: EvidenceInput,
}

#[async_trait]
pub trait FileSource: Send + Sync {
    /// Full candidate list, pulled once per scan.
    async fn list(&self) -> Result<Vec<SourceFile>, ScreenError>;
}

/// Downstream store for approved evidence.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn record(&self, decision: &FilterDecision, source_id: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEventKind {
    Started,
    Progress,
    Completed,
    Error,
}

#[derive(Clone)]
pub struct ScanEvent {
    pub kind: ScanEventKind,
    pub session: ScanSession,
}

pub trait ScanObserver: Send + Sync {
    fn on_event(&self, event: &ScanEvent);
}

/// Fans one event out to every subscriber, in subscription order.
#[derive(Default, Clone)]
struct ObserverMux {
    observers: Vec<Arc<dyn ScanObserver>>,
}

impl ObserverMux {
    fn emit(&self, kind: ScanEventKind, session: ScanSession) {
        let event = ScanEvent { kind, session };
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

/// Cloneable handle for requesting cancellation from outside the
/// scanning task (UI, signal handler, observer).
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct EvidenceScanner {
    filter: Arc<EvidenceFilter>,
    sink: Option<Arc<dyn DecisionSink>>,
    observers: ObserverMux,
    batch_size: usize,
    cancel: Arc<AtomicBool>,
    session: RwLock<ScanSession>,
}

impl EvidenceScanner {
    pub fn new(filter: Arc<EvidenceFilter>, batch_size: usize) -> Self {
        Self {
            filter,
            sink: None,
            observers: ObserverMux::default(),
            batch_size: batch_size.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
            session: RwLock::new(ScanSession::idle()),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    pub fn with_sink(mut self, sink: Arc<dyn DecisionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn subscribe(&mut self, observer: Arc<dyn ScanObserver>) {
        self.observers.observers.push(observer);
    }

    /// Request cancellation. Checked between batches; the current batch
    /// runs to completion.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn session(&self) -> ScanSession {
        self.session
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| ScanSession::idle())
    }

    fn update_session<F: FnOnce(&mut ScanSession)>(&self, f: F) -> ScanSession {
        match self.session.write() {
            Ok(mut session) => {
                f(&mut session);
                session.clone()
            }
            Err(_) => ScanSession::idle(),
        }
    }

    /// Run one scan to completion (or cancellation). Starting a scan
    /// resets any previous session and clears a pending cancel request.
    pub async fn scan(&self, source: &dyn FileSource) -> ScanSession {
        self.cancel.store(false, Ordering::SeqCst);
        let snapshot = self.update_session(|s| {
            *s = ScanSession::idle();
            s.status = ScanStatus::Scanning;
        });
        self.observers.emit(ScanEventKind::Started, snapshot);

        let files = match source.list().await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "file source enumeration failed");
                let snapshot = self.update_session(|s| {
                    s.status = ScanStatus::Error;
                    s.error = Some(e.to_string());
                });
                self.observers.emit(ScanEventKind::Error, snapshot.clone());
                return snapshot;
            }
        };

        let total = files.len();
        self.update_session(|s| s.total_files = total);
        tracing::info!(total, batch_size = self.batch_size, "scan started");

        for batch in files.chunks(self.batch_size) {
            if self.cancel.load(Ordering::SeqCst) {
                let snapshot = self.update_session(|s| s.status = ScanStatus::Cancelled);
                tracing::info!(
                    processed = snapshot.processed_files,
                    total,
                    "scan cancelled"
                );
                self.observers.emit(ScanEventKind::Completed, snapshot.clone());
                return snapshot;
            }
            self.process_batch(batch).await;
            let snapshot = self.update_session(|s| {
                s.progress_percent = if total == 0 {
                    100.0
                } else {
                    s.processed_files as f32 / total as f32 * 100.0
                };
            });
            self.observers.emit(ScanEventKind::Progress, snapshot);
        }

        let snapshot = self.update_session(|s| {
            s.status = ScanStatus::Completed;
            s.progress_percent = 100.0;
        });
        tracing::info!(
            approved = snapshot.approved.len(),
            rejected = snapshot.rejected.len(),
            "scan completed"
        );
        self.observers.emit(ScanEventKind::Completed, snapshot.clone());
        snapshot
    }

    /// All files of one batch are screened concurrently; results are
    /// matched back by file id, not completion order.
    async fn process_batch(&self, batch: &[SourceFile]) {
        let mut handles = Vec::with_capacity(batch.len());
        for file in batch {
            let filter = self.filter.clone();
            let input = file.input.clone();
            let id = file.id.clone();
            tracing::debug!(file = %id, kind = ?input.kind(), "screening");
            handles.push((
                id,
                tokio::spawn(async move { filter.filter_evidence(&input).await }),
            ));
        }

        for (id, handle) in handles {
            let decision = match handle.await {
                Ok(decision) => decision,
                // A panicking screen aborts only this file.
                Err(e) => {
                    tracing::error!(file = %id, error = %e, "screening task failed");
                    failed_decision(&format!("Error: screening failed for {id}: {e}"))
                }
            };
            if decision.approved {
                if let Some(sink) = &self.sink {
                    sink.record(&decision, &id).await;
                }
            }
            self.update_session(|s| {
                s.processed_files += 1;
                if decision.approved {
                    s.approved.push(decision);
                } else {
                    s.rejected.push(decision);
                }
            });
        }
    }

    /// Re-run the scan forever on a fixed interval, until cancelled.
    pub async fn run_periodic(&self, source: &dyn FileSource, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if self.cancel.load(Ordering::SeqCst) {
                tracing::info!("periodic scanning stopped");
                return;
            }
            let session = self.scan(source).await;
            if session.status == ScanStatus::Cancelled {
                tracing::info!("periodic scanning stopped");
                return;
            }
        }
    }
}

fn failed_decision(reasoning: &str) -> FilterDecision {
    FilterDecision {
        approved: false,
        reasoning: reasoning.to_string(),
        per_stage: Default::default(),
        processing_time_ms: 0,
        manual_override: false,
        original_reasoning: None,
        timestamp: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScreenerConfig;
    use std::sync::Mutex;

    struct VecSource(Vec<SourceFile>);

    #[async_trait]
    impl FileSource for VecSource {
        async fn list(&self) -> Result<Vec<SourceFile>, ScreenError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl FileSource for BrokenSource {
        async fn list(&self) -> Result<Vec<SourceFile>, ScreenError> {
            Err(ScreenError::InvalidInput("directory vanished".into()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        ids: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DecisionSink for RecordingSink {
        async fn record(&self, _decision: &FilterDecision, source_id: &str) {
            self.ids.lock().unwrap().push(source_id.to_string());
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<(ScanEventKind, ScanStatus, f32)>>,
    }

    impl ScanObserver for RecordingObserver {
        fn on_event(&self, event: &ScanEvent) {
            self.events.lock().unwrap().push((
                event.kind,
                event.session.status,
                event.session.progress_percent,
            ));
        }
    }

    fn text_file(id: &str, text: &str) -> SourceFile {
        SourceFile {
            id: id.to_string(),
            input: EvidenceInput::Texts(vec![text.to_string()]),
        }
    }

    fn scanner(batch_size: usize) -> EvidenceScanner {
        let filter = Arc::new(EvidenceFilter::fallback_only(ScreenerConfig::default()));
        EvidenceScanner::new(filter, batch_size)
    }

    #[tokio::test]
    async fn scan_splits_approved_and_rejected() {
        let source = VecSource(vec![
            text_file("a", "I love you so much"),
            text_file("b", "send nude pics now"),
            text_file("c", "dinner at eight"),
        ]);
        let sink = Arc::new(RecordingSink::default());
        let scanner = scanner(2).with_sink(sink.clone());
        let session = scanner.scan(&source).await;

        assert_eq!(session.status, ScanStatus::Completed);
        assert_eq!(session.total_files, 3);
        assert_eq!(session.processed_files, 3);
        assert_eq!(session.approved.len(), 2);
        assert_eq!(session.rejected.len(), 1);
        assert!((session.progress_percent - 100.0).abs() < 1e-6);

        let mut recorded = sink.ids.lock().unwrap().clone();
        recorded.sort();
        assert_eq!(recorded, vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn observer_sees_ordered_lifecycle() {
        let source = VecSource(vec![
            text_file("a", "hello"),
            text_file("b", "hi"),
            text_file("c", "hey"),
            text_file("d", "yo"),
        ]);
        let observer = Arc::new(RecordingObserver::default());
        let mut scanner = scanner(2);
        scanner.subscribe(observer.clone());
        scanner.scan(&source).await;

        let events = observer.events.lock().unwrap().clone();
        assert_eq!(events.first().map(|e| e.0), Some(ScanEventKind::Started));
        assert_eq!(events.last().map(|e| e.0), Some(ScanEventKind::Completed));
        let progress: Vec<f32> = events
            .iter()
            .filter(|e| e.0 == ScanEventKind::Progress)
            .map(|e| e.2)
            .collect();
        assert_eq!(progress.len(), 2);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!((progress[0] - 50.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn cancel_between_batches_preserves_partial_results() {
        let files: Vec<SourceFile> = (0..6).map(|i| text_file(&format!("f{i}"), "hello")).collect();
        let source = VecSource(files);

        // Cancel from inside the first progress event; the flag is only
        // honored at the next batch boundary.
        struct CancelOnFirstProgress(CancelHandle);
        impl ScanObserver for CancelOnFirstProgress {
            fn on_event(&self, event: &ScanEvent) {
                if event.kind == ScanEventKind::Progress {
                    self.0.cancel();
                }
            }
        }

        let mut scanner = scanner(2);
        scanner.subscribe(Arc::new(CancelOnFirstProgress(scanner.cancel_handle())));
        let session = scanner.scan(&source).await;

        assert_eq!(session.status, ScanStatus::Cancelled);
        assert_eq!(session.total_files, 6);
        assert_eq!(session.processed_files, 2);
        assert_eq!(
            session.approved.len() + session.rejected.len(),
            session.processed_files
        );
        // The remaining files were neither approved nor rejected.
        assert_eq!(session.total_files - session.processed_files, 4);
    }

    #[tokio::test]
    async fn broken_source_sets_error_status() {
        let observer = Arc::new(RecordingObserver::default());
        let mut scanner = scanner(2);
        scanner.subscribe(observer.clone());
        let session = scanner.scan(&BrokenSource).await;
        assert_eq!(session.status, ScanStatus::Error);
        assert!(session.error.as_deref().unwrap_or("").contains("directory vanished"));
        let events = observer.events.lock().unwrap().clone();
        assert_eq!(events.last().map(|e| e.0), Some(ScanEventKind::Error));
    }

    #[tokio::test]
    async fn new_scan_resets_previous_session() {
        let scanner = scanner(2);
        let source_a = VecSource(vec![text_file("a", "hello")]);
        let source_b = VecSource(vec![text_file("b", "hi"), text_file("c", "hey")]);
        scanner.scan(&source_a).await;
        let session = scanner.scan(&source_b).await;
        assert_eq!(session.total_files, 2);
        assert_eq!(session.processed_files, 2);
        assert_eq!(session.approved.len() + session.rejected.len(), 2);
    }
}
