//! Optical text extraction over a fixed worker pool.
//!
//! CPU-bound recognition runs on blocking threads; a small set of
//! long-lived worker tasks pulls jobs from one bounded queue, so a
//! saturated pool applies backpressure on `extract` instead of dropping
//! calls. Results are cached by content hash for 24 hours.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::cache::{EvidenceCache, DEFAULT_TTL};
use crate::error::ScreenError;
use crate::media::PixelBuffer;

/// One recognized word with its region in source-image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    pub confidence: f32,
    pub words: Vec<OcrWord>,
    /// True when served from the cache without dispatching a job.
    #[serde(default)]
    pub cache_hit: bool,
}

impl ExtractedText {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            words: Vec::new(),
            cache_hit: false,
        }
    }
}

/// Blocking, CPU-bound recognition backend. Wrapped in `spawn_blocking`
/// by the extractor; implementations must not assume an async context.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &PixelBuffer) -> Result<ExtractedText, ScreenError>;
}

struct Job {
    image: PixelBuffer,
    reply: oneshot::Sender<Result<ExtractedText, ScreenError>>,
}

/// Worker-pool text extractor with a per-job deadline and a TTL cache.
pub struct TextExtractor {
    queue: mpsc::Sender<Job>,
    cache: Arc<dyn EvidenceCache>,
    workers: Vec<JoinHandle<()>>,
}

impl TextExtractor {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        pool_size: usize,
        timeout: Duration,
        cache: Arc<dyn EvidenceCache>,
    ) -> Self {
        let pool_size = pool_size.max(1);
        let (tx, rx) = mpsc::channel::<Job>(pool_size * 2);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(pool_size);
        for worker_id in 0..pool_size {
            let rx = rx.clone();
            let engine = engine.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    // Hold the lock only while pulling; the job itself runs
                    // with the queue released so idle workers keep draining.
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    let result = run_job(&engine, job.image, timeout).await;
                    if let Err(e) = &result {
                        tracing::debug!(worker_id, error = %e, "extraction job failed");
                    }
                    let _ = job.reply.send(result);
                }
                tracing::debug!(worker_id, "extraction worker stopped");
            }));
        }

        Self {
            queue: tx,
            cache,
            workers,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.workers.len()
    }

    /// Extract text from an image. Served from the cache when a fresh
    /// entry exists; otherwise queues a job (waiting for pool capacity)
    /// and awaits its reply.
    pub async fn extract(&self, image: &PixelBuffer) -> Result<ExtractedText, ScreenError> {
        let key = cache_key(image);
        if let Some(json) = self.cache.get(&key).await {
            match serde_json::from_str::<ExtractedText>(&json) {
                Ok(mut cached) => {
                    cached.cache_hit = true;
                    return Ok(cached);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "discarding undecodable extraction cache entry");
                }
            }
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.queue
            .send(Job {
                image: image.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| ScreenError::Inference("extraction pool is shut down".into()))?;
        let mut result = reply_rx
            .await
            .map_err(|_| ScreenError::Inference("extraction worker dropped the reply".into()))??;

        result.cache_hit = false;
        if let Ok(json) = serde_json::to_string(&result) {
            self.cache.put(&key, json, DEFAULT_TTL).await;
        }
        Ok(result)
    }
}

fn cache_key(image: &PixelBuffer) -> String {
    format!("ocr:{}", image.content_hash())
}

async fn run_job(
    engine: &Arc<dyn OcrEngine>,
    image: PixelBuffer,
    timeout: Duration,
) -> Result<ExtractedText, ScreenError> {
    let engine = engine.clone();
    let work = tokio::task::spawn_blocking(move || engine.recognize(&image));
    match tokio::time::timeout(timeout, work).await {
        Err(_) => Err(ScreenError::Timeout(timeout)),
        Ok(Err(join_err)) => Err(ScreenError::Inference(format!(
            "extraction worker panicked: {join_err}"
        ))),
        Ok(Ok(result)) => result,
    }
}
