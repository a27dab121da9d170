use facelens_core::models::ModelError;
use facelens_core::{Analysis, BatchRecord, FacePipeline, PipelineError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("model setup failed: {0}")]
    Setup(#[from] ModelError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("processing did not finish within {0:?}")]
    Timeout(Duration),
    #[error("engine threads exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine threads.
enum EngineRequest {
    Analyze {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Analysis, PipelineError>>,
    },
    RecognizeBatch {
        faces: Vec<String>,
        reply: oneshot::Sender<Vec<BatchRecord>>,
    },
}

/// Clone-safe handle to the engine threads.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
    workers: usize,
}

impl EngineHandle {
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Detect, recognize and annotate one encoded image.
    pub async fn analyze(&self, image: Vec<u8>) -> Result<Analysis, EngineError> {
        let result = self
            .call(|reply| EngineRequest::Analyze { image, reply })
            .await?;
        Ok(result?)
    }

    /// Name a list of base64-encoded face crops.
    pub async fn recognize_batch(&self, faces: Vec<String>) -> Result<Vec<BatchRecord>, EngineError> {
        self.call(|reply| EngineRequest::RecognizeBatch { faces, reply })
            .await
    }

    /// Queue a request and wait for its reply. The deadline covers queueing
    /// as well as processing; a timed-out request still runs to completion
    /// on its worker, its reply is dropped.
    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(request(reply_tx))
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "engine request timed out");
                Err(EngineError::Timeout(self.timeout))
            }
        }
    }
}

/// Spawn `workers` engine threads, each owning the pipeline `build` returns
/// for its index.
///
/// All pipelines are built before any thread starts, so a missing or broken
/// model fails startup instead of the first request.
pub fn spawn_engine<F>(workers: usize, timeout: Duration, build: F) -> Result<EngineHandle, EngineError>
where
    F: Fn(usize) -> Result<FacePipeline, ModelError>,
{
    let workers = workers.max(1);
    let mut pipelines = Vec::with_capacity(workers);
    for i in 0..workers {
        pipelines.push(build(i)?);
        tracing::info!(worker = i, "pipeline loaded");
    }

    let (tx, rx) = mpsc::channel::<EngineRequest>(workers * 4);
    let rx = Arc::new(Mutex::new(rx));

    for (i, pipeline) in pipelines.into_iter().enumerate() {
        let rx = Arc::clone(&rx);
        std::thread::Builder::new()
            .name(format!("facelens-engine-{i}"))
            .spawn(move || run_worker(i, pipeline, rx))?;
    }

    Ok(EngineHandle {
        tx,
        timeout,
        workers,
    })
}

fn run_worker(id: usize, mut pipeline: FacePipeline, rx: Arc<Mutex<mpsc::Receiver<EngineRequest>>>) {
    tracing::info!(worker = id, "engine thread started");
    loop {
        // The lock is only held while waiting, never while processing.
        let next = {
            let mut rx = rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rx.blocking_recv()
        };
        let Some(req) = next else { break };

        match req {
            EngineRequest::Analyze { image, reply } => {
                let result = pipeline.analyze(&image);
                if let Err(e) = &result {
                    tracing::warn!(worker = id, error = %e, "analysis failed");
                }
                let _ = reply.send(result);
            }
            EngineRequest::RecognizeBatch { faces, reply } => {
                let records = pipeline.recognize_batch(&faces);
                tracing::info!(worker = id, faces = records.len(), "batch recognition complete");
                let _ = reply.send(records);
            }
        }
    }
    tracing::info!(worker = id, "engine thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{detection, png_bytes, test_pipeline, FixedDetector, FixedMatcher};
    use facelens_core::Gallery;

    #[tokio::test]
    async fn test_analyze_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        let engine = spawn_engine(2, Duration::from_secs(5), |_| {
            Ok(test_pipeline(
                FixedDetector::new(vec![detection(4.0, 4.0, 10.0)]),
                FixedMatcher::new(vec![]),
                &gallery,
            ))
        })
        .unwrap();
        assert_eq!(engine.workers(), 2);

        let analysis = engine.analyze(png_bytes(32, 32)).await.unwrap();
        assert_eq!(analysis.faces.len(), 1);
        assert_eq!(analysis.faces[0].name, "Unknown");
    }

    #[tokio::test]
    async fn test_invalid_image_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        let engine = spawn_engine(1, Duration::from_secs(5), |_| {
            Ok(test_pipeline(FixedDetector::new(vec![]), FixedMatcher::new(vec![]), &gallery))
        })
        .unwrap();

        let err = engine.analyze(b"nope".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Pipeline(ref e) if e.is_bad_request()));
    }

    #[tokio::test]
    async fn test_slow_request_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        let engine = spawn_engine(1, Duration::from_millis(50), |_| {
            Ok(test_pipeline(
                FixedDetector::new(vec![]).with_delay(Duration::from_millis(500)),
                FixedMatcher::new(vec![]),
                &gallery,
            ))
        })
        .unwrap();

        let err = engine.analyze(png_bytes(8, 8)).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_batch_on_empty_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(dir.path()).unwrap();
        let engine = spawn_engine(1, Duration::from_secs(5), |_| {
            Ok(test_pipeline(FixedDetector::new(vec![]), FixedMatcher::new(vec![]), &gallery))
        })
        .unwrap();

        let records = engine
            .recognize_batch(vec!["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.name == "Unknown"));
        assert_eq!(records[1].index, 2);
    }

    #[test]
    fn test_setup_failure_is_reported() {
        let result = spawn_engine(2, Duration::from_secs(1), |_| {
            Err(ModelError::Empty("det_10g.onnx".into()))
        });
        assert!(matches!(result, Err(EngineError::Setup(_))));
    }
}
