use crate::store::{AnalysisRecord, ResultStore};
use crowdpulse_core::{AnalysisError, AnalysisOptions, ImageAnalysis, ModelCache, ModelPaths};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("capture file not found: {0}")]
    CaptureNotFound(String),
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of analysing one capture.
#[derive(Debug, Serialize)]
pub struct AnalyzeResult {
    pub record_id: String,
    #[serde(flatten)]
    pub analysis: ImageAnalysis,
}

/// Snapshot of the engine thread's state.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub models_loaded: bool,
    pub analyses_served: u64,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Analyze {
        path: PathBuf,
        options: AnalysisOptions,
        reply: oneshot::Sender<Result<AnalyzeResult, EngineError>>,
    },
    History {
        limit: u32,
        reply: oneshot::Sender<Result<Vec<AnalysisRecord>, EngineError>>,
    },
    Lookup {
        capture_path: String,
        reply: oneshot::Sender<Result<Option<AnalysisRecord>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Analyse a capture file and persist the summary.
    pub async fn analyze(&self, path: PathBuf, options: AnalysisOptions) -> Result<AnalyzeResult, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Analyze { path, options, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Most recent stored analyses.
    pub async fn history(&self, limit: u32) -> Result<Vec<AnalysisRecord>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::History { limit, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Stored analysis for a capture path, if any.
    pub async fn lookup(&self, capture_path: String) -> Result<Option<AnalysisRecord>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Lookup { capture_path, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// State owned by the engine thread.
struct Engine {
    models: ModelCache,
    model_paths: ModelPaths,
    store: ResultStore,
    analyses_served: u64,
}

impl Engine {
    fn analyze(&mut self, path: &std::path::Path, options: &AnalysisOptions) -> Result<AnalyzeResult, EngineError> {
        if !path.is_file() {
            return Err(EngineError::CaptureNotFound(path.display().to_string()));
        }
        let ctx = self.models.initialize(&self.model_paths)?;
        let analysis = ctx.analyze_path(path, options)?;
        let record = self.store.record(&path.to_string_lossy(), &analysis)?;
        self.analyses_served += 1;

        tracing::info!(
            capture = %path.display(),
            record = %record.id,
            faces = analysis.group_stats.total_faces,
            panic_score = analysis.group_stats.panic_score,
            "capture analysed"
        );
        Ok(AnalyzeResult { record_id: record.id, analysis })
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            models_loaded: self.models.is_loaded(),
            analyses_served: self.analyses_served,
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the result store and, when `preload` is set, loads every model
/// before returning so startup fails fast on a missing file. Without
/// preload the models load on the first analysis request.
pub fn spawn_engine(model_paths: ModelPaths, store: ResultStore, preload: bool) -> Result<EngineHandle, EngineError> {
    let mut models = ModelCache::new();
    if preload {
        models.initialize(&model_paths)?;
        tracing::info!("models preloaded");
    } else {
        tracing::info!("model loading deferred to first request");
    }

    let mut engine = Engine {
        models,
        model_paths,
        store,
        analyses_served: 0,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("crowdpulse-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { path, options, reply } => {
                        let result = engine.analyze(&path, &options);
                        if let Err(e) = &result {
                            tracing::warn!(capture = %path.display(), error = %e, "analysis failed");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::History { limit, reply } => {
                        let _ = reply.send(engine.store.recent(limit).map_err(EngineError::from));
                    }
                    EngineRequest::Lookup { capture_path, reply } => {
                        let _ = reply.send(engine.store.get(&capture_path).map_err(EngineError::from));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(engine.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_models() -> ModelPaths {
        ModelPaths::in_dir(std::path::Path::new("/nonexistent/crowdpulse-models"))
    }

    #[test]
    fn test_preload_fails_fast_on_missing_models() {
        let store = ResultStore::open_in_memory().unwrap();
        let err = spawn_engine(missing_models(), store, true).err().unwrap();
        assert!(matches!(err, EngineError::Analysis(_)));
    }

    #[tokio::test]
    async fn test_deferred_engine_reports_status_and_errors() {
        let store = ResultStore::open_in_memory().unwrap();
        let engine = spawn_engine(missing_models(), store, false).unwrap();

        let status = engine.status().await.unwrap();
        assert!(!status.models_loaded);
        assert_eq!(status.analyses_served, 0);

        let err = engine
            .analyze(PathBuf::from("/nonexistent/capture.jpg"), AnalysisOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CaptureNotFound(_)));

        // The capture exists but the models do not.
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("capture.jpg");
        std::fs::write(&capture, b"not really a jpeg").unwrap();
        let err = engine.analyze(capture, AnalysisOptions::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Analysis(_)));

        assert!(engine.history(10).await.unwrap().is_empty());
        assert!(engine.lookup("/nonexistent/capture.jpg".into()).await.unwrap().is_none());
        assert!(!engine.status().await.unwrap().models_loaded);
    }
}
