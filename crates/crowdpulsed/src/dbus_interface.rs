use crate::engine::{EngineError, EngineHandle};
use crowdpulse_core::AnalysisOptions;
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "org.crowdpulse.Analyzer1";
pub const OBJECT_PATH: &str = "/org/crowdpulse/Analyzer1";

/// D-Bus interface for the crowdpulse analysis daemon.
///
/// Bus name: org.crowdpulse.Analyzer1
/// Object path: /org/crowdpulse/Analyzer1
pub struct AnalyzerService {
    engine: EngineHandle,
    include_crops: bool,
    history_limit: u32,
}

impl AnalyzerService {
    pub fn new(engine: EngineHandle, include_crops: bool, history_limit: u32) -> Self {
        Self {
            engine,
            include_crops,
            history_limit,
        }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::CaptureNotFound(path) => zbus::fdo::Error::FileNotFound(path),
        EngineError::ChannelClosed => zbus::fdo::Error::Failed("analysis engine unavailable".into()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

/// A requested limit of 0 means the configured default.
fn effective_history_limit(requested: u32, default: u32) -> u32 {
    if requested == 0 {
        default
    } else {
        requested
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("serialization: {e}")))
}

#[interface(name = "org.crowdpulse.Analyzer1")]
impl AnalyzerService {
    /// Analyse a capture image on disk and return the analysis as JSON.
    async fn analyze_capture(&self, path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(path, "analyze_capture requested");
        let options = AnalysisOptions {
            include_crops: self.include_crops,
        };
        let result = self
            .engine
            .analyze(PathBuf::from(path), options)
            .await
            .map_err(to_fdo)?;
        to_json(&result)
    }

    /// Return the most recent stored analyses as JSON. A limit of 0 uses
    /// the configured default.
    async fn history(&self, limit: u32) -> zbus::fdo::Result<String> {
        let limit = effective_history_limit(limit, self.history_limit);
        tracing::info!(limit, "history requested");
        let records = self.engine.history(limit).await.map_err(to_fdo)?;
        to_json(&records)
    }

    /// Return the stored analysis for a capture path as JSON (`null` if none).
    async fn lookup(&self, path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(path, "lookup requested");
        let record = self.engine.lookup(path.to_string()).await.map_err(to_fdo)?;
        to_json(&record)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "models_loaded": status.models_loaded,
            "analyses_served": status.analyses_served,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_limit_zero_uses_default() {
        assert_eq!(effective_history_limit(0, 20), 20);
        assert_eq!(effective_history_limit(5, 20), 5);
        assert_eq!(effective_history_limit(100, 20), 100);
    }

    #[test]
    fn test_engine_errors_map_to_fdo() {
        let err = to_fdo(EngineError::CaptureNotFound("/captures/gone.jpg".into()));
        assert!(matches!(err, zbus::fdo::Error::FileNotFound(p) if p == "/captures/gone.jpg"));
        assert!(matches!(to_fdo(EngineError::ChannelClosed), zbus::fdo::Error::Failed(_)));
    }
}
