//! SQLite store for analysis results, one row per capture.

use chrono::Utc;
use crowdpulse_core::ImageAnalysis;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Stored summary of one analysed capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub capture_path: String,
    pub analyzed_at: String,
    pub total_faces: usize,
    pub male_count: usize,
    pub female_count: usize,
    pub panic_score: f64,
    pub emotion_summary: BTreeMap<String, usize>,
}

pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        tracing::info!(path = %db_path.display(), "result store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let store = Self { conn: Connection::open_in_memory()? };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS analyses (
              id TEXT PRIMARY KEY,
              capture_path TEXT NOT NULL UNIQUE,
              analyzed_at TEXT NOT NULL,
              total_faces INTEGER NOT NULL,
              male_count INTEGER NOT NULL,
              female_count INTEGER NOT NULL,
              panic_score REAL NOT NULL,
              emotion_summary TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_analyses_at ON analyses(analyzed_at);
            "#,
        )?;
        Ok(())
    }

    /// Store the analysis of a capture, replacing any earlier one for the
    /// same path. Returns the stored record.
    pub fn record(&self, capture_path: &str, analysis: &ImageAnalysis) -> anyhow::Result<AnalysisRecord> {
        let existing_id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM analyses WHERE capture_path = ?1",
                params![capture_path],
                |row| row.get(0),
            )
            .optional()?;

        let stats = &analysis.group_stats;
        let record = AnalysisRecord {
            id: existing_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            capture_path: capture_path.to_string(),
            analyzed_at: Utc::now().to_rfc3339(),
            total_faces: stats.total_faces,
            male_count: stats.male_count,
            female_count: stats.female_count,
            panic_score: stats.panic_score,
            emotion_summary: analysis.emotion_summary(),
        };

        self.conn.execute(
            "INSERT INTO analyses
               (id, capture_path, analyzed_at, total_faces, male_count, female_count, panic_score, emotion_summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(capture_path) DO UPDATE SET
               analyzed_at = excluded.analyzed_at,
               total_faces = excluded.total_faces,
               male_count = excluded.male_count,
               female_count = excluded.female_count,
               panic_score = excluded.panic_score,
               emotion_summary = excluded.emotion_summary",
            params![
                record.id,
                record.capture_path,
                record.analyzed_at,
                record.total_faces as i64,
                record.male_count as i64,
                record.female_count as i64,
                record.panic_score,
                serde_json::to_string(&record.emotion_summary)?,
            ],
        )?;

        tracing::debug!(id = %record.id, capture = capture_path, "analysis stored");
        Ok(record)
    }

    pub fn get(&self, capture_path: &str) -> anyhow::Result<Option<AnalysisRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, capture_path, analyzed_at, total_faces, male_count, female_count, panic_score, emotion_summary
             FROM analyses WHERE capture_path = ?1",
        )?;
        let mut rows = stmt.query(params![capture_path])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_record(row)?)),
            None => Ok(None),
        }
    }

    /// Most recent analyses first.
    pub fn recent(&self, limit: u32) -> anyhow::Result<Vec<AnalysisRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, capture_path, analyzed_at, total_faces, male_count, female_count, panic_score, emotion_summary
             FROM analyses ORDER BY analyzed_at DESC, rowid DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_record(row)?);
        }
        Ok(out)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> anyhow::Result<AnalysisRecord> {
    let summary: String = row.get(7)?;
    Ok(AnalysisRecord {
        id: row.get(0)?,
        capture_path: row.get(1)?,
        analyzed_at: row.get(2)?,
        total_faces: row.get::<_, i64>(3)? as usize,
        male_count: row.get::<_, i64>(4)? as usize,
        female_count: row.get::<_, i64>(5)? as usize,
        panic_score: row.get(6)?,
        emotion_summary: serde_json::from_str(&summary)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdpulse_core::{Gender, GroupStats, PersonReport};

    fn analysis(panic: f64, labels: &[&str]) -> ImageAnalysis {
        let faces = labels
            .iter()
            .enumerate()
            .map(|(id, label)| PersonReport {
                id,
                gender: Gender::Female,
                age: 30,
                age_range: "21-25".into(),
                emotion_label: label.to_string(),
                emotion_error: None,
                confidence: 0.9,
                fear_score: 0.1,
                vulnerability: 0.2,
                panic_score: 20.0,
                crop_base64: None,
            })
            .collect::<Vec<_>>();
        ImageAnalysis {
            group_stats: GroupStats {
                total_faces: faces.len(),
                male_count: 0,
                female_count: faces.len(),
                panic_score: panic,
            },
            faces,
        }
    }

    #[test]
    fn test_record_and_get() {
        let store = ResultStore::open_in_memory().unwrap();
        let stored = store.record("/captures/a.jpg", &analysis(42.5, &["Fear", "Fear", "N/A"])).unwrap();

        let loaded = store.get("/captures/a.jpg").unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(loaded.total_faces, 3);
        assert_eq!(loaded.emotion_summary.get("Fear"), Some(&2));
        assert_eq!(loaded.emotion_summary.get("N/A"), Some(&1));
        assert!(store.get("/captures/missing.jpg").unwrap().is_none());
    }

    #[test]
    fn test_reanalysis_replaces_row() {
        let store = ResultStore::open_in_memory().unwrap();
        let first = store.record("/captures/a.jpg", &analysis(10.0, &["Happy"])).unwrap();
        let second = store.record("/captures/a.jpg", &analysis(80.0, &["Fear", "Sad"])).unwrap();

        assert_eq!(first.id, second.id);
        let all = store.recent(10).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].panic_score, 80.0);
        assert_eq!(all[0].total_faces, 2);
    }

    #[test]
    fn test_recent_limit_and_order() {
        let store = ResultStore::open_in_memory().unwrap();
        for i in 0..5 {
            store.record(&format!("/captures/{i}.jpg"), &analysis(i as f64, &[])).unwrap();
        }
        let recent = store.recent(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].capture_path, "/captures/4.jpg");
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/analyses.db");
        let store = ResultStore::open(&path).unwrap();
        store.record("/captures/x.jpg", &analysis(0.0, &[])).unwrap();
        assert!(path.exists());
    }
}
