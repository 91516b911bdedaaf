use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::satellite::Satellite;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Outcome of one capture attempt, successful or not. Persisted so the
/// gallery can show failures instead of silently dropping them.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub id: String,
    pub satellite: Satellite,
    #[schema(value_type = Option<String>)]
    pub recording_path: Option<PathBuf>,
    #[schema(value_type = Vec<String>)]
    pub image_paths: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub peak_signal_db: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

impl CaptureResult {
    pub fn new(satellite: Satellite, started_at: DateTime<Utc>) -> Self {
        let stamp = started_at.format("%Y%m%dT%H%M%SZ");
        CaptureResult {
            id: format!("{}_{}", stamp, uuid::Uuid::new_v4()),
            satellite,
            recording_path: None,
            image_paths: Vec::new(),
            started_at,
            ended_at: started_at,
            peak_signal_db: None,
            success: false,
            error: None,
        }
    }

    pub fn failed(satellite: Satellite, started_at: DateTime<Utc>, error: &str) -> Self {
        CaptureResult {
            ended_at: Utc::now(),
            error: Some(error.to_string()),
            ..Self::new(satellite, started_at)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct CaptureSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// One YAML document per capture under the configured base directory.
pub struct Store {
    base: PathBuf,
}

impl Store {
    pub fn new(base: PathBuf) -> Self {
        Store { base }
    }

    pub fn save_capture(&self, result: &CaptureResult) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.base)?;
        let path = self.base.join(format!("{}.yaml", result.id));
        std::fs::write(path, serde_yaml::to_string(result)?)?;
        Ok(())
    }

    /// Most recent captures first.
    pub fn recent(&self, limit: usize) -> Result<Vec<CaptureResult>, StoreError> {
        let mut results = self.load_all()?;
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        results.truncate(limit);
        Ok(results)
    }

    pub fn summary(&self) -> Result<CaptureSummary, StoreError> {
        let results = self.load_all()?;
        let successful = results.iter().filter(|r| r.success).count();
        Ok(CaptureSummary {
            total: results.len(),
            successful,
            failed: results.len() - successful,
        })
    }

    fn load_all(&self) -> Result<Vec<CaptureResult>, StoreError> {
        if !self.base.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in self.base.read_dir()? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    log::error!("failed to read capture {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_yaml::from_str(&content) {
                Ok(result) => results.push(result),
                Err(e) => log::error!("failed to parse capture {}: {}", path.display(), e),
            }
        }
        Ok(results)
    }
}
