use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tracing::{info, warn};

use super::metrics::PublishMetrics;
use super::page::ComposerPage;

pub fn evidence_file_name(label: &str, at: DateTime<Local>) -> String {
    format!("{label}_{}.png", at.format("%Y%m%d_%H%M%S"))
}

/// Screenshots taken at publish checkpoints. Failures never abort a run.
#[derive(Debug, Clone)]
pub struct EvidenceCapture {
    dir: PathBuf,
    metrics: Arc<Mutex<PublishMetrics>>,
}

impl EvidenceCapture {
    pub fn new(dir: impl Into<PathBuf>, metrics: Arc<Mutex<PublishMetrics>>) -> Self {
        Self {
            dir: dir.into(),
            metrics,
        }
    }

    pub async fn capture(&self, page: &mut dyn ComposerPage, label: &str) -> Option<PathBuf> {
        let path = self.dir.join(evidence_file_name(label, Local::now()));
        let outcome = match page.screenshot().await {
            Ok(bytes) => write_png(&path, &bytes).await,
            Err(err) => Err(err.to_string()),
        };
        let success = outcome.is_ok();
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.record_screenshot(success);
        }
        match outcome {
            Ok(()) => {
                info!(label, path = %path.display(), "evidence captured");
                Some(path)
            }
            Err(err) => {
                warn!(label, error = %err, "failed to capture evidence");
                None
            }
        }
    }
}

async fn write_png(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| err.to_string())?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|err| err.to_string())
}
