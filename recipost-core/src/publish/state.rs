use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::browser::PublishMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishState {
    Init,
    LoggingIn,
    NavigatingToComposer,
    SelectingUploadMode,
    UploadingMedia,
    FillingTitle,
    FillingBody,
    CapturingPreEvidence,
    Submitting,
    CapturingPostEvidence,
    HoldingForManualEdit,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Success,
    Partial,
    Failure,
}

impl PublishStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishStatus::Success => "success",
            PublishStatus::Partial => "partial",
            PublishStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub status: PublishStatus,
    pub message: String,
    pub evidence_path: Option<PathBuf>,
    pub trail: Vec<PublishState>,
    pub draft: bool,
    pub metrics: PublishMetrics,
}

impl PublishResult {
    pub fn is_failure(&self) -> bool {
        self.status == PublishStatus::Failure
    }

    pub fn visited(&self, state: PublishState) -> bool {
        self.trail.contains(&state)
    }
}

impl fmt::Display for PublishResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status, self.message)?;
        if let Some(path) = &self.evidence_path {
            write!(f, "\nScreenshot: {}", path.display())?;
        }
        Ok(())
    }
}

/// Bookkeeping for one run while the state machine advances.
#[derive(Debug, Default)]
pub(crate) struct RunLog {
    pub trail: Vec<PublishState>,
    pub degradations: Vec<String>,
    pub evidence: Option<PathBuf>,
    pub manual_completion: bool,
}

impl RunLog {
    pub fn enter(&mut self, state: PublishState) {
        tracing::info!(state = ?state, "publish state");
        self.trail.push(state);
    }

    pub fn degrade(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "publish degraded");
        self.degradations.push(message);
    }

    pub fn evidence(&mut self, path: Option<PathBuf>) {
        if path.is_some() {
            self.evidence = path;
        }
    }

    pub fn status(&self) -> PublishStatus {
        if self.manual_completion || !self.degradations.is_empty() {
            PublishStatus::Partial
        } else {
            PublishStatus::Success
        }
    }
}
