use thiserror::Error;

use crate::browser::{BrowserError, Target};
use crate::content::ContentError;
use crate::staging::StagingError;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("media staging failed: {0}")]
    Staging(#[from] StagingError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("login failed or timed out")]
    AuthenticationFailed,
    #[error("required element not found: {0}")]
    MissingElement(Target),
    #[error("publish run panicked: {0}")]
    Panicked(String),
}
