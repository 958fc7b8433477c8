use std::path::PathBuf;

use thiserror::Error;

use crate::content::ContentError;

pub type StagingResult<T> = Result<T, StagingError>;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("no stageable media: every image download failed and no placeholder is available")]
    NoMedia,
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("download failed: {0}")]
    Download(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("video download failed: {0}")]
    Video(String),
    #[error("operator prompt failed: {0}")]
    Prompt(String),
}
