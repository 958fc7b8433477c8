mod download;
mod error;
mod prompt;
mod video;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PublisherConfig;
use crate::content::Content;

pub use download::{image_extension, local_source, staged_file_name, MediaDownloader, MediaKind};
pub use error::{StagingError, StagingResult};
pub use prompt::{
    AnswerFilePrompt, ConsolePrompt, OperatorDecision, OperatorPrompt, PromptRequest,
    ScriptedPrompt, CONTINUE_MARKER, SKIP_MARKER,
};
pub use video::{
    classify_failure, CommandExecutor, SystemCommandExecutor, VideoDownloader, VideoFailureKind,
};

/// Local files for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedMedia {
    pub run_dir: PathBuf,
    pub image_paths: Vec<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub cover_paths: Vec<PathBuf>,
}

impl StagedMedia {
    pub fn has_video(&self) -> bool {
        self.video_path.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.image_paths.is_empty() && self.video_path.is_none()
    }
}

#[derive(Debug)]
pub struct MediaStager {
    root: PathBuf,
    placeholder: Option<PathBuf>,
    retention: Duration,
    max_images: usize,
    max_covers: usize,
    downloader: MediaDownloader,
    video: VideoDownloader,
}

impl MediaStager {
    pub fn new(config: &PublisherConfig, prompt: Arc<dyn OperatorPrompt>) -> StagingResult<Self> {
        let downloader = MediaDownloader::new(&config.staging)?;
        let video = VideoDownloader::new(config.video.clone(), config.cookies_file(), prompt);
        Ok(Self {
            root: config.staging_root(),
            placeholder: config.placeholder_image(),
            retention: config.staging.retention(),
            max_images: config.platform.max_images,
            max_covers: config.platform.max_covers,
            downloader,
            video,
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.video = self.video.with_executor(executor);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Removes per-run directories older than the retention window.
    pub fn prune_expired(&self) -> StagingResult<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let now = SystemTime::now();
        let entries = std::fs::read_dir(&self.root).map_err(|source| StagingError::Io {
            source,
            path: self.root.clone(),
        })?;
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to read staging metadata");
                    continue;
                }
            };
            if let Ok(modified) = metadata.modified() {
                if now.duration_since(modified).unwrap_or(Duration::ZERO) > self.retention {
                    match std::fs::remove_dir_all(&path) {
                        Ok(()) => removed += 1,
                        Err(err) => {
                            warn!(path = %path.display(), error = %err, "failed to remove expired staging dir")
                        }
                    }
                }
            }
        }
        if removed > 0 {
            info!(removed, "pruned expired staging directories");
        }
        Ok(removed)
    }

    pub async fn stage(&self, content: &Content) -> StagingResult<StagedMedia> {
        content.validate()?;
        let run_dir = self.prepare_run_dir().await?;
        let referer_base = content.referer_base();
        let mut staged = StagedMedia {
            run_dir: run_dir.clone(),
            ..StagedMedia::default()
        };

        if let Some(video) = content.video.as_deref().filter(|_| content.has_video()) {
            staged.video_path = self.stage_video(video, &run_dir).await?;
            if staged.video_path.is_some() {
                staged.cover_paths = self
                    .stage_covers(&content.cover_images, referer_base.as_deref(), &run_dir)
                    .await;
                info!(covers = staged.cover_paths.len(), "video staged");
                return Ok(staged);
            }
        }

        staged.image_paths = self
            .stage_images(&content.images, referer_base.as_deref(), &run_dir)
            .await;
        if staged.image_paths.is_empty() {
            match self.placeholder.as_ref().filter(|path| path.exists()) {
                Some(placeholder) => {
                    warn!(path = %placeholder.display(), "no image staged, using placeholder");
                    staged.image_paths.push(placeholder.clone());
                }
                None => return Err(StagingError::NoMedia),
            }
        }
        info!(images = staged.image_paths.len(), "images staged");
        Ok(staged)
    }

    pub async fn stage_images(
        &self,
        images: &[String],
        referer_base: Option<&str>,
        dir: &Path,
    ) -> Vec<PathBuf> {
        let images = non_blank(images);
        self.downloader
            .fan_out(&images, referer_base, dir, self.max_images)
            .await
    }

    pub async fn stage_covers(
        &self,
        covers: &[String],
        referer_base: Option<&str>,
        dir: &Path,
    ) -> Vec<PathBuf> {
        let covers = non_blank(covers);
        self.downloader
            .fan_out(&covers, referer_base, dir, self.max_covers)
            .await
    }

    /// `Ok(None)` when the operator chose to skip the video.
    pub async fn stage_video(&self, video: &str, dir: &Path) -> StagingResult<Option<PathBuf>> {
        let dest = dir.join(staged_file_name("mp4"));
        if self.video.requires_credentials(video) {
            return self.video.download(video, &dest).await;
        }
        self.downloader
            .fetch(video, None, &dest, MediaKind::Video)
            .await?;
        Ok(Some(dest))
    }

    async fn prepare_run_dir(&self) -> StagingResult<PathBuf> {
        let id = Uuid::new_v4().simple().to_string();
        let name = format!("run_{}_{}", Local::now().format("%Y%m%d_%H%M%S"), &id[..8]);
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StagingError::Io {
                source,
                path: dir.clone(),
            })?;
        Ok(dir)
    }
}

fn non_blank(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
