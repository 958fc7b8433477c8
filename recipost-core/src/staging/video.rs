use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::VideoSection;

use super::error::{StagingError, StagingResult};
use super::prompt::{OperatorDecision, OperatorPrompt, PromptRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFailureKind {
    BotCheck,
    SignInRequired,
    Other,
}

impl VideoFailureKind {
    pub fn is_recoverable(self) -> bool {
        !matches!(self, VideoFailureKind::Other)
    }
}

impl fmt::Display for VideoFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VideoFailureKind::BotCheck => "bot check",
            VideoFailureKind::SignInRequired => "sign-in required",
            VideoFailureKind::Other => "other",
        };
        f.write_str(label)
    }
}

fn bot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\bbot\b|not a robot|captcha").expect("bot pattern is valid")
    })
}

fn sign_in_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)sign[\s-]?in|log[\s-]?in required|members-only|private video")
            .expect("sign-in pattern is valid")
    })
}

/// Sorts downloader error output into the cases the operator can fix.
pub fn classify_failure(message: &str) -> VideoFailureKind {
    if bot_pattern().is_match(message) {
        VideoFailureKind::BotCheck
    } else if sign_in_pattern().is_match(message) {
        VideoFailureKind::SignInRequired
    } else {
        VideoFailureKind::Other
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;
}

pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
    }
}

/// Runs the external downloader for hosts that need browser credentials,
/// asking the operator to refresh them when the host refuses.
pub struct VideoDownloader {
    config: VideoSection,
    cookies_file: PathBuf,
    prompt: Arc<dyn OperatorPrompt>,
    executor: Arc<dyn CommandExecutor>,
}

impl VideoDownloader {
    pub fn new(config: VideoSection, cookies_file: PathBuf, prompt: Arc<dyn OperatorPrompt>) -> Self {
        Self {
            config,
            cookies_file,
            prompt,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn requires_credentials(&self, url: &str) -> bool {
        let Some(host) = url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
        else {
            return false;
        };
        self.config.credential_hosts.iter().any(|candidate| {
            let candidate = candidate.to_ascii_lowercase();
            host == candidate || host.ends_with(&format!(".{candidate}"))
        })
    }

    fn arguments(&self, url: &str, dest: &Path) -> Vec<String> {
        let mut args = vec![
            "--no-warnings".to_string(),
            "--no-check-certificate".to_string(),
            "--no-playlist".to_string(),
        ];
        if self.cookies_file.exists() {
            args.push("--cookies".to_string());
            args.push(self.cookies_file.to_string_lossy().to_string());
        }
        args.push("-f".to_string());
        args.push(self.config.format.clone());
        args.push("--merge-output-format".to_string());
        args.push("mp4".to_string());
        args.push("-o".to_string());
        args.push(dest.to_string_lossy().to_string());
        args.push(url.to_string());
        args
    }

    /// `Ok(None)` when the operator skipped the video.
    pub async fn download(&self, url: &str, dest: &Path) -> StagingResult<Option<PathBuf>> {
        if !self.cookies_file.exists() {
            let request = PromptRequest::MissingCredentials {
                cookies_file: self.cookies_file.clone(),
            };
            if self.prompt.ask(&request).await? == OperatorDecision::Skip {
                info!(url, "operator skipped the video");
                return Ok(None);
            }
        }

        let binary = PathBuf::from(&self.config.downloader_binary);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            info!(url, attempt, "downloading video");
            let output = self
                .executor
                .run(&binary, &self.arguments(url, dest))
                .await
                .map_err(|err| {
                    StagingError::Video(format!("failed to run {}: {err}", binary.display()))
                })?;
            if output.status.success() && dest.exists() {
                return Ok(Some(dest.to_path_buf()));
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("downloader finished without producing a file")
                .to_string();
            let kind = classify_failure(&stderr);
            if !kind.is_recoverable() {
                return Err(StagingError::Video(detail));
            }

            warn!(url, attempt, kind = %kind, detail = %detail, "video host refused the download");
            let request = PromptRequest::RefreshCredentials {
                kind,
                cookies_file: self.cookies_file.clone(),
                detail,
            };
            if self.prompt.ask(&request).await? == OperatorDecision::Skip {
                info!(url, "operator skipped the video");
                return Ok(None);
            }
        }
    }
}

impl fmt::Debug for VideoDownloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoDownloader")
            .field("binary", &self.config.downloader_binary)
            .field("cookies_file", &self.cookies_file)
            .field("credential_hosts", &self.config.credential_hosts)
            .finish()
    }
}
