use std::collections::VecDeque;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::PublisherConfig;

use super::error::{StagingError, StagingResult};
use super::video::VideoFailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorDecision {
    Continue,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptRequest {
    /// The cookie export for the video host does not exist yet.
    MissingCredentials { cookies_file: PathBuf },
    /// The downloader was refused and the credentials need refreshing.
    RefreshCredentials {
        kind: VideoFailureKind,
        cookies_file: PathBuf,
        detail: String,
    },
}

impl PromptRequest {
    pub fn cookies_file(&self) -> &Path {
        match self {
            PromptRequest::MissingCredentials { cookies_file }
            | PromptRequest::RefreshCredentials { cookies_file, .. } => cookies_file,
        }
    }
}

impl fmt::Display for PromptRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptRequest::MissingCredentials { cookies_file } => write!(
                f,
                "Video host needs browser cookies. Export them to {} and press Enter, or type 'skip' to publish images only.",
                cookies_file.display()
            ),
            PromptRequest::RefreshCredentials {
                kind,
                cookies_file,
                detail,
            } => write!(
                f,
                "Video download refused ({kind}): {detail}\nRefresh {} and press Enter to retry, or type 'skip' to publish images only.",
                cookies_file.display()
            ),
        }
    }
}

/// Suspension point where a human decides whether to retry or give up.
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    async fn ask(&self, request: &PromptRequest) -> StagingResult<OperatorDecision>;
}

type LineReader = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

/// Asks on the terminal. End of input counts as skip.
///
/// One reader lives as long as the prompt so lines typed ahead are kept for
/// the next question.
pub struct ConsolePrompt {
    lines: AsyncMutex<LineReader>,
}

impl ConsolePrompt {
    pub fn stdin() -> Self {
        Self::from_reader(tokio::io::stdin())
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            lines: AsyncMutex::new(BufReader::new(reader).lines()),
        }
    }
}

impl fmt::Debug for ConsolePrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsolePrompt").finish_non_exhaustive()
    }
}

#[async_trait]
impl OperatorPrompt for ConsolePrompt {
    async fn ask(&self, request: &PromptRequest) -> StagingResult<OperatorDecision> {
        let mut lines = self.lines.lock().await;
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(format!("\n{request}\n> ").as_bytes())
            .await
            .map_err(|err| StagingError::Prompt(err.to_string()))?;
        stderr
            .flush()
            .await
            .map_err(|err| StagingError::Prompt(err.to_string()))?;
        let line = lines
            .next_line()
            .await
            .map_err(|err| StagingError::Prompt(err.to_string()))?;
        Ok(match line {
            None => OperatorDecision::Skip,
            Some(answer) => parse_answer(&answer),
        })
    }
}

pub const CONTINUE_MARKER: &str = "continue";
pub const SKIP_MARKER: &str = "skip";

/// Answers through the filesystem for runs started without a terminal.
///
/// The question goes to the run log. The operator replies by creating a
/// `continue` or `skip` file in the answer directory, or by rewriting the
/// cookie export, which counts as continue. No answer before the deadline
/// counts as skip.
#[derive(Debug, Clone)]
pub struct AnswerFilePrompt {
    dir: PathBuf,
    poll: Duration,
    wait: Duration,
}

impl AnswerFilePrompt {
    pub fn new(dir: impl Into<PathBuf>, poll: Duration, wait: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll,
            wait,
        }
    }

    pub fn from_config(config: &PublisherConfig) -> Self {
        Self::new(
            config.staging_root(),
            config.timing.operator_poll(),
            config.timing.operator_wait(),
        )
    }

    pub fn marker(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[async_trait]
impl OperatorPrompt for AnswerFilePrompt {
    async fn ask(&self, request: &PromptRequest) -> StagingResult<OperatorDecision> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StagingError::Io {
                source,
                path: self.dir.clone(),
            })?;
        let skip = self.marker(SKIP_MARKER);
        let resume = self.marker(CONTINUE_MARKER);
        // Answers left over from an earlier question do not count.
        take_marker(&skip).await?;
        take_marker(&resume).await?;

        let cookies = request.cookies_file();
        let baseline = modified(cookies).await;
        warn!(
            question = %request,
            continue_file = %resume.display(),
            skip_file = %skip.display(),
            wait_seconds = self.wait.as_secs(),
            "waiting for operator answer"
        );

        let deadline = Instant::now() + self.wait;
        loop {
            if take_marker(&skip).await? {
                info!("operator chose to skip the video");
                return Ok(OperatorDecision::Skip);
            }
            if take_marker(&resume).await? {
                info!("operator asked to retry the video");
                return Ok(OperatorDecision::Continue);
            }
            if modified(cookies).await.is_some_and(|at| Some(at) != baseline) {
                info!(cookies = %cookies.display(), "cookie export refreshed");
                return Ok(OperatorDecision::Continue);
            }
            if Instant::now() >= deadline {
                warn!("no operator answer in time, skipping the video");
                return Ok(OperatorDecision::Skip);
            }
            sleep(self.poll).await;
        }
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).await.ok()?.modified().ok()
}

/// Removes an answer file, reporting whether it was there.
async fn take_marker(path: &Path) -> StagingResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StagingError::Io {
            source,
            path: path.to_path_buf(),
        }),
    }
}

pub fn parse_answer(answer: &str) -> OperatorDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "skip" | "s" | "n" | "no" => OperatorDecision::Skip,
        _ => OperatorDecision::Continue,
    }
}

/// Replays fixed answers and skips once they run out.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<OperatorDecision>>,
    asked: Mutex<Vec<PromptRequest>>,
}

impl ScriptedPrompt {
    pub fn new(answers: impl IntoIterator<Item = OperatorDecision>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<PromptRequest> {
        self.asked
            .lock()
            .map(|asked| asked.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OperatorPrompt for ScriptedPrompt {
    async fn ask(&self, request: &PromptRequest) -> StagingResult<OperatorDecision> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(request.clone());
        }
        let next = self
            .answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front());
        Ok(next.unwrap_or(OperatorDecision::Skip))
    }
}
