use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PublisherConfig {
    pub chromium: ChromiumSection,
    pub platform: PlatformSection,
    pub timing: TimingSection,
    pub staging: StagingSection,
    pub video: VideoSection,
    pub paths: PathsSection,
}

impl PublisherConfig {
    /// Resolves relative paths against `paths.base_dir`.
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn session_file(&self) -> PathBuf {
        self.resolve_path(&self.paths.session_file)
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.screenshots_dir)
    }

    pub fn error_log(&self) -> PathBuf {
        self.resolve_path(&self.paths.error_log)
    }

    pub fn ledger_db(&self) -> PathBuf {
        self.resolve_path(&self.paths.ledger_db)
    }

    pub fn failure_log(&self) -> PathBuf {
        self.resolve_path(&self.paths.failure_log)
    }

    pub fn run_log(&self) -> PathBuf {
        self.resolve_path(&self.paths.run_log)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.resolve_path(&self.staging.work_dir)
    }

    pub fn placeholder_image(&self) -> Option<PathBuf> {
        self.staging
            .placeholder_image
            .as_ref()
            .map(|path| self.resolve_path(path))
    }

    pub fn cookies_file(&self) -> PathBuf {
        self.resolve_path(&self.video.cookies_file)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub user_agent: String,
    pub window_size: [u32; 2],
    pub lang: Option<String>,
    pub accept_language: Option<String>,
    pub request_timeout_seconds: Option<u64>,
    pub extra_args: Vec<String>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: false,
            sandbox: true,
            disable_gpu: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window_size: [1366, 900],
            lang: Some("zh-CN".to_string()),
            accept_language: Some("zh-CN,zh;q=0.9,en;q=0.8".to_string()),
            request_timeout_seconds: Some(60),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformSection {
    pub session_key: String,
    pub home_url: String,
    pub login_url: String,
    pub composer_url: String,
    /// Fragment the home URL must contain after a cookie login.
    pub home_marker: String,
    /// Any of these in the URL counts as a finished interactive login.
    pub post_login_patterns: Vec<String>,
    pub title_limit: usize,
    pub max_images: usize,
    pub max_covers: usize,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            session_key: "xiaohongshu".to_string(),
            home_url: "https://creator.xiaohongshu.com/creator/home".to_string(),
            login_url: "https://creator.xiaohongshu.com/login".to_string(),
            composer_url: "https://creator.xiaohongshu.com/publish/publish".to_string(),
            home_marker: "creator/home".to_string(),
            post_login_patterns: vec!["creator/home".to_string(), "new/home".to_string()],
            title_limit: 18,
            max_images: 9,
            max_covers: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub cookie_check_ms: u64,
    pub login_timeout_seconds: u64,
    pub login_poll_ms: u64,
    pub composer_settle_ms: u64,
    pub tab_switch_ms: u64,
    pub image_upload_ms: u64,
    pub video_upload_ms: u64,
    pub cover_upload_ms: u64,
    pub field_settle_ms: u64,
    pub focus_ms: u64,
    pub text_settle_ms: u64,
    pub submit_settle_ms: u64,
    pub draft_hold_seconds: u64,
    pub draft_poll_seconds: u64,
    /// How long an unattended run waits for an operator answer file.
    pub operator_wait_seconds: u64,
    pub operator_poll_ms: u64,
}

impl TimingSection {
    pub fn millis(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_seconds)
    }

    pub fn login_poll(&self) -> Duration {
        Duration::from_millis(self.login_poll_ms.max(1))
    }

    pub fn draft_hold(&self) -> Duration {
        Duration::from_secs(self.draft_hold_seconds)
    }

    pub fn draft_poll(&self) -> Duration {
        Duration::from_secs(self.draft_poll_seconds.max(1))
    }

    pub fn operator_wait(&self) -> Duration {
        Duration::from_secs(self.operator_wait_seconds)
    }

    pub fn operator_poll(&self) -> Duration {
        Duration::from_millis(self.operator_poll_ms.max(1))
    }

    /// Every wait set to zero, except the polling intervals.
    pub fn instant() -> Self {
        Self {
            cookie_check_ms: 0,
            login_timeout_seconds: 0,
            login_poll_ms: 1,
            composer_settle_ms: 0,
            tab_switch_ms: 0,
            image_upload_ms: 0,
            video_upload_ms: 0,
            cover_upload_ms: 0,
            field_settle_ms: 0,
            focus_ms: 0,
            text_settle_ms: 0,
            submit_settle_ms: 0,
            draft_hold_seconds: 0,
            draft_poll_seconds: 1,
            operator_wait_seconds: 0,
            operator_poll_ms: 1,
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            cookie_check_ms: 2_000,
            login_timeout_seconds: 120,
            login_poll_ms: 1_000,
            composer_settle_ms: 3_000,
            tab_switch_ms: 1_000,
            image_upload_ms: 5_000,
            video_upload_ms: 15_000,
            cover_upload_ms: 3_000,
            field_settle_ms: 3_000,
            focus_ms: 500,
            text_settle_ms: 2_000,
            submit_settle_ms: 8_000,
            draft_hold_seconds: 300,
            draft_poll_seconds: 10,
            operator_wait_seconds: 1_800,
            operator_poll_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StagingSection {
    pub work_dir: String,
    pub placeholder_image: Option<String>,
    pub retention_hours: u64,
    pub download_timeout_seconds: u64,
    pub user_agent: String,
    pub accept_language: String,
}

impl StagingSection {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 60 * 60)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_seconds.max(1))
    }
}

impl Default for StagingSection {
    fn default() -> Self {
        Self {
            work_dir: "temp_media".to_string(),
            placeholder_image: None,
            retention_hours: 72,
            download_timeout_seconds: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36".to_string(),
            accept_language: "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoSection {
    pub downloader_binary: String,
    pub cookies_file: String,
    /// Hosts whose videos need the external downloader and a browser cookie export.
    pub credential_hosts: Vec<String>,
    pub format: String,
}

impl Default for VideoSection {
    fn default() -> Self {
        Self {
            downloader_binary: "yt-dlp".to_string(),
            cookies_file: "cookies.txt".to_string(),
            credential_hosts: vec![
                "youtube.com".to_string(),
                "youtu.be".to_string(),
                "vimeo.com".to_string(),
            ],
            format: "mp4/bestvideo+bestaudio/best".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub base_dir: String,
    pub session_file: String,
    pub screenshots_dir: String,
    pub error_log: String,
    pub failure_log: String,
    pub ledger_db: String,
    pub run_log: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            base_dir: ".".to_string(),
            session_file: "xhs_cookies.json".to_string(),
            screenshots_dir: "screenshots".to_string(),
            error_log: "publish_error.log".to_string(),
            failure_log: "logs/failures.jsonl".to_string(),
            ledger_db: "data/runs.sqlite".to_string(),
            run_log: "logs/publish_runs.log".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Platform ceilings for one note.
pub const MAX_IMAGES: usize = 9;
pub const MAX_COVERS: usize = 3;

impl PublisherConfig {
    /// Rejects values the publisher cannot run with.
    pub fn validate(&self) -> Result<()> {
        let platform = &self.platform;
        for (field, raw) in [
            ("platform.home_url", &platform.home_url),
            ("platform.login_url", &platform.login_url),
            ("platform.composer_url", &platform.composer_url),
        ] {
            url::Url::parse(raw).map_err(|err| ConfigError::Invalid {
                field,
                reason: format!("{raw:?} is not a URL ({err})"),
            })?;
        }
        if platform.title_limit == 0 {
            return Err(invalid("platform.title_limit", "must be at least 1"));
        }
        if !(1..=MAX_IMAGES).contains(&platform.max_images) {
            return Err(ConfigError::Invalid {
                field: "platform.max_images",
                reason: format!("must be between 1 and {MAX_IMAGES}"),
            });
        }
        if platform.max_covers > MAX_COVERS {
            return Err(ConfigError::Invalid {
                field: "platform.max_covers",
                reason: format!("must be at most {MAX_COVERS}"),
            });
        }
        if platform.post_login_patterns.is_empty() {
            return Err(invalid(
                "platform.post_login_patterns",
                "needs at least one pattern",
            ));
        }
        if platform.post_login_patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid(
                "platform.post_login_patterns",
                "blank patterns match every URL",
            ));
        }
        let [width, height] = self.chromium.window_size;
        if width == 0 || height == 0 {
            return Err(invalid("chromium.window_size", "width and height must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

pub fn load_publisher_config<P: AsRef<Path>>(path: P) -> Result<PublisherConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let config: PublisherConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })?;
    config.validate()?;
    Ok(config)
}
