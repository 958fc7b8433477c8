mod error;
mod state;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use futures::FutureExt;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::browser::{
    Authenticator, BrowserFactory, BrowserLauncher, ComposerPage, EvidenceCapture,
    PublishBrowser, PublishMetrics, SelectorResolver, SessionStore, Target,
};
use crate::config::{PublisherConfig, TimingSection};
use crate::content::Content;
use crate::staging::{MediaStager, OperatorPrompt, StagedMedia};

pub use error::PublishError;
use state::RunLog;
pub use state::{PublishResult, PublishState, PublishStatus};

/// Drives one post from staged media to a submitted (or held) composer page.
pub struct Publisher {
    config: Arc<PublisherConfig>,
    browsers: Arc<dyn BrowserFactory>,
    stager: Arc<MediaStager>,
    authenticator: Authenticator,
    resolver: SelectorResolver,
    evidence: EvidenceCapture,
    metrics: Arc<Mutex<PublishMetrics>>,
}

impl Publisher {
    pub fn new(
        config: PublisherConfig,
        browsers: Arc<dyn BrowserFactory>,
        stager: MediaStager,
        sessions: SessionStore,
    ) -> Self {
        let metrics = Arc::new(Mutex::new(PublishMetrics::default()));
        let resolver = SelectorResolver::new(Arc::clone(&metrics));
        let authenticator = Authenticator::new(
            config.platform.clone(),
            config.timing.clone(),
            sessions,
            resolver.clone(),
            Arc::clone(&metrics),
        );
        let evidence = EvidenceCapture::new(config.screenshots_dir(), Arc::clone(&metrics));
        Self {
            config: Arc::new(config),
            browsers,
            stager: Arc::new(stager),
            authenticator,
            resolver,
            evidence,
            metrics,
        }
    }

    /// Wires the real Chromium launcher, stager and session file from `config`.
    pub fn from_config(
        config: PublisherConfig,
        prompt: Arc<dyn OperatorPrompt>,
    ) -> Result<Self, PublishError> {
        let browsers = Arc::new(BrowserLauncher::new(config.chromium.clone()));
        let stager = MediaStager::new(&config, prompt)?;
        let sessions = SessionStore::new(config.session_file(), config.platform.session_key.clone());
        Ok(Self::new(config, browsers, stager, sessions))
    }

    pub fn metrics(&self) -> PublishMetrics {
        self.metrics
            .lock()
            .map(|metrics| metrics.clone())
            .unwrap_or_default()
    }

    pub async fn publish(&self, content: &Content) -> PublishResult {
        let draft = content.save_as_draft;
        let mut log = RunLog::default();
        log.enter(PublishState::Init);
        info!(title = %content.title, draft, "publish run started");
        self.with_metrics(|metrics| *metrics = PublishMetrics::default());

        if let Err(err) = content.validate() {
            return self.fail(log, None, err.into(), draft).await;
        }
        if let Err(err) = self.stager.prune_expired() {
            warn!(error = %err, "failed to prune staging root");
        }
        let media = match self.stager.stage(content).await {
            Ok(media) => media,
            Err(err) => return self.fail(log, None, err.into(), draft).await,
        };
        let mut browser = match self.browsers.open().await {
            Ok(browser) => browser,
            Err(err) => return self.fail(log, None, err.into(), draft).await,
        };

        let mut page: Option<Box<dyn ComposerPage>> = None;
        let outcome = AssertUnwindSafe(self.drive(
            browser.as_mut(),
            &mut page,
            content,
            &media,
            &mut log,
        ))
        .catch_unwind()
        .await;

        let result = match outcome {
            Ok(Ok(())) => self.finish(log, draft),
            Ok(Err(err)) => self.fail(log, page.as_mut(), err, draft).await,
            Err(panic) => {
                let err = PublishError::Panicked(panic_message(panic.as_ref()));
                self.fail(log, page.as_mut(), err, draft).await
            }
        };

        drop(page);
        if let Err(err) = browser.close().await {
            warn!(error = %err, "failed to close browser");
        }
        info!(
            status = %result.status,
            selector_hit_rate = result.metrics.hit_rate(),
            "publish run finished"
        );
        result
    }

    async fn drive(
        &self,
        browser: &mut dyn PublishBrowser,
        slot: &mut Option<Box<dyn ComposerPage>>,
        content: &Content,
        media: &StagedMedia,
        log: &mut RunLog,
    ) -> Result<(), PublishError> {
        let page = slot.insert(browser.new_page().await?).as_mut();
        self.with_metrics(PublishMetrics::record_page_open);
        let timing = &self.config.timing;
        let platform = &self.config.platform;

        log.enter(PublishState::LoggingIn);
        if !self.authenticator.authenticate(page).await? {
            return Err(PublishError::AuthenticationFailed);
        }

        log.enter(PublishState::NavigatingToComposer);
        page.goto(&platform.composer_url).await?;
        pause(timing.composer_settle_ms).await;

        log.enter(PublishState::SelectingUploadMode);
        let tab = if media.has_video() {
            Target::VideoTab
        } else {
            Target::ImageTab
        };
        match self.resolver.resolve(tab, page).await {
            Some(element) => {
                if let Err(err) = element.activate(page).await {
                    log.degrade(format!("could not switch to {tab}: {err}"));
                }
                pause(timing.tab_switch_ms).await;
            }
            None => log.degrade(format!("{tab} not found, continuing in the current mode")),
        }

        log.enter(PublishState::UploadingMedia);
        let Some(input) = self.resolver.resolve(Target::FileInput, page).await else {
            let path = self.evidence.capture(page, "missing_element").await;
            log.evidence(path);
            return Err(PublishError::MissingElement(Target::FileInput));
        };
        if let Some(video) = &media.video_path {
            page.set_input_files(&input.selector, std::slice::from_ref(video))
                .await?;
            self.with_metrics(|metrics| metrics.record_upload(1));
            info!(path = %video.display(), "video uploaded, waiting for processing");
            pause(timing.video_upload_ms).await;
            if let Some(cover) = media.cover_paths.first() {
                self.upload_cover(page, cover, log).await;
            }
        } else {
            page.set_input_files(&input.selector, &media.image_paths)
                .await?;
            self.with_metrics(|metrics| metrics.record_upload(media.image_paths.len()));
            info!(images = media.image_paths.len(), "images uploaded");
            pause(timing.image_upload_ms).await;
        }

        log.enter(PublishState::FillingTitle);
        pause(timing.field_settle_ms).await;
        let title = content.truncated_title(platform.title_limit);
        if title.chars().count() < content.title.chars().count() {
            info!(original = %content.title, truncated = %title, "title truncated");
        }
        match self.resolver.resolve(Target::TitleField, page).await {
            Some(field) => {
                if let Err(err) = page.fill(&field.selector, &title).await {
                    log.degrade(format!("failed to fill title: {err}"));
                }
            }
            None => {
                log.degrade("title field not found");
                let path = self.evidence.capture(page, "missing_element").await;
                log.evidence(path);
            }
        }

        log.enter(PublishState::FillingBody);
        match self.resolver.resolve(Target::ContentEditor, page).await {
            Some(editor) => {
                if let Err(err) = editor.activate(page).await {
                    warn!(error = %err, "failed to click content editor");
                }
                pause(timing.focus_ms).await;
                if let Err(err) = page.insert_text(&editor.selector, &content.body).await {
                    log.degrade(format!("failed to type body: {err}"));
                }
            }
            None => log.degrade("content editor not found"),
        }
        pause(timing.text_settle_ms).await;

        log.enter(PublishState::CapturingPreEvidence);
        let path = self.evidence.capture(page, "pre_publish").await;
        log.evidence(path);

        log.enter(PublishState::Submitting);
        let button = if content.save_as_draft {
            Target::DraftButton
        } else {
            Target::PublishButton
        };
        let submitted = match self.resolver.resolve(button, page).await {
            Some(element) => match element.activate(page).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(target = %button, error = %err, "failed to click submit button");
                    false
                }
            },
            None => false,
        };
        if !submitted {
            log.manual_completion = true;
            log.enter(PublishState::Done);
            return Ok(());
        }
        pause(timing.submit_settle_ms).await;

        log.enter(PublishState::CapturingPostEvidence);
        let path = self.evidence.capture(page, "post_publish").await;
        log.evidence(path);

        if content.save_as_draft {
            log.enter(PublishState::HoldingForManualEdit);
            hold_for_manual_edit(page, timing).await;
        }
        log.enter(PublishState::Done);
        Ok(())
    }

    async fn upload_cover(&self, page: &mut dyn ComposerPage, cover: &Path, log: &mut RunLog) {
        let Some(input) = self.resolver.resolve(Target::CoverInput, page).await else {
            log.degrade("cover input not found, the platform will pick a frame");
            return;
        };
        match page
            .set_input_files(&input.selector, &[cover.to_path_buf()])
            .await
        {
            Ok(()) => {
                self.with_metrics(|metrics| metrics.record_upload(1));
                pause(self.config.timing.cover_upload_ms).await;
            }
            Err(err) => log.degrade(format!("cover upload failed: {err}")),
        }
    }

    fn finish(&self, log: RunLog, draft: bool) -> PublishResult {
        let status = log.status();
        let mut message = if log.manual_completion {
            let button = if draft { "save-draft" } else { "publish" };
            format!("No {button} button found; please complete the post manually in the browser.")
        } else if draft {
            "Draft saved.".to_string()
        } else {
            "Post submitted.".to_string()
        };
        if !log.degradations.is_empty() {
            message.push_str(&format!(" Warnings: {}.", log.degradations.join("; ")));
        }
        PublishResult {
            status,
            message,
            evidence_path: log.evidence,
            trail: log.trail,
            draft,
            metrics: self.metrics(),
        }
    }

    async fn fail(
        &self,
        mut log: RunLog,
        page: Option<&mut Box<dyn ComposerPage>>,
        err: PublishError,
        draft: bool,
    ) -> PublishResult {
        log.enter(PublishState::Failed);
        warn!(error = %err, "publish run failed");
        if let Some(page) = page {
            let path = self.evidence.capture(page.as_mut(), "error").await;
            log.evidence(path);
        }
        write_error_log(&self.config.error_log(), &err, &log.trail).await;
        PublishResult {
            status: PublishStatus::Failure,
            message: format!("Publish failed: {err}"),
            evidence_path: log.evidence,
            trail: log.trail,
            draft,
            metrics: self.metrics(),
        }
    }

    fn with_metrics<F>(&self, f: F)
    where
        F: FnOnce(&mut PublishMetrics),
    {
        if let Ok(mut guard) = self.metrics.lock() {
            f(&mut guard);
        }
    }
}

async fn pause(ms: u64) {
    if ms > 0 {
        sleep(TimingSection::millis(ms)).await;
    }
}

/// Keeps the browser open for manual edits until the hold expires or the page closes.
async fn hold_for_manual_edit(page: &mut dyn ComposerPage, timing: &TimingSection) {
    let deadline = Instant::now() + timing.draft_hold();
    info!(
        seconds = timing.draft_hold_seconds,
        "holding the draft open for manual edits"
    );
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        if page.is_closed().await {
            info!("page closed by the operator");
            break;
        }
        let remaining = deadline.saturating_duration_since(now);
        sleep(timing.draft_poll().min(remaining).max(Duration::from_millis(1))).await;
    }
}

async fn write_error_log(path: &Path, err: &PublishError, trail: &[PublishState]) {
    let body = format!(
        "{}\n{err}\ntrail: {trail:?}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            warn!(path = %parent.display(), error = %err, "failed to create error log directory");
            return;
        }
    }
    if let Err(err) = tokio::fs::write(path, body).await {
        warn!(path = %path.display(), error = %err, "failed to write error log");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("composer_url", &self.config.platform.composer_url)
            .field("staging_root", &self.stager.root())
            .finish()
    }
}
