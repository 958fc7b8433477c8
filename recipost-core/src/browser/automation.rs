use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChromiumSection;

use super::error::{BrowserError, BrowserResult};
use super::page::{BrowserFactory, ComposerPage, PublishBrowser};
use super::stealth::{StealthProfile, STEALTH_FLAGS};

/// Starts a visible, stealth-configured Chromium for one publish run.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<ChromiumSection>,
    stealth: Arc<StealthProfile>,
}

impl BrowserLauncher {
    pub fn new(config: ChromiumSection) -> Self {
        let stealth = Arc::new(StealthProfile::new(config.lang.as_deref()));
        Self {
            config: Arc::new(config),
            stealth,
        }
    }

    pub async fn launch(&self) -> BrowserResult<BrowserAutomation> {
        let chromium_config = self.chromium_config()?;
        let [width, height] = self.config.window_size;
        info!(
            headless = self.config.headless,
            width, height, "launching chromium"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler error");
                }
            }
        });

        Ok(BrowserAutomation {
            browser,
            handler_task: Some(handler_task),
            config: Arc::clone(&self.config),
            stealth: Arc::clone(&self.stealth),
            closed: false,
        })
    }

    /// Command-line switches passed to Chromium on top of the builder options.
    pub fn launch_args(&self) -> Vec<String> {
        let config = &self.config;
        let [width, height] = config.window_size;
        let mut args: Vec<String> = STEALTH_FLAGS.iter().map(|flag| flag.to_string()).collect();
        args.push(format!("--user-agent={}", config.user_agent));
        args.push(format!("--window-size={width},{height}"));
        if config.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        if let Some(lang) = &config.lang {
            args.push(format!("--lang={lang}"));
        }
        if let Some(accept) = &config.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        args.extend(config.extra_args.iter().cloned());
        args
    }

    fn chromium_config(&self) -> BrowserResult<ChromiumConfig> {
        let config = &self.config;
        let [width, height] = config.window_size;
        let mut builder = ChromiumConfig::builder()
            .viewport(ChromiumViewport {
                width,
                height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: width >= height,
                has_touch: false,
            })
            .args(self.launch_args());
        if let Some(executable) = &config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(seconds) = config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(seconds));
        }
        builder.build().map_err(BrowserError::Configuration)
    }
}

#[async_trait(?Send)]
impl BrowserFactory for BrowserLauncher {
    async fn open(&self) -> BrowserResult<Box<dyn PublishBrowser>> {
        Ok(Box::new(self.launch().await?))
    }
}

/// A running Chromium plus the task pumping its DevTools events.
#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    config: Arc<ChromiumSection>,
    stealth: Arc<StealthProfile>,
    closed: bool,
}

impl BrowserAutomation {
    pub async fn new_context(&self) -> BrowserResult<BrowserContext> {
        let page = self
            .browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        self.prepare_page(&page).await?;
        Ok(BrowserContext { page })
    }

    /// Closes Chromium and joins the handler task. Later calls are no-ops.
    pub async fn shutdown(&mut self) -> BrowserResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!("closing chromium");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "chromium did not close cleanly");
        }
        if let Some(handle) = self.handler_task.take() {
            handle.await?;
        }
        Ok(())
    }

    async fn prepare_page(&self, page: &Page) -> BrowserResult<()> {
        let user_agent = self.config.user_agent.clone();
        page.enable_stealth_mode_with_agent(&user_agent).await?;
        let mut params = SetUserAgentOverrideParams::builder().user_agent(user_agent);
        if let Some(accept) = &self.config.accept_language {
            params = params.accept_language(accept.clone());
        }
        page.set_user_agent(params.build().map_err(BrowserError::Configuration)?)
            .await?;
        self.stealth.apply(page).await
    }
}

#[async_trait(?Send)]
impl PublishBrowser for BrowserAutomation {
    async fn new_page(&mut self) -> BrowserResult<Box<dyn ComposerPage>> {
        Ok(Box::new(self.new_context().await?))
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.shutdown().await
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if !self.closed {
            warn!("chromium dropped without shutdown");
        }
    }
}

#[derive(Debug)]
pub struct BrowserContext {
    page: Page,
}

impl BrowserContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher() -> BrowserLauncher {
        BrowserLauncher::new(ChromiumSection {
            executable_path: Some("/usr/bin/chromium".into()),
            extra_args: vec!["--mute-audio".into()],
            ..ChromiumSection::default()
        })
    }

    #[test]
    fn chromium_config_builds_with_explicit_executable() {
        assert!(launcher().chromium_config().is_ok());
    }

    #[test]
    fn launch_args_carry_stealth_flags_and_locale() {
        let args = launcher().launch_args();
        assert!(args
            .iter()
            .any(|arg| arg == "--disable-blink-features=AutomationControlled"));
        assert!(args.iter().any(|arg| arg == "--lang=zh-CN"));
        assert!(args.iter().any(|arg| arg == "--window-size=1366,900"));
        assert_eq!(args.last().map(String::as_str), Some("--mute-audio"));
    }
}
