use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{PlatformSection, TimingSection};

use super::error::BrowserResult;
use super::metrics::PublishMetrics;
use super::page::ComposerPage;
use super::selector::{SelectorResolver, Target};
use super::session::{SessionCookie, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthState {
    NoSession,
    TryingCookieLogin,
    NeedsInteractiveLogin,
    WaitingForUser,
    Authenticated,
    Failed,
}

/// Logs into the creator platform, reusing a stored session when possible.
#[derive(Debug, Clone)]
pub struct Authenticator {
    platform: PlatformSection,
    timing: TimingSection,
    sessions: SessionStore,
    resolver: SelectorResolver,
    metrics: Arc<Mutex<PublishMetrics>>,
}

impl Authenticator {
    pub fn new(
        platform: PlatformSection,
        timing: TimingSection,
        sessions: SessionStore,
        resolver: SelectorResolver,
        metrics: Arc<Mutex<PublishMetrics>>,
    ) -> Self {
        Self {
            platform,
            timing,
            sessions,
            resolver,
            metrics,
        }
    }

    pub async fn authenticate(&self, page: &mut dyn ComposerPage) -> BrowserResult<bool> {
        let mut state = AuthState::NoSession;
        let key = self.platform.session_key.as_str();

        if let Some(session) = self.sessions.load(key) {
            transition(&mut state, AuthState::TryingCookieLogin);
            if self.try_cookie_login(page, &session).await {
                transition(&mut state, AuthState::Authenticated);
                self.record_login(false);
                info!(cookies = session.len(), "logged in with stored session");
                return Ok(true);
            }
            info!("stored session rejected, falling back to interactive login");
        }

        transition(&mut state, AuthState::NeedsInteractiveLogin);
        page.goto(&self.platform.login_url).await?;
        transition(&mut state, AuthState::WaitingForUser);
        info!(
            timeout_seconds = self.timing.login_timeout_seconds,
            "waiting for the operator to log in (scan the QR code in the browser window)"
        );

        let logged_in = self.wait_for_login(page).await
            || self.resolver.resolve(Target::LoggedInMarker, page).await.is_some();
        if !logged_in {
            transition(&mut state, AuthState::Failed);
            warn!("login timed out");
            return Ok(false);
        }

        transition(&mut state, AuthState::Authenticated);
        self.record_login(true);
        match page.cookies().await {
            Ok(cookies) => {
                if let Err(err) = self.sessions.save(key, &cookies) {
                    warn!(error = %err, "failed to persist session");
                }
            }
            Err(err) => warn!(error = %err, "failed to read cookies after login"),
        }
        Ok(true)
    }

    async fn try_cookie_login(
        &self,
        page: &mut dyn ComposerPage,
        session: &[SessionCookie],
    ) -> bool {
        if let Err(err) = page.set_cookies(session).await {
            warn!(error = %err, "failed to inject stored session");
            return false;
        }
        if let Err(err) = page.goto(&self.platform.home_url).await {
            warn!(error = %err, "failed to open creator home");
            return false;
        }
        sleep(TimingSection::millis(self.timing.cookie_check_ms)).await;
        let url = page.current_url().await.unwrap_or_default();
        if url.contains(&self.platform.home_marker) {
            return true;
        }
        self.resolver
            .resolve(Target::LoggedInMarker, page)
            .await
            .is_some()
    }

    async fn wait_for_login(&self, page: &mut dyn ComposerPage) -> bool {
        let deadline = Instant::now() + self.timing.login_timeout();
        loop {
            match page.current_url().await {
                Ok(url) if self.is_post_login(&url) => {
                    info!(url = %url, "login detected");
                    return true;
                }
                Ok(_) => {}
                Err(err) => debug!(error = %err, "failed to read url while waiting for login"),
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(self.timing.login_poll()).await;
        }
    }

    fn is_post_login(&self, url: &str) -> bool {
        self.platform
            .post_login_patterns
            .iter()
            .map(|pattern| pattern.trim())
            .filter(|pattern| !pattern.is_empty())
            .any(|pattern| url.contains(pattern))
    }

    fn record_login(&self, interactive: bool) {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.record_login(interactive);
        }
    }
}

fn transition(state: &mut AuthState, next: AuthState) {
    debug!(from = ?*state, to = ?next, "auth state");
    *state = next;
}
