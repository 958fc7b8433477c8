use std::path::PathBuf;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::{
    GetDocumentParams, QuerySelectorParams, SetFileInputFilesParams,
};
use chromiumoxide::cdp::browser_protocol::input::InsertTextParams;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::ScreenshotParams;
use tracing::debug;

use super::automation::BrowserContext;
use super::error::{BrowserError, BrowserResult};
use super::selector::{js_string, Matcher};
use super::session::SessionCookie;

/// The page operations the publisher needs.
#[async_trait(?Send)]
pub trait ComposerPage {
    async fn goto(&mut self, url: &str) -> BrowserResult<()>;
    async fn current_url(&mut self) -> BrowserResult<String>;
    /// Tags the nodes found by `matcher` with `marker` and returns how many there are.
    async fn probe(&mut self, matcher: &Matcher, marker: &str) -> BrowserResult<usize>;
    async fn click(&mut self, selector: &str) -> BrowserResult<()>;
    async fn script_click(&mut self, selector: &str) -> BrowserResult<()>;
    async fn fill(&mut self, selector: &str, text: &str) -> BrowserResult<()>;
    /// Focuses the element and types `text` as keyboard input.
    async fn insert_text(&mut self, selector: &str, text: &str) -> BrowserResult<()>;
    async fn set_input_files(&mut self, selector: &str, files: &[PathBuf]) -> BrowserResult<()>;
    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>>;
    async fn cookies(&mut self) -> BrowserResult<Vec<SessionCookie>>;
    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> BrowserResult<()>;
    async fn is_closed(&mut self) -> bool;
}

#[async_trait(?Send)]
pub trait PublishBrowser {
    async fn new_page(&mut self) -> BrowserResult<Box<dyn ComposerPage>>;
    async fn close(&mut self) -> BrowserResult<()>;
}

#[async_trait(?Send)]
pub trait BrowserFactory: Send + Sync {
    async fn open(&self) -> BrowserResult<Box<dyn PublishBrowser>>;
}

impl BrowserContext {
    async fn eval_bool(&self, script: String) -> BrowserResult<bool> {
        let value = self
            .page()
            .evaluate(script.as_str())
            .await?
            .into_value::<bool>()?;
        Ok(value)
    }
}

#[async_trait(?Send)]
impl ComposerPage for BrowserContext {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        BrowserContext::goto(self, url).await
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        Ok(self.page().url().await?.unwrap_or_default())
    }

    async fn probe(&mut self, matcher: &Matcher, marker: &str) -> BrowserResult<usize> {
        let script = matcher.probe_script(marker);
        let count = self
            .page()
            .evaluate(script.as_str())
            .await?
            .into_value::<usize>()?;
        Ok(count)
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<()> {
        self.page().find_element(selector).await?.click().await?;
        Ok(())
    }

    async fn script_click(&mut self, selector: &str) -> BrowserResult<()> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) {{ return false; }} el.click(); return true; }})()",
            js_string(selector)
        );
        if self.eval_bool(script).await? {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }

    async fn fill(&mut self, selector: &str, text: &str) -> BrowserResult<()> {
        let script = format!(
            r#"(() => {{
    const el = document.querySelector({selector});
    if (!el) {{ return false; }}
    el.focus();
    const proto = el instanceof HTMLTextAreaElement
        ? HTMLTextAreaElement.prototype
        : HTMLInputElement.prototype;
    const setter = Object.getOwnPropertyDescriptor(proto, 'value');
    if (el.isContentEditable) {{
        el.textContent = {text};
    }} else if (setter && setter.set) {{
        setter.set.call(el, {text});
    }} else {{
        el.value = {text};
    }}
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return true;
}})()"#,
            selector = js_string(selector),
            text = js_string(text),
        );
        if self.eval_bool(script).await? {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }

    async fn insert_text(&mut self, selector: &str, text: &str) -> BrowserResult<()> {
        let focus = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) {{ return false; }} el.focus(); return true; }})()",
            js_string(selector)
        );
        if !self.eval_bool(focus).await? {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.page().execute(InsertTextParams::new(text)).await?;
        Ok(())
    }

    async fn set_input_files(&mut self, selector: &str, files: &[PathBuf]) -> BrowserResult<()> {
        let doc = self
            .page()
            .execute(GetDocumentParams::builder().depth(0).build())
            .await?;
        let root_node_id = doc.result.root.node_id;
        let query = self
            .page()
            .execute(QuerySelectorParams::new(root_node_id, selector))
            .await?;
        let node_id = query.result.node_id;
        if *node_id.inner() <= 0 {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        let paths = files
            .iter()
            .map(|path| {
                std::fs::canonicalize(path)
                    .unwrap_or_else(|_| path.clone())
                    .to_string_lossy()
                    .to_string()
            })
            .collect::<Vec<_>>();
        debug!(selector, files = paths.len(), "setting input files");
        let mut params = SetFileInputFilesParams::new(paths);
        params.node_id = Some(node_id);
        self.page().execute(params).await?;
        Ok(())
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        let bytes = self
            .page()
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await?;
        Ok(bytes)
    }

    async fn cookies(&mut self) -> BrowserResult<Vec<SessionCookie>> {
        let cookies = self.page().get_cookies().await?;
        cookies
            .into_iter()
            .map(|cookie| -> BrowserResult<SessionCookie> {
                let value = serde_json::to_value(cookie)?;
                let mut session_cookie: SessionCookie = serde_json::from_value(value)?;
                if session_cookie.expires.map(|expires| expires <= 0.0).unwrap_or(false) {
                    session_cookie.expires = Some(-1.0);
                }
                Ok(session_cookie)
            })
            .collect()
    }

    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> BrowserResult<()> {
        let params = cookies
            .iter()
            .map(|cookie| serde_json::from_value::<CookieParam>(cookie.to_cdp_value()))
            .collect::<Result<Vec<_>, _>>()?;
        self.page().set_cookies(params).await?;
        Ok(())
    }

    async fn is_closed(&mut self) -> bool {
        self.page().evaluate("1").await.is_err()
    }
}
