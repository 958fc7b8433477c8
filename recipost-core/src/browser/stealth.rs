use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;

use super::error::{BrowserError, BrowserResult};

/// Launch flags that keep Chromium from advertising automation.
pub const STEALTH_FLAGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-extensions",
    "--disable-component-extensions-with-background-pages",
    "--disable-default-apps",
    "--mute-audio",
    "--no-default-browser-check",
    "--no-first-run",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-client-side-phishing-detection",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-experiments",
    "--safebrowsing-disable-auto-update",
    "--password-store=basic",
    "--use-mock-keychain",
];

#[derive(Debug, Clone)]
pub struct StealthProfile {
    languages: Vec<String>,
}

impl StealthProfile {
    pub fn new(lang: Option<&str>) -> Self {
        let mut languages = Vec::new();
        if let Some(lang) = lang.filter(|lang| !lang.is_empty()) {
            languages.push(lang.to_string());
            if let Some((base, _)) = lang.split_once('-') {
                languages.push(base.to_string());
            }
        }
        if !languages.iter().any(|lang| lang.starts_with("en")) {
            languages.push("en-US".to_string());
            languages.push("en".to_string());
        }
        Self { languages }
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// Init script run before any page script on every navigation.
    pub fn init_script(&self) -> String {
        let languages = serde_json::Value::from(self.languages.clone()).to_string();
        format!(
            r#"
            (() => {{
                Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
                Object.defineProperty(navigator, 'languages', {{ get: () => {languages} }});
                Object.defineProperty(navigator, 'language', {{ get: () => {languages}[0] }});
                const fakePlugins = [
                    {{ name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' }},
                    {{ name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' }},
                    {{ name: 'Native Client', filename: 'internal-nacl-plugin' }},
                ];
                Object.defineProperty(navigator, 'plugins', {{ get: () => fakePlugins }});
                window.chrome = window.chrome || {{ runtime: {{}} }};
                const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
                if (originalQuery) {{
                    window.navigator.permissions.query = (parameters) =>
                        parameters && parameters.name === 'notifications'
                            ? Promise.resolve({{ state: Notification.permission }})
                            : originalQuery(parameters);
                }}
            }})();
            "#
        )
    }

    pub async fn apply(&self, page: &Page) -> BrowserResult<()> {
        page.evaluate_on_new_document(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(self.init_script())
                .build()
                .map_err(BrowserError::Configuration)?,
        )
        .await?;
        Ok(())
    }
}
