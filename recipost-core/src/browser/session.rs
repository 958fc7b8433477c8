use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::{BrowserError, BrowserResult};

/// One browser cookie, stored with the field names Playwright uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl SessionCookie {
    /// Shape accepted by the DevTools `Network.setCookies` command.
    pub fn to_cdp_value(&self) -> Value {
        let mut value = serde_json::json!({
            "name": self.name,
            "value": self.value,
            "path": self.path,
            "httpOnly": self.http_only,
            "secure": self.secure,
        });
        if !self.domain.is_empty() {
            value["domain"] = Value::from(self.domain.clone());
        }
        if let Some(expires) = self.expires.filter(|expires| *expires > 0.0) {
            value["expires"] = Value::from(expires);
        }
        if let Some(same_site) = self.same_site.as_deref().and_then(normalize_same_site) {
            value["sameSite"] = Value::from(same_site);
        }
        value
    }
}

fn normalize_same_site(raw: &str) -> Option<&'static str> {
    match raw.to_ascii_lowercase().as_str() {
        "strict" => Some("Strict"),
        "lax" => Some("Lax"),
        "none" => Some("None"),
        _ => None,
    }
}

pub type Session = Vec<SessionCookie>;

/// Cookie files keyed by platform.
#[derive(Debug, Clone)]
pub struct SessionStore {
    default_path: PathBuf,
    default_key: String,
}

impl SessionStore {
    pub fn new(default_path: impl Into<PathBuf>, default_key: impl Into<String>) -> Self {
        Self {
            default_path: default_path.into(),
            default_key: default_key.into(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        if key == self.default_key {
            return self.default_path.clone();
        }
        let stem = self
            .default_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "session".to_string());
        let file_name = format!("{stem}.{key}.json");
        match self.default_path.parent() {
            Some(parent) => parent.join(file_name),
            None => PathBuf::from(file_name),
        }
    }

    /// Missing or unreadable files mean "no session".
    pub fn load(&self, key: &str) -> Option<Session> {
        let path = self.path_for(key);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no stored session");
                return None;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read session file");
                return None;
            }
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) if session.is_empty() => {
                debug!(path = %path.display(), "stored session is empty");
                None
            }
            Ok(session) => Some(session),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring corrupt session file");
                None
            }
        }
    }

    pub fn save(&self, key: &str, session: &[SessionCookie]) -> BrowserResult<()> {
        let path = self.path_for(key);
        write_session(&path, session)?;
        info!(path = %path.display(), cookies = session.len(), "session saved");
        Ok(())
    }
}

fn write_session(path: &Path, session: &[SessionCookie]) -> BrowserResult<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(session)
        .map_err(|err| BrowserError::Session(err.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}
