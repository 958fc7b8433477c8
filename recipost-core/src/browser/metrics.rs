use serde::{Deserialize, Serialize};

/// Counters collected while driving the composer page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMetrics {
    pub pages_opened: u64,
    pub selector_probes: u64,
    pub selector_hits: u64,
    pub selector_misses: u64,
    pub files_uploaded: u64,
    pub screenshots_captured: u64,
    pub screenshot_failures: u64,
    pub cookie_logins: u64,
    pub interactive_logins: u64,
}

impl PublishMetrics {
    pub fn record_page_open(&mut self) {
        self.pages_opened = self.pages_opened.saturating_add(1);
    }

    pub fn record_probe(&mut self) {
        self.selector_probes = self.selector_probes.saturating_add(1);
    }

    pub fn record_resolution(&mut self, found: bool) {
        if found {
            self.selector_hits = self.selector_hits.saturating_add(1);
        } else {
            self.selector_misses = self.selector_misses.saturating_add(1);
        }
    }

    pub fn record_upload(&mut self, count: usize) {
        self.files_uploaded = self.files_uploaded.saturating_add(count as u64);
    }

    pub fn record_screenshot(&mut self, success: bool) {
        if success {
            self.screenshots_captured = self.screenshots_captured.saturating_add(1);
        } else {
            self.screenshot_failures = self.screenshot_failures.saturating_add(1);
        }
    }

    pub fn record_login(&mut self, interactive: bool) {
        if interactive {
            self.interactive_logins = self.interactive_logins.saturating_add(1);
        } else {
            self.cookie_logins = self.cookie_logins.saturating_add(1);
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let resolved = self.selector_hits + self.selector_misses;
        if resolved == 0 {
            0.0
        } else {
            (self.selector_hits as f64 / resolved as f64) * 100.0
        }
    }
}
