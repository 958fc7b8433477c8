use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::BrowserResult;
use super::metrics::PublishMetrics;
use super::page::ComposerPage;

pub const MARKER_ATTRIBUTE: &str = "data-recipost-target";

/// How a candidate locates nodes on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    Css(&'static str),
    /// Nodes under `scope` whose trimmed text equals `text`.
    ExactText {
        scope: &'static str,
        text: &'static str,
    },
    /// Nodes under `scope` whose text contains `text`.
    HasText {
        scope: &'static str,
        text: &'static str,
    },
    /// The `index`th node (zero based) matching `selector`.
    Nth {
        selector: &'static str,
        index: usize,
    },
}

impl Matcher {
    /// Script that tags every matched node with `marker` and returns the match count.
    ///
    /// Stale tags from earlier probes of the same marker are cleared first. Text
    /// matchers keep only the innermost matching nodes.
    pub fn probe_script(&self, marker: &str) -> String {
        let collect = match self {
            Matcher::Css(selector) => format!(
                "Array.from(document.querySelectorAll({}))",
                js_string(selector)
            ),
            Matcher::ExactText { scope, text } => format!(
                "innermost(Array.from(document.querySelectorAll({})).filter((el) => (el.textContent || '').trim() === {}))",
                js_string(scope),
                js_string(text)
            ),
            Matcher::HasText { scope, text } => format!(
                "innermost(Array.from(document.querySelectorAll({})).filter((el) => (el.innerText || el.textContent || '').includes({})))",
                js_string(scope),
                js_string(text)
            ),
            Matcher::Nth { selector, index } => format!(
                "Array.from(document.querySelectorAll({})).slice({index}, {index} + 1)",
                js_string(selector)
            ),
        };
        format!(
            r#"(() => {{
    const attr = {attr};
    const marker = {marker};
    const innermost = (nodes) => nodes.filter((el) => !nodes.some((other) => other !== el && el.contains(other)));
    for (const el of Array.from(document.querySelectorAll('[' + attr + ']'))) {{
        if (el.getAttribute(attr) === marker) {{
            el.removeAttribute(attr);
        }}
    }}
    const nodes = {collect};
    for (const el of nodes) {{
        el.setAttribute(attr, marker);
    }}
    return nodes.length;
}})()"#,
            attr = js_string(MARKER_ATTRIBUTE),
            marker = js_string(marker),
        )
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Css(selector) => write!(f, "css({selector})"),
            Matcher::ExactText { scope, text } => write!(f, "{scope} >> text=\"{text}\""),
            Matcher::HasText { scope, text } => write!(f, "{scope}:has-text(\"{text}\")"),
            Matcher::Nth { selector, index } => write!(f, "{selector} >> nth={index}"),
        }
    }
}

pub(crate) fn js_string(raw: &str) -> String {
    Value::from(raw).to_string()
}

/// How a resolved element should be activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Click,
    /// DOM `el.click()`, ignoring visibility and overlays.
    ScriptClick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    ImageTab,
    VideoTab,
    FileInput,
    TitleField,
    ContentEditor,
    PublishButton,
    DraftButton,
    CoverInput,
    LoggedInMarker,
}

impl Target {
    pub const ALL: [Target; 9] = [
        Target::ImageTab,
        Target::VideoTab,
        Target::FileInput,
        Target::TitleField,
        Target::ContentEditor,
        Target::PublishButton,
        Target::DraftButton,
        Target::CoverInput,
        Target::LoggedInMarker,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Target::ImageTab => "image-tab",
            Target::VideoTab => "video-tab",
            Target::FileInput => "file-input",
            Target::TitleField => "title-field",
            Target::ContentEditor => "content-editor",
            Target::PublishButton => "publish-button",
            Target::DraftButton => "draft-button",
            Target::CoverInput => "cover-input",
            Target::LoggedInMarker => "logged-in-marker",
        }
    }

    pub fn interaction(self) -> Interaction {
        match self {
            Target::ImageTab | Target::VideoTab => Interaction::ScriptClick,
            _ => Interaction::Click,
        }
    }

    pub fn matchers(self) -> &'static [Matcher] {
        SELECTOR_TABLE
            .iter()
            .find(|(target, _)| *target == self)
            .map(|(_, matchers)| *matchers)
            .unwrap_or(&[])
    }

    pub fn candidates(self) -> Vec<SelectorCandidate> {
        self.matchers()
            .iter()
            .enumerate()
            .map(|(order, matcher)| SelectorCandidate {
                target: self,
                matcher: *matcher,
                order,
            })
            .collect()
    }

    /// Stable CSS selector for nodes tagged by a successful probe.
    pub fn marker_selector(self) -> String {
        format!("[{MARKER_ATTRIBUTE}=\"{}\"]", self.key())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorCandidate {
    pub target: Target,
    pub matcher: Matcher,
    pub order: usize,
}

/// Candidates per target, most specific first.
pub static SELECTOR_TABLE: &[(Target, &[Matcher])] = &[
    (
        Target::ImageTab,
        &[
            Matcher::ExactText {
                scope: "div.tab",
                text: "上传图文",
            },
            Matcher::ExactText {
                scope: "*",
                text: "上传图文",
            },
        ],
    ),
    (
        Target::VideoTab,
        &[
            Matcher::ExactText {
                scope: "div.tab",
                text: "上传视频",
            },
            Matcher::ExactText {
                scope: "*",
                text: "上传视频",
            },
        ],
    ),
    (
        Target::FileInput,
        &[
            Matcher::Css("input.upload-input[type=\"file\"]"),
            Matcher::Css("input[type=\"file\"]"),
        ],
    ),
    (
        Target::TitleField,
        &[
            Matcher::Css("input.c-input_inner"),
            Matcher::Css("input[placeholder*=\"标题\"]"),
            Matcher::Css(".title-input input"),
        ],
    ),
    (
        Target::ContentEditor,
        &[
            Matcher::Css("#post-textarea"),
            Matcher::Css(".editor-content"),
            Matcher::Css("[contenteditable=\"true\"]"),
        ],
    ),
    (
        Target::PublishButton,
        &[
            Matcher::Css("button.publishBtn"),
            Matcher::HasText {
                scope: "button",
                text: "发布",
            },
        ],
    ),
    (
        Target::DraftButton,
        &[
            Matcher::HasText {
                scope: "button",
                text: "暂存离开",
            },
            Matcher::HasText {
                scope: "button",
                text: "存草稿",
            },
            Matcher::HasText {
                scope: "button",
                text: "保存草稿",
            },
        ],
    ),
    (
        Target::CoverInput,
        &[
            Matcher::Css("input[type=\"file\"][accept*=\"image\"]"),
            Matcher::Css(".cover-upload input[type=\"file\"]"),
            Matcher::Nth {
                selector: "input[type=\"file\"]",
                index: 1,
            },
        ],
    ),
    (
        Target::LoggedInMarker,
        &[
            Matcher::HasText {
                scope: "*",
                text: "数据总览",
            },
            Matcher::HasText {
                scope: "*",
                text: "发布笔记",
            },
        ],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    pub target: Target,
    pub selector: String,
    pub order: usize,
    pub matches: usize,
}

impl ResolvedElement {
    pub async fn activate(&self, page: &mut dyn ComposerPage) -> BrowserResult<()> {
        match self.target.interaction() {
            Interaction::Click => page.click(&self.selector).await,
            Interaction::ScriptClick => page.script_click(&self.selector).await,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectorResolver {
    metrics: Arc<Mutex<PublishMetrics>>,
}

impl SelectorResolver {
    pub fn new(metrics: Arc<Mutex<PublishMetrics>>) -> Self {
        Self { metrics }
    }

    /// First candidate of `target` with at least one match, probed in table order.
    pub async fn resolve(
        &self,
        target: Target,
        page: &mut dyn ComposerPage,
    ) -> Option<ResolvedElement> {
        for candidate in target.candidates() {
            self.with_metrics(PublishMetrics::record_probe);
            let matches = match page.probe(&candidate.matcher, target.key()).await {
                Ok(count) => count,
                Err(err) => {
                    debug!(target = %target, matcher = %candidate.matcher, error = %err, "selector probe failed");
                    0
                }
            };
            if matches > 0 {
                self.with_metrics(|metrics| metrics.record_resolution(true));
                info!(
                    target = %target,
                    matcher = %candidate.matcher,
                    order = candidate.order,
                    matches,
                    "selector resolved"
                );
                return Some(ResolvedElement {
                    target,
                    selector: target.marker_selector(),
                    order: candidate.order,
                    matches,
                });
            }
        }
        self.with_metrics(|metrics| metrics.record_resolution(false));
        warn!(target = %target, "no selector candidate matched");
        None
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
