use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub type ContentResult<T> = std::result::Result<T, ContentError>;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to read content {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse content {path}: {source}")]
    Parse {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("content has neither images nor a video")]
    NoMedia,
}

/// A recipe post ready to be published.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub video: Option<String>,
    #[serde(default)]
    pub cover_images: Vec<String>,
    #[serde(default)]
    pub save_as_draft: bool,
    /// Page the recipe was extracted from.
    #[serde(default)]
    pub source_url: Option<String>,
}

impl Content {
    pub fn load<P: AsRef<Path>>(path: P) -> ContentResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ContentError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        serde_json::from_str(&raw).map_err(|source| ContentError::Parse {
            source,
            path: path.to_path_buf(),
        })
    }

    pub fn has_video(&self) -> bool {
        self.video
            .as_deref()
            .map(|video| !video.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn has_media(&self) -> bool {
        self.has_video() || self.images.iter().any(|image| !image.trim().is_empty())
    }

    pub fn validate(&self) -> ContentResult<()> {
        if self.has_media() {
            Ok(())
        } else {
            Err(ContentError::NoMedia)
        }
    }

    pub fn truncated_title(&self, limit: usize) -> String {
        truncate_title(&self.title, limit)
    }

    /// Origin used as the `Referer` for media downloads, if the source page is known.
    pub fn referer_base(&self) -> Option<String> {
        self.source_url.as_deref().and_then(origin_of)
    }

    /// Markdown draft shown to the operator before anything is published.
    pub fn preview_markdown(&self, max_images: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Draft preview\n");
        let _ = writeln!(out, "### Title\n{}\n", self.title);
        let _ = writeln!(out, "### Body\n{}\n", self.body);
        let _ = writeln!(out, "### Video");
        match self.video.as_deref().filter(|video| !video.trim().is_empty()) {
            Some(video) => {
                let _ = writeln!(out, "{video}\n");
            }
            None => {
                let _ = writeln!(out, "no video found\n");
            }
        }
        let _ = writeln!(out, "### Images (first {max_images})");
        for image in self.images.iter().take(max_images) {
            let _ = writeln!(out, "{image}");
        }
        out
    }
}

/// Keeps the first `limit` characters. Titles are never rejected for length.
pub fn truncate_title(title: &str, limit: usize) -> String {
    title.chars().take(limit).collect()
}

pub(crate) fn origin_of(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    match parsed.scheme() {
        "http" | "https" => Some(parsed.origin().ascii_serialization()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_titles_are_unchanged() {
        assert_eq!(truncate_title("番茄炒蛋", 18), "番茄炒蛋");
        let exact = "一二三四五六七八九十一二三四五六七八";
        assert_eq!(exact.chars().count(), 18);
        assert_eq!(truncate_title(exact, 18), exact);
    }

    #[test]
    fn long_titles_keep_first_characters() {
        let title = "超级简单的家常红烧肉做法，肥而不腻入口即化的秘诀";
        let truncated = truncate_title(title, 18);
        assert_eq!(truncated.chars().count(), 18);
        assert!(title.starts_with(&truncated));
    }

    #[test]
    fn parses_camel_case_payload() {
        let content: Content = serde_json::from_str(
            r#"{
                "title": "Lemon tart",
                "body": "Zest, bake, rest.",
                "images": ["https://cdn.example.com/a.jpg"],
                "coverImages": [],
                "saveAsDraft": true,
                "sourceUrl": "https://recipes.example.com/tart?ref=1"
            }"#,
        )
        .unwrap();
        assert!(content.save_as_draft);
        assert!(!content.has_video());
        assert_eq!(
            content.referer_base().as_deref(),
            Some("https://recipes.example.com")
        );
    }

    #[test]
    fn content_without_media_is_rejected() {
        let content = Content {
            title: "Empty".into(),
            images: vec!["  ".into()],
            video: Some(String::new()),
            ..Content::default()
        };
        assert!(matches!(content.validate(), Err(ContentError::NoMedia)));
    }

    #[test]
    fn preview_lists_at_most_the_image_cap() {
        let content = Content {
            title: "Dumplings".into(),
            body: "Fold and steam.".into(),
            images: (0..12).map(|i| format!("https://img/{i}.jpg")).collect(),
            ..Content::default()
        };
        let preview = content.preview_markdown(9);
        assert!(preview.contains("no video found"));
        assert!(preview.contains("https://img/8.jpg"));
        assert!(!preview.contains("https://img/9.jpg"));
    }
}
