use std::path::{Path, PathBuf};

use futures::future::join_all;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::config::StagingSection;
use crate::content::origin_of;

use super::error::{StagingError, StagingResult};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";

/// Which browser request a download should look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn accept(self) -> &'static str {
        match self {
            MediaKind::Image => IMAGE_ACCEPT,
            MediaKind::Video => "*/*",
        }
    }

    pub fn fetch_dest(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// Extension for a staged image, taken from the last dotted segment of the URL path.
pub fn image_extension(raw: &str) -> String {
    let path = Url::parse(raw)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| raw.to_string());
    let Some((_, tail)) = path.rsplit_once('.') else {
        return "jpg".to_string();
    };
    let ext = tail
        .chars()
        .take(4)
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        ext
    } else {
        "jpg".to_string()
    }
}

pub fn staged_file_name(ext: &str) -> String {
    format!("{}.{ext}", Uuid::new_v4().simple())
}

/// Local file behind a `file://` URL or an absolute path.
pub fn local_source(raw: &str) -> Option<PathBuf> {
    if let Ok(parsed) = Url::parse(raw) {
        if parsed.scheme() == "file" {
            return parsed.to_file_path().ok();
        }
    }
    let path = Path::new(raw);
    path.is_absolute().then(|| path.to_path_buf())
}

#[derive(Debug, Clone)]
pub struct MediaDownloader {
    client: reqwest::Client,
    accept_language: String,
}

impl MediaDownloader {
    pub fn new(config: &StagingSection) -> StagingResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.download_timeout())
            .build()?;
        Ok(Self {
            client,
            accept_language: config.accept_language.clone(),
        })
    }

    /// Fetches every URL concurrently, one attempt each. Failed items are dropped
    /// and the survivors keep their input order.
    pub async fn fan_out(
        &self,
        urls: &[String],
        referer_base: Option<&str>,
        dir: &Path,
        limit: usize,
    ) -> Vec<PathBuf> {
        let tasks = urls.iter().take(limit).map(|url| async move {
            let dest = dir.join(staged_file_name(&image_extension(url)));
            match self.fetch(url, referer_base, &dest, MediaKind::Image).await {
                Ok(()) => Some(dest),
                Err(err) => {
                    warn!(url = %url, error = %err, "media download failed");
                    None
                }
            }
        });
        join_all(tasks).await.into_iter().flatten().collect()
    }

    pub async fn fetch(
        &self,
        url: &str,
        referer_base: Option<&str>,
        dest: &Path,
        kind: MediaKind,
    ) -> StagingResult<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StagingError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        if let Some(source_path) = local_source(url) {
            return copy_file(&source_path, dest).await;
        }

        let referer = referer_base
            .and_then(origin_of)
            .or_else(|| origin_of(url))
            .ok_or_else(|| StagingError::Download(format!("unsupported media url {url}")))?;
        let headers = self.headers(&referer, kind)?;
        debug!(url, referer = %referer, ?kind, "downloading media");
        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await?
            .error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(dest)
            .await
            .map_err(|source| StagingError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data)
                .await
                .map_err(|source| StagingError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
        }
        file.flush().await.map_err(|source| StagingError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    fn headers(&self, referer: &str, kind: MediaKind) -> StagingResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(kind.accept()));
        headers.insert(
            REFERER,
            HeaderValue::from_str(&format!("{referer}/"))
                .map_err(|err| StagingError::Download(err.to_string()))?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&self.accept_language)
                .map_err(|err| StagingError::Download(err.to_string()))?,
        );
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static(kind.fetch_dest()));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("no-cors"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("cross-site"));
        headers.insert("Sec-Ch-Ua-Mobile", HeaderValue::from_static("?0"));
        headers.insert(
            "Sec-Ch-Ua-Platform",
            HeaderValue::from_static("\"Windows\""),
        );
        Ok(headers)
    }
}

async fn copy_file(from: &Path, to: &Path) -> StagingResult<()> {
    fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|source| StagingError::Io {
            path: from.to_path_buf(),
            source,
        })
}
