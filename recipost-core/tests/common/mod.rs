#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use recipost_core::browser::{
    BrowserError, BrowserFactory, BrowserResult, ComposerPage, Matcher, PublishBrowser,
    SessionCookie, Target,
};
use recipost_core::config::TimingSection;
use recipost_core::staging::{CommandExecutor, OperatorPrompt};
use recipost_core::{Content, MediaStager, PublisherConfig};

/// What the fake composer page does in response to the publisher.
#[derive(Debug, Clone, Default)]
pub struct PageBehavior {
    /// Matchers that find exactly one node.
    pub present: Vec<Matcher>,
    /// URL reported after navigating to the key.
    pub redirects: HashMap<String, String>,
    pub panic_on_insert: bool,
    /// `is_closed` reports true from this call onwards (1-based).
    pub closed_after: Option<usize>,
    pub cookies: Vec<SessionCookie>,
}

impl PageBehavior {
    /// A composer where the first candidate of every target matches.
    pub fn composer() -> Self {
        let present = Target::ALL
            .iter()
            .filter_map(|target| target.matchers().first().copied())
            .collect();
        Self {
            present,
            cookies: vec![cookie("web_session", "fresh")],
            ..Self::default()
        }
    }

    pub fn without(mut self, target: Target) -> Self {
        let matchers = target.matchers();
        self.present.retain(|matcher| !matchers.contains(matcher));
        self
    }

    pub fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }
}

/// Everything the fake page saw.
#[derive(Debug, Default)]
pub struct PageRecorder {
    pub visited: Vec<String>,
    pub probes: Vec<(String, Matcher)>,
    pub clicks: Vec<String>,
    pub script_clicks: Vec<String>,
    pub fills: Vec<(String, String)>,
    pub typed: Vec<(String, String)>,
    pub uploads: Vec<(String, Vec<PathBuf>)>,
    pub cookies_set: Vec<SessionCookie>,
    pub screenshots: usize,
    pub closed_checks: usize,
}

impl PageRecorder {
    pub fn probes_for(&self, target: Target) -> Vec<Matcher> {
        self.probes
            .iter()
            .filter(|(marker, _)| marker == target.key())
            .map(|(_, matcher)| *matcher)
            .collect()
    }
}

pub struct MockPage {
    behavior: PageBehavior,
    recorder: Arc<Mutex<PageRecorder>>,
    url: String,
}

impl MockPage {
    pub fn new(behavior: PageBehavior) -> (Self, Arc<Mutex<PageRecorder>>) {
        let recorder = Arc::new(Mutex::new(PageRecorder::default()));
        let page = Self {
            behavior,
            recorder: Arc::clone(&recorder),
            url: "about:blank".to_string(),
        };
        (page, recorder)
    }

    fn record<F>(&self, f: F)
    where
        F: FnOnce(&mut PageRecorder),
    {
        let mut guard = self.recorder.lock().unwrap();
        f(&mut guard);
    }
}

#[async_trait(?Send)]
impl ComposerPage for MockPage {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        self.record(|rec| rec.visited.push(url.to_string()));
        self.url = self
            .behavior
            .redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());
        Ok(())
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        Ok(self.url.clone())
    }

    async fn probe(&mut self, matcher: &Matcher, marker: &str) -> BrowserResult<usize> {
        self.record(|rec| rec.probes.push((marker.to_string(), *matcher)));
        Ok(usize::from(self.behavior.present.contains(matcher)))
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<()> {
        self.record(|rec| rec.clicks.push(selector.to_string()));
        Ok(())
    }

    async fn script_click(&mut self, selector: &str) -> BrowserResult<()> {
        self.record(|rec| rec.script_clicks.push(selector.to_string()));
        Ok(())
    }

    async fn fill(&mut self, selector: &str, text: &str) -> BrowserResult<()> {
        self.record(|rec| rec.fills.push((selector.to_string(), text.to_string())));
        Ok(())
    }

    async fn insert_text(&mut self, selector: &str, text: &str) -> BrowserResult<()> {
        if self.behavior.panic_on_insert {
            panic!("editor crashed");
        }
        self.record(|rec| rec.typed.push((selector.to_string(), text.to_string())));
        Ok(())
    }

    async fn set_input_files(&mut self, selector: &str, files: &[PathBuf]) -> BrowserResult<()> {
        if let Some(missing) = files.iter().find(|file| !file.exists()) {
            return Err(BrowserError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", missing.display()),
            )));
        }
        self.record(|rec| rec.uploads.push((selector.to_string(), files.to_vec())));
        Ok(())
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        self.record(|rec| rec.screenshots += 1);
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn cookies(&mut self) -> BrowserResult<Vec<SessionCookie>> {
        Ok(self.behavior.cookies.clone())
    }

    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> BrowserResult<()> {
        self.record(|rec| rec.cookies_set.extend_from_slice(cookies));
        Ok(())
    }

    async fn is_closed(&mut self) -> bool {
        let mut guard = self.recorder.lock().unwrap();
        guard.closed_checks += 1;
        self.behavior
            .closed_after
            .map(|after| guard.closed_checks >= after)
            .unwrap_or(false)
    }
}

pub struct MockBrowser {
    behavior: PageBehavior,
    recorder: Arc<Mutex<PageRecorder>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait(?Send)]
impl PublishBrowser for MockBrowser {
    async fn new_page(&mut self) -> BrowserResult<Box<dyn ComposerPage>> {
        Ok(Box::new(MockPage {
            behavior: self.behavior.clone(),
            recorder: Arc::clone(&self.recorder),
            url: "about:blank".to_string(),
        }))
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out mock browsers that share one recorder.
pub struct MockFactory {
    behavior: PageBehavior,
    pub recorder: Arc<Mutex<PageRecorder>>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl MockFactory {
    pub fn new(behavior: PageBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            recorder: Arc::new(Mutex::new(PageRecorder::default())),
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait(?Send)]
impl BrowserFactory for MockFactory {
    async fn open(&self) -> BrowserResult<Box<dyn PublishBrowser>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockBrowser {
            behavior: self.behavior.clone(),
            recorder: Arc::clone(&self.recorder),
            closes: Arc::clone(&self.closes),
        }))
    }
}

/// One canned downloader run.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub code: i32,
    pub stderr: String,
    /// Write the `-o` destination before returning.
    pub writes_output: bool,
}

impl ScriptedRun {
    pub fn success() -> Self {
        Self {
            code: 0,
            stderr: String::new(),
            writes_output: true,
        }
    }

    pub fn failure(stderr: &str) -> Self {
        Self {
            code: 1,
            stderr: stderr.to_string(),
            writes_output: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    runs: Mutex<VecDeque<ScriptedRun>>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new(runs: impl IntoIterator<Item = ScriptedRun>) -> Arc<Self> {
        Arc::new(Self {
            runs: Mutex::new(runs.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, _program: &Path, args: &[String]) -> std::io::Result<Output> {
        self.calls.lock().unwrap().push(args.to_vec());
        let run = self
            .runs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedRun::failure("ERROR: no more scripted runs"));
        if run.writes_output {
            let dest = args
                .iter()
                .position(|arg| arg == "-o")
                .and_then(|index| args.get(index + 1))
                .expect("downloader called without -o");
            std::fs::write(dest, b"fake mp4")?;
        }
        Ok(Output {
            status: ExitStatus::from_raw(run.code << 8),
            stdout: Vec::new(),
            stderr: run.stderr.into_bytes(),
        })
    }
}

pub fn cookie(name: &str, value: &str) -> SessionCookie {
    SessionCookie {
        name: name.to_string(),
        value: value.to_string(),
        domain: ".xiaohongshu.com".to_string(),
        path: "/".to_string(),
        expires: None,
        http_only: true,
        secure: true,
        same_site: Some("Lax".to_string()),
    }
}

/// Config rooted at `base` with every wait set to zero.
pub fn test_config(base: &Path) -> PublisherConfig {
    let mut config = PublisherConfig::default();
    config.paths.base_dir = base.to_string_lossy().to_string();
    config.timing = TimingSection::instant();
    config.staging.placeholder_image = None;
    config
}

/// Writes `count` small images under `base/source` and returns them as file URLs.
pub fn source_images(base: &Path, count: usize) -> Vec<String> {
    let dir = base.join("source");
    std::fs::create_dir_all(&dir).unwrap();
    (0..count)
        .map(|index| {
            let path = dir.join(format!("step_{index}.jpg"));
            std::fs::write(&path, format!("image {index}")).unwrap();
            format!("file://{}", path.display())
        })
        .collect()
}

pub fn image_content(base: &Path, draft: bool) -> Content {
    Content {
        title: "Lemon Garlic Roast Chicken".to_string(),
        body: "Brine overnight, roast at 220C for 45 minutes.\n#roastchicken".to_string(),
        images: source_images(base, 2),
        save_as_draft: draft,
        ..Content::default()
    }
}

pub fn stager(config: &PublisherConfig, prompt: Arc<dyn OperatorPrompt>) -> MediaStager {
    MediaStager::new(config, prompt).unwrap()
}
