use std::fs::{self, OpenOptions};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use recipost_core::staging::{
    AnswerFilePrompt, ConsolePrompt, OperatorPrompt, CONTINUE_MARKER, SKIP_MARKER,
};
use recipost_core::{
    load_publisher_config, Content, PublishResult, Publisher, PublisherConfig, RunLedger,
    RunRecord,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const CONFIG_ENV: &str = "RECIPOST_CONFIG";
pub const DEFAULT_CONFIG: &str = "configs/publisher.toml";

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] recipost_core::ConfigError),
    #[error("content error: {0}")]
    Content(#[from] recipost_core::ContentError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger error: {0}")]
    Ledger(#[from] recipost_core::LedgerError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("publisher setup failed: {0}")]
    Publisher(#[from] recipost_core::PublishError),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish recipe posts to Xiaohongshu", long_about = None)]
pub struct Cli {
    /// Path to publisher.toml (falls back to $RECIPOST_CONFIG, then configs/publisher.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
    /// Debug logging (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish a post in the background
    Publish(ContentArgs),
    /// Save a post as a draft in the background
    Draft(ContentArgs),
    /// Show the post that would be published, without opening a browser
    Preview(ContentArgs),
    /// Run a publish in the foreground
    Run(RunArgs),
    /// List recorded publish runs
    History(HistoryArgs),
}

#[derive(Args, Debug)]
pub struct ContentArgs {
    /// Content JSON file
    #[arg(long)]
    pub content: PathBuf,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Content JSON file
    #[arg(long)]
    pub content: PathBuf,
    /// Save as draft regardless of the content file
    #[arg(long, default_value_t = false)]
    pub draft: bool,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Maximum number of runs listed
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();
    let context = AppContext::new(&config_path)?;

    match &cli.command {
        Commands::Publish(args) => {
            let ack = context.launch_detached(&args.content, false)?;
            render(&ack, cli.format)?;
        }
        Commands::Draft(args) => {
            let ack = context.launch_detached(&args.content, true)?;
            render(&ack, cli.format)?;
        }
        Commands::Preview(args) => {
            let preview = context.preview(&args.content)?;
            render(&preview, cli.format)?;
        }
        Commands::Run(args) => {
            let report = context.run_foreground(&args.content, args.draft)?;
            render(&report, cli.format)?;
        }
        Commands::History(args) => {
            let history = context.history(args.limit)?;
            render(&history, cli.format)?;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: PublisherConfig,
    config_path: PathBuf,
}

impl AppContext {
    fn new(config_path: &Path) -> Result<Self> {
        let config = load_publisher_config(config_path)?;
        Ok(Self {
            config,
            config_path: config_path.to_path_buf(),
        })
    }

    fn launch_detached(&self, content_path: &Path, draft: bool) -> Result<LaunchAck> {
        let content = Content::load(content_path)?;
        content.validate()?;
        let content_path = fs::canonicalize(content_path)?;
        let config_path = fs::canonicalize(&self.config_path)?;

        let run_log = self.config.run_log();
        if let Some(parent) = run_log.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&run_log)?;
        let stderr = stdout.try_clone()?;

        let mut command = Command::new(std::env::current_exe()?);
        command
            .arg("--config")
            .arg(&config_path)
            .arg("run")
            .arg("--content")
            .arg(&content_path);
        if draft {
            command.arg("--draft");
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command.spawn()?;
        info!(pid = child.id(), content = %content_path.display(), draft, "background run started");

        Ok(LaunchAck {
            pid: child.id(),
            title: content.title,
            draft,
            content_path,
            run_log,
            answers_dir: self.config.staging_root(),
        })
    }

    fn preview(&self, content_path: &Path) -> Result<Preview> {
        let content = Content::load(content_path)?;
        let limit = self.config.platform.title_limit;
        Ok(Preview {
            markdown: content.preview_markdown(self.config.platform.max_images),
            truncated_title: content.truncated_title(limit),
            title_truncated: content.title.chars().count() > limit,
            has_media: content.has_media(),
        })
    }

    fn run_foreground(&self, content_path: &Path, force_draft: bool) -> Result<RunReport> {
        let mut content = Content::load(content_path)?;
        if force_draft {
            content.save_as_draft = true;
        }
        let started_at = Utc::now();
        let prompt = operator_prompt(&self.config, std::io::stdin().is_terminal());
        let publisher = Publisher::from_config(self.config.clone(), prompt)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let result = runtime.block_on(publisher.publish(&content));

        let record = RunRecord::from_result(content_path, &content, &result, started_at);
        let recorded = match self.record_run(&record) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to record run in ledger");
                false
            }
        };
        Ok(RunReport {
            run_id: record.id,
            recorded,
            result,
        })
    }

    fn record_run(&self, record: &RunRecord) -> Result<()> {
        self.ledger()?.record(record)?;
        Ok(())
    }

    fn history(&self, limit: usize) -> Result<HistoryList> {
        let rows = self.ledger()?.recent_runs(limit)?;
        Ok(HistoryList { rows })
    }

    fn ledger(&self) -> Result<RunLedger> {
        Ok(RunLedger::new(
            self.config.ledger_db(),
            self.config.failure_log(),
        )?)
    }
}

/// Background runs have no terminal, so they take answers from files.
fn operator_prompt(config: &PublisherConfig, interactive: bool) -> Arc<dyn OperatorPrompt> {
    if interactive {
        Arc::new(ConsolePrompt::stdin())
    } else {
        Arc::new(AnswerFilePrompt::from_config(config))
    }
}

#[derive(Debug, Serialize)]
struct LaunchAck {
    pid: u32,
    title: String,
    draft: bool,
    content_path: PathBuf,
    run_log: PathBuf,
    answers_dir: PathBuf,
}

impl DisplayFallback for LaunchAck {
    fn display(&self) -> String {
        let action = if self.draft { "Draft" } else { "Publish" };
        format!(
            "{action} task started in the background (pid {pid}) for \"{title}\".\n\
             A browser window will open shortly. On the first run, scan the QR code in it to log in.\n\
             Progress is written to {log}.\n\
             If the video host asks for cookies, refresh the export and create {resume}, \
             or create {skip} to publish images only.",
            pid = self.pid,
            title = self.title,
            log = self.run_log.display(),
            resume = self.answers_dir.join(CONTINUE_MARKER).display(),
            skip = self.answers_dir.join(SKIP_MARKER).display(),
        )
    }
}

#[derive(Debug, Serialize)]
struct Preview {
    markdown: String,
    truncated_title: String,
    title_truncated: bool,
    has_media: bool,
}

impl DisplayFallback for Preview {
    fn display(&self) -> String {
        let mut text = self.markdown.trim_end().to_string();
        if self.title_truncated {
            text.push_str(&format!(
                "\n\nNote: the title will be published as \"{}\".",
                self.truncated_title
            ));
        }
        if !self.has_media {
            text.push_str("\n\nWarning: no images or video, publishing would fail.");
        }
        text
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    run_id: String,
    recorded: bool,
    result: PublishResult,
}

impl DisplayFallback for RunReport {
    fn display(&self) -> String {
        self.result.to_string()
    }
}

#[derive(Debug, Serialize)]
struct HistoryList {
    rows: Vec<RunRecord>,
}

impl DisplayFallback for HistoryList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No runs recorded".to_string();
        }
        self.rows
            .iter()
            .map(|run| {
                format!(
                    "{started} | {status:<7} | {kind} | {title} | {message}",
                    started = run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    status = run.status,
                    kind = if run.draft { "draft" } else { "post" },
                    title = run.title,
                    message = run.message,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
