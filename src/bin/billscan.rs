//! CLI binary for billscan.
//!
//! A thin shim over the library: maps flags onto `OcrConfig`, submits every
//! input through one shared `OcrService` and prints the results as JSON.

use anyhow::{bail, Context, Result};
use billscan::{
    suggest_task, JobId, JobProgressCallback, OcrConfig, OcrError, OcrResult, OcrService,
    PageError, SourceFile, SubmitOptions, TesseractEngine, TimeoutScope, VisionEngine,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over all submitted files, with a log line per page. Jobs run
/// concurrently, so lines from different files interleave.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(files: usize) -> Arc<Self> {
        let bar = ProgressBar::new(files as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:36.green/238}] {pos}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_prefix("Scanning");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn short(job_id: JobId) -> String {
        job_id.to_string().chars().take(8).collect()
    }
}

impl JobProgressCallback for CliProgress {
    fn on_job_started(&self, job_id: JobId, queue_wait: Duration) {
        self.bar.println(dim(&format!(
            "  ▶ {} admitted after {:.1}s",
            Self::short(job_id),
            queue_wait.as_secs_f64()
        )));
    }

    fn on_page_start(&self, job_id: JobId, page: usize, total_pages: usize) {
        self.bar
            .set_message(format!("{} page {page}/{total_pages}", Self::short(job_id)));
    }

    fn on_page_complete(&self, job_id: JobId, page: usize, total_pages: usize, chars: usize) {
        self.bar.println(format!(
            "  {} {} page {:>3}/{:<3} {}",
            green("✓"),
            Self::short(job_id),
            page,
            total_pages,
            dim(&format!("{chars:>5} chars")),
        ));
    }

    fn on_page_warning(&self, job_id: JobId, warning: &PageError) {
        self.bar.println(format!(
            "  {} {} {}",
            yellow("⚠"),
            Self::short(job_id),
            warning
        ));
    }

    fn on_job_complete(&self, _job_id: JobId, _result: &OcrResult) {
        self.bar.inc(1);
    }

    fn on_job_failed(&self, job_id: JobId, error: &OcrError) {
        self.bar.println(format!(
            "  {} {} {}",
            red("✗"),
            Self::short(job_id),
            red(&error.to_string())
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR a bill with the local tesseract install
  billscan bill.pdf

  # Several uploads at once, two at a time, Hindi + English
  billscan --concurrency 2 --lang eng+hin a.pdf b.jpg c.png

  # Use a vision model instead of tesseract
  billscan --engine vision --provider openai --model gpt-4.1-mini bill.pdf

  # Include a suggested payment task
  billscan --suggest-task bill.pdf -o bill.json

ENVIRONMENT VARIABLES:
  OCR_LANG                 Default tesseract language        (eng)
  OCR_TIMEOUT_MS           Per-job deadline                  (120000)
  OCR_TIMEOUT_SCOPE        job | page                        (job)
  OCR_MAX_PDF_PAGES        Hard page cap                     (10)
  OCR_MAX_CONCURRENCY      Jobs processed at once            (2)
  OCR_ENABLE_DEBUG         Attach per-page diagnostics       (false)
  OCR_TEMP_DIR             Scratch root                      (uploads/temp)
  OCR_TEMP_MAX_AGE_MS      Janitor age threshold             (3600000)
  OCR_JANITOR_INTERVAL_MS  Janitor sweep interval            (600000)
  OCR_TESSERACT_BIN        tesseract executable              (tesseract)
  PDFIUM_LIB_PATH          Directory holding libpdfium
  EDGEQUAKE_LLM_PROVIDER   Vision provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL          Vision model ID
"#;

/// OCR invoices and bills into text and structured fields.
#[derive(Parser, Debug)]
#[command(
    name = "billscan",
    version,
    about = "OCR invoices and bills into text and structured fields",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF or image files to scan.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "BILLSCAN_OUTPUT")]
    output: Option<PathBuf>,

    /// Declared MIME type for every input. Guessed from the extension if unset.
    #[arg(long)]
    mime: Option<String>,

    /// OCR engine.
    #[arg(long, env = "BILLSCAN_ENGINE", value_enum, default_value = "tesseract")]
    engine: EngineArg,

    /// Vision provider: openai, anthropic, gemini, ollama.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Vision model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Language hint, e.g. eng or eng+hin.
    #[arg(short, long)]
    lang: Option<String>,

    /// Page cap per document.
    #[arg(long)]
    max_pages: Option<usize>,

    /// Deadline per job (or per page with --page-timeout), in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Apply the deadline to each page instead of the whole job.
    #[arg(long)]
    page_timeout: bool,

    /// Jobs processed at once.
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Scratch root for rendered pages.
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// tesseract executable.
    #[arg(long)]
    tesseract_bin: Option<PathBuf>,

    /// Page segmentation mode passed to tesseract.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=13))]
    psm: Option<u8>,

    /// Attach per-page diagnostics to each result.
    #[arg(long)]
    debug: bool,

    /// Add a suggested payment task to each result.
    #[arg(long)]
    suggest_task: bool,

    /// Print recognised text instead of JSON.
    #[arg(long, conflicts_with = "suggest_task")]
    text: bool,

    /// Disable progress bar.
    #[arg(long, env = "BILLSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EngineArg {
    Tesseract,
    Vision,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build service ────────────────────────────────────────────────────
    let config = build_config(&cli)?;
    let mut builder = OcrService::builder(config.clone());
    match cli.engine {
        EngineArg::Tesseract => {
            let mut engine = TesseractEngine::new(config.tesseract_bin.clone());
            if let Some(psm) = cli.psm {
                engine = engine.with_psm(psm);
            }
            builder = builder.engine(Arc::new(engine));
        }
        EngineArg::Vision => {
            let engine = match (&cli.provider, &cli.model) {
                (Some(p), Some(m)) => VisionEngine::from_provider_name(p, m),
                _ => VisionEngine::from_env(),
            }
            .context("Failed to set up the vision engine")?;
            builder = builder.engine(Arc::new(engine));
        }
    }
    let progress = show_progress.then(|| CliProgress::new(cli.inputs.len()));
    if let Some(p) = &progress {
        builder = builder.progress(p.clone());
    }
    let service = builder.build();
    let janitor = service.spawn_janitor();

    // ── Submit everything; the gate decides who runs ─────────────────────
    let mut options = SubmitOptions::default();
    if let Some(lang) = &cli.lang {
        options = options.language_hint(lang.clone());
    }
    let jobs = cli.inputs.iter().map(|path| {
        let service = service.clone();
        let options = options.clone();
        let mime = cli.mime.clone().unwrap_or_else(|| guess_mime(path).to_string());
        async move {
            let outcome = service
                .submit(SourceFile::new(path.clone(), mime), options)
                .await;
            (path, outcome)
        }
    });
    let outcomes = futures::future::join_all(jobs).await;
    janitor.shutdown().await;

    if let Some(p) = &progress {
        p.bar.finish_and_clear();
    }

    // ── Report ───────────────────────────────────────────────────────────
    let today = chrono::Local::now().date_naive();
    let mut failed = 0usize;
    let mut reports = Vec::with_capacity(outcomes.len());
    let mut texts = Vec::new();
    for (path, outcome) in &outcomes {
        let mut report = json!({ "file": path.display().to_string() });
        let result = match outcome {
            Ok(result) => Some(result),
            Err(e) => {
                failed += 1;
                report["error"] = Value::String(e.to_string());
                report["retryable"] = Value::Bool(e.is_retryable());
                e.partial_result()
            }
        };
        if let Some(result) = result {
            report["result"] = serde_json::to_value(result).context("Failed to serialize result")?;
            if cli.suggest_task {
                let task = suggest_task(&result.extracted_fields, &result.text(), today);
                report["task"] = serde_json::to_value(task).context("Failed to serialize task")?;
            }
            texts.push(format!("==> {} <==\n{}", path.display(), result.text()));
        }
        reports.push(report);
    }

    let rendered = if cli.text {
        texts.join("\n\n")
    } else if reports.len() == 1 {
        serde_json::to_string_pretty(&reports[0])?
    } else {
        serde_json::to_string_pretty(&reports)?
    };

    match &cli.output {
        Some(out) => {
            std::fs::write(out, &rendered)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            if !cli.quiet {
                eprintln!("{} wrote {}", green("✔"), out.display());
            }
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{rendered}").context("Failed to write to stdout")?;
        }
    }

    if failed > 0 {
        bail!("{failed} of {} files failed", outcomes.len());
    }
    Ok(())
}

/// Environment first, then flags on top.
fn build_config(cli: &Cli) -> Result<OcrConfig> {
    let mut config = OcrConfig::from_env().context("Invalid OCR_* environment")?;
    if let Some(lang) = &cli.lang {
        config.language = lang.clone();
    }
    if let Some(n) = cli.max_pages {
        config.max_pdf_pages = n.max(1);
    }
    if let Some(ms) = cli.timeout_ms {
        config.timeout_ms = ms.max(1);
    }
    if cli.page_timeout {
        config.timeout_scope = TimeoutScope::Page;
    }
    if let Some(n) = cli.concurrency {
        config.max_concurrency = n.max(1);
    }
    if let Some(dir) = &cli.temp_dir {
        config.temp_dir = dir.clone();
    }
    if let Some(bin) = &cli.tesseract_bin {
        config.tesseract_bin = bin.clone();
    }
    config.enable_debug |= cli.debug;
    Ok(config)
}

/// MIME type from the file extension. The library sniffs the content anyway.
fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("tif" | "tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}
