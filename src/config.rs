//! Configuration types for the OCR ingestion pipeline.
//!
//! Service-wide behaviour lives in [`OcrConfig`], built via its
//! [`OcrConfigBuilder`] or read from the `OCR_*` environment variables with
//! [`OcrConfig::from_env`]. Per-document overrides travel in
//! [`SubmitOptions`] and are resolved against the config when a job is
//! created.

use crate::error::OcrError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Service-wide OCR configuration.
///
/// # Example
/// ```rust
/// use billscan::OcrConfig;
///
/// let config = OcrConfig::builder()
///     .language("eng+hin")
///     .max_concurrency(4)
///     .max_pdf_pages(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrency, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Engine language code, e.g. `eng` or `eng+deu`. Default: `eng`.
    pub language: String,

    /// Deadline for one job, measured from admission. Default: 120 000 ms.
    pub timeout_ms: u64,

    /// Whether the deadline covers the whole job or restarts per page.
    pub timeout_scope: TimeoutScope,

    /// Hard cap on pages processed per document. Default: 10.
    pub max_pdf_pages: usize,

    /// Concurrency gate capacity. Default: 2.
    ///
    /// Tesseract saturates a core per page; more slots than cores only
    /// lengthens every job.
    pub max_concurrency: usize,

    /// Attach per-page text and timings to [`crate::output::OcrResult::debug`].
    pub enable_debug: bool,

    /// Root of the per-job scratch directories. Default: `./uploads/temp`.
    pub temp_dir: PathBuf,

    /// Scratch files older than this are eligible for the janitor.
    /// Default: one hour.
    pub temp_max_age_ms: u64,

    /// How often the janitor sweeps. Default: ten minutes.
    pub janitor_interval_ms: u64,

    /// Longest edge of a rendered PDF page, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Directory holding libpdfium. `None` binds the system library.
    pub pdfium_library_dir: Option<PathBuf>,

    /// Tesseract executable. Default: `tesseract` on `PATH`.
    pub tesseract_bin: PathBuf,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            timeout_ms: 120_000,
            timeout_scope: TimeoutScope::default(),
            max_pdf_pages: 10,
            max_concurrency: 2,
            enable_debug: false,
            temp_dir: PathBuf::from("uploads").join("temp"),
            temp_max_age_ms: 3_600_000,
            janitor_interval_ms: 600_000,
            max_rendered_pixels: 2000,
            pdfium_library_dir: None,
            tesseract_bin: PathBuf::from("tesseract"),
        }
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read the `OCR_*` variables from the process environment.
    ///
    /// Unset variables keep their defaults; malformed numbers are an error
    /// rather than a silent fallback.
    pub fn from_env() -> Result<Self, OcrError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, OcrError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut b = Self::builder();

        if let Some(lang) = get("OCR_LANG") {
            b = b.language(lang.trim());
        }
        if let Some(v) = get("OCR_TIMEOUT_MS") {
            b = b.timeout_ms(parse_num("OCR_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("OCR_TIMEOUT_SCOPE") {
            b = b.timeout_scope(v.parse()?);
        }
        if let Some(v) = get("OCR_MAX_PDF_PAGES") {
            b = b.max_pdf_pages(parse_num("OCR_MAX_PDF_PAGES", &v)?);
        }
        if let Some(v) = get("OCR_MAX_CONCURRENCY") {
            // Signed on purpose: "0" and "-3" both mean one slot.
            let n: i64 = parse_num("OCR_MAX_CONCURRENCY", &v)?;
            b = b.max_concurrency(usize::try_from(n).unwrap_or(0));
        }
        if let Some(v) = get("OCR_ENABLE_DEBUG") {
            b = b.enable_debug(matches!(v.trim(), "1" | "true" | "TRUE" | "yes"));
        }
        if let Some(v) = get("OCR_TEMP_DIR") {
            b = b.temp_dir(v.trim());
        }
        if let Some(v) = get("OCR_TEMP_MAX_AGE_MS") {
            b = b.temp_max_age_ms(parse_num("OCR_TEMP_MAX_AGE_MS", &v)?);
        }
        if let Some(v) = get("OCR_JANITOR_INTERVAL_MS") {
            b = b.janitor_interval_ms(parse_num("OCR_JANITOR_INTERVAL_MS", &v)?);
        }
        if let Some(v) = get("OCR_TESSERACT_BIN") {
            b = b.tesseract_bin(v.trim());
        }
        if let Some(v) = get("PDFIUM_LIB_PATH") {
            b = b.pdfium_library_dir(v.trim());
        }
        b.build()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn temp_max_age(&self) -> Duration {
        Duration::from_millis(self.temp_max_age_ms)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_millis(self.janitor_interval_ms)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, OcrError> {
    value
        .trim()
        .parse()
        .map_err(|_| OcrError::InvalidConfig(format!("{key} must be a number, got '{value}'")))
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    pub fn timeout_scope(mut self, scope: TimeoutScope) -> Self {
        self.config.timeout_scope = scope;
        self
    }

    pub fn max_pdf_pages(mut self, n: usize) -> Self {
        self.config.max_pdf_pages = n.max(1);
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n.max(1);
        self
    }

    pub fn enable_debug(mut self, v: bool) -> Self {
        self.config.enable_debug = v;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    pub fn temp_max_age_ms(mut self, ms: u64) -> Self {
        self.config.temp_max_age_ms = ms;
        self
    }

    pub fn janitor_interval_ms(mut self, ms: u64) -> Self {
        self.config.janitor_interval_ms = ms;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pdfium_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_dir = Some(dir.into());
        self
    }

    pub fn tesseract_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.config.tesseract_bin = bin.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OcrConfig, OcrError> {
        let c = &self.config;
        if c.language.trim().is_empty() {
            return Err(OcrError::InvalidConfig("language must not be empty".into()));
        }
        if c.timeout_ms == 0 {
            return Err(OcrError::InvalidConfig("timeout must be ≥ 1ms".into()));
        }
        if c.janitor_interval_ms == 0 {
            return Err(OcrError::InvalidConfig(
                "janitor interval must be ≥ 1ms".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What a job deadline covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutScope {
    /// One deadline for rasterising and recognising the whole document. (default)
    #[default]
    Job,
    /// The deadline restarts for every page.
    Page,
}

impl std::str::FromStr for TimeoutScope {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "job" => Ok(TimeoutScope::Job),
            "page" => Ok(TimeoutScope::Page),
            other => Err(OcrError::InvalidConfig(format!(
                "timeout scope must be 'job' or 'page', got '{other}'"
            ))),
        }
    }
}

/// The persisted upload handed to [`crate::service::OcrService::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub path: PathBuf,
    pub mime_type: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Per-document overrides of the service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOptions {
    pub language_hint: Option<String>,
    pub page_limit: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl SubmitOptions {
    pub fn language_hint(mut self, lang: impl Into<String>) -> Self {
        self.language_hint = Some(lang.into());
        self
    }

    pub fn page_limit(mut self, n: usize) -> Self {
        self.page_limit = Some(n);
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}
