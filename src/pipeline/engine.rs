//! OCR engine adapters: one page image in, raw text out.
//!
//! Engines return the text exactly as recognised; cleanup and field parsing
//! happen later in [`crate::pipeline::extract`]. No backend retries: a
//! failure surfaces once per page as [`EngineError`], and the service
//! decides what becomes of the job.
//!
//! Both backends stop work when their future is dropped, which is what lets
//! the timeout supervisor abandon a page cleanly:
//!
//! * [`TesseractEngine`] spawns the `tesseract` CLI with `kill_on_drop`, so
//!   the child dies with the future.
//! * [`VisionEngine`] holds an in-flight HTTP request, which is aborted when
//!   dropped.

use crate::error::OcrError;
use crate::pipeline::encode::{encode_page, encode_png};
use crate::prompts::{language_instruction, TRANSCRIBE_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// The engine failed on one page.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

/// Run a page encoder on the blocking pool. Compressing a full page is
/// CPU-bound and would otherwise stall the runtime thread.
async fn encode_blocking<T, F>(image: &DynamicImage, encode: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce(&DynamicImage) -> Result<T, image::ImageError> + Send + 'static,
{
    let owned = image.clone();
    tokio::task::spawn_blocking(move || encode(&owned))
        .await
        .map_err(|e| EngineError(format!("encode task panicked: {e}")))?
        .map_err(|e| EngineError(format!("PNG encode failed: {e}")))
}

/// An external OCR capability.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short identifier used in errors and debug output.
    fn name(&self) -> &str;

    /// Recognise the text on one page. `language` is a tesseract-style code
    /// such as `eng` or `eng+hin`.
    async fn recognize(&self, image: &DynamicImage, language: &str) -> Result<String, EngineError>;
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// Runs the `tesseract` command-line tool per page.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    bin: PathBuf,
    /// OCR engine mode. 1 = LSTM only.
    oem: u8,
    /// Page segmentation mode. 3 = fully automatic.
    psm: u8,
}

impl TesseractEngine {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            oem: 1,
            psm: 3,
        }
    }

    pub fn with_psm(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &DynamicImage, language: &str) -> Result<String, EngineError> {
        let png = encode_blocking(image, encode_png).await?;

        let mut child = Command::new(&self.bin)
            .args(["stdin", "stdout", "-l", language])
            .args(["--oem", &self.oem.to_string(), "--psm", &self.psm.to_string()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError(format!("cannot start {}: {e}", self.bin.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError("tesseract stdin not captured".into()))?;
        let feed = async move {
            let written = stdin.write_all(&png).await;
            drop(stdin);
            written
        };

        // Feed and drain together; a full stdout pipe would otherwise block
        // the child while we are still writing.
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| EngineError(format!("tesseract I/O failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        fed.map_err(|e| EngineError(format!("writing page to tesseract failed: {e}")))?;

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("tesseract recognised {} chars", text.len());
        Ok(text)
    }
}

// ── Vision model ─────────────────────────────────────────────────────────

/// Asks a vision-capable LLM to transcribe the page.
#[derive(Clone)]
pub struct VisionEngine {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
}

impl std::fmt::Debug for VisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionEngine")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl VisionEngine {
    /// Wrap an already configured provider.
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
            options: CompletionOptions {
                temperature: Some(0.0),
                max_tokens: Some(4096),
                ..Default::default()
            },
        }
    }

    /// Create a named provider (`openai`, `anthropic`, `gemini`, `ollama`, …)
    /// reading its API key from the environment.
    pub fn from_provider_name(name: &str, model: &str) -> Result<Self, OcrError> {
        let provider = ProviderFactory::create_llm_provider(name, model)
            .map_err(|e| OcrError::InvalidConfig(format!("vision provider '{name}': {e}")))?;
        Ok(Self::new(provider, format!("vision:{name}/{model}")))
    }

    /// Auto-detect a provider from the environment.
    ///
    /// Honours `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are
    /// set, otherwise lets the factory pick from the available API keys.
    pub fn from_env() -> Result<Self, OcrError> {
        if let (Ok(name), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !name.is_empty() && !model.is_empty() {
                return Self::from_provider_name(&name, &model);
            }
        }
        let (provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
            OcrError::InvalidConfig(format!(
                "no vision provider detected; set OPENAI_API_KEY, ANTHROPIC_API_KEY or \
                 EDGEQUAKE_LLM_PROVIDER: {e}"
            ))
        })?;
        Ok(Self::new(provider, "vision"))
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.options.max_tokens = Some(n);
        self
    }
}

#[async_trait]
impl OcrEngine for VisionEngine {
    fn name(&self) -> &str {
        &self.label
    }

    async fn recognize(&self, image: &DynamicImage, language: &str) -> Result<String, EngineError> {
        let image_data = encode_blocking(image, encode_page).await?;

        let messages = vec![
            ChatMessage::system(TRANSCRIBE_SYSTEM_PROMPT),
            ChatMessage::user_with_images(&language_instruction(language), vec![image_data]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| EngineError(e.to_string()))?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}
