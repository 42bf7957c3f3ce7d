//! Error types for the fakturaflow library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FakturaError`] — **Fatal**: the run cannot proceed at all (input path
//!   missing, config unreadable, output directory cannot be created).
//!   Returned as `Err(FakturaError)` from the top-level batch entry points
//!   and mapped to a non-zero exit code by the CLI.
//!
//! * [`StageError`] — **Recoverable**: a single invoice or page hit trouble
//!   (OCR produced nothing, the AI call timed out, extraction overran its
//!   budget). Caught at the layer where it occurs and converted into reason
//!   flags, warnings or errors on that invoice's result; the batch always
//!   continues and the invoice still appears in the run summary.
//!
//! The separation keeps the propagation policy honest: nothing recoverable
//! ever bubbles past an invoice boundary, and nothing fatal is silently
//! swallowed into a REVIEW status.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the fakturaflow library.
#[derive(Debug, Error)]
pub enum FakturaError {
    /// Input path does not exist or is neither a file nor a directory.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Input directory contained no PDF files.
    #[error("No PDF files found under '{path}'")]
    NoPdfFiles { path: PathBuf },

    /// The file could not be opened or parsed as a PDF at all.
    #[error("PDF '{path}' is corrupt or unreadable: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to the pdfium library: {0}\n\
         Install libpdfium (github.com/bblanchon/pdfium-binaries) and place it \
         next to the binary or on the library search path."
    )]
    PdfiumBindingFailed(String),

    /// Could not create or write into the output directory tree.
    #[error("Failed to prepare output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing the consolidated spreadsheet failed.
    #[error("Failed to write spreadsheet '{path}': {detail}")]
    SpreadsheetWriteFailed { path: PathBuf, detail: String },

    /// A configuration profile could not be read or parsed.
    #[error("Invalid configuration ({path}): {detail}")]
    ConfigError { path: PathBuf, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error (task panic, poisoned channel).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A recoverable failure inside one invoice's processing.
///
/// Never propagated past the invoice: each variant is rendered into the
/// invoice's errors/warnings/reason flags and the batch moves on.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// The OCR engine failed or produced no usable output for a page.
    /// The page downgrades to its text-layer tokens.
    #[error("OCR failed on page {page}: {detail}")]
    OcrFailure { page: u32, detail: String },

    /// AI provider error, timeout, or invalid JSON after the single retry.
    /// The deterministic result stands.
    #[error("AI fallback failed: {detail}")]
    AiFailure { detail: String },

    /// Neither the base routing check nor the quality override passed and
    /// both token sources are weak. Processing continues with the best
    /// available tokens.
    #[error("Routing uncertain on page {page}: {flags:?}")]
    RoutingUncertain { page: u32, flags: Vec<String> },

    /// Net-sum validation failed in both parser modes. Drives status REVIEW
    /// and the debug artifact dump; not an error in the propagation sense.
    #[error("Validation mismatch: mode A diff {mode_a_diff}, mode B diff {mode_b_diff}")]
    ValidationMismatch {
        mode_a_diff: String,
        mode_b_diff: String,
    },

    /// The invoice overran its wall-clock budget.
    #[error("Extraction timed out after {secs}s")]
    ExtractionTimeout { secs: u64 },

    /// Rasterisation failed for a page needed by OCR or vision.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RenderFailed { page: u32, detail: String },
}

impl StageError {
    /// Short kind tag used in `"<kind>: <msg>"` error strings on REVIEW
    /// results.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::OcrFailure { .. } => "OcrFailure",
            StageError::AiFailure { .. } => "AiFailure",
            StageError::RoutingUncertain { .. } => "RoutingUncertain",
            StageError::ValidationMismatch { .. } => "ValidationMismatch",
            StageError::ExtractionTimeout { .. } => "ExtractionTimeout",
            StageError::RenderFailed { .. } => "RenderFailed",
        }
    }
}
