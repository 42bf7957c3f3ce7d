//! # fakturaflow
//!
//! Batch extraction of line items from Swedish invoice PDFs.
//!
//! ## Why this crate?
//!
//! Generic PDF-to-text tools give you a wall of characters; invoice
//! automation needs *fields* — invoice number, total, per-line amounts —
//! with evidence for every value and an honest statement of how sure the
//! extraction is. This crate turns a folder of invoice PDFs into one
//! consolidated spreadsheet plus, for every invoice whose extraction is
//! uncertain, a self-contained review package (PDF copy + structured
//! metadata) a human can resolve without re-running anything.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF batch
//!  │
//!  ├─ 1. Read      open via pdfium, extract the text layer per page
//!  ├─ 2. Route     text layer vs OCR, per page, with reason flags
//!  ├─ 3. Split     multi-invoice PDFs → virtual invoices by anchor
//!  ├─ 4. Header    invoice number / total / supplier / date + confidence
//!  ├─ 5. Lines     VAT-anchored table parse, positional fallback
//!  ├─ 6. Validate  sum gates, hard confidence gate, OK/PARTIAL/REVIEW
//!  └─ 7. Write     spreadsheet, review packages, run summary
//! ```
//!
//! Every decision is a deterministic rule with an explicit threshold; the
//! optional AI fallback (total field only, strict contract) is the single
//! non-deterministic escape hatch and never overrides the hard gate.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fakturaflow::{run_batch, PipelineConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let outcome = run_batch(
//!         Path::new("invoices/"),
//!         Path::new("out/"),
//!         &config,
//!         None,
//!     )
//!     .await?;
//!     println!(
//!         "{} invoices: {} OK, {} partial, {} review",
//!         outcome.summary.total_invoices,
//!         outcome.summary.ok,
//!         outcome.summary.partial,
//!         outcome.summary.review,
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fakturaflow` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! fakturaflow = { version = "0.3", default-features = false }
//! ```
//!
//! ## External requirements
//!
//! * **libpdfium** on the library search path (reading + rasterisation)
//! * **tesseract** on `PATH` with the `swe` language pack, for scanned pages

// ── Modules ──────────────────────────────────────────────────────────────

pub mod amount;
pub mod batch;
pub mod calibrate;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod writers;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use amount::{normalize_amount, NormalizationError};
pub use batch::{discover_inputs, run_batch, BatchOutcome, OutputPaths};
pub use calibrate::Calibrator;
pub use config::{
    AiConfig, DpiConfig, PipelineConfig, PipelineConfigBuilder, RoutingConfig, TableParserMode,
    ValidationConfig, VisionConfig,
};
pub use error::{FakturaError, StageError};
pub use model::{
    ExtractionDetail, ExtractionSource, InvoiceHeader, InvoiceHeaderBuilder, InvoiceLine,
    InvoiceRecord, PageRoutingDecision, Row, RunSummary, Segment, SegmentKind, Token, TokenSource,
    Traceability, ValidationResult, ValidationStatus, VirtualInvoice,
};
pub use pipeline::ai::AiProvider;
