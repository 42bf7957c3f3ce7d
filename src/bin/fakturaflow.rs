//! CLI binary for fakturaflow.
//!
//! A thin shim over the library crate: maps CLI flags to a
//! `PipelineConfig`, runs the batch and prints the closing summary.
//! Individual invoice failures never change the exit code; only run-level
//! catastrophes (bad input path, unwritable output directory, broken
//! config profile) exit non-zero.

use anyhow::{Context, Result};
use clap::Parser;
use fakturaflow::{run_batch, FakturaError, PipelineConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process one invoice PDF
  fakturaflow --input faktura.pdf --output out/

  # Process a whole directory
  fakturaflow --input invoices/ --output out/

  # With a configuration profile and verbose logs
  fakturaflow --input invoices/ --output out/ --config profile.json --verbose

OUTPUT LAYOUT:
  <output>/invoices_<timestamp>.xlsx     consolidated line items
  <output>/review/<invoice_id>/          PDF copy + metadata.json per REVIEW invoice
  <output>/run_summary.json              per-run statistics and routing decisions
  <output>/artifacts/                    rendered pages, table debug bundles
  <output>/errors/                       per-file failure records

EXTERNAL REQUIREMENTS:
  libpdfium   on the library search path (github.com/bblanchon/pdfium-binaries)
  tesseract   on PATH with the 'swe' language pack (scanned pages only)

ENVIRONMENT VARIABLES:
  FAKTURAFLOW_CONFIG   Default --config path
  RUST_LOG             Override log filtering (tracing EnvFilter syntax)
"#;

/// Extract line items from Swedish invoice PDFs into a spreadsheet.
#[derive(Parser, Debug)]
#[command(
    name = "fakturaflow",
    version,
    about = "Extract line items from Swedish invoice PDFs into a consolidated spreadsheet",
    long_about = "Batch-process invoice PDFs: text-layer or OCR extraction per page, \
VAT-anchored line-item parsing with positional fallback, confidence-gated validation, \
and a review package for every invoice that needs human eyes.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input PDF file or directory of PDFs.
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory (created if missing).
    #[arg(short, long)]
    output: PathBuf,

    /// JSON configuration profile.
    #[arg(short, long, env = "FAKTURAFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Concurrent file workers (overrides the profile).
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress everything except errors and the per-invoice status lines.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Configuration ────────────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config profile {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs.max(1);
    }

    // ── Pre-flight ───────────────────────────────────────────────────────
    let spinner = if cli.quiet {
        None
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("Scanning {}…", cli.input.display()));
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    };

    let files = fakturaflow::discover_inputs(&cli.input).map_err(fatal)?;
    if let Some(bar) = &spinner {
        bar.finish_and_clear();
        eprintln!(
            "{} {}",
            bold(&files.len().to_string()),
            if files.len() == 1 { "PDF file" } else { "PDF files" }
        );
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let outcome = run_batch(&cli.input, &cli.output, &config, None)
        .await
        .map_err(fatal)?;

    // ── Closing summary ──────────────────────────────────────────────────
    if !cli.quiet {
        let s = &outcome.summary;
        eprintln!();
        eprintln!(
            "{} {} invoices from {} files",
            green("✔"),
            bold(&s.total_invoices.to_string()),
            s.total_files
        );
        eprintln!(
            "   {}  {}  {}  {}",
            green(&format!("OK {}", s.ok)),
            yellow(&format!("PARTIAL {}", s.partial)),
            red(&format!("REVIEW {}", s.review)),
            if s.failed > 0 {
                red(&format!("FAILED {}", s.failed))
            } else {
                dim("FAILED 0")
            },
        );
        eprintln!(
            "   {}",
            dim(&format!("spreadsheet: {}", s.output_paths.spreadsheet.display()))
        );
        if s.review > 0 {
            eprintln!(
                "   {}",
                dim(&format!("review packages: {}", s.output_paths.review_dir.display()))
            );
        }
    }

    Ok(())
}

/// Wrap a fatal library error with a CLI-friendly context.
fn fatal(err: FakturaError) -> anyhow::Error {
    anyhow::Error::new(err).context("Batch processing failed")
}
