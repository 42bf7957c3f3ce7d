//! Batch runner: fan invoices out across workers, collect results in input
//! order, hand them to the writers.
//!
//! ## Concurrency model
//!
//! Files are embarrassingly parallel: each worker owns one file end-to-end
//! (document load, routing, OCR, every virtual invoice inside it) and
//! shares no mutable state with its peers. Workers run under
//! `buffer_unordered(jobs)` and push `(index, outcome)` into an mpsc
//! channel; a single collector buffers out-of-order arrivals in a
//! `BTreeMap` and emits strictly by input index, so output order always
//! matches input order no matter which worker finishes first.
//!
//! ## Failure isolation
//!
//! Workers run inside `tokio::spawn`, so a panic is caught as a
//! `JoinError` and becomes a failed-file record. A per-invoice wall-clock
//! budget converts runaway invoices into REVIEW results without touching
//! the rest of the batch. Only run-level problems (no inputs, unwritable
//! output directory) abort the batch.

use crate::calibrate::Calibrator;
use crate::config::PipelineConfig;
use crate::error::{FakturaError, StageError};
use crate::model::{
    DocumentContent, ExtractionDetail, ExtractionSource, InvoiceRecord, OutputPathsSummary,
    PreparedPage, RoutedPage, RunSummary, TokenSource, ValidationResult, ValidationStatus,
    VirtualInvoice,
};
use crate::pipeline::ai::{self, AiProvider, HttpAiProvider};
use crate::pipeline::{
    assemble, boundaries, footer, header, ocr, reader, render, routing, rows, segments, table,
    validate,
};
use futures::StreamExt;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Calibrated confidence assigned to an AI-recovered total. Deliberately
/// below the hard gate: the fallback fills in the value for the
/// spreadsheet, a human still signs off on the invoice.
const AI_RESULT_CONF: f64 = 0.90;

/// Thresholds that route an AI call to vision instead of text.
const VISION_TEXT_QUALITY: f64 = 0.5;
const VISION_MEDIAN_CONF: f32 = 70.0;

// ── Output layout ────────────────────────────────────────────────────────

/// The on-disk output layout of one run.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub root: PathBuf,
    pub spreadsheet: PathBuf,
    pub review_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub pages_dir: PathBuf,
    pub invoices_dir: PathBuf,
    pub errors_dir: PathBuf,
    pub summary_path: PathBuf,
}

impl OutputPaths {
    /// Create the directory tree under `root`. The workbook name carries a
    /// run timestamp so consecutive runs never overwrite each other.
    pub fn prepare(root: &Path) -> Result<Self, FakturaError> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let paths = OutputPaths {
            root: root.to_path_buf(),
            spreadsheet: root.join(format!("invoices_{stamp}.xlsx")),
            review_dir: root.join("review"),
            artifacts_dir: root.join("artifacts"),
            pages_dir: root.join("artifacts").join("pages"),
            invoices_dir: root.join("artifacts").join("invoices"),
            errors_dir: root.join("errors"),
            summary_path: root.join("run_summary.json"),
        };
        for dir in [
            &paths.root,
            &paths.review_dir,
            &paths.pages_dir,
            &paths.invoices_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| FakturaError::OutputDirFailed {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(paths)
    }

    fn summary_paths(&self) -> OutputPathsSummary {
        OutputPathsSummary {
            spreadsheet: self.spreadsheet.clone(),
            review_dir: self.review_dir.clone(),
            artifacts_dir: self.artifacts_dir.clone(),
        }
    }
}

// ── Batch entry point ────────────────────────────────────────────────────

/// Everything a finished batch produced.
#[derive(Debug)]
pub struct BatchOutcome {
    pub summary: RunSummary,
    pub records: Vec<InvoiceRecord>,
}

/// One worker's result for one file.
enum FileOutcome {
    Processed(Vec<InvoiceRecord>),
    Failed(String),
}

/// Run the full batch: discover PDFs, process them concurrently, write the
/// spreadsheet, review packages and run summary.
///
/// `provider` overrides the built-in HTTP provider; pass `None` to let the
/// configuration decide.
pub async fn run_batch(
    input: &Path,
    output: &Path,
    cfg: &PipelineConfig,
    provider: Option<Arc<dyn AiProvider>>,
) -> Result<BatchOutcome, FakturaError> {
    let files = discover_inputs(input)?;
    let paths = OutputPaths::prepare(output)?;
    let calibrator = Arc::new(load_calibrator(cfg));

    let provider: Option<Arc<dyn AiProvider>> = match provider {
        Some(p) => Some(p),
        None if cfg.ai.enabled => HttpAiProvider::from_config(&cfg.ai)
            .map(|p| Arc::new(p) as Arc<dyn AiProvider>),
        None => None,
    };

    info!(files = files.len(), jobs = cfg.jobs, "starting batch");

    let (tx, mut rx) = mpsc::channel::<(usize, FileOutcome)>(cfg.jobs.max(1));

    let cfg_arc = Arc::new(cfg.clone());
    let paths_arc = Arc::new(paths.clone());
    let worker_tx = tx.clone();
    let worker_files = files.clone();

    let driver = futures::stream::iter(worker_files.into_iter().enumerate())
        .map(move |(index, path)| {
            let cfg = Arc::clone(&cfg_arc);
            let paths = Arc::clone(&paths_arc);
            let calibrator = Arc::clone(&calibrator);
            let provider = provider.clone();
            let tx = worker_tx.clone();
            async move {
                let handle = tokio::spawn(async move {
                    process_file(&path, &cfg, &paths, &calibrator, provider.as_deref()).await
                });
                let outcome = match handle.await {
                    Ok(Ok(records)) => FileOutcome::Processed(records),
                    Ok(Err(e)) => FileOutcome::Failed(e),
                    Err(join_err) => FileOutcome::Failed(format!("worker panicked: {join_err}")),
                };
                let _ = tx.send((index, outcome)).await;
            }
        })
        .buffer_unordered(cfg.jobs.max(1))
        .collect::<Vec<()>>();
    drop(tx);

    // Collector: buffer by index, emit in input order.
    let total_files = files.len();
    let collector = async {
        let mut pending: BTreeMap<usize, FileOutcome> = BTreeMap::new();
        let mut next = 0usize;
        let mut records: Vec<InvoiceRecord> = Vec::new();
        let mut failures: Vec<crate::writers::summary::FailedFile> = Vec::new();

        while let Some((index, outcome)) = rx.recv().await {
            pending.insert(index, outcome);
            while let Some(outcome) = pending.remove(&next) {
                emit_file(
                    next,
                    total_files,
                    &files[next],
                    outcome,
                    &mut records,
                    &mut failures,
                );
                next += 1;
            }
        }
        (records, failures)
    };

    let (_, (records, failures)) = tokio::join!(driver, collector);

    // ── Writers ──────────────────────────────────────────────────────────
    crate::writers::spreadsheet::write(&records, &paths.spreadsheet)?;

    for record in records
        .iter()
        .filter(|r| r.validation.status == ValidationStatus::Review)
    {
        if let Err(e) = crate::writers::review::write_package(&paths.review_dir, record) {
            warn!(id = %record.id, error = %e, "review package write failed");
        }
    }

    crate::writers::summary::write_failures(&failures, &paths.errors_dir).map_err(|e| {
        FakturaError::OutputDirFailed {
            path: paths.errors_dir.clone(),
            source: e,
        }
    })?;

    let summary = crate::writers::summary::build_summary(
        total_files,
        &records,
        &failures,
        paths.summary_paths(),
    );
    crate::writers::summary::write_summary(&summary, &paths.summary_path).map_err(|e| {
        FakturaError::OutputDirFailed {
            path: paths.summary_path.clone(),
            source: e,
        }
    })?;

    info!(
        invoices = summary.total_invoices,
        ok = summary.ok,
        partial = summary.partial,
        review = summary.review,
        failed = summary.failed,
        "batch complete"
    );

    Ok(BatchOutcome { summary, records })
}

fn emit_file(
    index: usize,
    total: usize,
    path: &Path,
    outcome: FileOutcome,
    records: &mut Vec<InvoiceRecord>,
    failures: &mut Vec<crate::writers::summary::FailedFile>,
) {
    match outcome {
        FileOutcome::Processed(file_records) => {
            let multi = file_records.len() > 1;
            for record in file_records {
                println!(
                    "{}",
                    assemble::status_line(index + 1, total, &record, multi)
                );
                records.push(record);
            }
        }
        FileOutcome::Failed(error) => {
            println!(
                "[{}/{}] {} → FAILED ({error})",
                index + 1,
                total,
                path.file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            );
            failures.push(crate::writers::summary::FailedFile {
                path: path.to_path_buf(),
                error,
            });
        }
    }
}

/// Resolve the input argument into an ordered list of PDF files.
pub fn discover_inputs(input: &Path) -> Result<Vec<PathBuf>, FakturaError> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if input.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(input)
            .map_err(|_| FakturaError::InputNotFound {
                path: input.to_path_buf(),
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                p.extension()
                    .map(|e| e.eq_ignore_ascii_case("pdf"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(FakturaError::NoPdfFiles {
                path: input.to_path_buf(),
            });
        }
        return Ok(files);
    }
    Err(FakturaError::InputNotFound {
        path: input.to_path_buf(),
    })
}

fn load_calibrator(cfg: &PipelineConfig) -> Calibrator {
    match &cfg.calibration_file {
        Some(path) => match Calibrator::from_json_file(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "calibration artefact unreadable; using identity");
                Calibrator::identity()
            }
        },
        None => Calibrator::identity(),
    }
}

// ── Per-file processing ──────────────────────────────────────────────────

/// Process one file: load, route pages, split into virtual invoices,
/// extract each. Returns `Err` only for file-level failures (corrupt PDF).
async fn process_file(
    path: &Path,
    cfg: &PipelineConfig,
    paths: &OutputPaths,
    calibrator: &Calibrator,
    provider: Option<&dyn AiProvider>,
) -> Result<Vec<InvoiceRecord>, String> {
    let document = reader::load_document(path).await.map_err(|e| e.to_string())?;
    let file_stem = document.file_stem();

    let routed = route_pages(&document, cfg, paths, &file_stem).await;
    let invoices = boundaries::detect(&routed, &file_stem);

    let mut records = Vec::with_capacity(invoices.len());
    let budget = Duration::from_secs(cfg.invoice_timeout_secs);

    for invoice in &invoices {
        let work = process_invoice(invoice, &document, &routed, cfg, paths, calibrator, provider);
        let record = match tokio::time::timeout(budget, work).await {
            Ok(record) => record,
            Err(_) => {
                let stage = StageError::ExtractionTimeout {
                    secs: cfg.invoice_timeout_secs,
                };
                warn!(id = %invoice.id, "invoice overran its wall-clock budget");
                timeout_record(invoice, path, &stage)
            }
        };
        records.push(record);
    }

    Ok(records)
}

/// Route every page: text layer when sufficient, OCR otherwise.
async fn route_pages(
    document: &DocumentContent,
    cfg: &PipelineConfig,
    paths: &OutputPaths,
    file_stem: &str,
) -> Vec<RoutedPage> {
    let mut routed = Vec::with_capacity(document.pages.len());

    for page in &document.pages {
        let decision =
            routing::decide_page(&cfg.ocr_routing, page.page_no, &page.raw_text, &page.tokens);

        if decision.source == TokenSource::TextLayer {
            routed.push(RoutedPage {
                page_no: page.page_no,
                width: page.width,
                height: page.height,
                source: TokenSource::TextLayer,
                tokens: page.tokens.clone(),
                ocr_metrics: None,
                decision,
            });
            continue;
        }

        match ocr_page(document, page.page_no, cfg, paths, file_stem).await {
            Ok((tokens, metrics)) => {
                let decision = match &metrics {
                    Some(m) => routing::with_ocr_metrics(decision, m),
                    None => decision,
                };
                routed.push(RoutedPage {
                    page_no: page.page_no,
                    width: page.width,
                    height: page.height,
                    source: TokenSource::Ocr,
                    tokens,
                    ocr_metrics: metrics,
                    decision,
                });
            }
            Err(stage) => {
                // OCR failed: downgrade to the text layer and say so.
                warn!(page = page.page_no, error = %stage, "OCR failed; downgrading to text layer");
                let mut decision = decision;
                decision.source = TokenSource::TextLayer;
                decision.reason_flags.push("ocr_failed_downgrade".to_string());
                routed.push(RoutedPage {
                    page_no: page.page_no,
                    width: page.width,
                    height: page.height,
                    source: TokenSource::TextLayer,
                    tokens: page.tokens.clone(),
                    ocr_metrics: None,
                    decision,
                });
            }
        }
    }

    routed
}

/// OCR one page at the baseline DPI, re-rendering once at the retry DPI
/// when mean confidence is poor.
async fn ocr_page(
    document: &DocumentContent,
    page_no: u32,
    cfg: &PipelineConfig,
    paths: &OutputPaths,
    file_stem: &str,
) -> Result<(Vec<crate::model::Token>, Option<crate::model::OcrPageMetrics>), StageError> {
    let page_index = page_no - 1;
    let (image_path, _) = render::render_to_artifact(
        &document.path,
        file_stem,
        page_index,
        cfg.dpi.baseline,
        &paths.pages_dir,
    )
    .await?;

    let first = ocr::tokenize_page(&image_path, page_no, cfg.dpi.baseline, &cfg.ocr_language).await?;

    let needs_retry = first
        .metrics
        .map(|m| m.mean_conf < cfg.dpi.ocr_mean_retry_threshold)
        .unwrap_or(false)
        && cfg.dpi.max_retries_per_page > 0
        && cfg.dpi.retry > cfg.dpi.baseline;

    if !needs_retry {
        return Ok((first.tokens, first.metrics));
    }

    info!(page = page_no, dpi = cfg.dpi.retry, "mean OCR confidence poor; retrying render");
    let (retry_path, _) = render::render_to_artifact(
        &document.path,
        file_stem,
        page_index,
        cfg.dpi.retry,
        &paths.pages_dir,
    )
    .await?;
    match ocr::tokenize_page(&retry_path, page_no, cfg.dpi.retry, &cfg.ocr_language).await {
        Ok(second) => {
            let first_mean = first.metrics.map(|m| m.mean_conf).unwrap_or(0.0);
            let second_mean = second.metrics.map(|m| m.mean_conf).unwrap_or(0.0);
            if second_mean > first_mean {
                Ok((second.tokens, second.metrics))
            } else {
                Ok((first.tokens, first.metrics))
            }
        }
        Err(_) => Ok((first.tokens, first.metrics)),
    }
}

// ── Per-invoice processing ───────────────────────────────────────────────

/// Extract one virtual invoice end-to-end.
#[allow(clippy::too_many_arguments)]
async fn process_invoice(
    invoice: &VirtualInvoice,
    document: &DocumentContent,
    routed: &[RoutedPage],
    cfg: &PipelineConfig,
    paths: &OutputPaths,
    calibrator: &Calibrator,
    provider: Option<&dyn AiProvider>,
) -> InvoiceRecord {
    let invoice_pages: Vec<&RoutedPage> = routed
        .iter()
        .filter(|p| p.page_no >= invoice.start_page && p.page_no <= invoice.end_page)
        .collect();

    let prepared: Vec<PreparedPage> = invoice_pages
        .iter()
        .map(|page| {
            let page_rows = rows::group_rows(&page.tokens);
            let page_segments = segments::identify(&page_rows, page.height);
            PreparedPage {
                page_no: page.page_no,
                width: page.width,
                height: page.height,
                rows: page_rows,
                segments: page_segments,
            }
        })
        .collect();

    let used_ocr = invoice_pages.iter().any(|p| p.source == TokenSource::Ocr);
    let mut builder = header::extract(&prepared, calibrator);
    builder.extraction_source(if used_ocr {
        ExtractionSource::Ocr
    } else {
        ExtractionSource::Text
    });

    // AI fallback, total field only.
    let mut vision_reason: Option<Vec<String>> = None;
    let mut ai_warning: Option<String> = None;
    if let Some(provider) = provider {
        if cfg.ai.enabled && builder.total_conf() < cfg.ai.threshold {
            let (reason, outcome) =
                run_ai_fallback(invoice, document, &invoice_pages, &prepared, cfg, paths, provider)
                    .await;
            match outcome {
                Ok(ai_outcome) => {
                    if let Some(total) = ai_outcome.total_amount {
                        builder.offer_total(total, AI_RESULT_CONF, None);
                    }
                    builder.extraction_source(if ai_outcome.used_vision {
                        ExtractionSource::AiVision
                    } else {
                        ExtractionSource::AiText
                    });
                    if ai_outcome.used_vision {
                        vision_reason = Some(reason);
                    }
                }
                Err(stage) => {
                    ai_warning = Some(format!("{}: {}", stage.kind(), stage));
                }
            }
        }
    }

    let header = builder.seal();

    // Line items, footer totals, validation.
    let block = table::delimit_block(&prepared);
    let footer_totals = footer::extract(&prepared);
    let driven = validate::drive_parse(&block, &footer_totals, cfg.table_parser_mode, &cfg.validation);
    let mut validation = validate::run(&header, &driven.outcome.lines, &footer_totals, &cfg.validation);

    validation.warnings.extend(driven.outcome.warnings.clone());
    for flag in &driven.outcome.flags {
        validation.warnings.push(format!("Parser flag: {flag}"));
    }
    if let Some(w) = ai_warning {
        validation.warnings.push(w);
    }

    if driven.needs_debug_dump {
        validation.status = ValidationStatus::Review;
        validation
            .errors
            .push("Net-sum validation failed in both parser modes".to_string());
        let debug_dir = paths.invoices_dir.join(&invoice.id).join("table_debug");
        if let Err(e) =
            validate::dump_debug_artifacts(&debug_dir, &block, &driven.outcome.lines, &validation)
        {
            warn!(id = %invoice.id, error = %e, "debug artifact dump failed");
        }
    }

    let detail = build_detail(&header, &invoice_pages, vision_reason);
    let routing_decisions = invoice_pages.iter().map(|p| p.decision.clone()).collect();

    assemble::assemble(
        invoice,
        &document.path,
        header,
        driven.outcome.lines,
        validation,
        detail,
        routing_decisions,
    )
}

/// Decide vision vs text, gather excerpts, render if needed, call the
/// provider. Returns the vision-reason flags alongside the outcome.
async fn run_ai_fallback(
    invoice: &VirtualInvoice,
    document: &DocumentContent,
    invoice_pages: &[&RoutedPage],
    prepared: &[PreparedPage],
    cfg: &PipelineConfig,
    paths: &OutputPaths,
    provider: &dyn AiProvider,
) -> (Vec<String>, Result<ai::AiOutcome, StageError>) {
    let mut reason = Vec::new();
    if let Some(first) = invoice_pages.first() {
        if first.decision.text_quality < VISION_TEXT_QUALITY {
            reason.push(format!("pdf_text_quality<{VISION_TEXT_QUALITY}"));
        }
        if let Some(m) = first.ocr_metrics {
            if m.median_conf < VISION_MEDIAN_CONF {
                reason.push(format!("ocr_median_conf<{VISION_MEDIAN_CONF}"));
            }
        }
    }

    let excerpts = total_candidate_excerpts(prepared);
    let prompt = ai::build_total_prompt(&excerpts);

    let image = if reason.is_empty() {
        None
    } else {
        match render::render_to_artifact(
            &document.path,
            &invoice.id,
            invoice.start_page - 1,
            cfg.dpi.baseline,
            &paths.pages_dir,
        )
        .await
        {
            Ok((_, png)) => match ai::prepare_image(&png, &cfg.vision) {
                Ok(prepared_image) => Some(prepared_image),
                Err(e) => {
                    warn!(error = %e, "vision image preparation failed; falling back to text");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "render for vision failed; falling back to text");
                None
            }
        }
    };

    let outcome = ai::recover_total(provider, &cfg.ai, &prompt, image.as_ref()).await;
    (reason, outcome)
}

/// Footer-area rows most likely to contain the total, newest last.
fn total_candidate_excerpts(prepared: &[PreparedPage]) -> Vec<String> {
    let Some(last) = prepared.last() else {
        return Vec::new();
    };
    let mut excerpts: Vec<String> = segments::rows_of_kind(&last.segments, crate::model::SegmentKind::Footer)
        .iter()
        .map(|r| r.text.clone())
        .collect();
    if excerpts.is_empty() {
        excerpts = last.rows.iter().rev().take(8).map(|r| r.text.clone()).collect();
        excerpts.reverse();
    }
    excerpts.truncate(12);
    excerpts
}

fn build_detail(
    header: &crate::model::InvoiceHeader,
    invoice_pages: &[&RoutedPage],
    vision_reason: Option<Vec<String>>,
) -> ExtractionDetail {
    let first_text_page = invoice_pages
        .iter()
        .find(|p| p.source == TokenSource::TextLayer);
    let first_ocr_page = invoice_pages.iter().find(|p| p.source == TokenSource::Ocr);

    ExtractionDetail {
        method_used: header.extraction_source,
        pdf_text_quality: first_text_page
            .or(invoice_pages.first())
            .map(|p| p.decision.text_quality),
        ocr_text_quality: first_ocr_page.map(|p| {
            let joined = p
                .tokens
                .iter()
                .map(|t| t.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            routing::text_quality(&joined, &p.tokens, p.ocr_metrics.as_ref())
        }),
        ocr_median_conf: first_ocr_page.and_then(|p| p.ocr_metrics.map(|m| m.median_conf)),
        vision_reason,
    }
}

/// REVIEW record for an invoice that overran its budget or died mid-stage.
fn timeout_record(invoice: &VirtualInvoice, path: &Path, stage: &StageError) -> InvoiceRecord {
    let mut builder = crate::model::InvoiceHeaderBuilder::new();
    builder.extraction_source(ExtractionSource::Text);
    let header = builder.seal();

    InvoiceRecord {
        id: invoice.id.clone(),
        source_path: path.to_path_buf(),
        index: invoice.index,
        start_page: invoice.start_page,
        end_page: invoice.end_page,
        header,
        lines: Vec::new(),
        validation: ValidationResult {
            status: ValidationStatus::Review,
            lines_sum: Decimal::ZERO,
            diff: None,
            tolerance: Decimal::ONE,
            hard_gate_pass: false,
            invoice_number_conf: 0.0,
            total_conf: 0.0,
            errors: vec![format!("{}: {stage}", stage.kind())],
            warnings: Vec::new(),
        },
        detail: ExtractionDetail {
            method_used: ExtractionSource::Text,
            pdf_text_quality: None,
            ocr_text_quality: None,
            ocr_median_conf: None,
            vision_reason: None,
        },
        routing: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_rejects_missing_path() {
        let err = discover_inputs(Path::new("/nonexistent/nowhere")).unwrap_err();
        assert!(matches!(err, FakturaError::InputNotFound { .. }));
    }

    #[test]
    fn discover_lists_pdfs_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.PDF", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let files = discover_inputs(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);
    }

    #[test]
    fn discover_rejects_pdf_free_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let err = discover_inputs(dir.path()).unwrap_err();
        assert!(matches!(err, FakturaError::NoPdfFiles { .. }));
    }

    #[test]
    fn output_paths_create_the_layout() {
        let dir = tempfile::tempdir().unwrap();
        let paths = OutputPaths::prepare(dir.path()).unwrap();
        assert!(paths.review_dir.is_dir());
        assert!(paths.pages_dir.is_dir());
        assert!(paths.invoices_dir.is_dir());
        assert!(paths
            .spreadsheet
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("invoices_"));
    }

    #[test]
    fn timeout_record_is_review_with_kind_tag() {
        let invoice = VirtualInvoice {
            index: 2,
            start_page: 3,
            end_page: 4,
            id: "f__2".into(),
        };
        let stage = StageError::ExtractionTimeout { secs: 120 };
        let record = timeout_record(&invoice, Path::new("/data/f.pdf"), &stage);
        assert_eq!(record.validation.status, ValidationStatus::Review);
        assert_eq!(record.validation.errors.len(), 1);
        assert!(record.validation.errors[0].starts_with("ExtractionTimeout:"));
        assert_eq!(record.index, 2);
    }
}
