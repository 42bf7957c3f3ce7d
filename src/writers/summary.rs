//! Run summary and per-file failure records.
//!
//! One `run_summary.json` per batch: totals, per-status counts and a
//! per-invoice extraction-detail entry (method, qualities, routing table).
//! Catastrophic per-file failures land as individual JSON files under
//! `errors/` so a crashed file never disappears from the audit trail.

use crate::model::{
    InvoiceRecord, InvoiceSummaryEntry, OutputPathsSummary, RunSummary, ValidationStatus,
};
use serde_json::json;
use std::io;
use std::path::Path;
use tracing::info;

/// A file the batch could not process at all.
#[derive(Debug, Clone)]
pub struct FailedFile {
    pub path: std::path::PathBuf,
    pub error: String,
}

/// Build the run summary from the collected records.
pub fn build_summary(
    total_files: usize,
    records: &[InvoiceRecord],
    failed: &[FailedFile],
    paths: OutputPathsSummary,
) -> RunSummary {
    let count = |status: ValidationStatus| {
        records
            .iter()
            .filter(|r| r.validation.status == status)
            .count()
    };

    RunSummary {
        total_files,
        total_invoices: records.len(),
        ok: count(ValidationStatus::Ok),
        partial: count(ValidationStatus::Partial),
        review: count(ValidationStatus::Review),
        failed: failed.len(),
        extraction_details: records
            .iter()
            .map(|r| InvoiceSummaryEntry {
                invoice_id: r.id.clone(),
                status: r.validation.status,
                detail: r.detail.clone(),
                page_routing: r.routing.clone(),
            })
            .collect(),
        output_paths: paths,
    }
}

/// Write `run_summary.json`.
pub fn write_summary(summary: &RunSummary, path: &Path) -> io::Result<()> {
    std::fs::write(path, serde_json::to_vec_pretty(summary)?)?;
    info!(path = %path.display(), "run summary written");
    Ok(())
}

/// Write one JSON record per failed file under `errors/`.
pub fn write_failures(failures: &[FailedFile], errors_dir: &Path) -> io::Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(errors_dir)?;
    for failure in failures {
        let stem = failure
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        let record = json!({
            "file": failure.path,
            "error": failure.error,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        std::fs::write(
            errors_dir.join(format!("{stem}.json")),
            serde_json::to_vec_pretty(&record)?,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ExtractionDetail, ExtractionSource, InvoiceHeaderBuilder, ValidationResult,
    };
    use rust_decimal::Decimal;

    fn record(id: &str, status: ValidationStatus) -> InvoiceRecord {
        let mut b = InvoiceHeaderBuilder::new();
        b.extraction_source(ExtractionSource::Text);
        InvoiceRecord {
            id: id.into(),
            source_path: "/data/x.pdf".into(),
            index: 1,
            start_page: 1,
            end_page: 1,
            header: b.seal(),
            lines: vec![],
            validation: ValidationResult {
                status,
                lines_sum: Decimal::ZERO,
                diff: None,
                tolerance: Decimal::ONE,
                hard_gate_pass: false,
                invoice_number_conf: 0.0,
                total_conf: 0.0,
                errors: vec![],
                warnings: vec![],
            },
            detail: ExtractionDetail {
                method_used: ExtractionSource::Text,
                pdf_text_quality: Some(0.8),
                ocr_text_quality: None,
                ocr_median_conf: None,
                vision_reason: None,
            },
            routing: vec![],
        }
    }

    fn paths() -> OutputPathsSummary {
        OutputPathsSummary {
            spreadsheet: "/out/invoices.xlsx".into(),
            review_dir: "/out/review".into(),
            artifacts_dir: "/out/artifacts".into(),
        }
    }

    #[test]
    fn counts_per_status() {
        let records = vec![
            record("a__1", ValidationStatus::Ok),
            record("a__2", ValidationStatus::Ok),
            record("b__1", ValidationStatus::Partial),
            record("c__1", ValidationStatus::Review),
        ];
        let failed = vec![FailedFile {
            path: "/data/broken.pdf".into(),
            error: "CorruptPdf".into(),
        }];
        let summary = build_summary(4, &records, &failed, paths());
        assert_eq!(summary.total_invoices, 4);
        assert_eq!(summary.ok, 2);
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.review, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.extraction_details.len(), 4);
    }

    #[test]
    fn summary_serialises_with_details() {
        let summary = build_summary(1, &[record("a__1", ValidationStatus::Ok)], &[], paths());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_summary.json");
        write_summary(&summary, &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["total_files"], 1);
        assert_eq!(value["extraction_details"][0]["invoice_id"], "a__1");
        assert_eq!(value["extraction_details"][0]["method_used"], "text");
    }

    #[test]
    fn failures_written_as_individual_files() {
        let dir = tempfile::tempdir().unwrap();
        let errors_dir = dir.path().join("errors");
        write_failures(
            &[FailedFile {
                path: "/data/broken.pdf".into(),
                error: "CorruptPdf: bad xref".into(),
            }],
            &errors_dir,
        )
        .unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(errors_dir.join("broken.json")).unwrap())
                .unwrap();
        assert_eq!(value["error"], "CorruptPdf: bad xref");
    }
}
