//! Review-package writer: a self-contained folder per REVIEW invoice.
//!
//! Each package holds a copy of the original PDF plus `metadata.json` with
//! everything an operator needs to resolve the invoice by hand: the full
//! header (traceability included), the validation outcome and a timestamp.
//! Nothing in the package references run-local paths, so it can be zipped
//! and mailed as-is.

use crate::model::InvoiceRecord;
use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Write the review package for one invoice. Returns the package directory.
pub fn write_package(review_root: &Path, record: &InvoiceRecord) -> io::Result<PathBuf> {
    let dir = review_root.join(&record.id);
    std::fs::create_dir_all(&dir)?;

    // (a) copy of the original PDF, named after the invoice id.
    let pdf_target = dir.join(format!("{}.pdf", record.id));
    if record.source_path.exists() {
        std::fs::copy(&record.source_path, &pdf_target)?;
    }

    // (b) structured metadata. Traceability fields serialise as null when
    // absent.
    let metadata = json!({
        "invoice_header": record.header,
        "validation": {
            "status": record.validation.status,
            "lines_sum": record.validation.lines_sum,
            "diff": record.validation.diff,
            "tolerance": record.validation.tolerance,
            "hard_gate_pass": record.validation.hard_gate_pass,
            "invoice_number_conf": record.validation.invoice_number_conf,
            "total_conf": record.validation.total_conf,
            "errors": record.validation.errors,
            "warnings": record.validation.warnings,
            "line_count": record.lines.len(),
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    std::fs::write(
        dir.join("metadata.json"),
        serde_json::to_vec_pretty(&metadata)?,
    )?;

    info!(dir = %dir.display(), "review package written");
    Ok(dir)
}
