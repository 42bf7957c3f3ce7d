//! Result assembler: collect one invoice's parts into the hand-off record
//! the writers consume, and render the per-invoice status line.

use crate::model::{
    ExtractionDetail, InvoiceHeader, InvoiceLine, InvoiceRecord, PageRoutingDecision,
    ValidationResult, ValidationStatus, VirtualInvoice,
};
use std::path::Path;

/// Assemble the final record for one virtual invoice.
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    invoice: &VirtualInvoice,
    source_path: &Path,
    header: InvoiceHeader,
    lines: Vec<InvoiceLine>,
    validation: ValidationResult,
    detail: ExtractionDetail,
    routing: Vec<PageRoutingDecision>,
) -> InvoiceRecord {
    InvoiceRecord {
        id: invoice.id.clone(),
        source_path: source_path.to_path_buf(),
        index: invoice.index,
        start_page: invoice.start_page,
        end_page: invoice.end_page,
        header,
        lines,
        validation,
        detail,
        routing,
    }
}

/// Per-invoice console line:
/// `[N/total] <file>[#index] → STATUS (extra) (R rader)`.
///
/// REVIEW lines carry the confidence pair, PARTIAL lines the diff.
pub fn status_line(position: usize, total: usize, record: &InvoiceRecord, multi: bool) -> String {
    let file = record
        .source_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| record.source_path.display().to_string());
    let source = if multi {
        format!("{file}#{}", record.index)
    } else {
        file
    };

    let extra = match record.validation.status {
        ValidationStatus::Review => Some(format!(
            "(inv_conf={:.2}, total_conf={:.2})",
            record.validation.invoice_number_conf, record.validation.total_conf
        )),
        ValidationStatus::Partial => record.validation.diff.map(|diff| format!("(Diff={diff} SEK)")),
        ValidationStatus::Ok => None,
    };

    let mut line = format!(
        "[{position}/{total}] {source} → {}",
        record.validation.status
    );
    if let Some(extra) = extra {
        line.push(' ');
        line.push_str(&extra);
    }
    line.push_str(&format!(" ({} rader)", record.lines.len()));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExtractionSource, InvoiceHeaderBuilder};
    use rust_decimal::Decimal;

    fn record(status: ValidationStatus, diff: Option<Decimal>, lines: usize) -> InvoiceRecord {
        let mut b = InvoiceHeaderBuilder::new();
        b.offer_invoice_number("123456".into(), 0.65, None);
        b.extraction_source(ExtractionSource::Text);
        let header = b.seal();

        InvoiceRecord {
            id: "inv__1".into(),
            source_path: "/data/inv.pdf".into(),
            index: 1,
            start_page: 1,
            end_page: 1,
            header,
            lines: (0..lines)
                .map(|i| InvoiceLine {
                    line_number: (i + 1) as u32,
                    description: String::new(),
                    quantity: None,
                    unit: None,
                    unit_price: None,
                    discount: None,
                    total_amount: Decimal::ZERO,
                    vat_rate: None,
                    source_rows: vec![],
                })
                .collect(),
            validation: ValidationResult {
                status,
                lines_sum: Decimal::ZERO,
                diff,
                tolerance: Decimal::ONE,
                hard_gate_pass: false,
                invoice_number_conf: 0.65,
                total_conf: 0.0,
                errors: vec![],
                warnings: vec![],
            },
            detail: ExtractionDetail {
                method_used: ExtractionSource::Text,
                pdf_text_quality: Some(0.9),
                ocr_text_quality: None,
                ocr_median_conf: None,
                vision_reason: None,
            },
            routing: vec![],
        }
    }

    #[test]
    fn ok_line_is_bare() {
        let r = record(ValidationStatus::Ok, Some(Decimal::ZERO), 5);
        assert_eq!(status_line(3, 14, &r, false), "[3/14] inv.pdf → OK (5 rader)");
    }

    #[test]
    fn review_line_carries_confidences() {
        let r = record(ValidationStatus::Review, None, 0);
        let line = status_line(1, 2, &r, false);
        assert!(line.contains("→ REVIEW"));
        assert!(line.contains("inv_conf=0.65"));
        assert!(line.contains("total_conf=0.00"));
        assert!(line.ends_with("(0 rader)"));
    }

    #[test]
    fn partial_line_carries_diff() {
        let r = record(
            ValidationStatus::Partial,
            Some(Decimal::new(1550, 2)),
            3,
        );
        let line = status_line(2, 2, &r, false);
        assert!(line.contains("Diff=15.50 SEK"), "{line}");
    }

    #[test]
    fn multi_invoice_files_show_the_index() {
        let r = record(ValidationStatus::Ok, Some(Decimal::ZERO), 1);
        let line = status_line(4, 14, &r, true);
        assert!(line.starts_with("[4/14] inv.pdf#1 →"), "{line}");
    }
}
