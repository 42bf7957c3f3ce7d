//! Validator: sums, gates, status classification and the mode-B
//! re-extraction driver.
//!
//! Status assignment is ordered and first-match-wins:
//!
//! 1. hard gate failed, no header total, or no lines ⇒ REVIEW
//! 2. |header total − lines sum| within tolerance ⇒ OK
//! 3. otherwise ⇒ PARTIAL
//!
//! Separately from the status, two finer gates drive the parser-mode
//! feedback loop: VAL-01 checks the lines sum against the footer net total
//! and VAL-02 checks net × 1.25 against the amount to pay. When text-mode
//! parsing fails VAL-01 in auto mode, the positional parser gets one shot;
//! if neither mode satisfies the gates, the invoice keeps the text-mode
//! lines, goes to REVIEW, and a debug artifact bundle is written for
//! offline diagnosis.

use crate::config::{TableParserMode, ValidationConfig};
use crate::model::{InvoiceHeader, InvoiceLine, ValidationResult, ValidationStatus};
use crate::pipeline::columns;
use crate::pipeline::footer::FooterTotals;
use crate::pipeline::table::{self, ParseOutcome, TableBlock};
use rust_decimal::Decimal;
use serde_json::json;
use std::path::Path;
use tracing::{debug, info, warn};

/// Calibrated-confidence threshold both header fields must reach for OK.
pub const HARD_GATE: f64 = 0.95;

/// VAT multiplier for the to-pay cross-check.
fn vat_factor() -> Decimal {
    Decimal::new(125, 2)
}

fn dec_from_f64(x: f64) -> Decimal {
    Decimal::from_f64_retain(x).unwrap_or_default().round_dp(4)
}

/// Format a tolerance for warning strings: `1.0`, `0.5`, `0.75`.
fn fmt_tolerance(t: f64) -> String {
    if t == t.trunc() {
        format!("{t:.1}")
    } else {
        format!("{t}")
    }
}

// ── Core validation ──────────────────────────────────────────────────────

/// Validate an invoice's header against its parsed lines and classify it.
pub fn run(
    header: &InvoiceHeader,
    lines: &[InvoiceLine],
    footer: &FooterTotals,
    cfg: &ValidationConfig,
) -> ValidationResult {
    let lines_sum: Decimal = lines.iter().map(|l| l.total_amount).sum();
    let tolerance = dec_from_f64(cfg.tolerance);

    let diff = header.total_amount.map(|total| total - lines_sum);
    let hard_gate_pass = header.hard_gate_pass();

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let status = if !hard_gate_pass || header.total_amount.is_none() || lines.is_empty() {
        if !hard_gate_pass {
            errors.push(format!(
                "Hard gate failed: invoice_number_conf={:.2}, total_conf={:.2}",
                header.invoice_number_conf, header.total_conf
            ));
        }
        if header.total_amount.is_none() {
            errors.push(format!(
                "Total amount not extracted (confidence < {HARD_GATE})"
            ));
        }
        if lines.is_empty() {
            errors.push("No invoice lines extracted".to_string());
        }
        ValidationStatus::Review
    } else if diff.map_or(false, |d| d.abs() <= tolerance) {
        ValidationStatus::Ok
    } else {
        if let Some(d) = diff {
            warnings.push(format!(
                "Sum mismatch: diff={} SEK (tolerance: ±{} SEK)",
                d,
                fmt_tolerance(cfg.tolerance)
            ));
        }
        ValidationStatus::Partial
    };

    warnings.extend(line_arithmetic_warnings(lines));

    let _ = footer; // footer gates are checked by the driver, not here

    debug!(?status, %lines_sum, ?diff, "validation complete");

    ValidationResult {
        status,
        lines_sum,
        diff,
        tolerance,
        hard_gate_pass,
        invoice_number_conf: header.invoice_number_conf,
        total_conf: header.total_conf,
        errors,
        warnings,
    }
}

/// Per-line arithmetic check: quantity × unit price should reproduce the
/// line total (minus any recorded discount).
fn line_arithmetic_warnings(lines: &[InvoiceLine]) -> Vec<String> {
    let epsilon = Decimal::new(1, 2); // 0.01
    let mut out = Vec::new();
    for line in lines {
        let (Some(q), Some(p)) = (line.quantity, line.unit_price) else {
            continue;
        };
        let expected = q * p - line.discount.unwrap_or_default();
        let delta = (expected - line.total_amount).round_dp(2);
        if delta.abs() > epsilon {
            out.push(format!(
                "Row {}: quantity×unit_price ≠ total (Δ={delta})",
                line.line_number
            ));
        }
    }
    out
}

// ── VAL-01 / VAL-02 gates ────────────────────────────────────────────────

/// VAL-01: lines sum vs footer net total, within `tolerance_net`.
pub fn val01(lines: &[InvoiceLine], footer: &FooterTotals, cfg: &ValidationConfig) -> Option<bool> {
    let net = footer.net_value()?;
    let sum: Decimal = lines.iter().map(|l| l.total_amount).sum();
    Some((sum - net).abs() <= dec_from_f64(cfg.tolerance_net))
}

/// VAL-02: lines sum × 1.25 vs the amount to pay, within `tolerance_pay`.
pub fn val02(lines: &[InvoiceLine], footer: &FooterTotals, cfg: &ValidationConfig) -> Option<bool> {
    let to_pay = footer.to_pay_value()?;
    let sum: Decimal = lines.iter().map(|l| l.total_amount).sum();
    Some((sum * vat_factor() - to_pay).abs() <= dec_from_f64(cfg.tolerance_pay))
}

/// Acceptance gate for a re-extraction: VAL-01 decides when the footer net
/// is known; VAL-02 substitutes when only the to-pay amount exists; with
/// neither there is no signal to reject on.
fn gates_pass(lines: &[InvoiceLine], footer: &FooterTotals, cfg: &ValidationConfig) -> bool {
    val01(lines, footer, cfg)
        .or_else(|| val02(lines, footer, cfg))
        .unwrap_or(true)
}

// ── Parser-mode driver ───────────────────────────────────────────────────

/// Which parser produced the final lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserModeUsed {
    Text,
    Positional,
}

/// Outcome of the validation-driven parse.
#[derive(Debug)]
pub struct DrivenParse {
    pub outcome: ParseOutcome,
    pub mode_used: ParserModeUsed,
    /// Set when both modes failed the gates; the caller dumps the debug
    /// artifact bundle.
    pub needs_debug_dump: bool,
}

/// Parse the table block under the configured mode policy, re-extracting
/// positionally when text mode fails the net-sum gate.
pub fn drive_parse(
    block: &TableBlock,
    footer: &FooterTotals,
    mode: TableParserMode,
    cfg: &ValidationConfig,
) -> DrivenParse {
    match mode {
        TableParserMode::Text => DrivenParse {
            outcome: table::parse_mode_a(block),
            mode_used: ParserModeUsed::Text,
            needs_debug_dump: false,
        },
        TableParserMode::Pos => match columns::parse_mode_b(block) {
            Some(outcome) => DrivenParse {
                outcome,
                mode_used: ParserModeUsed::Positional,
                needs_debug_dump: false,
            },
            // Column detection failed outright: text-mode results stand.
            None => DrivenParse {
                outcome: table::parse_mode_a(block),
                mode_used: ParserModeUsed::Text,
                needs_debug_dump: false,
            },
        },
        TableParserMode::Auto => {
            let mode_a = table::parse_mode_a(block);
            if val01(&mode_a.lines, footer, cfg).unwrap_or(true) {
                return DrivenParse {
                    outcome: mode_a,
                    mode_used: ParserModeUsed::Text,
                    needs_debug_dump: false,
                };
            }
            info!("text-mode lines fail net-sum gate; trying positional mode");

            match columns::parse_mode_b(block) {
                Some(mode_b) if gates_pass(&mode_b.lines, footer, cfg) => {
                    info!(lines = mode_b.lines.len(), "positional mode passed the gates");
                    DrivenParse {
                        outcome: mode_b,
                        mode_used: ParserModeUsed::Positional,
                        needs_debug_dump: false,
                    }
                }
                _ => {
                    warn!("both parser modes fail the net-sum gates");
                    DrivenParse {
                        outcome: mode_a,
                        mode_used: ParserModeUsed::Text,
                        needs_debug_dump: true,
                    }
                }
            }
        }
    }
}

// ── Debug artifacts ──────────────────────────────────────────────────────

/// Write the table-debug bundle for an invoice whose lines failed
/// validation in both modes:
///
/// ```text
/// <dir>/table_block_raw_text.txt
/// <dir>/parsed_lines.json
/// <dir>/validation_result.json
/// <dir>/table_block_tokens.json
/// ```
pub fn dump_debug_artifacts(
    dir: &Path,
    block: &TableBlock,
    lines: &[InvoiceLine],
    validation: &ValidationResult,
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;

    std::fs::write(dir.join("table_block_raw_text.txt"), block.raw_text())?;
    std::fs::write(
        dir.join("parsed_lines.json"),
        serde_json::to_vec_pretty(lines)?,
    )?;
    std::fs::write(
        dir.join("validation_result.json"),
        serde_json::to_vec_pretty(validation)?,
    )?;

    let tokens = json!(block
        .rows
        .iter()
        .map(|row| json!({ "y": row.y, "text": row.text, "tokens": row.tokens }))
        .collect::<Vec<_>>());
    std::fs::write(
        dir.join("table_block_tokens.json"),
        serde_json::to_vec_pretty(&tokens)?,
    )?;

    info!(dir = %dir.display(), "wrote table debug artifacts");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExtractionSource, InvoiceHeaderBuilder};
    use rust_decimal_macros::dec;

    fn header(number_conf: f64, total: Option<Decimal>, total_conf: f64) -> InvoiceHeader {
        let mut b = InvoiceHeaderBuilder::new();
        b.offer_invoice_number("123456".to_string(), number_conf, None);
        if let Some(t) = total {
            b.offer_total(t, total_conf, None);
        }
        b.extraction_source(ExtractionSource::Text);
        b.seal()
    }

    fn line(n: u32, total: Decimal) -> InvoiceLine {
        InvoiceLine {
            line_number: n,
            description: format!("rad {n}"),
            quantity: None,
            unit: None,
            unit_price: None,
            discount: None,
            total_amount: total,
            vat_rate: Some(dec!(25.00)),
            source_rows: vec![],
        }
    }

    #[test]
    fn gates_pass_and_sums_match_gives_ok() {
        let h = header(0.98, Some(dec!(400.00)), 0.97);
        let lines = vec![
            line(1, dec!(100.00)),
            line(2, dec!(250.50)),
            line(3, dec!(49.50)),
        ];
        let result = run(&h, &lines, &FooterTotals::default(), &ValidationConfig::default());
        assert_eq!(result.status, ValidationStatus::Ok);
        assert_eq!(result.lines_sum, dec!(400.00));
        assert_eq!(result.diff, Some(dec!(0.00)));
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn sum_drift_gives_partial_with_warning() {
        let h = header(0.96, Some(dec!(415.50)), 0.99);
        let lines = vec![
            line(1, dec!(100.00)),
            line(2, dec!(250.50)),
            line(3, dec!(49.50)),
        ];
        let result = run(&h, &lines, &FooterTotals::default(), &ValidationConfig::default());
        assert_eq!(result.status, ValidationStatus::Partial);
        assert_eq!(result.diff, Some(dec!(15.50)));
        assert!(result
            .warnings
            .contains(&"Sum mismatch: diff=15.50 SEK (tolerance: ±1.0 SEK)".to_string()));
    }

    #[test]
    fn missing_total_gives_review_with_both_errors() {
        let h = header(0.98, None, 0.0);
        let lines = vec![line(1, dec!(100.00))];
        let result = run(&h, &lines, &FooterTotals::default(), &ValidationConfig::default());
        assert_eq!(result.status, ValidationStatus::Review);
        assert_eq!(result.lines_sum, dec!(100.00));
        assert_eq!(result.diff, None);
        assert!(result
            .errors
            .contains(&"Hard gate failed: invoice_number_conf=0.98, total_conf=0.00".to_string()));
        assert!(result
            .errors
            .contains(&"Total amount not extracted (confidence < 0.95)".to_string()));
    }

    #[test]
    fn no_lines_gives_review() {
        let h = header(0.99, Some(dec!(500.00)), 0.99);
        let result = run(&h, &[], &FooterTotals::default(), &ValidationConfig::default());
        assert_eq!(result.status, ValidationStatus::Review);
        assert_eq!(result.lines_sum, dec!(0.00));
        assert_eq!(result.diff, Some(dec!(500.00)));
        assert!(result
            .errors
            .contains(&"No invoice lines extracted".to_string()));
    }

    #[test]
    fn reducing_confidence_below_gate_breaks_ok() {
        let lines = vec![line(1, dec!(400.00))];
        let passing = header(0.95, Some(dec!(400.00)), 0.95);
        assert_eq!(
            run(&passing, &lines, &FooterTotals::default(), &ValidationConfig::default()).status,
            ValidationStatus::Ok
        );
        let failing = header(0.949, Some(dec!(400.00)), 0.95);
        assert_eq!(
            run(&failing, &lines, &FooterTotals::default(), &ValidationConfig::default()).status,
            ValidationStatus::Review
        );
    }

    #[test]
    fn val01_checks_against_footer_net() {
        let cfg = ValidationConfig::default();
        let lines = vec![line(1, dec!(1072.60))];
        let footer = FooterTotals {
            net: Some((dec!(1672.60), None)),
            to_pay: None,
        };
        assert_eq!(val01(&lines, &footer, &cfg), Some(false));

        let matching = FooterTotals {
            net: Some((dec!(1072.70), None)),
            to_pay: None,
        };
        // 0.10 off: within the 0.50 net tolerance.
        assert_eq!(val01(&lines, &matching, &cfg), Some(true));
        assert_eq!(val01(&lines, &FooterTotals::default(), &cfg), None);
    }

    #[test]
    fn val02_applies_vat_factor() {
        let cfg = ValidationConfig::default();
        let lines = vec![line(1, dec!(1000.00))];
        let footer = FooterTotals {
            net: None,
            to_pay: Some((dec!(1250.00), None)),
        };
        assert_eq!(val02(&lines, &footer, &cfg), Some(true));

        let off = FooterTotals {
            net: None,
            to_pay: Some((dec!(1251.00), None)),
        };
        assert_eq!(val02(&lines, &off, &cfg), Some(false));
    }

    #[test]
    fn line_arithmetic_mismatch_warns() {
        let mut l = line(3, dec!(100.00));
        l.quantity = Some(dec!(2.00));
        l.unit_price = Some(dec!(45.00));
        let warnings = line_arithmetic_warnings(&[l]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Row 3: quantity×unit_price ≠ total"));
    }

    #[test]
    fn line_arithmetic_respects_discount() {
        let mut l = line(1, dec!(90.00));
        l.quantity = Some(dec!(2.00));
        l.unit_price = Some(dec!(50.00));
        l.discount = Some(dec!(10.00));
        assert!(line_arithmetic_warnings(&[l]).is_empty());
    }

    #[test]
    fn debug_artifacts_written_on_double_failure() {
        let dir = tempfile::tempdir().unwrap();
        let block = TableBlock {
            rows: vec![],
            header_row: None,
            page_width: 595.0,
            flags: vec![],
        };
        let h = header(0.99, Some(dec!(100.00)), 0.99);
        let result = run(&h, &[], &FooterTotals::default(), &ValidationConfig::default());
        let debug_dir = dir.path().join("table_debug");
        dump_debug_artifacts(&debug_dir, &block, &[], &result).unwrap();
        for name in [
            "table_block_raw_text.txt",
            "parsed_lines.json",
            "validation_result.json",
            "table_block_tokens.json",
        ] {
            assert!(debug_dir.join(name).exists(), "{name} missing");
        }
    }
}
