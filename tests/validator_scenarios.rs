//! End-to-end scenarios on synthetic token pages.
//!
//! Everything here runs the real pipeline stages — row grouping, segment
//! labelling, boundary detection, header extraction, table parsing in both
//! modes, footer totals and validation — on pages built directly from
//! positioned tokens, so no PDF engine or OCR binary is needed.

use fakturaflow::calibrate::Calibrator;
use fakturaflow::config::{TableParserMode, ValidationConfig};
use fakturaflow::model::{
    InvoiceHeaderBuilder, PageRoutingDecision, PreparedPage, RoutedPage, Token, TokenSource,
    ValidationStatus,
};
use fakturaflow::pipeline::validate::ParserModeUsed;
use fakturaflow::pipeline::{boundaries, footer, header, rows, segments, table, validate};
use fakturaflow::ExtractionSource;
use rust_decimal_macros::dec;

const PAGE_W: f64 = 595.0;
const PAGE_H: f64 = 842.0;

// ── Page construction helpers ────────────────────────────────────────────

/// Lay words out left-to-right at a given y, auto-advancing x.
fn tokens_for_line(line: &str, y: f64, page_no: u32) -> Vec<Token> {
    let mut x = 40.0;
    line.split_whitespace()
        .map(|word| {
            let w = word.chars().count() as f64 * 6.0;
            let t = Token {
                text: word.to_string(),
                x,
                y,
                w,
                h: 10.0,
                page_no,
                font_size: None,
                confidence: None,
            };
            x += w + 6.0;
            t
        })
        .collect()
}

fn prepared_page(lines: &[(&str, f64)], page_no: u32) -> PreparedPage {
    let tokens: Vec<Token> = lines
        .iter()
        .flat_map(|(line, y)| tokens_for_line(line, *y, page_no))
        .collect();
    let grouped = rows::group_rows(&tokens);
    let segs = segments::identify(&grouped, PAGE_H);
    PreparedPage {
        page_no,
        width: PAGE_W,
        height: PAGE_H,
        rows: grouped,
        segments: segs,
    }
}

/// A token placed at an explicit x position (for column-geometry tests).
fn at(word: &str, x: f64, y: f64) -> Token {
    Token {
        text: word.to_string(),
        x,
        y,
        w: word.chars().count() as f64 * 6.0,
        h: 10.0,
        page_no: 1,
        font_size: None,
        confidence: None,
    }
}

fn prepared_page_from_tokens(tokens: Vec<Token>, page_no: u32) -> PreparedPage {
    let grouped = rows::group_rows(&tokens);
    let segs = segments::identify(&grouped, PAGE_H);
    PreparedPage {
        page_no,
        width: PAGE_W,
        height: PAGE_H,
        rows: grouped,
        segments: segs,
    }
}

/// Run the text-mode invoice flow on prepared pages: header, table, footer,
/// validation.
fn run_invoice(
    pages: &[PreparedPage],
    mode: TableParserMode,
) -> (
    fakturaflow::InvoiceHeader,
    validate::DrivenParse,
    fakturaflow::ValidationResult,
) {
    let builder = header::extract(pages, &Calibrator::identity());
    let sealed = builder.seal();
    let block = table::delimit_block(pages);
    let totals = footer::extract(pages);
    let driven = validate::drive_parse(&block, &totals, mode, &ValidationConfig::default());
    let validation = validate::run(&sealed, &driven.outcome.lines, &totals, &ValidationConfig::default());
    (sealed, driven, validation)
}

// ── Scenario A: hard gate pass, sums match ───────────────────────────────

fn three_line_invoice(total_row: &str) -> PreparedPage {
    prepared_page(
        &[
            ("LEVERANTÖREN AB", 30.0),
            ("Fakturanummer: 1234567", 80.0),
            ("Fakturadatum 2024-03-01", 100.0),
            ("Artikelnr Benämning Antal Enhet Á-pris Moms Nettobelopp", 300.0),
            ("11111 Vara ett 1 st 100,00 25,00 100,00", 320.0),
            ("22222 Vara två 1 st 250,50 25,00 250,50", 340.0),
            ("33333 Vara tre 1 st 49,50 25,00 49,50", 360.0),
            (total_row, 800.0),
        ],
        1,
    )
}

#[test]
fn scenario_a_gate_pass_and_matching_sums_is_ok() {
    let page = three_line_invoice("Summa att betala 400,00");
    let (header, driven, validation) = run_invoice(&[page], TableParserMode::Auto);

    assert!(header.invoice_number_conf >= 0.95);
    assert!(header.total_conf >= 0.95);
    assert_eq!(header.total_amount, Some(dec!(400.00)));

    assert_eq!(driven.mode_used, ParserModeUsed::Text);
    assert!(!driven.needs_debug_dump);

    assert_eq!(validation.status, ValidationStatus::Ok);
    assert_eq!(validation.lines_sum, dec!(400.00));
    assert_eq!(validation.diff, Some(dec!(0.00)));
    assert!(validation.errors.is_empty());
    assert!(validation.warnings.is_empty());
}

// ── Scenario B: hard gate pass, sums drift ───────────────────────────────

#[test]
fn scenario_b_sum_drift_is_partial_with_exact_warning() {
    let page = three_line_invoice("Summa att betala 415,50");
    let (header, _, validation) = run_invoice(&[page], TableParserMode::Auto);

    assert!(header.hard_gate_pass());
    assert_eq!(validation.status, ValidationStatus::Partial);
    assert_eq!(validation.lines_sum, dec!(400.00));
    assert_eq!(validation.diff, Some(dec!(15.50)));
    assert!(
        validation
            .warnings
            .contains(&"Sum mismatch: diff=15.50 SEK (tolerance: ±1.0 SEK)".to_string()),
        "warnings: {:?}",
        validation.warnings
    );
}

// ── Scenario C: total missing ────────────────────────────────────────────

#[test]
fn scenario_c_missing_total_is_review_with_both_errors() {
    let mut builder = InvoiceHeaderBuilder::new();
    builder.offer_invoice_number("1234567".to_string(), 0.98, None);
    builder.extraction_source(ExtractionSource::Text);
    let header = builder.seal();

    let lines = vec![fakturaflow::InvoiceLine {
        line_number: 1,
        description: "Vara".into(),
        quantity: None,
        unit: None,
        unit_price: None,
        discount: None,
        total_amount: dec!(100.00),
        vat_rate: Some(dec!(25.00)),
        source_rows: vec![],
    }];

    let validation = validate::run(
        &header,
        &lines,
        &footer::FooterTotals::default(),
        &ValidationConfig::default(),
    );

    assert_eq!(validation.status, ValidationStatus::Review);
    assert_eq!(validation.lines_sum, dec!(100.00));
    assert_eq!(validation.diff, None);
    assert!(validation
        .errors
        .contains(&"Hard gate failed: invoice_number_conf=0.98, total_conf=0.00".to_string()));
    assert!(validation
        .errors
        .contains(&"Total amount not extracted (confidence < 0.95)".to_string()));
}

// ── Scenario D: no line items ────────────────────────────────────────────

#[test]
fn scenario_d_zero_lines_is_review() {
    let mut builder = InvoiceHeaderBuilder::new();
    builder.offer_invoice_number("1234567".to_string(), 0.99, None);
    builder.offer_total(dec!(500.00), 0.99, None);
    builder.extraction_source(ExtractionSource::Text);
    let header = builder.seal();

    let validation = validate::run(
        &header,
        &[],
        &footer::FooterTotals::default(),
        &ValidationConfig::default(),
    );

    assert_eq!(validation.status, ValidationStatus::Review);
    assert_eq!(validation.lines_sum, dec!(0.00));
    assert_eq!(validation.diff, Some(dec!(500.00)));
    assert!(validation
        .errors
        .contains(&"No invoice lines extracted".to_string()));
}

// ── Scenarios E & F: validation-driven re-extraction ─────────────────────

/// Five logical items; one row lacks its VAT token in the text, so text
/// mode finds four items while the positional columns still hold all five.
fn irregular_invoice_page(include_fifth_netto: bool) -> PreparedPage {
    let mut tokens = Vec::new();
    tokens.extend(tokens_for_line("Fakturanummer: 7654321", 80.0, 1));

    // Column header at explicit positions.
    for t in [
        at("Artikelnr", 40.0, 300.0),
        at("Benämning", 110.0, 300.0),
        at("Antal", 250.0, 300.0),
        at("Enhet", 310.0, 300.0),
        at("Moms", 380.0, 300.0),
        at("Nettobelopp", 470.0, 300.0),
    ] {
        tokens.push(t);
    }

    let items: Vec<(u32, &str, &str, &str, Option<&str>, &str, f64)> = vec![
        (11111, "Hyra", "1", "st", Some("25,00"), "268,15", 320.0),
        (22222, "Transport", "1", "st", Some("25,00"), "250,50", 340.0),
        (33333, "El", "1", "st", Some("25,00"), "322,10", 360.0),
        (44444, "Montage", "1", "st", Some("25,00"), "231,85", 380.0),
        // The irregular row: no VAT token at all in the text stream.
        (55555, "Eldragning", "1", "st", None, "600,00", 400.0),
    ];

    for (art, name, qty, unit, vat, netto, y) in items {
        tokens.push(at(&art.to_string(), 40.0, y));
        tokens.push(at(name, 110.0, y));
        tokens.push(at(qty, 250.0, y));
        tokens.push(at(unit, 310.0, y));
        if let Some(vat) = vat {
            tokens.push(at(vat, 380.0, y));
        }
        if netto != "600,00" || include_fifth_netto {
            tokens.push(at(netto, 470.0, y));
        }
    }

    tokens.extend(
        [
            at("Nettobelopp", 40.0, 760.0),
            at("exkl.", 110.0, 760.0),
            at("moms", 145.0, 760.0),
            at("1", 470.0, 760.0),
            at("672,60", 480.0, 760.0),
            at("Att", 40.0, 800.0),
            at("betala", 65.0, 800.0),
            at("1", 470.0, 800.0),
            at("672,60", 480.0, 800.0),
        ]
        .into_iter(),
    );

    prepared_page_from_tokens(tokens, 1)
}

#[test]
fn scenario_e_mode_b_rescues_mode_a() {
    let page = irregular_invoice_page(true);
    let (header, driven, validation) = run_invoice(&[page], TableParserMode::Auto);

    // Text mode misses the anchor-less row; positional mode recovers all
    // five and satisfies the net-sum gate.
    assert_eq!(driven.mode_used, ParserModeUsed::Positional);
    assert!(!driven.needs_debug_dump);
    assert_eq!(driven.outcome.lines.len(), 5);

    let sum: rust_decimal::Decimal = driven.outcome.lines.iter().map(|l| l.total_amount).sum();
    assert_eq!(sum, dec!(1672.60));

    assert_eq!(header.total_amount, Some(dec!(1672.60)));
    assert_eq!(validation.status, ValidationStatus::Ok);
}

#[test]
fn scenario_f_both_modes_fail_dumps_debug_artifacts() {
    // Without the fifth netto value neither mode can reach 1 672,60.
    let page = irregular_invoice_page(false);
    let (_, driven, validation) = run_invoice(&[page], TableParserMode::Auto);

    assert_eq!(driven.mode_used, ParserModeUsed::Text);
    assert!(driven.needs_debug_dump);

    let dir = tempfile::tempdir().unwrap();
    let debug_dir = dir.path().join("inv__1").join("table_debug");
    let block = table::delimit_block(&[irregular_invoice_page(false)]);
    validate::dump_debug_artifacts(&debug_dir, &block, &driven.outcome.lines, &validation).unwrap();

    for name in [
        "table_block_raw_text.txt",
        "parsed_lines.json",
        "validation_result.json",
        "table_block_tokens.json",
    ] {
        assert!(debug_dir.join(name).exists(), "{name} missing");
    }
}

#[test]
fn mode_b_never_runs_in_text_mode() {
    // Same failing setup, but the profile pins text mode: the positional
    // parser must not run and no debug dump is requested.
    let page = irregular_invoice_page(true);
    let block = table::delimit_block(&[page.clone()]);
    let totals = footer::extract(&[page]);
    let driven = validate::drive_parse(
        &block,
        &totals,
        TableParserMode::Text,
        &ValidationConfig::default(),
    );
    assert_eq!(driven.mode_used, ParserModeUsed::Text);
    assert!(!driven.needs_debug_dump);
    assert_eq!(driven.outcome.lines.len(), 4);
}

// ── Scenario G: multi-invoice PDF ────────────────────────────────────────

fn routed_page(page_no: u32, lines: &[(&str, f64)]) -> RoutedPage {
    let tokens: Vec<Token> = lines
        .iter()
        .flat_map(|(line, y)| tokens_for_line(line, *y, page_no))
        .collect();
    RoutedPage {
        page_no,
        width: PAGE_W,
        height: PAGE_H,
        source: TokenSource::TextLayer,
        tokens,
        ocr_metrics: None,
        decision: PageRoutingDecision {
            page: page_no,
            source: TokenSource::TextLayer,
            text_char_count: 1200,
            word_token_count: 80,
            text_quality: 0.9,
            anchor_hits: vec![r"Faktura\s".to_string()],
            reason_flags: vec!["routing_text_layer_sufficient".to_string()],
            median_conf: None,
            low_conf_fraction: None,
        },
    }
}

#[test]
fn scenario_g_fourteen_anchors_give_fourteen_invoices() {
    let pages: Vec<RoutedPage> = (1..=14)
        .map(|p| {
            routed_page(
                p,
                &[
                    (&format!("Fakturanummer: {}", 2024000 + p), 60.0),
                    ("Artikelnr Benämning Antal Enhet Á-pris Moms Nettobelopp", 300.0),
                    ("11111 Vara 1 st 100,00 25,00 100,00", 320.0),
                    ("Summa att betala 100,00", 800.0),
                ],
            )
        })
        .collect();

    let invoices = boundaries::detect(&pages, "batch");
    assert_eq!(invoices.len(), 14);
    for (i, invoice) in invoices.iter().enumerate() {
        assert_eq!(invoice.index, i + 1);
        assert_eq!(invoice.id, format!("batch__{}", i + 1));
        assert_eq!(invoice.start_page, (i + 1) as u32);
        assert_eq!(invoice.end_page, (i + 1) as u32);
    }

    // Partition invariant: page ranges cover the document exactly.
    let covered: u32 = invoices.iter().map(|v| v.page_count()).sum();
    assert_eq!(covered, 14);

    // Each virtual invoice extracts its own header and validates OK.
    for invoice in &invoices {
        let page = &pages[(invoice.start_page - 1) as usize];
        let prepared = prepared_page_from_tokens(page.tokens.clone(), page.page_no);
        let (header, _, validation) = run_invoice(&[prepared], TableParserMode::Auto);
        assert_eq!(
            header.invoice_number.as_deref(),
            Some(format!("{}", 2024000 + invoice.start_page).as_str())
        );
        assert_eq!(validation.status, ValidationStatus::Ok);
    }
}

// ── Cross-cutting invariants ─────────────────────────────────────────────

#[test]
fn lines_sum_matches_emitted_line_totals() {
    // The sum the validator reports must equal the sum of the lines the
    // assembler hands to the spreadsheet — sign preserved.
    let page = prepared_page(
        &[
            ("Fakturanummer: 1234567", 80.0),
            ("Artikelnr Benämning Antal Enhet Á-pris Moms Nettobelopp", 300.0),
            ("11111 Vara 1 st 500,00 25,00 500,00", 320.0),
            ("22222 Kredit 25,00 100,00-", 340.0),
            ("Summa att betala 400,00", 800.0),
        ],
        1,
    );
    let (_, driven, validation) = run_invoice(&[page], TableParserMode::Auto);
    let manual: rust_decimal::Decimal = driven.outcome.lines.iter().map(|l| l.total_amount).sum();
    assert_eq!(validation.lines_sum, manual);
    assert_eq!(manual, dec!(400.00));
}

#[test]
fn traceability_bboxes_enclose_their_tokens() {
    let page = three_line_invoice("Summa att betala 400,00");
    let builder = header::extract(&[page], &Calibrator::identity());
    let header = builder.seal();

    let trace = header.total_trace.expect("total trace");
    assert_eq!(trace.excerpt.replace(' ', ""), "400,00");
    let trace = header.invoice_number_trace.expect("number trace");
    assert_eq!(trace.excerpt, "1234567");
    assert_eq!(trace.page, 1);
}
