//! Header extractor: invoice number, total amount, supplier, date and
//! reference, each with traceability and a raw confidence that the
//! calibrator turns into the gated probability.
//!
//! The search strategies are deterministic and ordered — label on the same
//! row beats label-above-value beats an unlabelled top-of-page scan — and
//! the best candidate is always recorded even when its confidence ends up
//! far below the hard gate. An operator reviewing a REVIEW invoice wants to
//! see what the pipeline *thought* the number was, not an empty cell.

use crate::amount::{find_amounts, normalize_amount};
use crate::calibrate::Calibrator;
use crate::model::{InvoiceHeaderBuilder, PreparedPage, Row, Token, Traceability};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::debug;

// ── Label and value patterns ─────────────────────────────────────────────

/// Invoice-number label variants, matched against a normalised row text
/// (lowercased, `:`/`#` stripped, whitespace collapsed).
static NUMBER_LABELS: &[&str] = &[
    "fakturanummer",
    "fakturanr",
    "fakt.nr",
    "fakt nr",
    "faktura nr",
    "invoice number",
    "invoice no",
    "inv no",
];

static STRICT_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{6,10}\b").expect("strict"));
static LOOSE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{5,12}\b").expect("loose"));

static TOTAL_LABELS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(summa\s+att\s+betala|att\s+betala|totalt|total)").expect("total labels")
});

static DATE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)fakturadatum").expect("date label"));

static REFERENCE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(er\s+referens|referenser|referens|vår\s+referens)\b").expect("reference label"));

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("iso date"));
static SLASH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("slash date"));
static DOT_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").expect("dot date"));
static SWEDISH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})\s+(januari|februari|mars|april|maj|juni|juli|augusti|september|oktober|november|december)\s+(\d{4})\b",
    )
    .expect("swedish date")
});

static ADDRESS_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(gatan|gata|vägen|väg|box|postadress|telefon|tel\.|org\.?nr|momsreg|bankgiro|plusgiro|\bse-?\d{3}\b|e-post|hemsida|www\.)",
    )
    .expect("address words")
});

/// Top-of-page band searched by the unlabelled scans, as a height fraction.
const TOP_BAND: f64 = 0.25;

// ── Entry point ──────────────────────────────────────────────────────────

/// Extract all header fields from an invoice's pages.
///
/// Confidences in the returned builder are already calibrated.
pub fn extract(pages: &[PreparedPage], calibrator: &Calibrator) -> InvoiceHeaderBuilder {
    let mut builder = InvoiceHeaderBuilder::new();

    extract_invoice_number(pages, calibrator, &mut builder);
    extract_total(pages, calibrator, &mut builder);
    extract_supplier(pages, &mut builder);
    extract_date(pages, &mut builder);
    extract_reference(pages, &mut builder);

    builder
}

// ── Invoice number ───────────────────────────────────────────────────────

struct NumberCandidate {
    value: String,
    raw_score: f64,
    trace: Option<Traceability>,
}

fn extract_invoice_number(
    pages: &[PreparedPage],
    calibrator: &Calibrator,
    builder: &mut InvoiceHeaderBuilder,
) {
    let mut best: Option<NumberCandidate> = None;

    for page in pages {
        for candidate in labelled_number_candidates(page) {
            offer(&mut best, candidate);
        }
        if best.is_none() {
            for candidate in top_scan_number_candidates(page) {
                offer(&mut best, candidate);
            }
        }
        // The first page that produced anything wins; later pages only
        // repeat the same header block.
        if best.is_some() {
            break;
        }
    }

    if let Some(c) = best {
        let conf = calibrator.calibrate(c.raw_score);
        debug!(value = %c.value, raw = c.raw_score, conf, "invoice number candidate");
        builder.offer_invoice_number(c.value, conf, c.trace);
    }
}

fn offer(best: &mut Option<NumberCandidate>, candidate: NumberCandidate) {
    let better = match best {
        Some(b) => candidate.raw_score > b.raw_score,
        None => true,
    };
    if better {
        *best = Some(candidate);
    }
}

/// Normalise a row for label matching: lowercase, strip `:` and `#`,
/// collapse whitespace.
fn normalize_label_text(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| *c != ':' && *c != '#')
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn label_span(row: &Row) -> Option<usize> {
    let normalized = normalize_label_text(&row.text);
    NUMBER_LABELS
        .iter()
        .any(|l| normalized.contains(l))
        .then(|| {
            // Index of the last token participating in the label, so the
            // value search starts after it. The label is at the row start in
            // every layout we handle.
            row.tokens
                .iter()
                .position(|t| STRICT_NUMBER.is_match(&t.text) || LOOSE_NUMBER.is_match(&t.text))
                .unwrap_or(row.tokens.len())
        })
}

fn labelled_number_candidates(page: &PreparedPage) -> Vec<NumberCandidate> {
    let mut out = Vec::new();

    for (i, row) in page.rows.iter().enumerate() {
        if label_span(row).is_none() {
            continue;
        }

        // Highest priority: a value on the same row.
        if let Some(c) = number_in_tokens(&row.tokens, 1.0, page) {
            out.push(c);
            continue;
        }

        // 1–2 rows below, aligned under the label.
        let label_x = row.x_min;
        for offset in 1..=2usize {
            let Some(below) = page.rows.get(i + offset) else {
                break;
            };
            let aligned: Vec<Token> = below
                .tokens
                .iter()
                .filter(|t| (t.x - label_x).abs() <= 0.15 * page.width)
                .cloned()
                .collect();
            if let Some(c) = number_in_tokens(&aligned, 0.8, page) {
                out.push(c);
                break;
            }
        }
    }

    out
}

/// Find the best number candidate among tokens, weighting pattern
/// strictness into the label-proximity base score.
fn number_in_tokens(tokens: &[Token], proximity: f64, page: &PreparedPage) -> Option<NumberCandidate> {
    let mut fallback: Option<NumberCandidate> = None;

    for token in tokens {
        if is_excluded_number(token, tokens) {
            continue;
        }
        if let Some(m) = STRICT_NUMBER.find(&token.text) {
            let bonus = positional_bonus(token, page);
            return Some(NumberCandidate {
                value: m.as_str().to_string(),
                raw_score: (proximity * 1.0 + bonus).min(1.0),
                trace: Traceability::from_tokens(std::slice::from_ref(token)),
            });
        }
        if fallback.is_none() {
            if let Some(m) = LOOSE_NUMBER.find(&token.text) {
                let bonus = positional_bonus(token, page);
                fallback = Some(NumberCandidate {
                    value: m.as_str().to_string(),
                    raw_score: (proximity * 0.7 + bonus).min(1.0),
                    trace: Traceability::from_tokens(std::slice::from_ref(token)),
                });
            }
        }
    }

    fallback
}

fn positional_bonus(token: &Token, page: &PreparedPage) -> f64 {
    if token.y < page.height * TOP_BAND {
        0.05
    } else {
        0.0
    }
}

/// Obvious non-invoice numbers: dates, amounts, postal codes.
fn is_excluded_number(token: &Token, row_tokens: &[Token]) -> bool {
    let text = token.text.as_str();
    if ISO_DATE.is_match(text) || SLASH_DATE.is_match(text) || DOT_DATE.is_match(text) {
        return true;
    }
    // Amounts carry a decimal part.
    if normalize_amount(text).is_ok() && text.contains([',', '.']) {
        return true;
    }
    // Swedish postal code: "123 45" split across two tokens in an address row.
    if text.len() == 3 || text.len() == 5 {
        let row_text = row_tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if ADDRESS_WORDS.is_match(&row_text) {
            return true;
        }
    }
    false
}

/// Unlabelled fallback: scan the top quarter of the page for a 5–12 digit
/// run that survives the exclusion rules.
fn top_scan_number_candidates(page: &PreparedPage) -> Vec<NumberCandidate> {
    let limit = page.height * TOP_BAND;
    let mut out = Vec::new();

    for row in page.rows.iter().filter(|r| r.y < limit) {
        for token in &row.tokens {
            if is_excluded_number(token, &row.tokens) {
                continue;
            }
            if let Some(m) = LOOSE_NUMBER.find(&token.text) {
                let strictness = if STRICT_NUMBER.is_match(&token.text) {
                    0.6
                } else {
                    0.5
                };
                out.push(NumberCandidate {
                    value: m.as_str().to_string(),
                    raw_score: strictness,
                    trace: Traceability::from_tokens(std::slice::from_ref(token)),
                });
            }
        }
    }

    out
}

// ── Total amount ─────────────────────────────────────────────────────────

fn extract_total(
    pages: &[PreparedPage],
    calibrator: &Calibrator,
    builder: &mut InvoiceHeaderBuilder,
) {
    // Totals live at the bottom of the last page; scan back to front.
    for page in pages.iter().rev() {
        for (i, row) in page.rows.iter().enumerate().rev() {
            let Some(label) = TOTAL_LABELS.find(&row.text) else {
                continue;
            };
            let label_strength = match label.as_str().to_lowercase().as_str() {
                "summa att betala" | "att betala" => 1.0,
                _ => 0.85,
            };

            if let Some((value, trace)) = trailing_amount(row, label.end()) {
                let conf = calibrator.calibrate(label_strength);
                builder.offer_total(value, conf, trace);
                return;
            }
            // Amount on the following row (label above the figure).
            if let Some(next) = page.rows.get(i + 1) {
                if let Some((value, trace)) = trailing_amount(next, 0) {
                    let conf = calibrator.calibrate(label_strength * 0.85);
                    builder.offer_total(value, conf, trace);
                    return;
                }
            }
        }
    }
}

/// Rightmost amount on a row, at or after `min_offset` into the row text.
fn trailing_amount(row: &Row, min_offset: usize) -> Option<(Decimal, Option<Traceability>)> {
    let amounts = find_amounts(&row.text);
    let (range, value) = amounts
        .into_iter()
        .filter(|(r, _)| r.start >= min_offset)
        .last()?;
    let trace = row
        .tokens_for_range(&range)
        .and_then(|t| Traceability::from_tokens(&t));
    Some((value, trace))
}

// ── Supplier ─────────────────────────────────────────────────────────────

fn extract_supplier(pages: &[PreparedPage], builder: &mut InvoiceHeaderBuilder) {
    let Some(page) = pages.first() else {
        return;
    };
    let limit = page.height * TOP_BAND;

    let mut best: Option<(f64, String)> = None;
    for row in page.rows.iter().filter(|r| r.y < limit) {
        if ADDRESS_WORDS.is_match(&row.text) {
            continue;
        }
        let letters: Vec<char> = row.text.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.len() < 3 {
            continue;
        }
        let upper_ratio =
            letters.iter().filter(|c| c.is_uppercase()).count() as f64 / letters.len() as f64;
        let font = row
            .tokens
            .iter()
            .filter_map(|t| t.font_size)
            .fold(0.0_f32, f32::max) as f64;
        // Higher on the page, larger type and more capitals all point at a
        // letterhead name.
        let score = upper_ratio + font / 24.0 + (1.0 - row.y / limit) * 0.5;
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, row.text.clone()));
        }
    }

    if let Some((_, name)) = best {
        builder.supplier(name);
    }
}

// ── Invoice date ─────────────────────────────────────────────────────────

fn extract_date(pages: &[PreparedPage], builder: &mut InvoiceHeaderBuilder) {
    let Some(page) = pages.first() else {
        return;
    };

    // Preferred: a date within two rows of a "fakturadatum" label.
    for (i, row) in page.rows.iter().enumerate() {
        if !DATE_LABEL.is_match(&row.text) {
            continue;
        }
        for candidate in page.rows.iter().skip(i).take(3) {
            if let Some(date) = parse_date(&candidate.text) {
                builder.invoice_date(date);
                return;
            }
        }
    }

    // Otherwise the first recognisable date on the page.
    for row in &page.rows {
        if let Some(date) = parse_date(&row.text) {
            builder.invoice_date(date);
            return;
        }
    }
}

const SWEDISH_MONTHS: &[&str] = &[
    "januari",
    "februari",
    "mars",
    "april",
    "maj",
    "juni",
    "juli",
    "augusti",
    "september",
    "oktober",
    "november",
    "december",
];

/// Parse the first recognisable date in a text, returned as ISO `YYYY-MM-DD`.
pub fn parse_date(text: &str) -> Option<String> {
    if let Some(c) = ISO_DATE.captures(text) {
        return iso_from_parts(&c[1], &c[2], &c[3]);
    }
    if let Some(c) = SLASH_DATE.captures(text) {
        return iso_from_parts(&c[3], &c[2], &c[1]);
    }
    if let Some(c) = DOT_DATE.captures(text) {
        return iso_from_parts(&c[3], &c[2], &c[1]);
    }
    if let Some(c) = SWEDISH_DATE.captures(text) {
        let month = SWEDISH_MONTHS
            .iter()
            .position(|m| m.eq_ignore_ascii_case(&c[2]))?
            + 1;
        return iso_from_parts(&c[3], &month.to_string(), &c[1]);
    }
    None
}

fn iso_from_parts(year: &str, month: &str, day: &str) -> Option<String> {
    let y: i32 = year.parse().ok()?;
    let m: u32 = month.parse().ok()?;
    let d: u32 = day.parse().ok()?;
    let date = chrono::NaiveDate::from_ymd_opt(y, m, d)?;
    Some(date.format("%Y-%m-%d").to_string())
}

// ── Reference ────────────────────────────────────────────────────────────

fn extract_reference(pages: &[PreparedPage], builder: &mut InvoiceHeaderBuilder) {
    let Some(page) = pages.first() else {
        return;
    };
    for (i, row) in page.rows.iter().enumerate() {
        let Some(m) = REFERENCE_LABEL.find(&row.text) else {
            continue;
        };
        let after = row.text[m.end()..]
            .trim_matches(|c: char| c == ':' || c == ' ' || c == '#')
            .trim();
        if !after.is_empty() {
            builder.reference(after.to_string());
            return;
        }
        if let Some(next) = page.rows.get(i + 1) {
            let value = next.text.trim();
            if !value.is_empty() && !REFERENCE_LABEL.is_match(value) {
                builder.reference(value.to_string());
                return;
            }
        }
    }
}
