//! Line-item parser, text mode: table block delimitation, VAT-anchored row
//! parsing and multi-line wrap folding.
//!
//! The parser never trusts column positions in this mode. A row is a line
//! item if and only if it carries the 25% VAT token; every amount is then
//! read from the row *text*, and only to the right of that anchor — the
//! one column rule that holds across all supplier layouts we have seen.
//! Position only enters for the small fields (quantity, unit, unit price)
//! and for deciding whether a following row is a description wrap.
//!
//! Cross-page item tables without a repeated header row are not stitched
//! together; each page's items segment is parsed on its own.

use crate::amount::{find_amounts, normalize_amount};
use crate::model::{InvoiceLine, PreparedPage, Row, SegmentKind};
use crate::pipeline::segments;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// The anchored VAT rate, as a `Decimal` (25.00).
fn vat_rate_25() -> Decimal {
    Decimal::new(2500, 2)
}

/// Wrap rows accepted beyond this count trigger a warning (never a cap).
const WRAP_SOFT_LIMIT: usize = 10;
/// Wrap y-threshold when the block has fewer than two rows.
const DEFAULT_WRAP_THRESHOLD: f64 = 15.0;
/// First-token alignment slack for wraps, as a fraction of page width.
const WRAP_ALIGN_FRACTION: f64 = 0.02;
/// Right-indent allowance for wraps (bullets, sub-items), page-width fraction.
const WRAP_INDENT_FRACTION: f64 = 0.05;
/// Amounts at or above this value count as the "large amount" signal that
/// turns a soft footer keyword into a footer verdict.
const SOFT_FOOTER_AMOUNT: &str = "1000.00";

static VAT_ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b25[.,]00\b").expect("vat anchor"));

static HARD_FOOTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(summa\s+att\s+betala|totalt|delsumma|nettobelopp|fakturabelopp|\bmoms\b|exkl\.?\s*moms|inkl\.?\s*moms)",
    )
    .expect("hard footer")
});

static SOFT_FOOTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\bsumma\b|\bexkl\b|\binkl\b|förskott|fraktavgift|\bavgift\b)")
        .expect("soft footer")
});

static TABLE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)nettobelopp\s+exkl\.?\s*moms").expect("table end"));

static HEADER_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(artikelnr|artikel|benämning|beskrivning|antal|enhet|á-?pris|a-pris|\bpris\b|moms|nettobelopp|belopp|rabatt)",
    )
    .expect("table header keywords")
});

static START_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{5,}|[A-Z]{2,}\d{3,}|\d{4}-\d{2}-\d{2}|\d{2}/\d{2}|\d{6,8}-\d{4}|\d{4}\s)")
        .expect("start pattern")
});

static ARTICLE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{5,}|[A-Z]{2,}\d{2,})").expect("article number"));

static UNIT_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(st|kg|tim|h|ea|pcs|m²|m2|m3|m³|dagar)\.?$").expect("unit token")
});

static NUMERIC_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?[\d.,]+$").expect("numeric token"));

// ── Block delimitation ───────────────────────────────────────────────────

/// The delimited table block of one virtual invoice.
#[derive(Debug, Clone)]
pub struct TableBlock {
    /// Candidate rows between the header row and the net-total row.
    pub rows: Vec<Row>,
    /// The column-header row, when one was found.
    pub header_row: Option<Row>,
    /// Width of the page the block sits on.
    pub page_width: f64,
    /// Diagnostic flags, e.g. `no-table-boundary`.
    pub flags: Vec<String>,
}

impl TableBlock {
    /// Space-joined text of every block row, for the debug artifact dump.
    pub fn raw_text(&self) -> String {
        self.rows
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Delimit the block of product rows inside the items segments.
///
/// Start: the first row below a header row that mentions "nettobelopp" and
/// an article/description column. End: the "Nettobelopp exkl. moms" row, or
/// the end of the segment. Without a header the whole segment is returned,
/// flagged `no-table-boundary`.
pub fn delimit_block(pages: &[PreparedPage]) -> TableBlock {
    let page_width = pages.first().map(|p| p.width).unwrap_or(595.0);
    let items: Vec<Row> = pages
        .iter()
        .flat_map(|p| segments::rows_of_kind(&p.segments, SegmentKind::Items))
        .collect();

    let header_idx = items.iter().position(|row| {
        let lower = row.text.to_lowercase();
        lower.contains("nettobelopp")
            && (lower.contains("artikelnr")
                || lower.contains("artikel")
                || lower.contains("benämning"))
    });

    let Some(h) = header_idx else {
        debug!("no table header row found; returning all item rows");
        return TableBlock {
            rows: items,
            header_row: None,
            page_width,
            flags: vec!["no-table-boundary".to_string()],
        };
    };

    let end = items
        .iter()
        .enumerate()
        .skip(h + 1)
        .find(|(_, row)| TABLE_END.is_match(&row.text))
        .map(|(i, _)| i)
        .unwrap_or(items.len());

    TableBlock {
        rows: items[h + 1..end].to_vec(),
        header_row: Some(items[h].clone()),
        page_width,
        flags: Vec::new(),
    }
}

// ── Row classification ───────────────────────────────────────────────────

/// Footer row inside the block: a hard keyword anywhere, or a soft keyword
/// together with a large amount.
pub fn is_footer_row(row: &Row) -> bool {
    if HARD_FOOTER.is_match(&row.text) {
        return true;
    }
    if SOFT_FOOTER.is_match(&row.text) {
        let large: Decimal = SOFT_FOOTER_AMOUNT.parse().expect("soft footer amount");
        return find_amounts(&row.text)
            .iter()
            .any(|(_, v)| v.abs() >= large);
    }
    false
}

/// A repeated column-header row: several column keywords and no amounts.
pub fn is_table_header_row(row: &Row) -> bool {
    let hits = HEADER_KEYWORDS.find_iter(&row.text).count();
    hits >= 2 && find_amounts(&row.text).is_empty()
}

/// A row that always opens a new line item, overriding wrap spatial checks.
pub fn matches_start_pattern(row: &Row) -> bool {
    START_PATTERN.is_match(&row.text)
}

// ── Mode A parsing ───────────────────────────────────────────────────────

/// Result of a parsing pass in either mode.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub lines: Vec<InvoiceLine>,
    pub flags: Vec<String>,
    pub warnings: Vec<String>,
}

/// Parse the block in text mode (VAT-anchored amounts).
pub fn parse_mode_a(block: &TableBlock) -> ParseOutcome {
    let mut outcome = ParseOutcome {
        flags: block.flags.clone(),
        ..ParseOutcome::default()
    };

    let wrap_threshold = adaptive_wrap_threshold(&block.rows);

    // First pass: identify primary rows and parse their fields.
    let mut primaries: Vec<(usize, InvoiceLine)> = Vec::new();
    for (i, row) in block.rows.iter().enumerate() {
        if is_footer_row(row) || is_table_header_row(row) {
            continue;
        }
        if let Some(line) = parse_item_row(row) {
            primaries.push((i, line));
        }
    }

    // Second pass: fold wrap rows into the preceding primary.
    let primary_indices: Vec<usize> = primaries.iter().map(|(i, _)| *i).collect();
    for (pi, (block_idx, line)) in primaries.iter_mut().enumerate() {
        let next_primary = primary_indices
            .get(pi + 1)
            .copied()
            .unwrap_or(block.rows.len());
        let wraps = collect_wraps(
            block,
            *block_idx,
            next_primary,
            wrap_threshold,
            &mut outcome.warnings,
        );
        for wrap in wraps {
            if !line.description.is_empty() {
                line.description.push(' ');
            }
            line.description.push_str(wrap.text.trim());
            line.source_rows.push(wrap.text.clone());
        }
    }

    outcome.lines = primaries
        .into_iter()
        .enumerate()
        .map(|(i, (_, mut line))| {
            line.line_number = (i + 1) as u32;
            line
        })
        .collect();

    debug!(lines = outcome.lines.len(), "mode A parse complete");
    outcome
}

/// Parse one candidate row into a line item. `None` when the row carries no
/// VAT anchor (it may be wrap material instead).
fn parse_item_row(row: &Row) -> Option<InvoiceLine> {
    let text = &row.text;
    let amounts = find_amounts(text);

    // The anchor is the rightmost 25%-token that still has amounts after it.
    let anchors: Vec<_> = VAT_ANCHOR.find_iter(text).collect();
    let (anchor_start, after): (usize, Vec<_>) = anchors.iter().rev().find_map(|anchor| {
        let after: Vec<_> = amounts
            .iter()
            .filter(|(r, _)| r.start >= anchor.end())
            .cloned()
            .collect();
        (!after.is_empty()).then_some((anchor.start(), after))
    })?;

    // Rightmost positive amount after the anchor is the line total; if the
    // row only carries negatives there, it is a credit line.
    let net = after
        .iter()
        .rev()
        .find(|(_, v)| v.is_sign_positive())
        .or_else(|| after.last())
        .cloned()?;
    let (net_range, net_value) = net;

    let discount = after
        .iter()
        .rev()
        .find(|(r, v)| v.is_sign_negative() && r.start < net_range.start)
        .map(|(_, v)| -*v);

    // Quantity / unit / unit price from token positions.
    let offsets = token_offsets(row);
    let unit_idx = row
        .tokens
        .iter()
        .enumerate()
        .take_while(|(i, _)| offsets[*i].0 < net_range.start)
        .filter(|(_, t)| UNIT_TOKEN.is_match(&t.text))
        .map(|(i, _)| i)
        .last();

    let mut quantity = None;
    let mut unit = None;
    let mut unit_price = None;
    let mut quantity_start: Option<usize> = None;

    if let Some(ui) = unit_idx {
        unit = Some(row.tokens[ui].text.trim_end_matches('.').to_lowercase());

        // Quantity: the numeric token sequence immediately left of the unit
        // (thousands groups may split across tokens).
        let mut qi = ui;
        let mut parts: Vec<&str> = Vec::new();
        while qi > 0 && NUMERIC_TOKEN.is_match(&row.tokens[qi - 1].text) && parts.len() < 3 {
            qi -= 1;
            parts.insert(0, row.tokens[qi].text.as_str());
        }
        if !parts.is_empty() {
            if let Ok(q) = normalize_amount(&parts.join(" ")) {
                quantity = Some(q);
                quantity_start = Some(offsets[qi].0);
            }
        }

        // Unit price: the first amount strictly between the unit token and
        // the net amount, skipping the VAT anchor itself.
        let unit_end = offsets[ui].1;
        unit_price = amounts
            .iter()
            .filter(|(r, v)| {
                r.start >= unit_end
                    && r.end <= net_range.start
                    && !VAT_ANCHOR.is_match(&text[r.clone()])
                    && v.is_sign_positive()
            })
            .map(|(_, v)| *v)
            .next();
    }

    // Description: tokens left of the leftmost numeric field, minus a
    // leading article number. Stray amounts that never became a field
    // (measurements priced mid-row) still bound the description.
    let numeric_field_start = [
        quantity_start,
        unit_idx.map(|ui| offsets[ui].0),
        Some(anchor_start),
        Some(net_range.start),
        amounts.first().map(|(r, _)| r.start),
    ]
    .into_iter()
    .flatten()
    .min()
    .unwrap_or(0);

    let mut desc_tokens: Vec<&str> = Vec::new();
    for (i, token) in row.tokens.iter().enumerate() {
        if offsets[i].1 > numeric_field_start {
            break;
        }
        desc_tokens.push(token.text.as_str());
    }
    if let Some(first) = desc_tokens.first() {
        if ARTICLE_NUMBER.is_match(first) {
            desc_tokens.remove(0);
        }
    }

    Some(InvoiceLine {
        line_number: 0, // assigned after wrap folding
        description: desc_tokens.join(" ").trim().to_string(),
        quantity,
        unit,
        unit_price,
        discount,
        total_amount: net_value,
        vat_rate: Some(vat_rate_25()),
        source_rows: vec![row.text.clone()],
    })
}

/// Byte offsets `(start, end)` of each token inside the row's joined text.
fn token_offsets(row: &Row) -> Vec<(usize, usize)> {
    let mut offsets = Vec::with_capacity(row.tokens.len());
    let mut pos = 0usize;
    for token in &row.tokens {
        let start = pos;
        let end = pos + token.text.len();
        offsets.push((start, end));
        pos = end + 1;
    }
    offsets
}

// ── Wrap detection ───────────────────────────────────────────────────────

/// Adaptive wrap threshold: 1.5 × the median vertical gap between
/// consecutive block rows; the default when fewer than two rows exist.
pub fn adaptive_wrap_threshold(rows: &[Row]) -> f64 {
    if rows.len() < 2 {
        return DEFAULT_WRAP_THRESHOLD;
    }
    let mut gaps: Vec<f64> = rows.windows(2).map(|p| (p[1].y - p[0].y).abs()).collect();
    gaps.sort_by(|a, b| a.total_cmp(b));
    let median = gaps[gaps.len() / 2];
    let threshold = 1.5 * median;
    if threshold.is_finite() && threshold >= 0.0 {
        threshold
    } else {
        DEFAULT_WRAP_THRESHOLD
    }
}

/// Collect continuation rows for the primary at `primary_idx`, stopping at
/// `until` (the next primary) or on any stop condition.
fn collect_wraps<'a>(
    block: &'a TableBlock,
    primary_idx: usize,
    until: usize,
    threshold: f64,
    warnings: &mut Vec<String>,
) -> Vec<&'a Row> {
    let primary = &block.rows[primary_idx];
    let mut accepted: Vec<&Row> = Vec::new();
    let mut last_y = primary.y;
    let mut soft_limit_warned = false;

    for candidate in block.rows[primary_idx + 1..until.min(block.rows.len())].iter() {
        // Stop conditions, in order.
        if is_footer_row(candidate) {
            break;
        }
        if matches_start_pattern(candidate) {
            break;
        }
        if (candidate.y - last_y).abs() > threshold {
            break;
        }
        if carries_net_amount(candidate) {
            break;
        }
        let dx = candidate.first_x() - primary.first_x();
        let align_slack = WRAP_ALIGN_FRACTION * block.page_width;
        let indent_allowance = WRAP_INDENT_FRACTION * block.page_width;
        let aligned = dx.abs() <= align_slack || (dx > 0.0 && dx <= indent_allowance);
        if !aligned {
            break;
        }

        accepted.push(candidate);
        last_y = candidate.y;

        if accepted.len() > WRAP_SOFT_LIMIT && !soft_limit_warned {
            soft_limit_warned = true;
            warn!(
                primary = %primary.text,
                count = accepted.len(),
                "unusually long description wrap"
            );
            warnings.push(format!(
                "Wrap run exceeds {WRAP_SOFT_LIMIT} rows after '{}'",
                truncate(&primary.text, 40)
            ));
        }
    }

    accepted
}

/// Whether a candidate row itself carries an amount, which disqualifies it
/// as a pure description wrap. VAT-anchored amounts always count; the
/// relaxed rule also stops on any amount at all.
fn carries_net_amount(row: &Row) -> bool {
    !find_amounts(&row.text).is_empty()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}…")
    }
}
