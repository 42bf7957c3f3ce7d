//! Line-item parser, positional mode: gap-based column clustering.
//!
//! Invoked when text-mode parsing fails net-sum validation (auto mode) or
//! unconditionally in `pos` mode. Instead of trusting the VAT token as the
//! column anchor inside each row, this mode recovers the table's column
//! geometry from the x-distribution of all tokens in the block, maps
//! columns to fields via the header row when one exists, and reads each
//! row column-wise.
//!
//! Column detection is a 1-D gap clustering: sort the token x-centres,
//! find gaps wider than `max(1.5 × median gap, 20 pt)` and cut there.

use crate::amount::{find_amounts, normalize_amount};
use crate::model::{InvoiceLine, Row, Token};
use crate::pipeline::table::{
    is_footer_row, is_table_header_row, ParseOutcome, TableBlock,
};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::debug;

/// Minimum qualifying gap between columns, points.
const MIN_COLUMN_GAP: f64 = 20.0;

static VAT_CELL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b25[.,]00\b").expect("vat cell"));
static NUMERIC_CELL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?[\d.,\s]+-?$").expect("numeric"));

/// Table fields a column can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Description,
    Quantity,
    Unit,
    UnitPrice,
    VatPercent,
    Netto,
}

fn field_for_header_word(word: &str) -> Option<Field> {
    let w = word.to_lowercase();
    let w = w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
    match w {
        "benämning" | "beskrivning" | "artikel" | "text" => Some(Field::Description),
        "antal" | "kvantitet" | "st" => Some(Field::Quantity),
        "enhet" | "unit" => Some(Field::Unit),
        "pris" | "á-pris" | "a-pris" | "ápris" | "enhetspris" => Some(Field::UnitPrice),
        "moms" | "moms%" | "vat" => Some(Field::VatPercent),
        "nettobelopp" | "netto" | "belopp" => Some(Field::Netto),
        _ => None,
    }
}

// ── Column detection ─────────────────────────────────────────────────────

/// Detected column layout: centre positions in ascending x order.
#[derive(Debug, Clone)]
pub struct ColumnLayout {
    pub centers: Vec<f64>,
}

impl ColumnLayout {
    /// Index of the column whose centre is nearest to `x`.
    pub fn assign(&self, x: f64) -> usize {
        let mut best = 0usize;
        let mut best_dist = f64::INFINITY;
        for (i, c) in self.centers.iter().enumerate() {
            let d = (x - c).abs();
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        best
    }
}

/// Detect columns from the x-centres of every token in the block.
///
/// Returns `None` when no gap qualifies — a single smear of tokens has no
/// column structure worth trusting, and the caller keeps the text-mode
/// result instead.
pub fn detect_columns(rows: &[Row], page_width: f64) -> Option<ColumnLayout> {
    let mut centers: Vec<f64> = rows
        .iter()
        .flat_map(|r| r.tokens.iter().map(Token::center_x))
        .collect();
    if centers.len() < 2 {
        return None;
    }
    centers.sort_by(|a, b| a.total_cmp(b));

    let gaps: Vec<(f64, f64)> = centers
        .windows(2)
        .map(|p| (p[1] - p[0], (p[0] + p[1]) / 2.0))
        .collect();
    let mut sorted_gaps: Vec<f64> = gaps.iter().map(|(g, _)| *g).collect();
    sorted_gaps.sort_by(|a, b| a.total_cmp(b));
    let median_gap = sorted_gaps[sorted_gaps.len() / 2];
    let threshold = (1.5 * median_gap).max(MIN_COLUMN_GAP);

    let boundaries: Vec<f64> = gaps
        .iter()
        .filter(|(g, _)| *g > threshold)
        .map(|(_, mid)| *mid)
        .collect();
    if boundaries.is_empty() {
        debug!("no qualifying column gaps");
        return None;
    }

    // Column centres: midpoints between boundaries, with the page edges
    // closing the two outer columns.
    let mut edges = Vec::with_capacity(boundaries.len() + 2);
    edges.push(0.0);
    edges.extend(boundaries.iter().copied());
    edges.push(page_width);
    let centers = edges.windows(2).map(|p| (p[0] + p[1]) / 2.0).collect();

    Some(ColumnLayout { centers })
}

// ── Mode B parsing ───────────────────────────────────────────────────────

/// Parse the block in positional mode.
///
/// Returns `None` when column detection fails; the caller then keeps the
/// text-mode result unchanged.
pub fn parse_mode_b(block: &TableBlock) -> Option<ParseOutcome> {
    let layout = detect_columns(&block.rows, block.page_width)?;
    debug!(columns = layout.centers.len(), "mode B column layout");

    let mapping = block
        .header_row
        .as_ref()
        .map(|h| map_columns(h, &layout))
        .unwrap_or_default();

    let mut outcome = ParseOutcome {
        flags: block.flags.clone(),
        ..ParseOutcome::default()
    };

    for row in &block.rows {
        if is_footer_row(row) || is_table_header_row(row) {
            continue;
        }
        if let Some(line) = parse_row_positional(row, &layout, &mapping) {
            outcome.lines.push(line);
        }
    }

    for (i, line) in outcome.lines.iter_mut().enumerate() {
        line.line_number = (i + 1) as u32;
    }

    debug!(lines = outcome.lines.len(), "mode B parse complete");
    Some(outcome)
}

/// Map detected columns to fields using the header row's keywords.
fn map_columns(header: &Row, layout: &ColumnLayout) -> Vec<Option<Field>> {
    let mut mapping: Vec<Option<Field>> = vec![None; layout.centers.len()];
    for token in &header.tokens {
        let Some(field) = field_for_header_word(&token.text) else {
            continue;
        };
        let col = layout.assign(token.center_x());
        // First keyword wins; "Antal st" style double headers keep Antal.
        if mapping[col].is_none() {
            mapping[col] = Some(field);
        }
    }
    mapping
}

/// Tokens of one row bucketed per column, in column order.
fn bucket_row(row: &Row, layout: &ColumnLayout) -> Vec<Vec<Token>> {
    let mut cells: Vec<Vec<Token>> = vec![Vec::new(); layout.centers.len()];
    for token in &row.tokens {
        cells[layout.assign(token.center_x())].push(token.clone());
    }
    cells
}

fn cell_text(cell: &[Token]) -> String {
    cell.iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn cell_amount(cell: &[Token]) -> Option<Decimal> {
    let text = cell_text(cell);
    find_amounts(&text).into_iter().map(|(_, v)| v).next_back()
}

fn parse_row_positional(
    row: &Row,
    layout: &ColumnLayout,
    mapping: &[Option<Field>],
) -> Option<InvoiceLine> {
    let cells = bucket_row(row, layout);

    let col_of = |field: Field| -> Option<usize> {
        mapping.iter().position(|m| *m == Some(field))
    };

    // Locate the VAT column: mapped, or by content.
    let vat_col = col_of(Field::VatPercent).or_else(|| {
        cells
            .iter()
            .position(|c| VAT_CELL.is_match(&cell_text(c)))
    });

    // Net amount: the mapped netto column, else the rightmost amount-bearing
    // column right of the VAT column.
    let netto_col = col_of(Field::Netto)
        .filter(|c| cell_amount(&cells[*c]).is_some())
        .or_else(|| {
            let min_col = vat_col.map(|v| v + 1).unwrap_or(0);
            (min_col..cells.len())
                .rev()
                .find(|c| cell_amount(&cells[*c]).is_some())
        })?;
    let total_amount = cell_amount(&cells[netto_col])?;

    // Rows whose rightmost value is the VAT token itself are not items.
    if vat_col == Some(netto_col) {
        return None;
    }

    let description = col_of(Field::Description)
        .map(|c| cell_text(&cells[c]))
        .unwrap_or_else(|| {
            // Fallback: everything left of the first numeric column.
            let first_numeric = cells
                .iter()
                .position(|c| !c.is_empty() && NUMERIC_CELL.is_match(&cell_text(c)))
                .unwrap_or(netto_col);
            cells[..first_numeric]
                .iter()
                .map(|c| cell_text(c))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        });

    let quantity = col_of(Field::Quantity)
        .and_then(|c| normalize_amount(&cell_text(&cells[c])).ok());
    let unit = col_of(Field::Unit)
        .map(|c| cell_text(&cells[c]).to_lowercase())
        .filter(|u| !u.is_empty());
    let unit_price = col_of(Field::UnitPrice).and_then(|c| cell_amount(&cells[c]));

    let vat_rate = vat_col
        .map(|c| cell_text(&cells[c]))
        .and_then(|t| find_amounts(&t).into_iter().map(|(_, v)| v).next());

    // A negative amount in any column left of netto is a discount.
    let discount = (0..netto_col)
        .filter_map(|c| cell_amount(&cells[c]))
        .find(|v| v.is_sign_negative())
        .map(|v| -v);

    Some(InvoiceLine {
        line_number: 0,
        description: description.trim().to_string(),
        quantity,
        unit,
        unit_price,
        discount,
        total_amount,
        vat_rate,
        source_rows: vec![row.text.clone()],
    })
}
