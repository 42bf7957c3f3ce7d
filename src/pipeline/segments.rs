//! Segment identifier: label contiguous row blocks as header / items / footer.
//!
//! Deliberately coarse. The base split is positional (top ~25% of the page
//! is header territory, bottom ~20% footer), corrected by strong keywords
//! either way. Downstream extractors apply their own finer rules inside a
//! segment, so over-wide segments cost little and under-wide ones lose data.

use crate::model::{Row, Segment, SegmentKind};
use once_cell::sync::Lazy;
use regex::Regex;

/// Fraction of page height treated as header by position.
const HEADER_BAND: f64 = 0.25;
/// Fraction of page height treated as footer by position.
const FOOTER_BAND: f64 = 0.20;

static HEADER_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(faktura|fakturanummer|fakturadatum|kundnummer|org\.?nr|referens)\b")
        .expect("header keywords")
});

static FOOTER_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(summa\s+att\s+betala|att\s+betala|nettobelopp\s+exkl\.?\s*moms|fakturabelopp|totalt|\bmoms\b|bankgiro|plusgiro)",
    )
    .expect("footer keywords")
});

// Column-header rows mention "Moms" and "Nettobelopp" too; they belong to
// the items table, not the footer.
static TABLE_HEADER_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(artikelnr|benämning|beskrivning|á-?pris|a-pris)").expect("table header hint")
});

/// Label each row, then merge contiguous same-kind runs into segments.
///
/// Rows must already be in reading order (the row grouper guarantees it).
pub fn identify(rows: &[Row], page_height: f64) -> Vec<Segment> {
    if rows.is_empty() {
        return Vec::new();
    }

    let header_limit = page_height * HEADER_BAND;
    let footer_limit = page_height * (1.0 - FOOTER_BAND);

    let kinds: Vec<SegmentKind> = rows
        .iter()
        .map(|row| {
            // Keyword corrections outrank position.
            if FOOTER_KEYWORDS.is_match(&row.text)
                && !TABLE_HEADER_HINT.is_match(&row.text)
                && row.y > header_limit
            {
                SegmentKind::Footer
            } else if HEADER_KEYWORDS.is_match(&row.text) && row.y < footer_limit {
                SegmentKind::Header
            } else if row.y < header_limit {
                SegmentKind::Header
            } else if row.y > footer_limit {
                SegmentKind::Footer
            } else {
                SegmentKind::Items
            }
        })
        .collect();

    let mut segments: Vec<Segment> = Vec::new();
    for (row, kind) in rows.iter().zip(kinds) {
        match segments.last_mut() {
            Some(seg) if seg.kind == kind => {
                seg.rows.push(row.clone());
                seg.y_min = seg.y_min.min(row.y);
                seg.y_max = seg.y_max.max(row.y);
            }
            _ => segments.push(Segment {
                kind,
                rows: vec![row.clone()],
                y_min: row.y,
                y_max: row.y,
            }),
        }
    }
    segments
}

/// All rows of the given kind across the page's segments, in reading order.
pub fn rows_of_kind(segments: &[Segment], kind: SegmentKind) -> Vec<Row> {
    segments
        .iter()
        .filter(|s| s.kind == kind)
        .flat_map(|s| s.rows.iter().cloned())
        .collect()
}
