//! Core data model for the extraction pipeline.
//!
//! Everything downstream of the tokenizers operates on the types in this
//! module: positioned [`Token`]s, y-clustered [`Row`]s, coarse page
//! [`Segment`]s, and the per-invoice result types ([`InvoiceHeader`],
//! [`InvoiceLine`], [`ValidationResult`], …).
//!
//! ## Coordinate system
//!
//! All coordinates are PDF user-space points with the origin at the
//! **top-left** of the page, x growing right and y growing down. pdfium
//! reports rectangles with a bottom-left origin; the text-layer tokenizer
//! flips them at the boundary so nothing else in the pipeline has to care.
//!
//! ## Ownership
//!
//! A page owns the canonical token vector produced for it. Rows and lines
//! carry their own clones of the tokens they were built from — tokens are a
//! few dozen bytes and cloning keeps every result type self-contained and
//! serialisable for the debug dumps and review metadata.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Tokens ───────────────────────────────────────────────────────────────

/// Where a page's tokens came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    /// Embedded text layer.
    TextLayer,
    /// Rasterised page fed through the OCR engine.
    Ocr,
}

/// A positioned word-level token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Token text, non-empty after trimming.
    pub text: String,
    /// Left edge in points.
    pub x: f64,
    /// Top edge in points.
    pub y: f64,
    /// Width in points (≥ 0).
    pub w: f64,
    /// Height in points (≥ 0).
    pub h: f64,
    /// 1-indexed page number.
    pub page_no: u32,
    /// Scaled font size in points, when the text layer exposes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    /// OCR word confidence in [0, 100]; `None` for text-layer tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Token {
    /// Right edge (`x + w`).
    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    /// Bottom edge (`y + h`).
    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    /// Horizontal centre.
    pub fn center_x(&self) -> f64 {
        self.x + self.w / 2.0
    }

    /// Vertical centre.
    pub fn center_y(&self) -> f64 {
        self.y + self.h / 2.0
    }
}

/// Axis-aligned bounding box in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    /// Smallest box enclosing all given tokens. `None` for an empty slice.
    pub fn enclosing(tokens: &[Token]) -> Option<BBox> {
        let first = tokens.first()?;
        let mut x0 = first.x;
        let mut y0 = first.y;
        let mut x1 = first.right();
        let mut y1 = first.bottom();
        for t in &tokens[1..] {
            x0 = x0.min(t.x);
            y0 = y0.min(t.y);
            x1 = x1.max(t.right());
            y1 = y1.max(t.bottom());
        }
        Some(BBox {
            x: x0,
            y: y0,
            w: x1 - x0,
            h: y1 - y0,
        })
    }

    /// True when `other` lies entirely within this box (with a small slack).
    pub fn contains(&self, other: &BBox) -> bool {
        const SLACK: f64 = 0.01;
        other.x >= self.x - SLACK
            && other.y >= self.y - SLACK
            && other.x + other.w <= self.x + self.w + SLACK
            && other.y + other.h <= self.y + self.h + SLACK
    }
}

// ── Rows and segments ────────────────────────────────────────────────────

/// A reading-order line of tokens sharing a y-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    /// Tokens in left-to-right order. Never empty.
    pub tokens: Vec<Token>,
    /// Median token y of the row.
    pub y: f64,
    /// Left edge of the leftmost token.
    pub x_min: f64,
    /// Right edge of the rightmost token.
    pub x_max: f64,
    /// 1-indexed page number.
    pub page_no: u32,
    /// Space-joined token text. Convenience only — positional logic always
    /// goes back to the tokens.
    pub text: String,
}

impl Row {
    /// Build a row from tokens already sorted left-to-right.
    pub fn from_tokens(tokens: Vec<Token>) -> Row {
        debug_assert!(!tokens.is_empty());
        let mut ys: Vec<f64> = tokens.iter().map(|t| t.y).collect();
        ys.sort_by(|a, b| a.total_cmp(b));
        let y = ys[ys.len() / 2];
        let x_min = tokens.iter().map(|t| t.x).fold(f64::INFINITY, f64::min);
        let x_max = tokens.iter().map(|t| t.right()).fold(0.0_f64, f64::max);
        let page_no = tokens[0].page_no;
        let text = tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Row {
            tokens,
            y,
            x_min,
            x_max,
            page_no,
            text,
        }
    }

    /// x of the first (leftmost) token.
    pub fn first_x(&self) -> f64 {
        self.tokens.first().map(|t| t.x).unwrap_or(0.0)
    }

    /// Map a byte range of `self.text` back to the tokens it was joined
    /// from. Returns `None` when the range touches no token.
    pub fn tokens_for_range(&self, range: &std::ops::Range<usize>) -> Option<Vec<Token>> {
        let mut offset = 0usize;
        let mut hit = Vec::new();
        for token in &self.tokens {
            let start = offset;
            let end = offset + token.text.len();
            if start < range.end && end > range.start {
                hit.push(token.clone());
            }
            offset = end + 1; // single joining space
        }
        (!hit.is_empty()).then_some(hit)
    }
}

/// Coarse label for a contiguous block of rows on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Header,
    Items,
    Footer,
}

/// A contiguous run of rows labelled with a [`SegmentKind`].
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Rows in reading order, contiguous on the page.
    pub rows: Vec<Row>,
    pub y_min: f64,
    pub y_max: f64,
}

// ── Virtual invoices ─────────────────────────────────────────────────────

/// A logical invoice inside a (possibly multi-invoice) PDF.
#[derive(Debug, Clone, Serialize)]
pub struct VirtualInvoice {
    /// 1-indexed position within the source file.
    pub index: usize,
    /// First page of the invoice, 1-indexed, inclusive.
    pub start_page: u32,
    /// Last page of the invoice, 1-indexed, inclusive.
    pub end_page: u32,
    /// Stable id: `{file_stem}__{index}`.
    pub id: String,
}

impl VirtualInvoice {
    /// Number of pages covered by this invoice.
    pub fn page_count(&self) -> u32 {
        self.end_page - self.start_page + 1
    }
}

// ── Traceability ─────────────────────────────────────────────────────────

/// Evidence for a single extracted field: where on which page it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Traceability {
    /// 1-indexed page number.
    pub page: u32,
    /// Box enclosing every source token.
    pub bbox: BBox,
    /// Short text excerpt (the source tokens joined).
    pub excerpt: String,
    /// Texts of the tokens the value was read from.
    pub source_tokens: Vec<String>,
}

impl Traceability {
    /// Build a trace from the tokens a value was read from.
    /// Returns `None` for an empty token slice.
    pub fn from_tokens(tokens: &[Token]) -> Option<Traceability> {
        let bbox = BBox::enclosing(tokens)?;
        let source_tokens: Vec<String> = tokens.iter().map(|t| t.text.clone()).collect();
        Some(Traceability {
            page: tokens[0].page_no,
            bbox,
            excerpt: source_tokens.join(" "),
            source_tokens,
        })
    }
}

// ── Extraction source / detail ───────────────────────────────────────────

/// Which extraction path produced a value (or an invoice's header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Text,
    Ocr,
    AiText,
    AiVision,
}

/// Per-invoice record of how extraction went, aggregated into the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionDetail {
    pub method_used: ExtractionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_text_quality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text_quality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_median_conf: Option<f32>,
    /// Threshold conditions that routed the AI call to vision.
    /// Present exactly when `method_used == AiVision`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_reason: Option<Vec<String>>,
}

// ── Invoice header ───────────────────────────────────────────────────────

/// Sealed header of one virtual invoice.
///
/// Confidences are calibrated probabilities in [0, 1]; the hard gate
/// requires both the invoice number and the total to reach 0.95.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceHeader {
    pub invoice_number: Option<String>,
    pub invoice_number_conf: f64,
    /// Serialises as `null` when absent — review metadata keeps the key.
    pub invoice_number_trace: Option<Traceability>,
    pub total_amount: Option<Decimal>,
    pub total_conf: f64,
    /// Serialises as `null` when absent — review metadata keeps the key.
    pub total_trace: Option<Traceability>,
    pub supplier: Option<String>,
    pub invoice_date: Option<String>,
    /// "Er referens" / "Referenser" value, when present.
    pub reference: Option<String>,
    pub extraction_source: ExtractionSource,
}

impl InvoiceHeader {
    /// Both calibrated confidences at or above the 0.95 gate.
    pub fn hard_gate_pass(&self) -> bool {
        self.invoice_number_conf >= crate::pipeline::validate::HARD_GATE
            && self.total_conf >= crate::pipeline::validate::HARD_GATE
    }
}

/// Accumulates header fields across extraction passes, then seals.
///
/// Extraction runs in several passes (label search, top-of-page scan,
/// footer scan, AI fallback) that each may improve a field. The builder is
/// the only mutable view; everything downstream sees the sealed
/// [`InvoiceHeader`].
#[derive(Debug, Default)]
pub struct InvoiceHeaderBuilder {
    invoice_number: Option<String>,
    invoice_number_conf: f64,
    invoice_number_trace: Option<Traceability>,
    total_amount: Option<Decimal>,
    total_conf: f64,
    total_trace: Option<Traceability>,
    supplier: Option<String>,
    invoice_date: Option<String>,
    reference: Option<String>,
    extraction_source: Option<ExtractionSource>,
}

impl InvoiceHeaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an invoice-number candidate if it beats the current one.
    /// The best candidate is kept even when its confidence is below gate.
    pub fn offer_invoice_number(
        &mut self,
        value: String,
        conf: f64,
        trace: Option<Traceability>,
    ) {
        if self.invoice_number.is_none() || conf > self.invoice_number_conf {
            self.invoice_number = Some(value);
            self.invoice_number_conf = conf;
            self.invoice_number_trace = trace;
        }
    }

    /// Record a total-amount candidate if it beats the current one.
    pub fn offer_total(&mut self, value: Decimal, conf: f64, trace: Option<Traceability>) {
        if self.total_amount.is_none() || conf > self.total_conf {
            self.total_amount = Some(value);
            self.total_conf = conf;
            self.total_trace = trace;
        }
    }

    pub fn supplier(&mut self, value: String) {
        if self.supplier.is_none() {
            self.supplier = Some(value);
        }
    }

    pub fn invoice_date(&mut self, value: String) {
        if self.invoice_date.is_none() {
            self.invoice_date = Some(value);
        }
    }

    pub fn reference(&mut self, value: String) {
        if self.reference.is_none() {
            self.reference = Some(value);
        }
    }

    pub fn extraction_source(&mut self, source: ExtractionSource) {
        self.extraction_source = Some(source);
    }

    /// Current total confidence (drives the AI-fallback threshold check).
    pub fn total_conf(&self) -> f64 {
        self.total_conf
    }

    /// Current total candidate, if any.
    pub fn total_amount(&self) -> Option<Decimal> {
        self.total_amount
    }

    /// Seal into an immutable header.
    pub fn seal(self) -> InvoiceHeader {
        InvoiceHeader {
            invoice_number: self.invoice_number,
            invoice_number_conf: self.invoice_number_conf,
            invoice_number_trace: self.invoice_number_trace,
            total_amount: self.total_amount,
            total_conf: self.total_conf,
            total_trace: self.total_trace,
            supplier: self.supplier,
            invoice_date: self.invoice_date,
            reference: self.reference,
            extraction_source: self.extraction_source.unwrap_or(ExtractionSource::Text),
        }
    }
}

// ── Invoice lines ────────────────────────────────────────────────────────

/// One parsed line item.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceLine {
    /// 1-indexed position within the invoice, in row order.
    pub line_number: u32,
    /// Item description; wraps from continuation rows are folded in.
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
    /// Discount stored as a positive amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<Decimal>,
    /// Line total; negative for credit lines.
    pub total_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat_rate: Option<Decimal>,
    /// Texts of the source rows (primary row first, then wraps).
    pub source_rows: Vec<String>,
}

// ── Validation ───────────────────────────────────────────────────────────

/// Final classification of one invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "REVIEW")]
    Review,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValidationStatus::Ok => "OK",
            ValidationStatus::Partial => "PARTIAL",
            ValidationStatus::Review => "REVIEW",
        };
        f.write_str(s)
    }
}

/// Outcome of validating an invoice's header against its parsed lines.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    /// Sum over all line totals (computed even without a header total).
    pub lines_sum: Decimal,
    /// `header.total − lines_sum`, when the header total is known.
    pub diff: Option<Decimal>,
    /// Sum tolerance in SEK.
    pub tolerance: Decimal,
    pub hard_gate_pass: bool,
    pub invoice_number_conf: f64,
    pub total_conf: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

// ── Routing ──────────────────────────────────────────────────────────────

/// Why a page was routed to the text layer or to OCR.
#[derive(Debug, Clone, Serialize)]
pub struct PageRoutingDecision {
    /// 1-indexed page number.
    pub page: u32,
    pub source: TokenSource,
    pub text_char_count: usize,
    pub word_token_count: usize,
    /// Blended text-quality score in [0, 1].
    pub text_quality: f64,
    /// Anchor patterns that matched.
    pub anchor_hits: Vec<String>,
    /// Non-empty whenever the chosen source is not the text layer, and
    /// whenever an override was applied.
    pub reason_flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median_conf: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_conf_fraction: Option<f32>,
}

// ── Page-level metrics ───────────────────────────────────────────────────

/// Aggregates over an OCR'd page's kept word confidences.
///
/// Mean drives the 400-DPI retry (sensitive to a bad render); median drives
/// routing (robust to outliers).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OcrPageMetrics {
    pub mean_conf: f32,
    pub median_conf: f32,
    /// Share of kept tokens with confidence < 50.
    pub low_conf_fraction: f32,
}

// ── Document content (pipeline-internal) ─────────────────────────────────

/// Text-layer extraction of one page, produced by the reader in a single
/// blocking pass so the routing oracle never re-opens the document.
#[derive(Debug, Clone)]
pub struct PageText {
    /// 1-indexed page number.
    pub page_no: u32,
    /// Page width in points, read verbatim.
    pub width: f64,
    /// Page height in points, read verbatim.
    pub height: f64,
    /// Line-clustered word tokens from the text layer.
    pub tokens: Vec<Token>,
    /// Raw text-layer string, cached for the routing oracle.
    pub raw_text: String,
}

/// A fully opened document: path plus the text layer of every page.
#[derive(Debug, Clone)]
pub struct DocumentContent {
    pub path: PathBuf,
    pub pages: Vec<PageText>,
}

impl DocumentContent {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// File stem used to derive virtual-invoice ids.
    pub fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }
}

/// A page after routing: the tokens the rest of the pipeline works on.
#[derive(Debug, Clone)]
pub struct RoutedPage {
    pub page_no: u32,
    pub width: f64,
    pub height: f64,
    pub source: TokenSource,
    pub tokens: Vec<Token>,
    pub ocr_metrics: Option<OcrPageMetrics>,
    pub decision: PageRoutingDecision,
}

/// A page prepared for extraction: rows grouped and segments labelled.
/// Header, table and footer extraction all read this shape.
#[derive(Debug, Clone)]
pub struct PreparedPage {
    pub page_no: u32,
    pub width: f64,
    pub height: f64,
    pub rows: Vec<Row>,
    pub segments: Vec<Segment>,
}

// ── Assembled results ────────────────────────────────────────────────────

/// Everything extracted for one virtual invoice, in hand-off shape for the
/// writers.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceRecord {
    pub id: String,
    pub source_path: PathBuf,
    /// 1-indexed invoice position within the source file.
    pub index: usize,
    pub start_page: u32,
    pub end_page: u32,
    pub header: InvoiceHeader,
    pub lines: Vec<InvoiceLine>,
    pub validation: ValidationResult,
    pub detail: ExtractionDetail,
    pub routing: Vec<PageRoutingDecision>,
}

/// Per-status counts plus per-invoice details, serialised as
/// `run_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_files: usize,
    pub total_invoices: usize,
    pub ok: usize,
    pub partial: usize,
    pub review: usize,
    pub failed: usize,
    pub extraction_details: Vec<InvoiceSummaryEntry>,
    pub output_paths: OutputPathsSummary,
}

/// One invoice's entry in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceSummaryEntry {
    pub invoice_id: String,
    pub status: ValidationStatus,
    #[serde(flatten)]
    pub detail: ExtractionDetail,
    pub page_routing: Vec<PageRoutingDecision>,
}

/// Output locations recorded in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct OutputPathsSummary {
    pub spreadsheet: PathBuf,
    pub review_dir: PathBuf,
    pub artifacts_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn tok(text: &str, x: f64, y: f64, w: f64, h: f64) -> Token {
        Token {
            text: text.to_string(),
            x,
            y,
            w,
            h,
            page_no: 1,
            font_size: None,
            confidence: None,
        }
    }

    #[test]
    fn bbox_encloses_all_tokens() {
        let tokens = vec![tok("a", 10.0, 20.0, 30.0, 10.0), tok("b", 50.0, 18.0, 20.0, 12.0)];
        let bbox = BBox::enclosing(&tokens).unwrap();
        assert_eq!(bbox.x, 10.0);
        assert_eq!(bbox.y, 18.0);
        assert_eq!(bbox.w, 60.0);
        assert_eq!(bbox.h, 12.0);
        for t in &tokens {
            let tb = BBox {
                x: t.x,
                y: t.y,
                w: t.w,
                h: t.h,
            };
            assert!(bbox.contains(&tb));
        }
    }

    #[test]
    fn row_text_is_space_joined() {
        let row = Row::from_tokens(vec![
            tok("Faktura", 10.0, 20.0, 40.0, 10.0),
            tok("123456", 60.0, 20.0, 30.0, 10.0),
        ]);
        assert_eq!(row.text, "Faktura 123456");
        assert_eq!(row.x_min, 10.0);
        assert_eq!(row.x_max, 90.0);
    }

    #[test]
    fn traceability_excerpt_matches_source_tokens() {
        let tokens = vec![tok("1", 0.0, 0.0, 5.0, 8.0), tok("072,60", 6.0, 0.0, 30.0, 8.0)];
        let trace = Traceability::from_tokens(&tokens).unwrap();
        assert_eq!(trace.excerpt, "1 072,60");
        assert_eq!(trace.source_tokens, vec!["1", "072,60"]);
        assert!(trace.bbox.contains(&BBox {
            x: 6.0,
            y: 0.0,
            w: 30.0,
            h: 8.0
        }));
    }

    #[test]
    fn builder_keeps_best_candidate() {
        let mut b = InvoiceHeaderBuilder::new();
        b.offer_invoice_number("11111".into(), 0.4, None);
        b.offer_invoice_number("222222".into(), 0.9, None);
        b.offer_invoice_number("33333".into(), 0.5, None);
        let header = b.seal();
        assert_eq!(header.invoice_number.as_deref(), Some("222222"));
        assert!((header.invoice_number_conf - 0.9).abs() < 1e-9);
    }

    #[test]
    fn builder_keeps_low_confidence_candidate() {
        // A candidate below the gate must still be recorded, never erased.
        let mut b = InvoiceHeaderBuilder::new();
        b.offer_invoice_number("123456".into(), 0.2, None);
        let header = b.seal();
        assert_eq!(header.invoice_number.as_deref(), Some("123456"));
        assert!(!header.hard_gate_pass());
    }

    #[test]
    fn status_display_is_uppercase() {
        assert_eq!(ValidationStatus::Ok.to_string(), "OK");
        assert_eq!(ValidationStatus::Partial.to_string(), "PARTIAL");
        assert_eq!(ValidationStatus::Review.to_string(), "REVIEW");
    }
}
