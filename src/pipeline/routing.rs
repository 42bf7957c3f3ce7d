//! Routing oracle: per page, is the embedded text layer good enough, or
//! does the page need OCR?
//!
//! The decision is cheap and fully explainable: a base check (enough
//! characters + anchor keywords) OR a quality override (good blended text
//! quality + enough word tokens). Every failed check leaves a reason flag
//! in the [`PageRoutingDecision`] so a run summary can say exactly why a
//! page went to OCR.
//!
//! Identical inputs always produce identical decisions — the oracle holds
//! no state beyond the compiled anchor regexes.

use crate::config::RoutingConfig;
use crate::model::{OcrPageMetrics, PageRoutingDecision, Token, TokenSource};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Reason flag: the page text was shorter than `min_text_chars`.
pub const FLAG_MIN_TEXT_CHARS: &str = "min_text_chars";
/// Reason flag: a required anchor regex did not match.
pub const FLAG_REQUIRED_ANCHOR: &str = "required_anchor_miss";
/// Reason flag: none of the configured extra anchors matched.
pub const FLAG_EXTRA_ANCHOR: &str = "extra_anchor_miss";
/// Reason flag: the quality override rescued an anchor-less page.
pub const FLAG_QUALITY_OVERRIDE: &str = "quality_override";
/// Reason flag: the base check passed outright.
pub const FLAG_TEXT_SUFFICIENT: &str = "routing_text_layer_sufficient";
/// Reason flag: the page was routed to OCR.
pub const FLAG_OCR_FALLBACK: &str = "ocr_fallback";

/// Decide, for one page, whether its text layer suffices.
///
/// `raw_text` is the cached text-layer string; `tokens` the text-layer word
/// tokens. OCR metrics are attached later by the caller if the page is
/// actually OCR'd.
pub fn decide_page(
    cfg: &RoutingConfig,
    page_no: u32,
    raw_text: &str,
    tokens: &[Token],
) -> PageRoutingDecision {
    let text_chars = raw_text.chars().filter(|c| !c.is_whitespace()).count();
    let word_tokens = tokens.len();

    let mut anchor_hits = Vec::new();
    let mut reason_flags = Vec::new();

    let mut required_ok = true;
    for pattern in &cfg.required_anchors {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(raw_text) => anchor_hits.push(pattern.clone()),
            _ => {
                required_ok = false;
            }
        }
    }

    let mut extra_ok = cfg.extra_anchors.is_empty();
    for pattern in &cfg.extra_anchors {
        if let Ok(re) = Regex::new(pattern) {
            if re.is_match(raw_text) {
                anchor_hits.push(pattern.clone());
                extra_ok = true;
            }
        }
    }

    let chars_ok = text_chars >= cfg.min_text_chars;
    let base_ok = chars_ok && required_ok && extra_ok;

    let quality = text_quality(raw_text, tokens, None);
    let override_ok = cfg.allow_quality_override
        && quality >= cfg.min_text_quality
        && word_tokens >= cfg.min_word_tokens;

    let use_text_layer = base_ok || override_ok;

    if !chars_ok {
        reason_flags.push(FLAG_MIN_TEXT_CHARS.to_string());
    }
    if !required_ok {
        reason_flags.push(FLAG_REQUIRED_ANCHOR.to_string());
    }
    if !extra_ok {
        reason_flags.push(FLAG_EXTRA_ANCHOR.to_string());
    }
    if use_text_layer {
        if base_ok {
            reason_flags.push(FLAG_TEXT_SUFFICIENT.to_string());
        } else {
            reason_flags.push(FLAG_QUALITY_OVERRIDE.to_string());
        }
    } else {
        reason_flags.push(FLAG_OCR_FALLBACK.to_string());
    }

    debug!(
        page = page_no,
        text_chars,
        word_tokens,
        quality,
        use_text_layer,
        "routing decision"
    );

    PageRoutingDecision {
        page: page_no,
        source: if use_text_layer {
            TokenSource::TextLayer
        } else {
            TokenSource::Ocr
        },
        text_char_count: text_chars,
        word_token_count: word_tokens,
        text_quality: quality,
        anchor_hits,
        reason_flags,
        median_conf: None,
        low_conf_fraction: None,
    }
}

/// Attach OCR metrics to a decision after the page was OCR'd.
pub fn with_ocr_metrics(
    mut decision: PageRoutingDecision,
    metrics: &OcrPageMetrics,
) -> PageRoutingDecision {
    decision.median_conf = Some(metrics.median_conf);
    decision.low_conf_fraction = Some(metrics.low_conf_fraction);
    decision
}

// ── Text quality ─────────────────────────────────────────────────────────

/// Characters considered normal in invoice text. Anything else counts as
/// "weird" — mojibake, control characters, OCR artefacts.
static NORMAL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\p{L}\p{N}.,\-/:;()%&+*'"§@ \t]"#).expect("normal chars"));

static QUALITY_KEYWORDS: &[&str] = &["Total", "Moms", "Faktura", "Bankgiro"];

/// Blended text-quality score in `[0, 1]`.
///
/// Weights: 0.25 non-empty ratio, 0.25 (1 − weird-char fraction),
/// 0.20 alphanumeric ratio, 0.10 token-length sanity (median 2–20 chars),
/// plus 0.05 per invoice keyword present, capped at 0.2. When `ocr_metrics`
/// is given (the tokens came from OCR), the blend shifts to
/// `0.7 × score + 0.3 × median_conf/100`.
pub fn text_quality(raw_text: &str, tokens: &[Token], ocr_metrics: Option<&OcrPageMetrics>) -> f64 {
    let trimmed = raw_text.trim();
    if trimmed.is_empty() && tokens.is_empty() {
        return 0.0;
    }

    let total_chars = trimmed.chars().count().max(1);
    let non_ws = trimmed.chars().filter(|c| !c.is_whitespace()).count();
    let non_empty_ratio = (non_ws as f64 / total_chars as f64).min(1.0);

    let weird = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && !NORMAL_CHARS.is_match(&c.to_string()))
        .count();
    let weird_fraction = weird as f64 / non_ws.max(1) as f64;

    let alnum = trimmed.chars().filter(|c| c.is_alphanumeric()).count();
    let alnum_ratio = alnum as f64 / non_ws.max(1) as f64;

    let len_sanity = if tokens.is_empty() {
        0.5
    } else {
        let mut lens: Vec<usize> = tokens.iter().map(|t| t.text.chars().count()).collect();
        lens.sort_unstable();
        let median = lens[lens.len() / 2];
        if (2..=20).contains(&median) {
            1.0
        } else {
            0.0
        }
    };

    let mut bonus: f64 = 0.0;
    for kw in QUALITY_KEYWORDS {
        if trimmed.contains(kw) {
            bonus += 0.05;
        }
    }
    let bonus = bonus.min(0.2);

    let score = 0.25 * non_empty_ratio
        + 0.25 * (1.0 - weird_fraction)
        + 0.20 * alnum_ratio
        + 0.10 * len_sanity
        + bonus;
    let score = score.clamp(0.0, 1.0);

    match ocr_metrics {
        Some(m) => (0.7 * score + 0.3 * (m.median_conf as f64 / 100.0)).clamp(0.0, 1.0),
        None => score,
    }
}
