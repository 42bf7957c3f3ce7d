//! OCR tokenizer: rendered page → tesseract → positioned word tokens with
//! confidences.
//!
//! The engine is the `tesseract` binary, invoked as a subprocess with TSV
//! output — word-level boxes and confidences per row. When the TSV comes
//! back structurally unusable (old engine builds, exotic configs), a
//! second run with plain-text output provides tokens without geometry so a
//! page is never silently lost.
//!
//! Two aggregates are derived per page and they serve different masters:
//! **mean** confidence decides the 400-DPI re-render (sensitive to one bad
//! render), **median** feeds routing quality (robust to outliers).

use crate::error::StageError;
use crate::model::{OcrPageMetrics, Token};
use crate::pipeline::rows;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Wall-clock bound for one tesseract invocation.
const OCR_TIMEOUT: Duration = Duration::from_secs(60);

/// Word confidence below this counts into `low_conf_fraction`.
const LOW_CONF_THRESHOLD: f32 = 50.0;

/// Tokens plus page aggregates from one OCR pass.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub tokens: Vec<Token>,
    /// `None` when the fallback path produced tokens without confidences.
    pub metrics: Option<OcrPageMetrics>,
}

/// OCR a rendered page image.
///
/// `dpi` is the DPI the image was rendered at; box coordinates come back
/// in pixels and are converted to PDF points before token emission.
pub async fn tokenize_page(
    image_path: &Path,
    page_no: u32,
    dpi: u32,
    language: &str,
) -> Result<OcrResult, StageError> {
    let tsv = run_tesseract(image_path, page_no, language, &["tsv"]).await?;
    let scale = 72.0 / dpi as f64;

    let tokens = parse_tsv(&tsv, page_no, scale);
    if !tokens.is_empty() {
        let metrics = page_metrics(&tokens);
        let ordered = reading_order(tokens);
        debug!(page = page_no, tokens = ordered.len(), "OCR tokens from TSV");
        return Ok(OcrResult {
            tokens: ordered,
            metrics,
        });
    }

    // Structurally unusable TSV: retry in plain-text mode. Tokens carry no
    // geometry or confidence, but the text itself is preserved.
    warn!(page = page_no, "tesseract TSV unusable; falling back to plain text");
    let plain = run_tesseract(image_path, page_no, language, &[]).await?;
    let tokens: Vec<Token> = plain
        .split_whitespace()
        .map(|word| Token {
            text: word.to_string(),
            x: 0.0,
            y: 0.0,
            w: 0.0,
            h: 0.0,
            page_no,
            font_size: None,
            confidence: None,
        })
        .collect();

    if tokens.is_empty() {
        return Err(StageError::OcrFailure {
            page: page_no,
            detail: "no usable output in TSV or plain-text mode".to_string(),
        });
    }

    Ok(OcrResult {
        tokens,
        metrics: None,
    })
}

/// Run the tesseract binary and capture stdout.
async fn run_tesseract(
    image_path: &Path,
    page_no: u32,
    language: &str,
    config: &[&str],
) -> Result<String, StageError> {
    let mut cmd = Command::new("tesseract");
    cmd.arg(image_path)
        .arg("stdout")
        .args(["-l", language, "--psm", "6"])
        .args(config)
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let output = timeout(OCR_TIMEOUT, cmd.output())
        .await
        .map_err(|_| StageError::OcrFailure {
            page: page_no,
            detail: format!("tesseract timed out after {}s", OCR_TIMEOUT.as_secs()),
        })?
        .map_err(|e| StageError::OcrFailure {
            page: page_no,
            detail: format!("failed to launch tesseract: {e}"),
        })?;

    if !output.status.success() {
        return Err(StageError::OcrFailure {
            page: page_no,
            detail: format!("tesseract exit status {}", output.status),
        });
    }

    String::from_utf8(output.stdout).map_err(|e| StageError::OcrFailure {
        page: page_no,
        detail: format!("invalid utf8 from tesseract: {e}"),
    })
}

/// Parse tesseract TSV output into tokens.
///
/// Keeps word-level rows (level 5) only, drops negative confidences, and
/// converts pixel boxes to points via `scale`.
fn parse_tsv(tsv: &str, page_no: u32, scale: f64) -> Vec<Token> {
    let mut tokens = Vec::new();

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        // level page block par line word left top width height conf text
        let Ok(level) = fields[0].parse::<u32>() else {
            continue;
        };
        if level != 5 {
            continue;
        }
        let Ok(conf) = fields[10].parse::<f32>() else {
            continue;
        };
        if conf < 0.0 {
            continue;
        }
        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }
        let (Ok(left), Ok(top), Ok(width), Ok(height)) = (
            fields[6].parse::<f64>(),
            fields[7].parse::<f64>(),
            fields[8].parse::<f64>(),
            fields[9].parse::<f64>(),
        ) else {
            continue;
        };

        tokens.push(Token {
            text: text.to_string(),
            x: left * scale,
            y: top * scale,
            w: width * scale,
            h: height * scale,
            page_no,
            font_size: None,
            confidence: Some(conf.clamp(0.0, 100.0)),
        });
    }

    tokens
}

/// Aggregate the kept confidences. `None` when no token carries one.
fn page_metrics(tokens: &[Token]) -> Option<OcrPageMetrics> {
    let mut confs: Vec<f32> = tokens.iter().filter_map(|t| t.confidence).collect();
    if confs.is_empty() {
        return None;
    }
    confs.sort_by(|a, b| a.total_cmp(b));
    let mean = confs.iter().sum::<f32>() / confs.len() as f32;
    let median = confs[confs.len() / 2];
    let low = confs.iter().filter(|c| **c < LOW_CONF_THRESHOLD).count() as f32
        / confs.len() as f32;
    Some(OcrPageMetrics {
        mean_conf: mean,
        median_conf: median,
        low_conf_fraction: low,
    })
}

/// Sort tokens into reading order via the shared row clustering.
fn reading_order(tokens: Vec<Token>) -> Vec<Token> {
    rows::group_rows(&tokens)
        .into_iter()
        .flat_map(|row| row.tokens)
        .collect()
}
