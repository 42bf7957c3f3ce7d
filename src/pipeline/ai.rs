//! AI fallback for the header total, bound by a strict contract.
//!
//! The fallback is the only non-deterministic stage and it is fenced
//! accordingly: it runs exclusively for the **total** field, only when the
//! calibrated confidence sits below the configured threshold, makes at most
//! two API calls (one retry with a strict-JSON reinforcement), never
//! re-invokes itself, and never touches the 0.95 hard gate. Whatever it
//! returns still has to survive the ordinary validation path.
//!
//! Providers are pluggable behind [`AiProvider`]; the built-in
//! [`HttpAiProvider`] speaks the OpenAI-compatible chat-completions JSON
//! shape over reqwest. Tests use an in-process scripted provider.

use crate::amount::normalize_amount;
use crate::config::{AiConfig, VisionConfig};
use crate::error::StageError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::DynamicImage;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::io::Cursor;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Reinforcement appended on the single retry after a malformed response.
const STRICT_JSON_REMINDER: &str =
    "Return ONLY valid JSON matching the schema {\"total_amount\": \"<decimal>\" | null}. \
     No prose, no markdown fences.";

// ── Provider contract ────────────────────────────────────────────────────

/// One request to an AI provider.
pub struct AiRequest<'a> {
    /// The full prompt text.
    pub prompt: &'a str,
    /// At most one prepared page image.
    pub image: Option<&'a PreparedImage>,
    /// Model override from configuration.
    pub model: Option<&'a str>,
}

/// A pluggable AI provider. Implementations perform exactly one API call
/// per [`AiProvider::complete`] invocation; retry policy lives in the
/// pipeline, not the provider.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Perform the call and return the raw response text.
    async fn complete(&self, request: AiRequest<'_>) -> Result<String, String>;

    /// Provider name for provenance records.
    fn name(&self) -> &str;
}

/// Result of a successful fallback run.
#[derive(Debug, Clone)]
pub struct AiOutcome {
    /// Normalised total, or `None` when the model answered `null`.
    pub total_amount: Option<Decimal>,
    /// Opaque provenance blob (provider, model, retries, raw response).
    pub provenance: Value,
    /// Whether an image was attached to the call.
    pub used_vision: bool,
}

// ── Image preparation ────────────────────────────────────────────────────

/// A page image ready for a vision call: within pixel and byte limits,
/// PNG or JPEG only.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl PreparedImage {
    /// Base64 data-URI for JSON request bodies.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }
}

/// Prepare rendered page bytes for a vision call.
///
/// Downscales so the longest side fits `cfg.max_longest_side`, then
/// re-encodes as JPEG if the PNG bytes exceed `cfg.max_bytes`. Returns an
/// error string when the result still cannot satisfy the limits.
pub fn prepare_image(png_bytes: &[u8], cfg: &VisionConfig) -> Result<PreparedImage, String> {
    let img = image::load_from_memory(png_bytes).map_err(|e| format!("decode: {e}"))?;

    let longest = img.width().max(img.height());
    let img: DynamicImage = if longest > cfg.max_longest_side {
        let scale = cfg.max_longest_side as f64 / longest as f64;
        let w = (img.width() as f64 * scale).round().max(1.0) as u32;
        let h = (img.height() as f64 * scale).round().max(1.0) as u32;
        debug!(from = longest, to = cfg.max_longest_side, "downscaling vision image");
        img.resize(w, h, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let png_allowed = cfg.allowed_formats.iter().any(|f| f == "png");
    let jpeg_allowed = cfg.allowed_formats.iter().any(|f| f == "jpeg");

    if png_allowed {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| format!("png encode: {e}"))?;
        if buf.len() <= cfg.max_bytes {
            return Ok(PreparedImage {
                bytes: buf,
                mime: "image/png",
            });
        }
    }

    if jpeg_allowed {
        let mut buf = Vec::new();
        // JPEG needs RGB; drop any alpha channel first.
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        rgb.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .map_err(|e| format!("jpeg encode: {e}"))?;
        if buf.len() <= cfg.max_bytes {
            return Ok(PreparedImage {
                bytes: buf,
                mime: "image/jpeg",
            });
        }
    }

    Err(format!(
        "image exceeds {} bytes in every allowed format",
        cfg.max_bytes
    ))
}

// ── Prompt construction ──────────────────────────────────────────────────

/// Build the total-recovery prompt from candidate excerpts.
pub fn build_total_prompt(excerpts: &[String]) -> String {
    let mut prompt = String::from(
        "You are reading a Swedish invoice. Determine the total amount to pay \
         (\"Att betala\" / \"Summa att betala\"), in SEK.\n\
         Candidate excerpts from the document:\n",
    );
    for (i, excerpt) in excerpts.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, excerpt.trim()));
    }
    prompt.push_str(
        "\nAnswer with JSON only: {\"total_amount\": \"<decimal with dot separator>\"} \
         or {\"total_amount\": null} if the total cannot be determined.",
    );
    prompt
}

// ── Fallback driver ──────────────────────────────────────────────────────

/// Run the fallback: one call, then at most one strict-JSON retry.
///
/// A timeout counts as a failed call. Two failures surface as
/// [`StageError::AiFailure`] and the deterministic result stands.
pub async fn recover_total(
    provider: &dyn AiProvider,
    cfg: &AiConfig,
    prompt: &str,
    image: Option<&PreparedImage>,
) -> Result<AiOutcome, StageError> {
    let call_timeout = Duration::from_secs(cfg.timeout_secs);
    let mut last_failure = String::new();

    for attempt in 0..2u32 {
        let request_prompt = if attempt == 0 {
            prompt.to_string()
        } else {
            format!("{prompt}\n\n{STRICT_JSON_REMINDER}")
        };
        let request = AiRequest {
            prompt: &request_prompt,
            image,
            model: cfg.model.as_deref(),
        };

        let response = match timeout(call_timeout, provider.complete(request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(attempt, error = %e, "AI call failed");
                last_failure = e;
                continue;
            }
            Err(_) => {
                warn!(attempt, secs = cfg.timeout_secs, "AI call timed out");
                last_failure = format!("timeout after {}s", cfg.timeout_secs);
                continue;
            }
        };

        match parse_total_response(&response) {
            Ok(total_amount) => {
                return Ok(AiOutcome {
                    total_amount,
                    provenance: json!({
                        "provider": provider.name(),
                        "model": cfg.model,
                        "attempt": attempt + 1,
                        "raw": response,
                    }),
                    used_vision: image.is_some(),
                });
            }
            Err(e) => {
                warn!(attempt, error = %e, "AI response failed schema validation");
                last_failure = e;
            }
        }
    }

    Err(StageError::AiFailure {
        detail: last_failure,
    })
}

/// Parse the strict response schema `{"total_amount": <string|number|null>}`.
fn parse_total_response(response: &str) -> Result<Option<Decimal>, String> {
    // Tolerate accidental markdown fences; nothing else.
    let trimmed = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON: {e}"))?;
    let obj = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;
    let total = obj
        .get("total_amount")
        .ok_or_else(|| "missing total_amount".to_string())?;

    match total {
        Value::Null => Ok(None),
        Value::String(s) => normalize_amount(s)
            .map(Some)
            .map_err(|e| format!("unparseable total_amount: {e}")),
        Value::Number(n) => {
            let s = n.to_string();
            normalize_amount(&s)
                .map(Some)
                .map_err(|e| format!("unparseable total_amount: {e}"))
        }
        other => Err(format!("total_amount has wrong type: {other}")),
    }
}

// ── Built-in HTTP provider ───────────────────────────────────────────────

/// OpenAI-compatible chat-completions provider.
pub struct HttpAiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    name: String,
}

impl HttpAiProvider {
    /// Build from configuration. `None` when the config has no key (the
    /// fallback then stays disabled).
    pub fn from_config(cfg: &AiConfig) -> Option<Self> {
        let api_key = cfg.api_key.clone()?;
        let endpoint = cfg
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string());
        Some(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            name: cfg.provider.clone().unwrap_or_else(|| "openai".to_string()),
        })
    }
}

#[async_trait]
impl AiProvider for HttpAiProvider {
    async fn complete(&self, request: AiRequest<'_>) -> Result<String, String> {
        let content = match request.image {
            Some(image) => json!([
                { "type": "text", "text": request.prompt },
                { "type": "image_url", "image_url": { "url": image.data_uri() } },
            ]),
            None => json!(request.prompt),
        };
        let body = json!({
            "model": request.model.unwrap_or("gpt-4o-mini"),
            "temperature": 0.0,
            "messages": [ { "role": "user", "content": content } ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("provider returned HTTP {status}"));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| format!("response body: {e}"))?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| "no message content in response".to_string())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider: pops pre-baked responses and counts calls.
    struct Scripted {
        responses: Mutex<Vec<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AiProvider for Scripted {
        async fn complete(&self, _request: AiRequest<'_>) -> Result<String, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err("script exhausted".to_string())
            } else {
                responses.remove(0)
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn cfg() -> AiConfig {
        AiConfig {
            enabled: true,
            api_key: Some("test".into()),
            timeout_secs: 5,
            ..AiConfig::default()
        }
    }

    #[tokio::test]
    async fn valid_first_response_needs_one_call() {
        let provider = Scripted::new(vec![Ok(r#"{"total_amount": "1672.60"}"#.to_string())]);
        let outcome = recover_total(&provider, &cfg(), "prompt", None).await.unwrap();
        assert_eq!(outcome.total_amount, Some(dec!(1672.60)));
        assert_eq!(provider.call_count(), 1);
        assert!(!outcome.used_vision);
    }

    #[tokio::test]
    async fn malformed_response_triggers_exactly_one_retry() {
        let provider = Scripted::new(vec![
            Ok("the total is 1672.60 kr".to_string()),
            Ok(r#"{"total_amount": "1672.60"}"#.to_string()),
        ]);
        let outcome = recover_total(&provider, &cfg(), "prompt", None).await.unwrap();
        assert_eq!(outcome.total_amount, Some(dec!(1672.60)));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn never_more_than_two_calls() {
        let provider = Scripted::new(vec![
            Ok("garbage".to_string()),
            Ok("more garbage".to_string()),
            Ok(r#"{"total_amount": "1.00"}"#.to_string()),
        ]);
        let result = recover_total(&provider, &cfg(), "prompt", None).await;
        assert!(result.is_err());
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn provider_error_then_success() {
        let provider = Scripted::new(vec![
            Err("HTTP 503".to_string()),
            Ok(r#"{"total_amount": null}"#.to_string()),
        ]);
        let outcome = recover_total(&provider, &cfg(), "prompt", None).await.unwrap();
        assert_eq!(outcome.total_amount, None);
        assert_eq!(provider.call_count(), 2);
    }

    #[test]
    fn parses_number_and_string_totals() {
        assert_eq!(
            parse_total_response(r#"{"total_amount": "1 072,60"}"#).unwrap(),
            Some(dec!(1072.60))
        );
        assert_eq!(
            parse_total_response(r#"{"total_amount": 400.5}"#).unwrap(),
            Some(dec!(400.50))
        );
        assert_eq!(parse_total_response(r#"{"total_amount": null}"#).unwrap(), None);
        assert!(parse_total_response("not json").is_err());
        assert!(parse_total_response(r#"{"amount": 1}"#).is_err());
        assert!(parse_total_response(r#"{"total_amount": true}"#).is_err());
    }

    #[test]
    fn fenced_json_is_tolerated() {
        let fenced = "```json\n{\"total_amount\": \"99.00\"}\n```";
        assert_eq!(parse_total_response(fenced).unwrap(), Some(dec!(99.00)));
    }

    #[test]
    fn prompt_lists_excerpts() {
        let prompt = build_total_prompt(&[
            "Att betala 1 672,60".to_string(),
            "Nettobelopp exkl. moms 1 338,08".to_string(),
        ]);
        assert!(prompt.contains("1. Att betala 1 672,60"));
        assert!(prompt.contains("2. Nettobelopp exkl. moms 1 338,08"));
        assert!(prompt.contains("total_amount"));
    }

    #[test]
    fn image_downscaled_to_longest_side() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            800,
            200,
            image::Rgb([250, 250, 250]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();

        let cfg = VisionConfig {
            max_longest_side: 400,
            ..VisionConfig::default()
        };
        let prepared = prepare_image(&buf, &cfg).unwrap();
        assert_eq!(prepared.mime, "image/png");
        let reloaded = image::load_from_memory(&prepared.bytes).unwrap();
        assert!(reloaded.width() <= 400 && reloaded.height() <= 400);
    }

    #[test]
    fn oversized_png_reencodes_as_jpeg() {
        // Noise compresses poorly as PNG; a tight byte cap forces JPEG.
        let mut rgb = image::RgbImage::new(300, 300);
        for (x, y, p) in rgb.enumerate_pixels_mut() {
            *p = image::Rgb([
                (x * 7 % 251) as u8,
                (y * 13 % 251) as u8,
                ((x + y) * 29 % 251) as u8,
            ]);
        }
        let img = DynamicImage::ImageRgb8(rgb);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();

        let cfg = VisionConfig {
            max_bytes: 60_000,
            ..VisionConfig::default()
        };
        let prepared = prepare_image(&buf, &cfg).unwrap();
        assert_eq!(prepared.mime, "image/jpeg");
        assert!(prepared.bytes.len() <= 60_000);
    }
}
