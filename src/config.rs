//! Configuration types for the extraction pipeline.
//!
//! All behaviour is controlled through one [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`] or deserialised from a JSON profile. The config
//! is read once at startup and passed down by reference — no module-level
//! mutable state anywhere in the pipeline.
//!
//! # Design choice: builder over constructor
//! The config has six sub-sections and several dozen knobs; a positional
//! constructor is unusable and breaks on every added field. The builder lets
//! callers set only what they care about and lean on documented defaults for
//! the rest.

use crate::error::FakturaError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete pipeline configuration.
///
/// # Example
/// ```rust
/// use fakturaflow::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .jobs(4)
///     .table_parser_mode(fakturaflow::TableParserMode::Auto)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi.baseline, 300);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Page-routing thresholds and anchors.
    pub ocr_routing: RoutingConfig,
    /// Line-item parser mode selection.
    pub table_parser_mode: TableParserMode,
    /// Sum tolerances in SEK.
    pub validation: ValidationConfig,
    /// AI fallback switches; off by default.
    pub ai: AiConfig,
    /// Rasterisation DPI policy.
    pub dpi: DpiConfig,
    /// Vision image preparation limits.
    pub vision: VisionConfig,
    /// Concurrent invoice workers. Default: 4.
    pub jobs: usize,
    /// Per-invoice wall-clock budget in seconds. Default: 120.
    pub invoice_timeout_secs: u64,
    /// OCR language(s) passed to the engine. Default: "swe+eng".
    pub ocr_language: String,
    /// Optional calibration artefact (JSON knots). Identity map when absent.
    pub calibration_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr_routing: RoutingConfig::default(),
            table_parser_mode: TableParserMode::Auto,
            validation: ValidationConfig::default(),
            ai: AiConfig::default(),
            dpi: DpiConfig::default(),
            vision: VisionConfig::default(),
            jobs: 4,
            invoice_timeout_secs: 120,
            ocr_language: "swe+eng".to_string(),
            calibration_file: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load a JSON profile from disk. Missing sections keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, FakturaError> {
        let raw = std::fs::read_to_string(path).map_err(|e| FakturaError::ConfigError {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| FakturaError::ConfigError {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn jobs(mut self, n: usize) -> Self {
        self.config.jobs = n.max(1);
        self
    }

    pub fn table_parser_mode(mut self, mode: TableParserMode) -> Self {
        self.config.table_parser_mode = mode;
        self
    }

    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.config.ocr_routing = routing;
        self
    }

    pub fn validation(mut self, validation: ValidationConfig) -> Self {
        self.config.validation = validation;
        self
    }

    pub fn ai(mut self, ai: AiConfig) -> Self {
        self.config.ai = ai;
        self
    }

    pub fn dpi(mut self, dpi: DpiConfig) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn vision(mut self, vision: VisionConfig) -> Self {
        self.config.vision = vision;
        self
    }

    pub fn invoice_timeout_secs(mut self, secs: u64) -> Self {
        self.config.invoice_timeout_secs = secs;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    /// Build the configuration, validating cross-field constraints.
    pub fn build(self) -> Result<PipelineConfig, FakturaError> {
        let c = &self.config;
        if c.jobs == 0 {
            return Err(FakturaError::InvalidConfig("jobs must be ≥ 1".into()));
        }
        if c.dpi.baseline < 72 || c.dpi.baseline > 600 {
            return Err(FakturaError::InvalidConfig(format!(
                "baseline DPI must be 72–600, got {}",
                c.dpi.baseline
            )));
        }
        if c.dpi.retry < c.dpi.baseline {
            return Err(FakturaError::InvalidConfig(format!(
                "retry DPI ({}) must be ≥ baseline DPI ({})",
                c.dpi.retry, c.dpi.baseline
            )));
        }
        if c.ai.enabled && c.ai.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(FakturaError::InvalidConfig(
                "ai.enabled requires ai.api_key".into(),
            ));
        }
        for pattern in c
            .ocr_routing
            .required_anchors
            .iter()
            .chain(&c.ocr_routing.extra_anchors)
        {
            if regex::Regex::new(pattern).is_err() {
                return Err(FakturaError::InvalidConfig(format!(
                    "invalid anchor regex: '{pattern}'"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Sub-sections ─────────────────────────────────────────────────────────

/// Per-page routing thresholds: when is the embedded text layer enough?
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Minimum characters in the page's text layer. Default: 500.
    pub min_text_chars: usize,
    /// Regexes that must all match the page text. Default: `["Faktura\s"]`.
    pub required_anchors: Vec<String>,
    /// Regexes of which at least one must match (when any are configured).
    pub extra_anchors: Vec<String>,
    /// Minimum word tokens for the quality override. Default: 40.
    pub min_word_tokens: usize,
    /// Minimum blended text quality for the override. Default: 0.5.
    pub min_text_quality: f64,
    /// Allow the quality override at all. Default: true.
    pub allow_quality_override: bool,
    /// Cache the extracted page text for reuse across stages. Default: true.
    /// The reader extracts each page's text exactly once per file either
    /// way; the key is accepted for older profiles.
    #[serde(alias = "cache_pdfplumber_text")]
    pub cache_page_text: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 500,
            required_anchors: vec![r"Faktura\s".to_string()],
            extra_anchors: vec![r"Sida\s*\d+\s*/\s*\d+".to_string(), "Ramirent".to_string()],
            min_word_tokens: 40,
            min_text_quality: 0.5,
            allow_quality_override: true,
            cache_page_text: true,
        }
    }
}

/// Line-item parser mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableParserMode {
    /// Text mode first; fall back to positional mode when net-sum
    /// validation fails. The default.
    Auto,
    /// Text mode only; positional mode never runs.
    Text,
    /// Positional mode unconditionally.
    Pos,
}

/// Sum tolerances, all in SEK.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Header-total vs lines-sum tolerance for OK/PARTIAL. Default: 1.0.
    pub tolerance: f64,
    /// Lines-sum vs footer-net gate. Default: 0.5.
    pub tolerance_net: f64,
    /// Lines-sum × 1.25 vs to-pay gate. Default: 0.5.
    pub tolerance_pay: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            tolerance: 1.0,
            tolerance_net: 0.5,
            tolerance_pay: 0.5,
        }
    }
}

/// AI fallback configuration. Disabled by default; the pipeline is fully
/// deterministic without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub enabled: bool,
    /// Provider name, e.g. "openai". Purely informational for the built-in
    /// HTTP provider; custom providers ignore it.
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Never logged.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Calibrated total-confidence below which the fallback triggers.
    /// Separate from the 0.95 hard gate. Default: 0.5.
    pub threshold: f64,
    /// Per-call timeout in seconds. Default: 30.
    pub timeout_secs: u64,
    /// Endpoint for the built-in OpenAI-compatible provider.
    pub endpoint: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: None,
            model: None,
            api_key: None,
            threshold: 0.5,
            timeout_secs: 30,
            endpoint: None,
        }
    }
}

/// Rasterisation DPI policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DpiConfig {
    /// First-attempt DPI. Default: 300.
    pub baseline: u32,
    /// Retry DPI when OCR mean confidence is poor. Default: 400.
    pub retry: u32,
    /// Mean-confidence threshold below which the caller re-renders at the
    /// retry DPI. Default: 55.
    pub ocr_mean_retry_threshold: f32,
    /// At most this many re-renders per page. Default: 1.
    pub max_retries_per_page: u32,
}

impl Default for DpiConfig {
    fn default() -> Self {
        Self {
            baseline: 300,
            retry: 400,
            ocr_mean_retry_threshold: 55.0,
            max_retries_per_page: 1,
        }
    }
}

/// Image-preparation limits for AI vision calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Longest image side in pixels; larger renders are downscaled.
    /// Default: 4096.
    pub max_longest_side: u32,
    /// Maximum encoded size in bytes; larger images are re-encoded as JPEG.
    /// Default: 20 MiB.
    pub max_bytes: usize,
    /// Accepted encodings. Default: png, jpeg.
    pub allowed_formats: Vec<String>,
    /// Strict-JSON retries after a malformed response. Default: 1.
    pub json_retry_count: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            max_longest_side: 4096,
            max_bytes: 20 * (1 << 20),
            allowed_formats: vec!["png".to_string(), "jpeg".to_string()],
            json_retry_count: 1,
        }
    }
}
