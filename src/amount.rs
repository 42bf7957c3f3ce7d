//! Swedish amount normalisation.
//!
//! Invoices in the wild mix `1 072,60`, `1,072.60`, `-474,30` and the
//! trailing-minus credit notation `1,00-`. [`normalize_amount`] turns any of
//! them into an exact [`Decimal`] with two fractional digits; everything
//! that touches money goes through it so the rest of the pipeline never
//! sees a raw amount string.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

/// A string that could not be read as an amount.
///
/// Callers treat this as "not an amount" and move on — it is not a pipeline
/// failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a parseable amount: '{input}'")]
pub struct NormalizationError {
    pub input: String,
}

/// Matches a Swedish-formatted amount inside a longer string.
///
/// Covers space-grouped thousands (`167 715,20`, incl. NBSP), comma-grouped
/// with dot decimals (`1,072.60`), plain decimals with either separator,
/// and a leading or trailing minus.
pub static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        -?
        (?:
            \d{1,3} (?: [\ \u{00A0}] \d{3} )+   # 1 072 | 167 715
          | \d{1,3} (?: , \d{3} )+               # 1,072 (dot decimals follow)
          | \d+
        )
        [.,] \d{2}
        -?
        ",
    )
    .expect("amount regex")
});

static GROUP_SPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d)[\ \u{00A0}](\d{3})\b").expect("group space regex"));

/// Convert an amount string to a signed [`Decimal`] with two decimals.
///
/// Steps, in order:
/// 1. trim outer whitespace;
/// 2. a trailing `-` moves to the front;
/// 3. thousand-separator spaces (one space between 3-digit groups) are removed;
/// 4. when both `,` and `.` appear, the last one is the decimal separator and
///    the other is a thousand separator;
/// 5. a lone `,` is the decimal separator;
/// 6. the remainder parses as a fixed-point decimal.
///
/// Any failure yields [`NormalizationError`].
pub fn normalize_amount(input: &str) -> Result<Decimal, NormalizationError> {
    let err = || NormalizationError {
        input: input.to_string(),
    };

    let mut s = input.trim().to_string();
    if s.is_empty() {
        return Err(err());
    }

    // Trailing minus → leading minus.
    if let Some(stripped) = s.strip_suffix('-') {
        s = format!("-{}", stripped.trim_end());
    }

    // Remove thousand-separator spaces between 3-digit groups. Applied
    // repeatedly: "167 715 020,10" needs two passes because the matches
    // overlap on the shared digit.
    loop {
        let collapsed = GROUP_SPACE_RE.replace_all(&s, "${1}${2}").into_owned();
        if collapsed == s {
            break;
        }
        s = collapsed;
    }

    // Any remaining whitespace means the string was not a grouped amount.
    if s.contains(char::is_whitespace) || s.contains('\u{00A0}') {
        return Err(err());
    }

    let has_comma = s.contains(',');
    let has_dot = s.contains('.');
    let normalized = match (has_comma, has_dot) {
        (true, true) => {
            // The last separator is the decimal point.
            let last_comma = s.rfind(',').unwrap();
            let last_dot = s.rfind('.').unwrap();
            if last_dot > last_comma {
                s.replace(',', "")
            } else {
                s.replace('.', "").replace(',', ".")
            }
        }
        (true, false) => s.replace(',', "."),
        _ => s,
    };

    // Reject anything that is not a plain signed decimal by now.
    if normalized.is_empty()
        || !normalized
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
        || normalized.matches('-').count() > 1
        || (normalized.contains('-') && !normalized.starts_with('-'))
        || normalized.matches('.').count() > 1
    {
        return Err(err());
    }

    let mut value = Decimal::from_str(&normalized).map_err(|_| err())?;
    value.rescale(2);
    Ok(value)
}

/// Find all amount matches in a string, returned with their byte ranges.
///
/// Matches that fail [`normalize_amount`] are dropped.
pub fn find_amounts(text: &str) -> Vec<(std::ops::Range<usize>, Decimal)> {
    AMOUNT_RE
        .find_iter(text)
        .filter_map(|m| {
            normalize_amount(m.as_str())
                .ok()
                .map(|v| (m.range(), v))
        })
        .collect()
}
