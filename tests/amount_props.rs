//! Property tests for the two numeric workhorses: Swedish amount
//! normalisation and the confidence calibrator.

use fakturaflow::calibrate::Calibrator;
use fakturaflow::normalize_amount;
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Render a decimal value the way Swedish invoices print it:
/// space-grouped thousands, comma decimal separator, optional trailing
/// minus for credits.
fn swedish_format(kronor: i64, oren: u8, trailing_minus: bool) -> String {
    let negative = kronor < 0;
    let abs = kronor.unsigned_abs();

    let digits = abs.to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }

    let body = format!("{grouped},{oren:02}");
    match (negative, trailing_minus) {
        (true, true) => format!("{body}-"),
        (true, false) => format!("-{body}"),
        (false, _) => body,
    }
}

proptest! {
    /// Round-trip: any formatted amount normalises back to its value.
    #[test]
    fn formatted_amounts_round_trip(
        kronor in -9_999_999i64..=9_999_999,
        oren in 0u8..=99,
        trailing_minus in any::<bool>(),
    ) {
        let text = swedish_format(kronor, oren, trailing_minus);
        let parsed = normalize_amount(&text).expect("formatted amount must parse");

        let sign = if kronor < 0 { -1 } else { 1 };
        let expected = Decimal::new(
            sign * (kronor.abs() * 100 + oren as i64),
            2,
        );
        prop_assert_eq!(parsed, expected, "input {}", text);
    }

    /// Normalisation always yields exactly two decimal places.
    #[test]
    fn normalized_scale_is_two(
        kronor in 0i64..=999_999,
        oren in 0u8..=99,
    ) {
        let text = swedish_format(kronor, oren, false);
        let parsed = normalize_amount(&text).unwrap();
        prop_assert_eq!(parsed.scale(), 2);
    }

    /// Free text never panics the normaliser; it either parses or errors.
    #[test]
    fn arbitrary_text_never_panics(s in ".{0,40}") {
        let _ = normalize_amount(&s);
    }

    /// The calibrator is monotone for any knot set: a higher raw score
    /// never yields a lower calibrated probability, and output stays in
    /// [0, 1]. Hard-gate comparisons depend on both.
    #[test]
    fn calibrator_is_monotone_and_bounded(
        knots in proptest::collection::vec((0.0f64..=1.0, -0.5f64..=1.5), 0..8),
        a in 0.0f64..=1.0,
        b in 0.0f64..=1.0,
    ) {
        let calibrator = Calibrator::from_knots(knots);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let cal_lo = calibrator.calibrate(lo);
        let cal_hi = calibrator.calibrate(hi);
        prop_assert!(cal_lo <= cal_hi + 1e-12);
        prop_assert!((0.0..=1.0).contains(&cal_lo));
        prop_assert!((0.0..=1.0).contains(&cal_hi));
    }
}
