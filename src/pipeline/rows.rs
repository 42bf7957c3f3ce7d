//! Row grouper: cluster positioned tokens into reading-order rows.
//!
//! Tokens that share a y-band belong to the same visual line. The band
//! threshold adapts to the page's typography: half the median token height,
//! clamped to [2, 15] points so pathological heights (rules drawn as text,
//! giant display fonts) cannot break clustering.

use crate::model::{Row, Token};

/// Lower clamp for the y-band threshold, points.
const MIN_Y_TOLERANCE: f64 = 2.0;
/// Upper clamp for the y-band threshold, points.
const MAX_Y_TOLERANCE: f64 = 15.0;

/// y-band threshold for a token set: `0.5 × median(height)`, clamped.
pub fn y_tolerance(tokens: &[Token]) -> f64 {
    if tokens.is_empty() {
        return MIN_Y_TOLERANCE;
    }
    let mut heights: Vec<f64> = tokens.iter().map(|t| t.h).collect();
    heights.sort_by(|a, b| a.total_cmp(b));
    let median = heights[heights.len() / 2];
    (0.5 * median).clamp(MIN_Y_TOLERANCE, MAX_Y_TOLERANCE)
}

/// Cluster tokens into rows, top-to-bottom, left-to-right within a row.
///
/// Tokens are grouped greedily by vertical centre: a token joins the
/// current band when its centre is within the tolerance of the band's
/// running centre, otherwise it opens a new row. Input order does not
/// matter; output rows are sorted by y.
pub fn group_rows(tokens: &[Token]) -> Vec<Row> {
    if tokens.is_empty() {
        return Vec::new();
    }

    let tolerance = y_tolerance(tokens);

    let mut sorted: Vec<Token> = tokens.to_vec();
    sorted.sort_by(|a, b| {
        a.center_y()
            .total_cmp(&b.center_y())
            .then(a.x.total_cmp(&b.x))
    });

    let mut bands: Vec<Vec<Token>> = Vec::new();
    let mut band_center = f64::NEG_INFINITY;

    for token in sorted {
        let cy = token.center_y();
        match bands.last_mut() {
            Some(band) if (cy - band_center).abs() <= tolerance => {
                band.push(token);
                // Running mean keeps slowly drifting baselines together.
                band_center =
                    band.iter().map(Token::center_y).sum::<f64>() / band.len() as f64;
            }
            _ => {
                band_center = cy;
                bands.push(vec![token]);
            }
        }
    }

    bands
        .into_iter()
        .map(|mut band| {
            band.sort_by(|a, b| a.x.total_cmp(&b.x));
            Row::from_tokens(band)
        })
        .collect()
}
