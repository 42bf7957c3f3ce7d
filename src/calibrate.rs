//! Confidence calibration: raw heuristic scores → calibrated probabilities.
//!
//! Heuristic scores from the header extractor are not probabilities — a raw
//! 0.8 from label-proximity scoring does not mean "right 80% of the time".
//! The calibrator is a monotone non-decreasing map learned offline on
//! labelled invoices (isotonic-regression output, stored as knot pairs) and
//! loaded at startup. Every hard-gate comparison uses the calibrated value.
//!
//! With no artefact supplied the map is the identity. That keeps the gate
//! semantics intact (raw scores are already in [0, 1]) but foregoes the
//! offline correction; runs on an uncalibrated build are therefore more
//! conservative in practice, not less.

use serde::Deserialize;
use std::path::Path;

/// A monotone piecewise-linear map over `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Calibrator {
    /// Sorted `(raw, calibrated)` knots; empty means identity.
    knots: Vec<(f64, f64)>,
}

#[derive(Deserialize)]
struct CalibrationArtifact {
    /// `[[raw, calibrated], …]` as produced by the offline fit.
    knots: Vec<(f64, f64)>,
}

impl Calibrator {
    /// The identity map, used when no calibration artefact is available.
    pub fn identity() -> Self {
        Calibrator { knots: Vec::new() }
    }

    /// Build from knot pairs. Knots are sorted by raw score; outputs are
    /// forced monotone (each output at least the previous one) so a sloppy
    /// artefact cannot break hard-gate monotonicity.
    pub fn from_knots(mut knots: Vec<(f64, f64)>) -> Self {
        knots.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut floor = 0.0_f64;
        for knot in &mut knots {
            knot.1 = knot.1.clamp(0.0, 1.0).max(floor);
            floor = knot.1;
        }
        Calibrator { knots }
    }

    /// Load a calibration artefact (JSON `{"knots": [[raw, cal], …]}`).
    pub fn from_json_file(path: &Path) -> Result<Self, std::io::Error> {
        let raw = std::fs::read_to_string(path)?;
        let artifact: CalibrationArtifact = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::from_knots(artifact.knots))
    }

    /// Map a raw score to a calibrated probability in `[0, 1]`.
    pub fn calibrate(&self, raw: f64) -> f64 {
        let raw = raw.clamp(0.0, 1.0);
        if self.knots.is_empty() {
            return raw;
        }
        let first = self.knots[0];
        if raw <= first.0 {
            return first.1;
        }
        let last = self.knots[self.knots.len() - 1];
        if raw >= last.0 {
            return last.1;
        }
        // Linear interpolation between the bracketing knots.
        for pair in self.knots.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if raw <= x1 {
                if (x1 - x0).abs() < f64::EPSILON {
                    return y1;
                }
                let t = (raw - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }
        last.1
    }
}
