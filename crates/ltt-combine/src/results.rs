//! Scale-factor extraction from fit output.
//!
//! Two fits are read: the regular one (all nuisances floating) and the refit with
//! constrained nuisances frozen at their best-fit values. The frozen fit gives the
//! statistical component of every interval; the systematic component is what is
//! left in quadrature.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use ltt_core::{Error, Period, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::{MergeScenario, VarInterval};
use crate::enumerate::Enumeration;

/// Relative size below which an interval side counts as degenerate.
pub const DEGENERATE_FRACTION: f64 = 1e-3;
/// Largest tolerated difference between regular and frozen central values.
pub const CENTRAL_VALUE_TOLERANCE: f64 = 0.01;
/// Width used to draw the open-ended last interval.
pub const OPEN_INTERVAL_DISPLAY_WIDTH: f64 = 100.0;

/// One floating parameter of a fit result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitParameter {
    /// Parameter name.
    pub name: String,
    /// Best-fit value.
    pub value: f64,
    /// Symmetric (parabolic) error.
    pub error: f64,
    /// Upper asymmetric error, if the fitter reported one.
    #[serde(default)]
    pub error_hi: Option<f64>,
    /// Lower asymmetric error (sign as reported).
    #[serde(default)]
    pub error_lo: Option<f64>,
    /// Named ranges (`err68` = 1σ profile-likelihood interval `[lo, hi]`).
    #[serde(default)]
    pub ranges: BTreeMap<String, [f64; 2]>,
}

/// Covariance of the floating parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covariance {
    /// Parameter names, in matrix order.
    pub names: Vec<String>,
    /// Row-major matrix.
    pub matrix: Vec<Vec<f64>>,
}

/// Exported fit result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutput {
    /// Floating parameters.
    pub parameters: Vec<FitParameter>,
    /// Covariance, if exported.
    #[serde(default)]
    pub covariance: Option<Covariance>,
}

impl FitOutput {
    /// Parse a JSON fit output.
    pub fn from_json(text: &str) -> Result<Self> {
        let out: Self = serde_json::from_str(text)
            .map_err(|e| Error::Parse(format!("fit output: {}", e)))?;
        out.validate()?;
        Ok(out)
    }

    /// Read a JSON fit output file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(|e| match e {
            Error::Parse(msg) => Error::Parse(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&FitParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    fn validate(&self) -> Result<()> {
        if let Some(cov) = &self.covariance {
            let n = cov.names.len();
            if cov.matrix.len() != n || cov.matrix.iter().any(|row| row.len() != n) {
                return Err(Error::Parse(format!(
                    "covariance matrix is not {}x{} as its names require",
                    n, n
                )));
            }
        }
        Ok(())
    }
}

/// Which of the two fits a number comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitPass {
    /// All nuisances floating
    Regular,
    /// Constrained nuisances frozen
    Frozen,
}

impl fmt::Display for FitPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FitPass::Regular => "regular",
            FitPass::Frozen => "frozen",
        })
    }
}

/// Side of an asymmetric interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Upward error
    Up,
    /// Downward error
    Down,
}

/// Asymmetric error, both sides non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AsymError {
    /// Upward error.
    pub up: f64,
    /// Downward error.
    pub down: f64,
}

impl AsymError {
    fn side(&self, side: Side) -> f64 {
        match side {
            Side::Up => self.up,
            Side::Down => self.down,
        }
    }
}

/// A recovered anomaly during extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionWarning {
    /// Interval side replaced by the symmetric error
    DegenerateInterval {
        /// Parameter name.
        parameter: String,
        /// Fit pass.
        fit: FitPass,
        /// Affected side.
        side: Side,
    },
    /// Statistical error larger than total error; systematic clamped to 0
    NegativeSystVariance {
        /// POI name.
        poi: String,
        /// Affected side.
        side: Side,
        /// Total error.
        total: f64,
        /// Statistical error.
        stat: f64,
    },
    /// Central values of the two fits disagree
    CentralValueMismatch {
        /// POI name.
        poi: String,
        /// Regular fit value.
        regular: f64,
        /// Frozen fit value.
        frozen: f64,
    },
    /// POI without any active signal process; not fitted
    OrphanPoi {
        /// POI name.
        poi: String,
    },
}

impl fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionWarning::DegenerateInterval { parameter, fit, side } => write!(
                f,
                "{} ({} fit): degenerate {:?} interval, using symmetric error",
                parameter, fit, side
            ),
            ExtractionWarning::NegativeSystVariance { poi, side, total, stat } => write!(
                f,
                "{}: stat error {} exceeds total {} on {:?} side, systematic set to 0",
                poi, stat, total, side
            ),
            ExtractionWarning::CentralValueMismatch { poi, regular, frozen } => write!(
                f,
                "{}: regular fit {} vs frozen fit {} differ by more than {}",
                poi, regular, frozen, CENTRAL_VALUE_TOLERANCE
            ),
            ExtractionWarning::OrphanPoi { poi } => {
                write!(f, "{}: no active signal process, not extracted", poi)
            }
        }
    }
}

/// Extracted scale factor of one POI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleFactor {
    /// POI name.
    pub poi: String,
    /// Merge scenario.
    pub merge_scenario: MergeScenario,
    /// Period.
    pub period: Period,
    /// Kinematic interval.
    pub interval: VarInterval,
    /// Best-fit value (regular fit).
    pub value: f64,
    /// Best-fit value of the frozen fit.
    pub frozen_value: f64,
    /// Total error.
    pub total: AsymError,
    /// Statistical error.
    pub stat: AsymError,
    /// Systematic error.
    pub syst: AsymError,
}

/// Result of one extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Extraction {
    /// Scale factors in POI enumeration order.
    pub scale_factors: Vec<ScaleFactor>,
    /// Recovered anomalies.
    pub warnings: Vec<ExtractionWarning>,
}

/// One point of a scale-factor graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphPoint {
    /// Interval centre.
    pub x: f64,
    /// Distance from centre to the lower interval edge.
    pub x_err_low: f64,
    /// Distance from centre to the upper (display) interval edge.
    pub x_err_high: f64,
    /// Scale factor.
    pub y: f64,
    /// Total error.
    pub total: AsymError,
    /// Statistical error.
    pub stat: AsymError,
}

/// Scale factors of one (merge scenario, period) as a function of the interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleFactorGraph {
    /// Merge scenario.
    pub merge_scenario: MergeScenario,
    /// Period.
    pub period: Period,
    /// Points ordered by x.
    pub points: Vec<GraphPoint>,
}

impl Extraction {
    /// Group scale factors by (merge scenario, period), in first-seen order.
    pub fn graphs(&self, open_width: f64) -> Vec<ScaleFactorGraph> {
        let mut graphs: Vec<ScaleFactorGraph> = Vec::new();
        for sf in &self.scale_factors {
            let (lo, hi) = sf.interval.display_range(open_width);
            let x = 0.5 * (lo + hi);
            let point = GraphPoint {
                x,
                x_err_low: x - lo,
                x_err_high: hi - x,
                y: sf.value,
                total: sf.total,
                stat: sf.stat,
            };
            match graphs
                .iter_mut()
                .find(|g| g.merge_scenario == sf.merge_scenario && g.period == sf.period)
            {
                Some(g) => g.points.push(point),
                None => graphs.push(ScaleFactorGraph {
                    merge_scenario: sf.merge_scenario,
                    period: sf.period,
                    points: vec![point],
                }),
            }
        }
        for g in &mut graphs {
            g.points.sort_by(|a, b| a.x.total_cmp(&b.x));
        }
        graphs
    }
}

/// Extracts scale factors for the POIs of an enumeration.
#[derive(Debug, Clone)]
pub struct ResultExtractor {
    /// Degeneracy threshold, relative to the largest reported error.
    pub degenerate_fraction: f64,
    /// Central-value tolerance between the two fits.
    pub central_value_tolerance: f64,
}

impl Default for ResultExtractor {
    fn default() -> Self {
        Self {
            degenerate_fraction: DEGENERATE_FRACTION,
            central_value_tolerance: CENTRAL_VALUE_TOLERANCE,
        }
    }
}

impl ResultExtractor {
    /// Asymmetric 1σ errors of `param`.
    ///
    /// Prefers the `err68` range, then the reported asymmetric errors. A side
    /// smaller than `degenerate_fraction` of the largest reported error falls
    /// back to the symmetric error.
    pub fn asymmetric_errors(
        &self,
        param: &FitParameter,
        fit: FitPass,
        warnings: &mut Vec<ExtractionWarning>,
    ) -> AsymError {
        let (up, down) = match param.ranges.get("err68") {
            Some([lo, hi]) => (hi - param.value, param.value - lo),
            None => (
                param.error_hi.unwrap_or(param.error),
                param.error_lo.map(f64::abs).unwrap_or(param.error),
            ),
        };
        let (up, down) = (up.abs(), down.abs());
        let reference = up.max(down).max(param.error.abs());
        let mut fix = |value: f64, side: Side| {
            if reference == 0.0 || value < self.degenerate_fraction * reference {
                let w = ExtractionWarning::DegenerateInterval {
                    parameter: param.name.clone(),
                    fit,
                    side,
                };
                log::warn!("{}", w);
                warnings.push(w);
                param.error.abs()
            } else {
                value
            }
        };
        AsymError { up: fix(up, Side::Up), down: fix(down, Side::Down) }
    }

    /// `sqrt(total² - stat²)`, clamped to zero with a warning.
    pub fn syst_component(
        poi: &str,
        side: Side,
        total: f64,
        stat: f64,
        warnings: &mut Vec<ExtractionWarning>,
    ) -> f64 {
        let diff = total * total - stat * stat;
        if diff < 0.0 {
            let w = ExtractionWarning::NegativeSystVariance { poi: poi.to_string(), side, total, stat };
            log::warn!("{}", w);
            warnings.push(w);
            return 0.0;
        }
        diff.sqrt()
    }

    /// Extract every POI of `enumeration` from the two fits.
    pub fn extract(
        &self,
        enumeration: &Enumeration,
        regular: &FitOutput,
        frozen: &FitOutput,
    ) -> Result<Extraction> {
        let mut out = Extraction::default();
        for poi in &enumeration.pois {
            let name = poi.name();
            if !enumeration.is_poi_active(poi) {
                let w = ExtractionWarning::OrphanPoi { poi: name };
                log::warn!("{}", w);
                out.warnings.push(w);
                continue;
            }
            let reg = required(regular, &name, FitPass::Regular)?;
            let frz = required(frozen, &name, FitPass::Frozen)?;

            let total = self.asymmetric_errors(reg, FitPass::Regular, &mut out.warnings);
            let stat = self.asymmetric_errors(frz, FitPass::Frozen, &mut out.warnings);
            let syst = AsymError {
                up: Self::syst_component(
                    &name,
                    Side::Up,
                    total.side(Side::Up),
                    stat.side(Side::Up),
                    &mut out.warnings,
                ),
                down: Self::syst_component(
                    &name,
                    Side::Down,
                    total.side(Side::Down),
                    stat.side(Side::Down),
                    &mut out.warnings,
                ),
            };
            if (reg.value - frz.value).abs() > self.central_value_tolerance {
                let w = ExtractionWarning::CentralValueMismatch {
                    poi: name.clone(),
                    regular: reg.value,
                    frozen: frz.value,
                };
                log::warn!("{}", w);
                out.warnings.push(w);
            }
            out.scale_factors.push(ScaleFactor {
                poi: name,
                merge_scenario: poi.merge_scenario,
                period: poi.period,
                interval: poi.interval.clone(),
                value: reg.value,
                frozen_value: frz.value,
                total,
                stat,
                syst,
            });
        }
        log::info!(
            "extracted {} scale factors ({} warnings)",
            out.scale_factors.len(),
            out.warnings.len()
        );
        Ok(out)
    }
}

fn required<'f>(fit: &'f FitOutput, poi: &str, pass: FitPass) -> Result<&'f FitParameter> {
    fit.parameter(poi)
        .ok_or_else(|| Error::Parse(format!("POI '{}' missing from the {} fit output", poi, pass)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn param(name: &str, value: f64, error: f64, err68: Option<[f64; 2]>) -> FitParameter {
        FitParameter {
            name: name.into(),
            value,
            error,
            error_hi: None,
            error_lo: None,
            ranges: err68.map(|r| BTreeMap::from([("err68".to_string(), r)])).unwrap_or_default(),
        }
    }

    #[test]
    fn err68_range_gives_asymmetric_errors() {
        let mut w = Vec::new();
        let e = ResultExtractor::default().asymmetric_errors(
            &param("r", 1.0, 0.1, Some([0.9, 1.2])),
            FitPass::Regular,
            &mut w,
        );
        assert_relative_eq!(e.up, 0.2, epsilon = 1e-12);
        assert_relative_eq!(e.down, 0.1, epsilon = 1e-12);
        assert!(w.is_empty());
    }

    #[test]
    fn degenerate_side_falls_back_to_symmetric_error() {
        let mut w = Vec::new();
        let e = ResultExtractor::default().asymmetric_errors(
            &param("r", 1.0, 0.15, Some([1.0, 1.2])),
            FitPass::Frozen,
            &mut w,
        );
        assert_relative_eq!(e.up, 0.2, epsilon = 1e-12);
        assert_eq!(e.down, 0.15);
        assert_eq!(
            w,
            vec![ExtractionWarning::DegenerateInterval {
                parameter: "r".into(),
                fit: FitPass::Frozen,
                side: Side::Down,
            }]
        );
    }

    #[test]
    fn reported_asymmetric_errors_without_range() {
        let mut p = param("r", 1.0, 0.1, None);
        p.error_hi = Some(0.12);
        p.error_lo = Some(-0.08);
        let e = ResultExtractor::default().asymmetric_errors(&p, FitPass::Regular, &mut Vec::new());
        assert_eq!((e.up, e.down), (0.12, 0.08));
    }

    #[test]
    fn syst_component_completes_quadrature() {
        let mut w = Vec::new();
        for (total, stat) in [(0.5, 0.3), (0.2, 0.2), (1.0, 0.0), (0.013, 0.012)] {
            let syst = ResultExtractor::syst_component("r", Side::Up, total, stat, &mut w);
            assert_relative_eq!(stat * stat + syst * syst, total * total, epsilon = 1e-12);
        }
        assert!(w.is_empty());
    }

    #[test]
    fn syst_component_clamps_negative_variance() {
        let mut w = Vec::new();
        let syst = ResultExtractor::syst_component("r", Side::Down, 0.1, 0.11, &mut w);
        assert_eq!(syst, 0.0);
        assert!(matches!(w[0], ExtractionWarning::NegativeSystVariance { side: Side::Down, .. }));
    }

    #[test]
    fn fit_output_json_contract() {
        let json = r#"{
            "parameters": [
                {"name": "r_FullyMerged_UL17_pt_200to250", "value": 0.97, "error": 0.05,
                 "ranges": {"err68": [0.93, 1.02]}},
                {"name": "jes_UL17", "value": 0.1, "error": 0.9}
            ],
            "covariance": {"names": ["a", "b"], "matrix": [[1.0, 0.1], [0.1, 1.0]]}
        }"#;
        let out = FitOutput::from_json(json).unwrap();
        assert_eq!(out.parameters.len(), 2);
        assert!(out.parameter("jes_UL17").unwrap().ranges.is_empty());

        let bad = r#"{"parameters": [], "covariance": {"names": ["a"], "matrix": [[1.0, 0.0]]}}"#;
        assert!(matches!(FitOutput::from_json(bad), Err(Error::Parse(_))));
        assert!(matches!(FitOutput::from_json("{"), Err(Error::Parse(_))));
    }
}
