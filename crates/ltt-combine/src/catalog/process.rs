//! Simulated base processes.

use serde::{Deserialize, Serialize};

/// A simulated physics process before merge-scenario splitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseProcess {
    /// Name used for samples and fit processes (`TTbar`).
    pub name: String,
    /// Split into merge scenarios; split processes are signal in the fit.
    pub split_by_merge_scenario: bool,
    /// Relative cross-section uncertainty (lnN), if any.
    #[serde(default)]
    pub xsec_uncertainty: Option<f64>,
}

impl BaseProcess {
    /// A process split into merge scenarios.
    pub fn signal(name: impl Into<String>) -> Self {
        Self { name: name.into(), split_by_merge_scenario: true, xsec_uncertainty: None }
    }

    /// An unsplit background with a cross-section uncertainty.
    pub fn background(name: impl Into<String>, xsec_uncertainty: f64) -> Self {
        Self {
            name: name.into(),
            split_by_merge_scenario: false,
            xsec_uncertainty: Some(xsec_uncertainty),
        }
    }
}
