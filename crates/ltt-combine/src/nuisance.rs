//! Names of shape nuisances as seen by the fitter.
//!
//! A systematic becomes one or more nuisances depending on its correlation
//! model: the combine name, then `_{period}` when it is not fully correlated
//! between periods, then `_{base process}` or `_{fit process}` per the process
//! correlation. The stager and the datacard both derive names from here.

use crate::catalog::{ProcessCorrelation, Systematic};
use crate::enumerate::Cell;

/// Whether the systematic gets a separate nuisance per period.
///
/// Fractional correlations are not modelled and count as uncorrelated.
pub fn split_by_period(syst: &Systematic) -> bool {
    syst.year_correlation < 1.0
}

/// Nuisance name of `syst` in `cell`.
pub fn nuisance_name(syst: &Systematic, cell: &Cell<'_>) -> String {
    let mut name = syst.combine_name.clone();
    if split_by_period(syst) {
        name.push('_');
        name.push_str(cell.channel.period.as_str());
    }
    match syst.process_correlation {
        ProcessCorrelation::Shared => {}
        ProcessCorrelation::SplitByBaseProcess => {
            name.push('_');
            name.push_str(&cell.process.base);
        }
        ProcessCorrelation::None => {
            name.push('_');
            name.push_str(&cell.fit_name());
        }
    }
    name
}

/// Whether `syst` enters the fit for `cell` at all.
pub fn applies(syst: &Systematic, cell: &Cell<'_>) -> bool {
    syst.tandp && syst.affects(&cell.process.base, cell.channel.channel)
}

/// Histogram name of a shifted template (`TTbar_FullyMerged_UL17_pt_200to250_jes_UL17Up`).
pub fn shifted_name(fit_name: &str, nuisance: &str, up: bool) -> String {
    format!("{}_{}{}", fit_name, nuisance, if up { "Up" } else { "Down" })
}
