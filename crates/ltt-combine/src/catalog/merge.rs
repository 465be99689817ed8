//! Merge scenarios: truth categories of how much of a hadronic decay ends up in
//! the probe jet, and the splitting schemes used to fit them.

use std::fmt;
use std::str::FromStr;

use ltt_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Truth-level merge category of a simulated probe jet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MergeScenario {
    /// All three top-quark decay products inside the jet
    FullyMerged,
    /// Only the W-boson decay products inside the jet
    WMerged,
    /// b quark plus one light quark inside the jet
    QBMerged,
    /// Either of the two partially merged topologies
    SemiMerged,
    /// No meaningful merging (includes background-like jets)
    NotMerged,
}

impl MergeScenario {
    /// Canonical name, also used in sample and POI names.
    pub fn as_str(self) -> &'static str {
        match self {
            MergeScenario::FullyMerged => "FullyMerged",
            MergeScenario::WMerged => "WMerged",
            MergeScenario::QBMerged => "QBMerged",
            MergeScenario::SemiMerged => "SemiMerged",
            MergeScenario::NotMerged => "NotMerged",
        }
    }
}

impl fmt::Display for MergeScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How signal simulation is split into merge scenarios for one fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeSplit {
    /// Fully / semi / not merged (top taggers)
    #[serde(rename = "top3")]
    Top3,
    /// Fully / W / QB / not merged (top taggers)
    #[serde(rename = "top4")]
    Top4,
    /// W merged / not merged (W taggers)
    #[serde(rename = "w2")]
    W2,
}

impl MergeSplit {
    /// The merge scenarios of this split, in enumeration order.
    pub fn scenarios(self) -> &'static [MergeScenario] {
        match self {
            MergeSplit::Top3 => {
                &[MergeScenario::FullyMerged, MergeScenario::SemiMerged, MergeScenario::NotMerged]
            }
            MergeSplit::Top4 => &[
                MergeScenario::FullyMerged,
                MergeScenario::WMerged,
                MergeScenario::QBMerged,
                MergeScenario::NotMerged,
            ],
            MergeSplit::W2 => &[MergeScenario::WMerged, MergeScenario::NotMerged],
        }
    }

    /// Canonical config name.
    pub fn as_str(self) -> &'static str {
        match self {
            MergeSplit::Top3 => "top3",
            MergeSplit::Top4 => "top4",
            MergeSplit::W2 => "w2",
        }
    }
}

impl fmt::Display for MergeSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeSplit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [MergeSplit::Top3, MergeSplit::Top4, MergeSplit::W2]
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown merge split '{}' (top3, top4, w2)", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sizes() {
        assert_eq!(MergeSplit::Top3.scenarios().len(), 3);
        assert_eq!(MergeSplit::Top4.scenarios().len(), 4);
        assert_eq!(MergeSplit::W2.scenarios().len(), 2);
    }

    #[test]
    fn split_config_names() {
        let s: MergeSplit = serde_json::from_str(r#""top3""#).unwrap();
        assert_eq!(s, MergeSplit::Top3);
        assert_eq!(s.to_string(), "top3");
        assert_eq!("w2".parse::<MergeSplit>().unwrap(), MergeSplit::W2);
        assert!("top5".parse::<MergeSplit>().is_err());
    }
}
