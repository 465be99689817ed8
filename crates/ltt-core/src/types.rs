//! Data-taking periods, fit regions and detection channels.
//!
//! These are the closed option sets every fit task is built from. Parsing is
//! strict: an unknown name is a configuration error, never a placeholder value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A data-taking period (era) of the Run 2 ultra-legacy reprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Period {
    /// 2016, before the VFP setting change (HIPM)
    #[serde(rename = "UL16preVFP")]
    Ul16PreVfp,
    /// 2016, after the VFP setting change
    #[serde(rename = "UL16postVFP")]
    Ul16PostVfp,
    /// 2017
    #[serde(rename = "UL17")]
    Ul17,
    /// 2018
    #[serde(rename = "UL18")]
    Ul18,
}

impl Period {
    /// All periods in chronological order.
    pub const ALL: [Period; 4] = [Period::Ul16PreVfp, Period::Ul16PostVfp, Period::Ul17, Period::Ul18];

    /// Canonical short name (`UL17`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Ul16PreVfp => "UL16preVFP",
            Period::Ul16PostVfp => "UL16postVFP",
            Period::Ul17 => "UL17",
            Period::Ul18 => "UL18",
        }
    }

    /// Position in [`Period::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Integrated luminosity in fb^-1.
    pub fn lumi_fb(self) -> f64 {
        match self {
            Period::Ul16PreVfp => 19.52,
            Period::Ul16PostVfp => 16.81,
            Period::Ul17 => 41.48,
            Period::Ul18 => 59.83,
        }
    }

    /// Relative uncertainty on the integrated luminosity.
    pub fn lumi_uncertainty(self) -> f64 {
        match self {
            Period::Ul16PreVfp | Period::Ul16PostVfp => 0.012,
            Period::Ul17 => 0.023,
            Period::Ul18 => 0.025,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Period::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown period '{}'", s)))
    }
}

/// Probe-jet region relative to the working-point cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Region {
    /// Probe jet passes the tagger working point
    Pass,
    /// Probe jet fails the tagger working point
    Fail,
}

impl Region {
    /// Both regions, in the order they are enumerated.
    pub const ALL: [Region; 2] = [Region::Pass, Region::Fail];

    /// Canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Region::Pass => "Pass",
            Region::Fail => "Fail",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Region::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown region '{}'", s)))
    }
}

/// Lepton channel used to tag the semileptonic ttbar event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DetectionChannel {
    /// Muon channel
    #[serde(rename = "muo")]
    Muon,
    /// Electron channel
    #[serde(rename = "ele")]
    Electron,
}

impl DetectionChannel {
    /// All channels.
    pub const ALL: [DetectionChannel; 2] = [DetectionChannel::Muon, DetectionChannel::Electron];

    /// Canonical short name (`muo`, `ele`).
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionChannel::Muon => "muo",
            DetectionChannel::Electron => "ele",
        }
    }
}

impl fmt::Display for DetectionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionChannel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DetectionChannel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown detection channel '{}'", s)))
    }
}
