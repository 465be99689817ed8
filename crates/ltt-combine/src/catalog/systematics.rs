//! Systematic uncertainties and the variations derived from them.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use ltt_core::{DetectionChannel, Error, Result};
use serde::{Deserialize, Serialize};

/// Name of the unvaried evaluation.
pub const NOMINAL: &str = "nominal";

/// Where the histograms of a variation come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationKind {
    /// The unvaried input itself
    Nominal,
    /// Same events, different event weight: stored next to the nominal histogram
    Weight,
    /// Separately produced input: stored in its own per-variation location
    Shape,
}

/// How a nuisance is correlated between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessCorrelation {
    /// One nuisance for every process
    Shared,
    /// One nuisance per base process
    SplitByBaseProcess,
    /// One nuisance per individual fit process
    None,
}

/// A single named alternative evaluation of the inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variation {
    /// Full name (`jes_up`, `scale_murmuf_upnone`, `nominal`).
    pub name: String,
    /// Short name within the systematic (`up`, `murmuf_upnone`).
    pub short_name: String,
    /// Owning systematic (`nominal` for the nominal entry).
    pub systematic: String,
    /// Input origin.
    pub kind: VariationKind,
}

impl Variation {
    /// The nominal entry.
    pub fn nominal() -> Self {
        Self {
            name: NOMINAL.to_string(),
            short_name: NOMINAL.to_string(),
            systematic: NOMINAL.to_string(),
            kind: VariationKind::Nominal,
        }
    }
}

/// A source of systematic uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Systematic {
    /// Catalog name (`btag_bc_correlated`).
    pub name: String,
    /// Name exposed to the fitter (no underscores).
    pub combine_name: String,
    /// Input origin of every variation.
    pub kind: VariationKind,
    /// Short variation names; `["up", "down"]` unless this is an envelope.
    pub variations: Vec<String>,
    /// Correlation between periods (0 = uncorrelated, 1 = fully correlated).
    pub year_correlation: f64,
    /// Correlation between processes.
    pub process_correlation: ProcessCorrelation,
    /// Participates in the tag-and-probe fit.
    pub tandp: bool,
    /// Up/down are the bin-wise max/min over all variations.
    pub envelope: bool,
    /// Base processes affected (`None` = all).
    pub applies_to: Option<Vec<String>>,
    /// Detection channel affected (`None` = all).
    pub channel: Option<DetectionChannel>,
}

impl Systematic {
    /// A systematic with one up and one down variation, fully correlated
    /// between periods and processes, used in the fit.
    pub fn up_down(
        name: impl Into<String>,
        combine_name: impl Into<String>,
        kind: VariationKind,
    ) -> Self {
        Self {
            name: name.into(),
            combine_name: combine_name.into(),
            kind,
            variations: vec!["up".into(), "down".into()],
            year_correlation: 1.0,
            process_correlation: ProcessCorrelation::Shared,
            tandp: true,
            envelope: false,
            applies_to: None,
            channel: None,
        }
    }

    /// An envelope systematic over the given alternative variations.
    pub fn envelope(
        name: impl Into<String>,
        combine_name: impl Into<String>,
        kind: VariationKind,
        variations: &[&str],
    ) -> Self {
        Self {
            variations: variations.iter().map(|v| v.to_string()).collect(),
            envelope: true,
            ..Self::up_down(name, combine_name, kind)
        }
    }

    /// Set the period correlation coefficient.
    pub fn year_correlation(mut self, c: f64) -> Self {
        self.year_correlation = c;
        self
    }

    /// Set the process correlation policy.
    pub fn process_correlation(mut self, p: ProcessCorrelation) -> Self {
        self.process_correlation = p;
        self
    }

    /// Restrict to the given base processes.
    pub fn applies_to(mut self, processes: &[&str]) -> Self {
        self.applies_to = Some(processes.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Restrict to one detection channel.
    pub fn only_in(mut self, channel: DetectionChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Exclude from the tag-and-probe fit (still staged for plots).
    pub fn not_in_fit(mut self) -> Self {
        self.tandp = false;
        self
    }

    /// Full name of one of this systematic's variations.
    pub fn variation_name(&self, short: &str) -> String {
        format!("{}_{}", self.name, short)
    }

    /// All variations of this systematic.
    pub fn all_variations(&self) -> impl Iterator<Item = Variation> + '_ {
        self.variations.iter().map(|short| Variation {
            name: self.variation_name(short),
            short_name: short.clone(),
            systematic: self.name.clone(),
            kind: self.kind,
        })
    }

    /// Whether the systematic affects `base_process` in `channel`.
    pub fn affects(&self, base_process: &str, channel: DetectionChannel) -> bool {
        let process_ok =
            self.applies_to.as_ref().is_none_or(|list| list.iter().any(|p| p == base_process));
        let channel_ok = self.channel.is_none_or(|c| c == channel);
        process_ok && channel_ok
    }

    fn validate(&self) -> Result<()> {
        if self.combine_name.is_empty()
            || !self.combine_name.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::Config(format!(
                "systematic '{}': combine name '{}' must be non-empty and alphanumeric",
                self.name, self.combine_name
            )));
        }
        if !(0.0..=1.0).contains(&self.year_correlation) {
            return Err(Error::Config(format!(
                "systematic '{}': year correlation {} outside [0, 1]",
                self.name, self.year_correlation
            )));
        }
        if self.kind == VariationKind::Nominal {
            return Err(Error::Config(format!(
                "systematic '{}' cannot have nominal variation kind",
                self.name
            )));
        }
        if self.envelope {
            if self.variations.is_empty() {
                return Err(Error::Config(format!(
                    "envelope systematic '{}' has no variations",
                    self.name
                )));
            }
        } else if self.variations != ["up", "down"] {
            return Err(Error::Config(format!(
                "systematic '{}' must have exactly the variations up and down, got {:?}",
                self.name, self.variations
            )));
        }
        Ok(())
    }
}

/// Prefix filter on systematic names.
///
/// A name matching a whitelist prefix is always kept, even when a blacklist
/// prefix matches too. With a non-empty whitelist, names matching no whitelist
/// prefix are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystematicsFilter {
    /// Prefixes to keep.
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// Prefixes to drop.
    #[serde(default)]
    pub blacklist: Vec<String>,
}

impl SystematicsFilter {
    /// Whether a systematic named `name` survives the filter.
    pub fn keeps(&self, name: &str) -> bool {
        let whitelisted = self.whitelist.iter().any(|w| name.starts_with(w.as_str()));
        if whitelisted {
            return true;
        }
        if !self.whitelist.is_empty() {
            return false;
        }
        !self.blacklist.iter().any(|b| name.starts_with(b.as_str()))
    }
}

impl fmt::Display for SystematicsFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "whitelist={:?} blacklist={:?}", self.whitelist, self.blacklist)
    }
}

/// Validated, filtered set of systematics for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystematicsCatalog {
    systematics: Vec<Systematic>,
}

impl SystematicsCatalog {
    /// Validate `systematics` as a whole, then apply `filter`.
    ///
    /// Validation runs on the unfiltered list, so a broken definition is reported
    /// even when the current run filters it out.
    pub fn new(systematics: Vec<Systematic>, filter: &SystematicsFilter) -> Result<Self> {
        let mut combine_names = HashSet::new();
        let mut variation_names = HashSet::new();
        variation_names.insert(NOMINAL.to_string());

        for syst in &systematics {
            syst.validate()?;
            if !combine_names.insert(syst.combine_name.clone()) {
                return Err(Error::Config(format!(
                    "combine name '{}' used by more than one systematic",
                    syst.combine_name
                )));
            }
            for v in syst.all_variations() {
                if !variation_names.insert(v.name.clone()) {
                    return Err(Error::Config(format!("variation '{}' defined twice", v.name)));
                }
            }
        }

        let kept: Vec<Systematic> =
            systematics.into_iter().filter(|s| filter.keeps(&s.name)).collect();
        log::debug!("{} systematics kept by filter ({})", kept.len(), filter);
        Ok(Self { systematics: kept })
    }

    /// Kept systematics in declaration order.
    pub fn systematics(&self) -> &[Systematic] {
        &self.systematics
    }

    /// Kept systematics that participate in the fit.
    pub fn fit_systematics(&self) -> impl Iterator<Item = &Systematic> {
        self.systematics.iter().filter(|s| s.tandp)
    }

    /// Look up a kept systematic.
    pub fn get(&self, name: &str) -> Option<&Systematic> {
        self.systematics.iter().find(|s| s.name == name)
    }

    /// Every variation of the kept systematics, keyed by full name.
    pub fn get_all_variations(&self, include_nominal: bool) -> BTreeMap<String, Variation> {
        let mut out = BTreeMap::new();
        if include_nominal {
            out.insert(NOMINAL.to_string(), Variation::nominal());
        }
        for syst in &self.systematics {
            for v in syst.all_variations() {
                out.insert(v.name.clone(), v);
            }
        }
        out
    }
}
