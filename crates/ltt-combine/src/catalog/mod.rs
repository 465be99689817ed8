//! Immutable description of what can be fitted: taggers, systematics and
//! simulated processes.
//!
//! A [`Catalog`] is built once, validated as a whole, and then passed by
//! reference to everything downstream.

pub mod merge;
pub mod process;
mod standard;
pub mod systematics;
pub mod tagger;

use std::collections::HashSet;

use ltt_core::{Error, Result};
use serde::Serialize;

pub use merge::{MergeScenario, MergeSplit};
pub use process::BaseProcess;
pub use systematics::{
    NOMINAL, ProcessCorrelation, Systematic, SystematicsCatalog, SystematicsFilter, Variation,
    VariationKind,
};
pub use tagger::{
    FitVariable, Tagger, TaggerKind, UpperBound, VarInterval, WorkingPoint, WorkingPointKey,
};

/// Validated set of taggers, systematics and base processes.
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    taggers: Vec<Tagger>,
    systematics: Vec<Systematic>,
    processes: Vec<BaseProcess>,
}

impl Catalog {
    /// Build and validate a catalog.
    pub fn new(
        taggers: Vec<Tagger>,
        systematics: Vec<Systematic>,
        processes: Vec<BaseProcess>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for t in &taggers {
            if !seen.insert(t.name.as_str()) {
                return Err(Error::Config(format!("tagger '{}' defined twice", t.name)));
            }
        }
        let mut seen = HashSet::new();
        for p in &processes {
            if p.name.is_empty() || p.name.contains("__") {
                return Err(Error::Config(format!("invalid process name '{}'", p.name)));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(Error::Config(format!("process '{}' defined twice", p.name)));
            }
        }
        if !processes.iter().any(|p| p.split_by_merge_scenario) {
            return Err(Error::Config("catalog has no signal process".into()));
        }
        for s in &systematics {
            if let Some(unknown) = s
                .applies_to
                .iter()
                .flatten()
                .find(|name| !processes.iter().any(|p| &p.name == *name))
            {
                return Err(Error::Config(format!(
                    "systematic '{}' applies to unknown process '{}'",
                    s.name, unknown
                )));
            }
        }
        // Full structural validation of the systematics.
        SystematicsCatalog::new(systematics.clone(), &SystematicsFilter::default())?;
        Ok(Self { taggers, systematics, processes })
    }

    /// The standard ultra-legacy catalog.
    pub fn standard() -> Result<Self> {
        Self::new(standard::taggers()?, standard::systematics(), standard::processes())
    }

    /// All taggers.
    pub fn taggers(&self) -> &[Tagger] {
        &self.taggers
    }

    /// Look up a tagger by name.
    pub fn tagger(&self, name: &str) -> Result<&Tagger> {
        self.taggers.iter().find(|t| t.name == name).ok_or_else(|| {
            let known: Vec<&str> = self.taggers.iter().map(|t| t.name.as_str()).collect();
            Error::Config(format!("unknown tagger '{}' (known: {})", name, known.join(", ")))
        })
    }

    /// All systematics, unfiltered.
    pub fn systematics(&self) -> &[Systematic] {
        &self.systematics
    }

    /// Systematics kept by `filter`.
    pub fn systematics_catalog(&self, filter: &SystematicsFilter) -> Result<SystematicsCatalog> {
        SystematicsCatalog::new(self.systematics.clone(), filter)
    }

    /// Base processes in enumeration order.
    pub fn processes(&self) -> &[BaseProcess] {
        &self.processes
    }
}
