//! Fit task configuration.
//!
//! [`FitTaskConfig`] is what a user writes (YAML or JSON). [`FitTaskConfig::resolve`]
//! turns it into a [`FitTask`] by performing every catalog lookup up front, so a
//! bad tagger, working point or merge split fails before any histogram is read.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ltt_core::{DetectionChannel, Error, Period, Region, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::{
    BaseProcess, Catalog, MergeSplit, SystematicsCatalog, SystematicsFilter, Tagger, VarInterval,
    WorkingPoint, WorkingPointKey,
};
use crate::stage::InputLayout;

/// What `data_obs` is filled with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationMode {
    /// Observed data
    #[default]
    Data,
    /// Sum of the staged nominal simulation
    Asimov,
}

/// User-facing description of one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitTaskConfig {
    /// Tagger name.
    pub tagger: String,
    /// Working point, by name or index.
    pub working_point: WorkingPointKey,
    /// Data-taking periods.
    pub periods: Vec<Period>,
    /// Detection channels.
    #[serde(default = "default_channels")]
    pub channels: Vec<DetectionChannel>,
    /// Regions.
    #[serde(default = "default_regions")]
    pub regions: Vec<Region>,
    /// Merge-scenario split of the signal processes.
    pub merge_split: MergeSplit,
    /// Fit the single full-range interval instead of the fit intervals.
    #[serde(default)]
    pub total_range: bool,
    /// Restrict to these fit intervals (by name).
    #[serde(default)]
    pub intervals: Option<Vec<String>>,
    /// Systematic filter.
    #[serde(default)]
    pub systematics: SystematicsFilter,
    /// Observation mode.
    #[serde(default)]
    pub observation: ObservationMode,
    /// Upstream histogram layout.
    #[serde(default)]
    pub input: InputLayout,
    /// Output directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Threads for external commands (0 = rayon default).
    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_channels() -> Vec<DetectionChannel> {
    DetectionChannel::ALL.to_vec()
}

fn default_regions() -> Vec<Region> {
    Region::ALL.to_vec()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("combine")
}

fn default_threads() -> usize {
    1
}

impl FitTaskConfig {
    /// Minimal configuration; everything else takes its default.
    pub fn new(
        tagger: impl Into<String>,
        working_point: WorkingPointKey,
        periods: &[Period],
        merge_split: MergeSplit,
    ) -> Self {
        Self {
            tagger: tagger.into(),
            working_point,
            periods: periods.to_vec(),
            channels: default_channels(),
            regions: default_regions(),
            merge_split,
            total_range: false,
            intervals: None,
            systematics: SystematicsFilter::default(),
            observation: ObservationMode::default(),
            input: InputLayout::default(),
            output_dir: default_output_dir(),
            threads: default_threads(),
        }
    }

    /// Set the detection channels.
    pub fn with_channels(mut self, channels: &[DetectionChannel]) -> Self {
        self.channels = channels.to_vec();
        self
    }

    /// Restrict the fit intervals.
    pub fn with_intervals(mut self, names: &[&str]) -> Self {
        self.intervals = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Fit the full-range interval only.
    pub fn with_total_range(mut self, total_range: bool) -> Self {
        self.total_range = total_range;
        self
    }

    /// Set the systematics filter.
    pub fn with_systematics(mut self, filter: SystematicsFilter) -> Self {
        self.systematics = filter;
        self
    }

    /// Set the observation mode.
    pub fn with_observation(mut self, observation: ObservationMode) -> Self {
        self.observation = observation;
        self
    }

    /// Set the input layout.
    pub fn with_input(mut self, input: InputLayout) -> Self {
        self.input = input;
        self
    }

    /// Set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Read a configuration file; `.json` is JSON, anything else YAML.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
        if ext == "json" {
            Ok(serde_json::from_slice(&bytes)?)
        } else {
            serde_yaml_ng::from_slice(&bytes)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
        }
    }

    /// Resolve every lookup against `catalog`.
    pub fn resolve(&self, catalog: &Catalog) -> Result<FitTask> {
        let tagger = catalog.tagger(&self.tagger)?;
        let working_point = tagger.working_point(&self.working_point)?.clone();

        if !tagger.accepts(self.merge_split) {
            return Err(Error::Config(format!(
                "merge split '{}' does not apply to tagger '{}'",
                self.merge_split, tagger.name
            )));
        }
        non_empty_unique("periods", &self.periods)?;
        non_empty_unique("channels", &self.channels)?;
        non_empty_unique("regions", &self.regions)?;

        let intervals = self.select_intervals(tagger)?;
        self.input.validate()?;

        let systematics = catalog.systematics_catalog(&self.systematics)?;
        for s in systematics.fit_systematics() {
            if s.year_correlation > 0.0 && s.year_correlation < 1.0 {
                log::warn!(
                    "systematic '{}' has fractional year correlation {}; treated as uncorrelated",
                    s.name,
                    s.year_correlation
                );
            }
        }

        Ok(FitTask {
            tagger: tagger.clone(),
            working_point,
            periods: self.periods.clone(),
            regions: self.regions.clone(),
            channels: self.channels.clone(),
            merge_split: self.merge_split,
            total_range: self.total_range,
            intervals,
            systematics,
            processes: catalog.processes().to_vec(),
            observation: self.observation,
            input: self.input.clone(),
            output_dir: self.output_dir.clone(),
            threads: self.threads,
        })
    }

    fn select_intervals(&self, tagger: &Tagger) -> Result<Vec<VarInterval>> {
        if self.total_range {
            if self.intervals.is_some() {
                return Err(Error::Config(
                    "an interval subset cannot be combined with total_range".into(),
                ));
            }
            let total = tagger.total_interval().ok_or_else(|| {
                Error::Config(format!("tagger '{}' has no total-range interval", tagger.name))
            })?;
            return Ok(vec![total.clone()]);
        }
        let Some(names) = &self.intervals else {
            return Ok(tagger.fit_intervals().cloned().collect());
        };
        non_empty_unique("intervals", names)?;
        names
            .iter()
            .map(|name| {
                tagger.fit_intervals().find(|iv| &iv.name() == name).cloned().ok_or_else(|| {
                    Error::Config(format!("tagger '{}' has no fit interval '{}'", tagger.name, name))
                })
            })
            .collect()
    }
}

fn non_empty_unique<T: std::hash::Hash + Eq + std::fmt::Debug>(what: &str, items: &[T]) -> Result<()> {
    if items.is_empty() {
        return Err(Error::Config(format!("no {} selected", what)));
    }
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item) {
            return Err(Error::Config(format!("{} listed twice: {:?}", what, item)));
        }
    }
    Ok(())
}

/// A fully resolved fit task.
#[derive(Debug, Clone, Serialize)]
pub struct FitTask {
    /// Tagger.
    pub tagger: Tagger,
    /// Selected working point.
    pub working_point: WorkingPoint,
    /// Periods in enumeration order.
    pub periods: Vec<Period>,
    /// Regions in enumeration order.
    pub regions: Vec<Region>,
    /// Detection channels in enumeration order.
    pub channels: Vec<DetectionChannel>,
    /// Merge-scenario split.
    pub merge_split: MergeSplit,
    /// Whether the full-range interval is fitted.
    pub total_range: bool,
    /// Intervals in enumeration order.
    pub intervals: Vec<VarInterval>,
    /// Filtered systematics.
    pub systematics: SystematicsCatalog,
    /// Base processes in enumeration order.
    pub processes: Vec<BaseProcess>,
    /// Observation mode.
    pub observation: ObservationMode,
    /// Upstream histogram layout.
    pub input: InputLayout,
    /// Output directory.
    pub output_dir: PathBuf,
    /// Threads for external commands.
    pub threads: usize,
}

impl FitTask {
    /// Task name used for output files (`hotvr_t__tau-Standard-top3`).
    pub fn name(&self) -> String {
        let mut name = format!("{}-{}-{}", self.tagger.name, self.working_point.name, self.merge_split);
        if self.total_range {
            name.push_str("-TotalRange");
        }
        name
    }

    /// Stem of every output file: the name plus a short digest of the selection.
    ///
    /// Tasks that differ only in periods, regions, channels, intervals,
    /// systematics or observation get distinct stems.
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.name(), self.selection_digest())
    }

    fn selection_digest(&self) -> String {
        fn joined<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
            items.into_iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",")
        }
        let lines = [
            joined(&self.periods),
            joined(&self.regions),
            joined(&self.channels),
            joined(self.intervals.iter().map(VarInterval::name)),
            joined(self.systematics.fit_systematics().map(|s| s.name.as_str())),
            joined(self.processes.iter().map(|p| p.name.as_str())),
            format!("{:?}", self.observation),
        ];
        let mut h = Sha256::new();
        for line in &lines {
            h.update(line.as_bytes());
            h.update(b"\n");
        }
        h.finalize().iter().take(4).map(|b| format!("{:02x}", b)).collect()
    }

    /// Datacard file name.
    pub fn datacard_file(&self) -> String {
        format!("{}.txt", self.file_stem())
    }

    /// Staged template file name.
    pub fn shapes_file(&self) -> String {
        format!("{}.shapes.json", self.file_stem())
    }

    /// Base process by name.
    pub fn process(&self, name: &str) -> Option<&BaseProcess> {
        self.processes.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hotvr() -> FitTaskConfig {
        FitTaskConfig::new(
            "hotvr_t__tau",
            WorkingPointKey::Name("Standard".into()),
            &[Period::Ul17, Period::Ul18],
            MergeSplit::Top3,
        )
    }

    #[test]
    fn resolve_defaults() {
        let task = hotvr().resolve(&Catalog::standard().unwrap()).unwrap();
        assert_eq!(task.name(), "hotvr_t__tau-Standard-top3");
        assert_eq!(task.channels, DetectionChannel::ALL.to_vec());
        assert_eq!(task.intervals.len(), 6);
        assert!(task.intervals.iter().all(|iv| iv.fit));
    }

    #[test]
    fn total_range_selects_aggregate_interval() {
        let task = hotvr().with_total_range(true).resolve(&Catalog::standard().unwrap()).unwrap();
        assert_eq!(task.intervals.len(), 1);
        assert_eq!(task.intervals[0].name(), "pt_200toInf");
        assert!(task.name().ends_with("-TotalRange"));
    }

    #[test]
    fn file_stem_separates_selections() {
        let cat = Catalog::standard().unwrap();
        let ul17 = FitTaskConfig::new(
            "hotvr_t__tau",
            WorkingPointKey::Name("Standard".into()),
            &[Period::Ul17],
            MergeSplit::Top3,
        );
        let mut ul18 = ul17.clone();
        ul18.periods = vec![Period::Ul18];
        let a = ul17.clone().resolve(&cat).unwrap();
        let b = ul18.resolve(&cat).unwrap();
        assert_eq!(a.name(), b.name());
        assert_ne!(a.file_stem(), b.file_stem());
        assert_ne!(a.datacard_file(), b.datacard_file());

        let muo = ul17.with_channels(&[DetectionChannel::Muon]).resolve(&cat).unwrap();
        assert_ne!(a.file_stem(), muo.file_stem());

        let again = FitTaskConfig::new(
            "hotvr_t__tau",
            WorkingPointKey::Name("Standard".into()),
            &[Period::Ul17],
            MergeSplit::Top3,
        )
        .resolve(&cat)
        .unwrap();
        assert_eq!(a.file_stem(), again.file_stem());
        assert!(a.file_stem().starts_with("hotvr_t__tau-Standard-top3-"));
        assert_eq!(a.file_stem().len(), a.name().len() + 1 + 8);
    }

    #[test]
    fn configuration_errors_before_io() {
        let cat = Catalog::standard().unwrap();

        let mut bad_tagger = hotvr();
        bad_tagger.tagger = "nope".into();
        assert!(matches!(bad_tagger.resolve(&cat), Err(Error::Config(_))));

        let mut bad_wp = hotvr();
        bad_wp.working_point = WorkingPointKey::Name("Tight".into());
        assert!(matches!(bad_wp.resolve(&cat), Err(Error::Config(_))));

        let mut bad_split = hotvr();
        bad_split.merge_split = MergeSplit::W2;
        assert!(matches!(bad_split.resolve(&cat), Err(Error::Config(_))));

        let bad_interval = hotvr().with_intervals(&["pt_200to260"]);
        assert!(matches!(bad_interval.resolve(&cat), Err(Error::Config(_))));

        let mut no_periods = hotvr();
        no_periods.periods.clear();
        assert!(matches!(no_periods.resolve(&cat), Err(Error::Config(_))));
    }

    #[test]
    fn yaml_config_parses_with_defaults() {
        let yaml = r#"
tagger: hotvr_t__tau
working_point: Standard
periods: [UL17, UL18]
channels: [muo]
merge_split: top3
intervals: [pt_200to250, pt_250to300]
systematics:
  blacklist: [btag]
  whitelist: [btag_bc]
observation: asimov
"#;
        let cfg: FitTaskConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(cfg.working_point, WorkingPointKey::Name("Standard".into()));
        assert_eq!(cfg.observation, ObservationMode::Asimov);
        assert_eq!(cfg.threads, 1);
        assert_eq!(cfg.input, InputLayout::default());
        let task = cfg.resolve(&Catalog::standard().unwrap()).unwrap();
        assert_eq!(task.intervals.len(), 2);
        assert!(task.systematics.get("btag_bc_correlated").is_some());
        assert!(task.systematics.get("btag_light_correlated").is_none());
    }

    #[test]
    fn working_point_by_index_in_json() {
        let json = r#"{"tagger":"ak8_t__tau","working_point":2,"periods":["UL18"],"merge_split":"top4"}"#;
        let cfg: FitTaskConfig = serde_json::from_str(json).unwrap();
        let task = cfg.resolve(&Catalog::standard().unwrap()).unwrap();
        assert_eq!(task.working_point.name, "BkgEff0p010");
    }
}
