//! Category, process and POI enumeration for one fit task.
//!
//! Every fit channel and every (base process, merge scenario) pair receives a
//! distinct prime from a [`PrimeAllocator`] owned by the enumerator. The id a
//! process carries in one channel of the datacard is
//!
//! * `process.id_factor` for backgrounds (identical in every channel),
//! * `-(process.id_factor * channel.id_factor)` for signals,
//!
//! so by unique factorisation no two (process, channel) cells ever share an id.

use std::collections::{BTreeSet, HashSet};

use ltt_core::{DetectionChannel, Error, Period, Region, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::{MergeScenario, VarInterval};
use crate::results::ScaleFactor;
use crate::stage::StagingReport;
use crate::task::FitTask;

/// Yields 2, 3, 5, 7, ... Each allocator starts over at 2.
#[derive(Debug, Clone, Default)]
pub struct PrimeAllocator {
    last: u64,
}

impl PrimeAllocator {
    /// Fresh allocator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Iterator for PrimeAllocator {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let mut candidate = if self.last < 2 { 2 } else { self.last + 1 };
        while !is_prime(candidate) {
            candidate = candidate.checked_add(1)?;
        }
        self.last = candidate;
        Some(candidate)
    }
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2u64;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

/// One fit channel: period × region × detection channel × interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombineChannel {
    /// Data-taking period.
    pub period: Period,
    /// Pass or fail region.
    pub region: Region,
    /// Detection channel.
    pub channel: DetectionChannel,
    /// Kinematic interval.
    pub interval: VarInterval,
    /// Prime id factor.
    pub id_factor: u64,
    /// Bin edges of the staged templates, once staged.
    pub binning: Option<Vec<f64>>,
}

impl CombineChannel {
    /// Channel name in the datacard (`LTT_UL17_Pass_muo_pt_200to250`).
    pub fn name(&self) -> String {
        format!("LTT_{}_{}_{}_{}", self.period, self.region, self.channel, self.interval.name())
    }
}

/// A (base process, merge scenario) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombineProcess {
    /// Base process name.
    pub base: String,
    /// Merge scenario; `None` for unsplit backgrounds.
    pub merge_scenario: Option<MergeScenario>,
    /// Prime id factor.
    pub id_factor: u64,
    /// Relative cross-section uncertainty of the base process.
    pub xsec_uncertainty: Option<f64>,
}

impl CombineProcess {
    /// Signal processes are scaled by a POI.
    pub fn is_signal(&self) -> bool {
        self.merge_scenario.is_some()
    }

    /// Upstream sample name (`TTbar__MSc_FullyMerged`, `QCD`).
    pub fn sample_name(&self) -> String {
        match self.merge_scenario {
            Some(msc) => format!("{}__MSc_{}", self.base, msc),
            None => self.base.clone(),
        }
    }

    /// Process name in `channel` (`TTbar_FullyMerged_UL17_pt_200to250`, `QCD`).
    pub fn fit_name(&self, channel: &CombineChannel) -> String {
        match self.merge_scenario {
            Some(msc) => {
                format!("{}_{}_{}_{}", self.base, msc, channel.period, channel.interval.name())
            }
            None => self.base.clone(),
        }
    }

    /// Id written to the datacard for this process in `channel`.
    pub fn combine_id(&self, channel: &CombineChannel) -> i64 {
        if self.is_signal() {
            -((self.id_factor * channel.id_factor) as i64)
        } else {
            self.id_factor as i64
        }
    }
}

/// Parameter of interest: one scale factor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Poi {
    /// Merge scenario scaled by this POI.
    pub merge_scenario: MergeScenario,
    /// Period.
    pub period: Period,
    /// Kinematic interval.
    pub interval: VarInterval,
    /// Extracted scale factor, once fitted.
    pub result: Option<ScaleFactor>,
}

impl Poi {
    /// Parameter name (`r_FullyMerged_UL17_pt_200to250`).
    pub fn name(&self) -> String {
        format!("r_{}_{}_{}", self.merge_scenario, self.period, self.interval.name())
    }

    fn scales(&self, process: &CombineProcess, channel: &CombineChannel) -> bool {
        process.merge_scenario == Some(self.merge_scenario)
            && channel.period == self.period
            && channel.interval == self.interval
    }
}

/// Position of a (channel, process) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    /// Index into [`Enumeration::channels`].
    pub channel: usize,
    /// Index into [`Enumeration::processes`].
    pub process: usize,
}

/// A (channel, process) cell.
#[derive(Debug, Clone, Copy)]
pub struct Cell<'a> {
    /// Position.
    pub key: CellKey,
    /// Channel.
    pub channel: &'a CombineChannel,
    /// Process.
    pub process: &'a CombineProcess,
}

impl Cell<'_> {
    /// Process name in this channel.
    pub fn fit_name(&self) -> String {
        self.process.fit_name(self.channel)
    }

    /// Datacard id of this cell.
    pub fn combine_id(&self) -> i64 {
        self.process.combine_id(self.channel)
    }
}

/// Channel, process and POI registries of one fit task.
#[derive(Debug, Clone, Serialize)]
pub struct Enumeration {
    /// Channels in enumeration order.
    pub channels: Vec<CombineChannel>,
    /// Processes in enumeration order.
    pub processes: Vec<CombineProcess>,
    /// POIs in enumeration order.
    pub pois: Vec<Poi>,
    skipped: BTreeSet<CellKey>,
}

impl Enumeration {
    /// Every cell, channel-major.
    pub fn cells(&self) -> impl Iterator<Item = Cell<'_>> {
        self.channels.iter().enumerate().flat_map(move |(ci, channel)| {
            self.processes.iter().enumerate().map(move |(pi, process)| Cell {
                key: CellKey { channel: ci, process: pi },
                channel,
                process,
            })
        })
    }

    /// Cells not marked skipped, channel-major.
    pub fn active_cells(&self) -> impl Iterator<Item = Cell<'_>> {
        self.cells().filter(move |c| !self.skipped.contains(&c.key))
    }

    /// Whether a cell was skipped during staging.
    pub fn is_skipped(&self, key: CellKey) -> bool {
        self.skipped.contains(&key)
    }

    /// Number of skipped cells.
    pub fn n_skipped(&self) -> usize {
        self.skipped.len()
    }

    /// Take over bin edges and skip decisions from staging.
    ///
    /// Every entry must name the channel and process found at its index;
    /// a report staged for another task is rejected before anything changes.
    pub fn apply_skips(&mut self, report: &StagingReport) -> Result<()> {
        for b in &report.binnings {
            let channel = self.channels.get(b.channel).ok_or_else(|| {
                Error::Validation(format!("staging report names unknown channel #{}", b.channel))
            })?;
            if channel.name() != b.name {
                return Err(Error::Validation(format!(
                    "staging report binning #{} is for {}, enumeration has {}",
                    b.channel,
                    b.name,
                    channel.name()
                )));
            }
        }
        for s in &report.skipped {
            let (Some(channel), Some(process)) =
                (self.channels.get(s.cell.channel), self.processes.get(s.cell.process))
            else {
                return Err(Error::Validation(format!(
                    "staging report skips unknown cell {:?}",
                    s.cell
                )));
            };
            let fit_name = process.fit_name(channel);
            if channel.name() != s.channel || fit_name != s.process {
                return Err(Error::Validation(format!(
                    "staging report skips {}/{} at {:?}, enumeration has {}/{}",
                    s.channel,
                    s.process,
                    s.cell,
                    channel.name(),
                    fit_name
                )));
            }
        }
        for b in &report.binnings {
            self.channels[b.channel].binning = Some(b.edges.clone());
        }
        self.skipped.extend(report.skipped.iter().map(|s| s.cell));
        Ok(())
    }

    /// Indices of channels with at least one active cell.
    ///
    /// Channels whose cells were all skipped are logged and left out.
    pub fn active_channels(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for (ci, channel) in self.channels.iter().enumerate() {
            let any = (0..self.processes.len())
                .any(|pi| !self.skipped.contains(&CellKey { channel: ci, process: pi }));
            if any {
                out.push(ci);
            } else {
                log::warn!("channel {} has no active process and is dropped", channel.name());
            }
        }
        out
    }

    /// POIs scaling at least one active signal cell.
    pub fn active_pois(&self) -> impl Iterator<Item = &Poi> {
        self.pois.iter().filter(move |poi| self.is_poi_active(poi))
    }

    /// Whether any active cell is scaled by `poi`.
    pub fn is_poi_active(&self, poi: &Poi) -> bool {
        self.active_cells().any(|c| poi.scales(c.process, c.channel))
    }

    /// POI scaling a signal cell.
    pub fn poi_for(&self, cell: &Cell<'_>) -> Option<&Poi> {
        self.pois.iter().find(|poi| poi.scales(cell.process, cell.channel))
    }

    /// Check the id rules over all cells.
    pub fn validate_ids(&self) -> Result<()> {
        let mut factors = HashSet::new();
        let channel_factors = self.channels.iter().map(|c| c.id_factor);
        for f in channel_factors.chain(self.processes.iter().map(|p| p.id_factor)) {
            if !is_prime(f) || !factors.insert(f) {
                return Err(Error::Validation(format!("id factor {} is not a fresh prime", f)));
            }
        }
        let mut seen = HashSet::new();
        for cell in self.cells() {
            let id = cell.combine_id();
            let expected_sign = if cell.process.is_signal() { id < 0 } else { id > 0 };
            if !expected_sign {
                return Err(Error::Validation(format!(
                    "process {} has id {} with the wrong sign",
                    cell.fit_name(),
                    id
                )));
            }
            // Backgrounds legitimately repeat across channels.
            if cell.process.is_signal() && !seen.insert(id) {
                return Err(Error::Validation(format!("duplicate signal id {}", id)));
            }
        }
        Ok(())
    }

    /// `--PO map=...` arguments of the multi-signal physics model, one per active
    /// signal process.
    pub fn physics_model_maps(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut maps = Vec::new();
        for cell in self.active_cells().filter(|c| c.process.is_signal()) {
            let name = cell.fit_name();
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(poi) = self.poi_for(&cell) {
                maps.push(format!("map=.*/{}:{}[1,0,5]", name, poi.name()));
            }
        }
        maps
    }

    /// Store extracted scale factors on their POIs.
    pub fn attach_results(&mut self, scale_factors: &[ScaleFactor]) -> usize {
        let mut attached = 0;
        for poi in &mut self.pois {
            let name = poi.name();
            if let Some(sf) = scale_factors.iter().find(|sf| sf.poi == name) {
                poi.result = Some(sf.clone());
                attached += 1;
            }
        }
        attached
    }
}

/// Builds [`Enumeration`]s, drawing all ids from one allocator.
#[derive(Debug, Default)]
pub struct CategoryEnumerator {
    primes: PrimeAllocator,
}

impl CategoryEnumerator {
    /// Enumerator with a fresh allocator.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_prime(&mut self) -> Result<u64> {
        self.primes
            .next()
            .ok_or_else(|| Error::Validation("prime allocator exhausted".into()))
    }

    /// Enumerate channels, processes and POIs of `task`.
    pub fn enumerate(&mut self, task: &FitTask) -> Result<Enumeration> {
        let mut channels = Vec::new();
        for &period in &task.periods {
            for &region in &task.regions {
                for &channel in &task.channels {
                    for interval in &task.intervals {
                        channels.push(CombineChannel {
                            period,
                            region,
                            channel,
                            interval: interval.clone(),
                            id_factor: self.next_prime()?,
                            binning: None,
                        });
                    }
                }
            }
        }

        let scenarios = task.merge_split.scenarios();
        let mut processes = Vec::new();
        for base in &task.processes {
            if base.split_by_merge_scenario {
                for &msc in scenarios {
                    processes.push(CombineProcess {
                        base: base.name.clone(),
                        merge_scenario: Some(msc),
                        id_factor: self.next_prime()?,
                        xsec_uncertainty: base.xsec_uncertainty,
                    });
                }
            } else {
                processes.push(CombineProcess {
                    base: base.name.clone(),
                    merge_scenario: None,
                    id_factor: self.next_prime()?,
                    xsec_uncertainty: base.xsec_uncertainty,
                });
            }
        }

        let mut pois = Vec::new();
        for &msc in scenarios {
            for &period in &task.periods {
                for interval in &task.intervals {
                    pois.push(Poi {
                        merge_scenario: msc,
                        period,
                        interval: interval.clone(),
                        result: None,
                    });
                }
            }
        }

        let enumeration = Enumeration { channels, processes, pois, skipped: BTreeSet::new() };
        enumeration.validate_ids()?;
        log::info!(
            "{}: {} channels, {} processes, {} POIs",
            task.name(),
            enumeration.channels.len(),
            enumeration.processes.len(),
            enumeration.pois.len()
        );
        Ok(enumeration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, MergeSplit, WorkingPointKey};
    use crate::stage::{ChannelBinning, SkipReason, SkippedCell};
    use crate::task::FitTaskConfig;

    fn task() -> FitTask {
        FitTaskConfig::new(
            "hotvr_t__tau",
            WorkingPointKey::Name("Standard".into()),
            &[Period::Ul17],
            MergeSplit::Top3,
        )
        .with_channels(&[DetectionChannel::Muon])
        .with_intervals(&["pt_200to250"])
        .resolve(&Catalog::standard().unwrap())
        .unwrap()
    }

    #[test]
    fn primes_in_order() {
        let first: Vec<u64> = PrimeAllocator::new().take(8).collect();
        assert_eq!(first, vec![2, 3, 5, 7, 11, 13, 17, 19]);
    }

    #[test]
    fn allocators_are_independent() {
        let mut a = PrimeAllocator::new();
        a.next();
        a.next();
        assert_eq!(PrimeAllocator::new().next(), Some(2));
        assert_eq!(a.next(), Some(5));
    }

    #[test]
    fn enumerator_never_reuses_primes() {
        let t = task();
        let mut e = CategoryEnumerator::new();
        let first = e.enumerate(&t).unwrap();
        let second = e.enumerate(&t).unwrap();
        let max_first = first.processes.iter().map(|p| p.id_factor).max().unwrap();
        assert!(second.channels.iter().all(|c| c.id_factor > max_first));
    }

    #[test]
    fn names() {
        let en = CategoryEnumerator::new().enumerate(&task()).unwrap();
        assert_eq!(en.channels[0].name(), "LTT_UL17_Pass_muo_pt_200to250");
        let ttbar = &en.processes[0];
        assert_eq!(ttbar.sample_name(), "TTbar__MSc_FullyMerged");
        assert_eq!(ttbar.fit_name(&en.channels[0]), "TTbar_FullyMerged_UL17_pt_200to250");
        assert_eq!(en.pois[0].name(), "r_FullyMerged_UL17_pt_200to250");
        let qcd = en.processes.last().unwrap();
        assert_eq!(qcd.fit_name(&en.channels[1]), "QCD");
    }

    #[test]
    fn ids_follow_sign_rules() {
        let en = CategoryEnumerator::new().enumerate(&task()).unwrap();
        // Channels take 2 and 3; TTbar FullyMerged is the first process: 5.
        assert_eq!(en.channels[1].id_factor, 3);
        assert_eq!(en.processes[0].combine_id(&en.channels[1]), -15);
        let qcd = en.processes.last().unwrap();
        assert!(en.channels.iter().all(|c| qcd.combine_id(c) == qcd.id_factor as i64));
    }

    #[test]
    fn physics_model_maps_share_poi_between_regions() {
        let en = CategoryEnumerator::new().enumerate(&task()).unwrap();
        let maps = en.physics_model_maps();
        // TTbar and ST, three scenarios each; Pass and Fail share the fit name.
        assert_eq!(maps.len(), 6);
        assert!(maps.contains(
            &"map=.*/ST_SemiMerged_UL17_pt_200to250:r_SemiMerged_UL17_pt_200to250[1,0,5]"
                .to_string()
        ));
    }

    fn qcd_skip(en: &Enumeration, channel: usize) -> StagingReport {
        let process = en.processes.len() - 1;
        StagingReport {
            binnings: vec![ChannelBinning {
                channel,
                name: en.channels[channel].name(),
                edges: vec![0.0, 100.0, 250.0],
            }],
            skipped: vec![SkippedCell {
                cell: CellKey { channel, process },
                channel: en.channels[channel].name(),
                process: "QCD".into(),
                reason: SkipReason::EmptyNominal { integral: 0.0 },
            }],
            ..StagingReport::default()
        }
    }

    #[test]
    fn apply_skips_takes_binning_and_skips() {
        let mut en = CategoryEnumerator::new().enumerate(&task()).unwrap();
        let report = qcd_skip(&en, 0);
        en.apply_skips(&report).unwrap();
        assert_eq!(en.n_skipped(), 1);
        assert!(en.is_skipped(CellKey { channel: 0, process: en.processes.len() - 1 }));
        assert_eq!(en.channels[0].binning, Some(vec![0.0, 100.0, 250.0]));
    }

    #[test]
    fn report_of_another_period_is_rejected() {
        let ul17 = CategoryEnumerator::new().enumerate(&task()).unwrap();
        let report = qcd_skip(&ul17, 0);

        let ul18_task = FitTaskConfig::new(
            "hotvr_t__tau",
            WorkingPointKey::Name("Standard".into()),
            &[Period::Ul18],
            MergeSplit::Top3,
        )
        .with_channels(&[DetectionChannel::Muon])
        .with_intervals(&["pt_200to250"])
        .resolve(&Catalog::standard().unwrap())
        .unwrap();
        let mut ul18 = CategoryEnumerator::new().enumerate(&ul18_task).unwrap();

        let err = ul18.apply_skips(&report).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{}", err);
        assert_eq!(ul18.n_skipped(), 0);
        assert!(ul18.channels.iter().all(|c| c.binning.is_none()));
    }

    #[test]
    fn report_naming_another_process_is_rejected() {
        let mut en = CategoryEnumerator::new().enumerate(&task()).unwrap();
        let mut report = qcd_skip(&en, 1);
        report.binnings.clear();
        report.skipped[0].process = "Diboson".into();
        assert!(matches!(en.apply_skips(&report), Err(Error::Validation(_))));
        assert_eq!(en.n_skipped(), 0);

        let mut report = qcd_skip(&en, 1);
        report.binnings[0].name = en.channels[0].name();
        assert!(matches!(en.apply_skips(&report), Err(Error::Validation(_))));
        assert_eq!(en.n_skipped(), 0);
    }
}
