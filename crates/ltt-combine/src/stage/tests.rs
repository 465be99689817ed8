use std::path::Path;

use approx::assert_relative_eq;
use ltt_core::{DetectionChannel, Error, Period};
use ltt_hist::{Histogram, MemoryStore};

use super::*;
use crate::catalog::{Catalog, MergeSplit, SystematicsFilter, WorkingPointKey};
use crate::enumerate::CategoryEnumerator;
use crate::task::FitTaskConfig;

const EDGES: [f64; 5] = [0.0, 10.0, 20.0, 30.0, 40.0];
const BASE: [f64; 4] = [1.0, 2.0, 0.0, 3.0];
const OUT: &str = "shapes.json";
const PASS: &str = "LTT_UL17_Pass_muo_pt_200to250";
const FAIL: &str = "LTT_UL17_Fail_muo_pt_200to250";

fn hist(content: &[f64]) -> Histogram {
    let sumw2 = content.iter().map(|c| c.abs()).collect();
    Histogram::new("h", EDGES.to_vec(), content.to_vec(), sumw2).unwrap()
}

fn factor(v: &Variation) -> f64 {
    match v.short_name.as_str() {
        "up" => 1.1,
        "down" => 0.9,
        "upup" => 1.2,
        "downdown" => 0.8,
        "upnone" => 1.05,
        "downnone" => 0.95,
        _ => 1.0,
    }
}

fn fields(task: &FitTask, channel: &CombineChannel) -> LayoutFields {
    LayoutFields {
        period: channel.period.to_string(),
        channel: channel.channel.to_string(),
        tagger: task.tagger.name.clone(),
        wp: task.working_point.name.clone(),
        region: channel.region.to_string(),
        interval: channel.interval.name(),
        fit_variable: task.tagger.fit_variable.name.clone(),
    }
}

struct Fixture {
    task: FitTask,
    enumeration: Enumeration,
    store: MemoryStore,
}

impl Fixture {
    fn new(observation: ObservationMode) -> Self {
        let filter = SystematicsFilter {
            whitelist: vec!["pileup".into(), "scale".into(), "jes".into()],
            blacklist: vec![],
        };
        let task = FitTaskConfig::new(
            "hotvr_t__tau",
            WorkingPointKey::Name("Standard".into()),
            &[Period::Ul17],
            MergeSplit::Top3,
        )
        .with_channels(&[DetectionChannel::Muon])
        .with_intervals(&["pt_200to250"])
        .with_systematics(filter)
        .with_observation(observation)
        .resolve(&Catalog::standard().unwrap())
        .unwrap();
        let enumeration = CategoryEnumerator::new().enumerate(&task).unwrap();

        let mut store = MemoryStore::new();
        let variations = task.systematics.get_all_variations(true);
        for channel in &enumeration.channels {
            let f = fields(&task, channel);
            for process in &enumeration.processes {
                let sample = process.sample_name();
                for v in variations.values() {
                    // Only TTbar has dedicated JES samples.
                    if v.systematic == "jes" && process.base != "TTbar" {
                        continue;
                    }
                    let content: Vec<f64> = BASE.iter().map(|c| c * factor(v)).collect();
                    store.insert(&task.input.path(&f, &sample, v), hist(&content));
                }
            }
            let data = task.input.path(&f, DATA_SAMPLE, &Variation::nominal());
            store.insert(&data, hist(&[10.0, 20.0, 0.0, 30.0]));
        }
        Self { task, enumeration, store }
    }

    fn put(&mut self, channel: usize, process: usize, variation: &str, content: &[f64]) {
        let variation = if variation == "nominal" {
            Variation::nominal()
        } else {
            self.task.systematics.get_all_variations(false)[variation].clone()
        };
        let ch = &self.enumeration.channels[channel];
        let sample = self.enumeration.processes[process].sample_name();
        let path = self.task.input.path(&fields(&self.task, ch), &sample, &variation);
        self.store.insert(&path, hist(content));
    }

    fn process_index(&self, sample: &str) -> usize {
        self.enumeration.processes.iter().position(|p| p.sample_name() == sample).unwrap()
    }

    fn stage(&self, out: &mut MemoryStore) -> Result<StagingReport> {
        TemplateStager::new(&self.task, &self.store).stage(&self.enumeration, out, Path::new(OUT))
    }
}

fn staged<'a>(out: &'a MemoryStore, channel: &str, name: &str) -> &'a Histogram {
    out.get(Path::new(OUT), &format!("{}/{}", channel, name))
        .unwrap_or_else(|| panic!("{}/{} not staged", channel, name))
}

#[test]
fn empty_bins_are_merged_before_writing() {
    let fx = Fixture::new(ObservationMode::Data);
    let mut out = MemoryStore::new();
    let report = fx.stage(&mut out).unwrap();

    assert_eq!(report.binnings.len(), 2);
    for b in &report.binnings {
        assert_eq!(b.edges, vec![0.0, 10.0, 20.0, 40.0]);
    }
    let ttbar = staged(&out, PASS, "TTbar_FullyMerged_UL17_pt_200to250");
    assert_eq!(ttbar.bin_content, vec![1.0, 2.0, 3.0]);
    let data = staged(&out, PASS, DATA_OBS);
    assert_eq!(data.bin_content, vec![10.0, 20.0, 30.0]);
}

#[test]
fn shifted_templates_use_nuisance_names() {
    let fx = Fixture::new(ObservationMode::Data);
    let mut out = MemoryStore::new();
    fx.stage(&mut out).unwrap();

    let up = staged(&out, FAIL, "QCD_pileupUp");
    assert_relative_eq!(up.integral(), 6.6, epsilon = 1e-12);
    // Uncorrelated between periods.
    staged(&out, FAIL, "QCD_jes_UL17Down");
    // Split by base process.
    staged(&out, FAIL, "ST_NotMerged_UL17_pt_200to250_murmuf_STUp");
}

#[test]
fn envelope_takes_binwise_extremes_without_errors() {
    let fx = Fixture::new(ObservationMode::Data);
    let mut out = MemoryStore::new();
    fx.stage(&mut out).unwrap();

    let up = staged(&out, PASS, "TTbar_FullyMerged_UL17_pt_200to250_murmuf_TTbarUp");
    let down = staged(&out, PASS, "TTbar_FullyMerged_UL17_pt_200to250_murmuf_TTbarDown");
    for (i, base) in [1.0, 2.0, 3.0].into_iter().enumerate() {
        assert_relative_eq!(up.bin_content[i], 1.2 * base, epsilon = 1e-12);
        assert_relative_eq!(down.bin_content[i], 0.8 * base, epsilon = 1e-12);
    }
    assert!(up.sumw2.iter().chain(&down.sumw2).all(|&w| w == 0.0));
}

#[test]
fn missing_variation_falls_back_to_nominal() {
    let fx = Fixture::new(ObservationMode::Data);
    let mut out = MemoryStore::new();
    let report = fx.stage(&mut out).unwrap();

    // 7 non-TTbar processes × 2 JES variations × 2 channels.
    assert_eq!(report.fallbacks.len(), 28);
    assert!(report.fallbacks.iter().all(|f| f.variation.starts_with("jes_")));
    assert!(!report.fallbacks.iter().any(|f| f.process.starts_with("TTbar")));

    let nominal = staged(&out, PASS, "QCD");
    let jes_up = staged(&out, PASS, "QCD_jes_UL17Up");
    assert_eq!(nominal.bin_content, jes_up.bin_content);
}

#[test]
fn skips_follow_nominal_and_every_variation() {
    let mut fx = Fixture::new(ObservationMode::Data);
    let qcd = fx.process_index("QCD");
    let wjets = fx.process_index("WJetsToLNu");
    fx.put(0, qcd, "pileup_down", &[0.0, 0.0, 0.0, 0.0]);
    fx.put(1, wjets, "nominal", &[-1.0, 0.0, 0.0, 0.0]);

    let mut out = MemoryStore::new();
    let report = fx.stage(&mut out).unwrap();

    let skipped: Vec<CellKey> = report.skipped.iter().map(|s| s.cell).collect();
    assert_eq!(
        skipped,
        vec![CellKey { channel: 0, process: qcd }, CellKey { channel: 1, process: wjets }]
    );
    assert!(matches!(report.skipped[0].reason, SkipReason::EmptyVariation { .. }));
    assert!(matches!(report.skipped[1].reason, SkipReason::EmptyNominal { .. }));
    assert!(out.get(Path::new(OUT), &format!("{}/QCD", PASS)).is_none());
    assert!(out.get(Path::new(OUT), &format!("{}/QCD", FAIL)).is_some());

    // Negative nominal bin plus its two JES fallbacks.
    assert_eq!(report.clipped_bins, 3);

    let mut en = fx.enumeration.clone();
    en.apply_skips(&report).unwrap();
    assert_eq!(en.active_cells().count(), 2 * 10 - 2);
    assert_eq!(en.channels[0].binning.as_deref(), Some(&[0.0, 10.0, 20.0, 40.0][..]));
}

#[test]
fn asimov_observation_sums_staged_nominals() {
    let mut fx = Fixture::new(ObservationMode::Asimov);
    let qcd = fx.process_index("QCD");
    fx.put(0, qcd, "nominal", &[0.0, 0.0, 0.0, 0.0]);

    let mut out = MemoryStore::new();
    fx.stage(&mut out).unwrap();

    // Ten processes contribute [1, 2, 3] each; QCD is skipped in Pass.
    let pass = staged(&out, PASS, DATA_OBS);
    assert_eq!(pass.bin_content, vec![9.0, 18.0, 27.0]);
    let fail = staged(&out, FAIL, DATA_OBS);
    assert_eq!(fail.bin_content, vec![10.0, 20.0, 30.0]);
}

#[test]
fn missing_nominal_is_fatal() {
    let fx = Fixture::new(ObservationMode::Data);
    let empty = MemoryStore::new();
    let mut out = MemoryStore::new();
    let err = TemplateStager::new(&fx.task, &empty)
        .stage(&fx.enumeration, &mut out, Path::new(OUT))
        .unwrap_err();
    assert!(matches!(err, Error::MissingInput(_)));
}
