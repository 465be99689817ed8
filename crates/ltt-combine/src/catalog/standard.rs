//! The standard Run 2 ultra-legacy catalog.

use ltt_core::{DetectionChannel, Period, Result};

use super::process::BaseProcess;
use super::systematics::{ProcessCorrelation, Systematic, VariationKind};
use super::tagger::{FitVariable, Tagger, TaggerKind, UpperBound, VarInterval, WorkingPoint};

const TOP_PT_EDGES: [f64; 5] = [300.0, 400.0, 480.0, 600.0, f64::INFINITY];
const HOTVR_PT_EDGES: [f64; 7] = [200.0, 250.0, 300.0, 400.0, 480.0, 600.0, f64::INFINITY];
const W_PT_EDGES: [f64; 5] = [200.0, 300.0, 400.0, 500.0, f64::INFINITY];

/// Fit intervals over consecutive `edges` (last edge infinite = open interval),
/// followed by the total-range aggregate.
fn pt_intervals(edges: &[f64]) -> Result<Vec<VarInterval>> {
    let bound = |x: f64| {
        if x.is_infinite() { UpperBound::Infinite } else { UpperBound::Finite(x) }
    };
    let mut out = edges
        .windows(2)
        .map(|w| VarInterval::new("pt", w[0], bound(w[1])))
        .collect::<Result<Vec<_>>>()?;
    if let (Some(&lo), Some(&hi)) = (edges.first(), edges.last()) {
        out.push(VarInterval::new("pt", lo, bound(hi))?.total());
    }
    Ok(out)
}

fn per_period(name: &str, label: &str, cuts: [f64; 4]) -> Result<WorkingPoint> {
    let pairs: Vec<(Period, f64)> = Period::ALL.into_iter().zip(cuts).collect();
    WorkingPoint::per_period(name, label, &pairs)
}

pub(super) fn taggers() -> Result<Vec<Tagger>> {
    let mass = |remove_empty_bins| FitVariable { name: "mSD".into(), remove_empty_bins };

    let ak8_tau = Tagger::new(
        "ak8_t__tau",
        TaggerKind::Top,
        "AK8 PUPPI, #tau_{32}",
        "tau32",
        "{discriminant} < {cut}",
        mass(true),
        vec![
            WorkingPoint::fixed("BkgEff0p001", "#varepsilon_{B} = 0.1%", 0.38),
            WorkingPoint::fixed("BkgEff0p003", "#varepsilon_{B} = 0.3%", 0.47),
            WorkingPoint::fixed("BkgEff0p010", "#varepsilon_{B} = 1.0%", 0.52),
            WorkingPoint::fixed("BkgEff0p030", "#varepsilon_{B} = 3.0%", 0.61),
            WorkingPoint::fixed("BkgEff0p050", "#varepsilon_{B} = 5.0%", 0.69),
        ],
        pt_intervals(&TOP_PT_EDGES)?,
    )?;

    let ak8_deepak8 = Tagger::new(
        "ak8_t__MDdeepak8",
        TaggerKind::Top,
        "AK8 PUPPI, DeepAK8-MD",
        "MDDeepAK8_TvsQCD",
        "{discriminant} > {cut}",
        mass(true),
        vec![
            per_period("BkgEff0p001", "#varepsilon_{B} = 0.1%", [0.889, 0.885, 0.863, 0.868])?,
            per_period("BkgEff0p005", "#varepsilon_{B} = 0.5%", [0.685, 0.669, 0.632, 0.647])?,
            per_period("BkgEff0p010", "#varepsilon_{B} = 1.0%", [0.538, 0.527, 0.502, 0.514])?,
            per_period("BkgEff0p025", "#varepsilon_{B} = 2.5%", [0.317, 0.312, 0.301, 0.309])?,
            per_period("BkgEff0p050", "#varepsilon_{B} = 5.0%", [0.183, 0.179, 0.172, 0.176])?,
        ],
        pt_intervals(&TOP_PT_EDGES)?,
    )?;

    let hotvr = Tagger::new(
        "hotvr_t__tau",
        TaggerKind::Top,
        "HOTVR, #tau_{32}",
        "tau32",
        "{discriminant} < {cut}",
        FitVariable { name: "mass".into(), remove_empty_bins: true },
        vec![WorkingPoint::fixed("Standard", "HOTVR standard", 0.56)],
        pt_intervals(&HOTVR_PT_EDGES)?,
    )?;

    let ak8_w = Tagger::new(
        "ak8_w__partnet",
        TaggerKind::W,
        "AK8 PUPPI, ParticleNet W",
        "ParticleNet_WvsQCD",
        "{discriminant} > {cut}",
        mass(false),
        vec![
            per_period("BkgEff0p005", "#varepsilon_{B} = 0.5%", [0.968, 0.967, 0.959, 0.961])?,
            per_period("BkgEff0p010", "#varepsilon_{B} = 1.0%", [0.929, 0.928, 0.914, 0.918])?,
            per_period("BkgEff0p025", "#varepsilon_{B} = 2.5%", [0.735, 0.730, 0.725, 0.731])?,
        ],
        pt_intervals(&W_PT_EDGES)?,
    )?;

    Ok(vec![ak8_tau, ak8_deepak8, hotvr, ak8_w])
}

pub(super) fn processes() -> Vec<BaseProcess> {
    vec![
        BaseProcess::signal("TTbar"),
        BaseProcess::signal("ST"),
        BaseProcess::background("WJetsToLNu", 0.2),
        BaseProcess::background("DYJetsToLL", 0.2),
        BaseProcess::background("Diboson", 0.3),
        BaseProcess::background("QCD", 1.0),
    ]
}

pub(super) fn systematics() -> Vec<Systematic> {
    use DetectionChannel::{Electron, Muon};
    use VariationKind::{Shape, Weight};

    let split = ProcessCorrelation::SplitByBaseProcess;
    let top = ["TTbar"];

    vec![
        Systematic::up_down("btag_bc_correlated", "btagbccorr", Weight),
        Systematic::up_down("btag_bc_uncorrelated", "btagbcuncorr", Weight).year_correlation(0.0),
        Systematic::up_down("btag_light_correlated", "btaglightcorr", Weight),
        Systematic::up_down("btag_light_uncorrelated", "btaglightuncorr", Weight)
            .year_correlation(0.0),
        Systematic::up_down("muontrigger", "muontrigger", Weight).year_correlation(0.0).only_in(Muon),
        Systematic::up_down("muonid", "muonid", Weight).year_correlation(0.0).only_in(Muon),
        Systematic::up_down("muoniso", "muoniso", Weight).year_correlation(0.0).only_in(Muon),
        Systematic::up_down("eletrigger", "eletrigger", Weight).year_correlation(0.0).only_in(Electron),
        Systematic::up_down("eleid", "eleid", Weight).year_correlation(0.0).only_in(Electron),
        Systematic::up_down("elereco", "elereco", Weight).year_correlation(0.0).only_in(Electron),
        Systematic::up_down("pileup", "pileup", Weight),
        Systematic::up_down("prefiring", "prefiring", Weight).year_correlation(0.0),
        Systematic::up_down("toppt_a", "topptA", Weight).applies_to(&top),
        Systematic::up_down("toppt_b", "topptB", Weight).applies_to(&top),
        Systematic::up_down("isr", "isr", Weight).process_correlation(split),
        Systematic::up_down("fsr", "fsr", Weight).process_correlation(split),
        Systematic::envelope(
            "scale",
            "murmuf",
            Weight,
            &["upup", "upnone", "noneup", "downdown", "downnone", "nonedown"],
        )
        .process_correlation(split),
        Systematic::up_down("pdf", "pdf", Weight).process_correlation(split),
        Systematic::up_down("jes", "jes", Shape).year_correlation(0.0),
        Systematic::up_down("jer", "jer", Shape).year_correlation(0.0),
        Systematic::up_down("hdamp", "hdamp", Shape).applies_to(&top),
        Systematic::up_down("mtop", "mtop", Shape).applies_to(&top).not_in_fit(),
        Systematic::up_down("tune", "tune", Shape).applies_to(&top),
        Systematic::envelope("cr", "cr", Shape, &["erdon", "qcdbased", "gluonmove"]).applies_to(&top),
    ]
}
