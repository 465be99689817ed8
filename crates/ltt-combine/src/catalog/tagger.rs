//! Jet taggers, their working points and the kinematic intervals they are
//! calibrated in.

use std::fmt;
use std::str::FromStr;

use ltt_core::{Error, Period, Result};
use serde::{Deserialize, Serialize};

use super::merge::MergeSplit;

/// Upper end of a kinematic interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpperBound {
    /// Finite upper edge (exclusive)
    Finite(f64),
    /// Open-ended interval
    Infinite,
}

impl UpperBound {
    /// The finite value, if any.
    pub fn finite(self) -> Option<f64> {
        match self {
            UpperBound::Finite(v) => Some(v),
            UpperBound::Infinite => None,
        }
    }
}

impl fmt::Display for UpperBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpperBound::Finite(v) => write!(f, "{}", v),
            UpperBound::Infinite => f.write_str("Inf"),
        }
    }
}

/// Half-open interval `[min, max)` of a kinematic variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarInterval {
    /// Variable short name (`pt`).
    pub var: String,
    /// Lower edge (inclusive).
    pub min: f64,
    /// Upper edge (exclusive) or open end.
    pub max: UpperBound,
    /// Interval is part of the fit template set.
    pub fit: bool,
    /// Interval is the aggregate over the full range.
    pub total_range: bool,
}

impl VarInterval {
    /// Create a fit interval. Fails unless `min` is finite and below `max`.
    pub fn new(var: impl Into<String>, min: f64, max: UpperBound) -> Result<Self> {
        let var = var.into();
        if !min.is_finite() {
            return Err(Error::Config(format!("{} interval has non-finite lower edge", var)));
        }
        if let UpperBound::Finite(hi) = max
            && !(hi.is_finite() && min < hi)
        {
            return Err(Error::Config(format!(
                "{} interval [{}, {}) is empty or unbounded below",
                var, min, hi
            )));
        }
        Ok(Self { var, min, max, fit: true, total_range: false })
    }

    /// Mark whether the interval is used for fit templates.
    pub fn fit(mut self, fit: bool) -> Self {
        self.fit = fit;
        self
    }

    /// Mark the interval as the full-range aggregate (never a fit interval itself).
    pub fn total(mut self) -> Self {
        self.total_range = true;
        self.fit = false;
        self
    }

    /// Name used in histogram directories and fit names (`pt_300to400`, `pt_600toInf`).
    pub fn name(&self) -> String {
        format!("{}_{}to{}", self.var, self.min, self.max)
    }

    /// Whether `x` lies in `[min, max)`.
    pub fn contains(&self, x: f64) -> bool {
        x >= self.min
            && match self.max {
                UpperBound::Finite(hi) => x < hi,
                UpperBound::Infinite => true,
            }
    }

    /// Centre used for plotting; open intervals get `open_width` as display width.
    pub fn display_range(&self, open_width: f64) -> (f64, f64) {
        match self.max {
            UpperBound::Finite(hi) => (self.min, hi),
            UpperBound::Infinite => (self.min, self.min + open_width),
        }
    }
}

/// Cut threshold of a working point.
///
/// Not public: the only way to get a number out is [`WorkingPoint::cut_value`],
/// which always takes the period.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Threshold {
    Fixed(f64),
    /// Indexed by [`Period::index`].
    PerPeriod([f64; Period::ALL.len()]),
}

/// Named operating point of a tagger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkingPoint {
    /// Working point name (`Standard`, `BkgEff0p010`, ...).
    pub name: String,
    /// Human-readable label.
    pub label: String,
    threshold: Threshold,
}

impl WorkingPoint {
    /// Working point with one threshold for all periods.
    pub fn fixed(name: impl Into<String>, label: impl Into<String>, cut: f64) -> Self {
        Self { name: name.into(), label: label.into(), threshold: Threshold::Fixed(cut) }
    }

    /// Working point whose threshold depends on the period.
    ///
    /// Every period must have a threshold, so that resolution never fails later.
    pub fn per_period(
        name: impl Into<String>,
        label: impl Into<String>,
        cuts: &[(Period, f64)],
    ) -> Result<Self> {
        let name = name.into();
        let mut values = [f64::NAN; Period::ALL.len()];
        for (period, cut) in cuts {
            values[period.index()] = *cut;
        }
        if let Some(missing) = Period::ALL.iter().find(|p| values[p.index()].is_nan()) {
            return Err(Error::Config(format!(
                "working point '{}' has no threshold for period {}",
                name, missing
            )));
        }
        Ok(Self { name, label: label.into(), threshold: Threshold::PerPeriod(values) })
    }

    /// Threshold in `period`.
    pub fn cut_value(&self, period: Period) -> f64 {
        match &self.threshold {
            Threshold::Fixed(v) => *v,
            Threshold::PerPeriod(values) => values[period.index()],
        }
    }

    /// Whether the threshold differs between periods.
    pub fn is_period_dependent(&self) -> bool {
        matches!(self.threshold, Threshold::PerPeriod(_))
    }
}

/// Reference to a working point in a run configuration: by index or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkingPointKey {
    /// Position in the tagger's working-point list
    Index(usize),
    /// Working point name
    Name(String),
}

impl fmt::Display for WorkingPointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkingPointKey::Index(i) => write!(f, "#{}", i),
            WorkingPointKey::Name(n) => f.write_str(n),
        }
    }
}

impl FromStr for WorkingPointKey {
    type Err = Error;

    /// A bare number is an index, anything else a name.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("empty working point".into()));
        }
        Ok(match s.parse::<usize>() {
            Ok(i) => WorkingPointKey::Index(i),
            Err(_) => WorkingPointKey::Name(s.to_string()),
        })
    }
}

/// What kind of jet the tagger identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaggerKind {
    /// Hadronic top quark
    Top,
    /// Hadronic W boson
    W,
}

/// Variable whose distribution is fitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitVariable {
    /// Histogram name of the variable.
    pub name: String,
    /// Merge bins without simulated content before fitting.
    pub remove_empty_bins: bool,
}

/// A jet-tagging definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tagger {
    /// Tagger name (`hotvr_t__tau`).
    pub name: String,
    /// Jet kind.
    pub kind: TaggerKind,
    /// Human-readable label.
    pub label: String,
    /// Discriminating variable.
    pub discriminant: String,
    /// Selection rule with `{discriminant}` and `{cut}` placeholders.
    pub selection_template: String,
    /// Fitted variable.
    pub fit_variable: FitVariable,
    working_points: Vec<WorkingPoint>,
    intervals: Vec<VarInterval>,
}

impl Tagger {
    /// Create a tagger, validating working points and intervals.
    pub fn new(
        name: impl Into<String>,
        kind: TaggerKind,
        label: impl Into<String>,
        discriminant: impl Into<String>,
        selection_template: impl Into<String>,
        fit_variable: FitVariable,
        working_points: Vec<WorkingPoint>,
        intervals: Vec<VarInterval>,
    ) -> Result<Self> {
        let name = name.into();
        let selection_template = selection_template.into();
        if !selection_template.contains("{cut}") {
            return Err(Error::Config(format!(
                "tagger '{}': selection template has no {{cut}} placeholder",
                name
            )));
        }
        if working_points.is_empty() {
            return Err(Error::Config(format!("tagger '{}' has no working points", name)));
        }
        for (i, wp) in working_points.iter().enumerate() {
            if working_points[..i].iter().any(|o| o.name == wp.name) {
                return Err(Error::Config(format!(
                    "tagger '{}': duplicate working point '{}'",
                    name, wp.name
                )));
            }
        }
        if !intervals.iter().any(|iv| iv.fit) {
            return Err(Error::Config(format!("tagger '{}' has no fit intervals", name)));
        }
        if intervals.iter().filter(|iv| iv.total_range).count() > 1 {
            return Err(Error::Config(format!("tagger '{}' has several total-range intervals", name)));
        }
        Ok(Self {
            name,
            kind,
            label: label.into(),
            discriminant: discriminant.into(),
            selection_template,
            fit_variable,
            working_points,
            intervals,
        })
    }

    /// All working points in declaration order.
    pub fn working_points(&self) -> &[WorkingPoint] {
        &self.working_points
    }

    /// Look up a working point by index or name.
    pub fn working_point(&self, key: &WorkingPointKey) -> Result<&WorkingPoint> {
        let found = match key {
            WorkingPointKey::Index(i) => self.working_points.get(*i),
            WorkingPointKey::Name(n) => self.working_points.iter().find(|wp| &wp.name == n),
        };
        found.ok_or_else(|| {
            Error::Config(format!("tagger '{}' has no working point {}", self.name, key))
        })
    }

    /// All intervals, fit and non-fit.
    pub fn intervals(&self) -> &[VarInterval] {
        &self.intervals
    }

    /// Intervals used for fit templates.
    pub fn fit_intervals(&self) -> impl Iterator<Item = &VarInterval> {
        self.intervals.iter().filter(|iv| iv.fit)
    }

    /// The full-range aggregate interval, if declared.
    pub fn total_interval(&self) -> Option<&VarInterval> {
        self.intervals.iter().find(|iv| iv.total_range)
    }

    /// Render the selection rule for a working point in a period.
    pub fn selection(&self, wp: &WorkingPoint, period: Period) -> String {
        self.selection_template
            .replace("{discriminant}", &self.discriminant)
            .replace("{cut}", &wp.cut_value(period).to_string())
    }

    /// Whether `split` is a valid merge-scenario split for this tagger.
    pub fn accepts(&self, split: MergeSplit) -> bool {
        match self.kind {
            TaggerKind::Top => matches!(split, MergeSplit::Top3 | MergeSplit::Top4),
            TaggerKind::W => matches!(split, MergeSplit::W2),
        }
    }
}
