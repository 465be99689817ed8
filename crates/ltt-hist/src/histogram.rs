//! 1D histogram value type used for every template handed to the fitter.

use ltt_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Relative tolerance when matching bin edges between two binnings.
const EDGE_TOLERANCE: f64 = 1e-9;

/// A 1D histogram without under/overflow bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Histogram name.
    pub name: String,
    /// Bin edges (length = n_bins + 1, strictly increasing).
    pub bin_edges: Vec<f64>,
    /// Bin contents (sum of weights per bin).
    pub bin_content: Vec<f64>,
    /// Sum of weights squared per bin.
    pub sumw2: Vec<f64>,
}

impl Histogram {
    /// Create a histogram, checking that edges, contents and sumw2 agree.
    pub fn new(
        name: impl Into<String>,
        bin_edges: Vec<f64>,
        bin_content: Vec<f64>,
        sumw2: Vec<f64>,
    ) -> Result<Self> {
        let name = name.into();
        validate_edges(&bin_edges).map_err(|e| Error::Histogram(format!("'{}': {}", name, e)))?;
        let n_bins = bin_edges.len() - 1;
        if bin_content.len() != n_bins || sumw2.len() != n_bins {
            return Err(Error::Histogram(format!(
                "'{}': {} edges need {} bins, got {} contents and {} sumw2 entries",
                name,
                bin_edges.len(),
                n_bins,
                bin_content.len(),
                sumw2.len()
            )));
        }
        Ok(Self { name, bin_edges, bin_content, sumw2 })
    }

    /// Create an empty histogram with the given binning.
    pub fn zeros(name: impl Into<String>, bin_edges: Vec<f64>) -> Result<Self> {
        let n = bin_edges.len().saturating_sub(1);
        Self::new(name, bin_edges, vec![0.0; n], vec![0.0; n])
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.bin_content.len()
    }

    /// Sum of all bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }

    /// Statistical error of bin `i` (sqrt of sumw2).
    pub fn bin_error(&self, i: usize) -> f64 {
        self.sumw2[i].sqrt()
    }

    /// Return a copy carrying a different name.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self { name: name.into(), ..self.clone() }
    }

    /// Whether `other` has the same bin edges (within tolerance).
    pub fn same_binning(&self, other: &Histogram) -> bool {
        self.bin_edges.len() == other.bin_edges.len()
            && self.bin_edges.iter().zip(&other.bin_edges).all(|(a, b)| edges_match(*a, *b))
    }

    /// Add `other` bin by bin. Both histograms must share the binning.
    pub fn add(&mut self, other: &Histogram) -> Result<()> {
        if !self.same_binning(other) {
            return Err(Error::Histogram(format!(
                "cannot add '{}' to '{}': binning differs",
                other.name, self.name
            )));
        }
        for i in 0..self.n_bins() {
            self.bin_content[i] += other.bin_content[i];
            self.sumw2[i] += other.sumw2[i];
        }
        Ok(())
    }

    /// Merge bins so the histogram ends up with exactly `new_edges`.
    ///
    /// `new_edges` must be an ordered subset of the current edges that keeps both
    /// outer edges. Contents and sumw2 of merged bins are summed.
    pub fn rebin(&self, new_edges: &[f64]) -> Result<Histogram> {
        validate_edges(new_edges)
            .map_err(|e| Error::Histogram(format!("rebinning '{}': {}", self.name, e)))?;
        let first = self.bin_edges[0];
        let last = self.bin_edges[self.bin_edges.len() - 1];
        if !edges_match(new_edges[0], first) || !edges_match(new_edges[new_edges.len() - 1], last)
        {
            return Err(Error::Histogram(format!(
                "rebinning '{}': new range [{}, {}] does not match [{}, {}]",
                self.name,
                new_edges[0],
                new_edges[new_edges.len() - 1],
                first,
                last
            )));
        }

        let n_new = new_edges.len() - 1;
        let mut content = vec![0.0; n_new];
        let mut sumw2 = vec![0.0; n_new];
        let mut target = 0usize;
        let mut matched = 1usize;

        for i in 0..self.n_bins() {
            let lo = self.bin_edges[i];
            while target + 1 < n_new && lo >= new_edges[target + 1] - tolerance(lo) {
                target += 1;
            }
            content[target] += self.bin_content[i];
            sumw2[target] += self.sumw2[i];

            let hi = self.bin_edges[i + 1];
            if matched < new_edges.len() && edges_match(hi, new_edges[matched]) {
                matched += 1;
            }
        }

        if matched != new_edges.len() {
            return Err(Error::Histogram(format!(
                "rebinning '{}': edges {:?} are not a subset of {:?}",
                self.name, new_edges, self.bin_edges
            )));
        }

        Histogram::new(self.name.clone(), new_edges.to_vec(), content, sumw2)
    }

    /// Force every negative bin to zero content and zero error.
    ///
    /// Returns the number of clipped bins.
    pub fn clip_negative_bins(&mut self) -> usize {
        let mut clipped = 0;
        for i in 0..self.n_bins() {
            if self.bin_content[i] < 0.0 {
                self.bin_content[i] = 0.0;
                self.sumw2[i] = 0.0;
                clipped += 1;
            }
        }
        clipped
    }

    /// Set every bin error to zero.
    pub fn zero_errors(&mut self) {
        self.sumw2.iter_mut().for_each(|w| *w = 0.0);
    }
}

/// Bin-wise envelope of a nominal histogram and a family of alternatives.
///
/// Returns `(up, down)` where `up` is the bin-wise maximum and `down` the bin-wise
/// minimum over `{nominal, variations...}`. Envelope errors are exactly zero.
pub fn envelope(nominal: &Histogram, variations: &[Histogram]) -> Result<(Histogram, Histogram)> {
    let mut up = nominal.clone();
    let mut down = nominal.clone();
    for v in variations {
        if !nominal.same_binning(v) {
            return Err(Error::Histogram(format!(
                "envelope of '{}': binning of '{}' differs",
                nominal.name, v.name
            )));
        }
        for i in 0..nominal.n_bins() {
            up.bin_content[i] = up.bin_content[i].max(v.bin_content[i]);
            down.bin_content[i] = down.bin_content[i].min(v.bin_content[i]);
        }
    }
    up.zero_errors();
    down.zero_errors();
    Ok((up, down))
}

fn tolerance(x: f64) -> f64 {
    EDGE_TOLERANCE * x.abs().max(1.0)
}

fn edges_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= tolerance(a.abs().max(b.abs()))
}

fn validate_edges(edges: &[f64]) -> std::result::Result<(), String> {
    if edges.len() < 2 {
        return Err(format!("need at least 2 bin edges, got {}", edges.len()));
    }
    if edges.iter().any(|e| !e.is_finite()) {
        return Err("bin edges must be finite".into());
    }
    if edges.windows(2).any(|w| w[1] <= w[0]) {
        return Err(format!("bin edges must be strictly increasing: {:?}", edges));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn h(content: &[f64]) -> Histogram {
        let edges: Vec<f64> = (0..=content.len()).map(|i| i as f64 * 10.0).collect();
        let sumw2 = content.iter().map(|c| c.abs()).collect();
        Histogram::new("h", edges, content.to_vec(), sumw2).unwrap()
    }

    #[test]
    fn new_rejects_length_mismatch() {
        let err = Histogram::new("bad", vec![0.0, 1.0, 2.0], vec![1.0], vec![1.0]).unwrap_err();
        assert!(matches!(err, Error::Histogram(_)));
    }

    #[test]
    fn new_rejects_unsorted_edges() {
        assert!(Histogram::new("bad", vec![0.0, 2.0, 1.0], vec![1.0, 1.0], vec![1.0, 1.0]).is_err());
    }

    #[test]
    fn rebin_sums_content_and_sumw2() {
        let hist = h(&[1.0, 2.0, 3.0, 4.0]);
        let r = hist.rebin(&[0.0, 20.0, 40.0]).unwrap();
        assert_eq!(r.bin_content, vec![3.0, 7.0]);
        assert_eq!(r.sumw2, vec![3.0, 7.0]);
        assert_relative_eq!(r.integral(), hist.integral());
    }

    #[test]
    fn rebin_to_same_edges_is_identity() {
        let hist = h(&[1.0, -2.0, 3.0]);
        let r = hist.rebin(&hist.bin_edges).unwrap();
        assert_eq!(r, hist);
    }

    #[test]
    fn rebin_rejects_foreign_edges() {
        let hist = h(&[1.0, 2.0, 3.0]);
        assert!(hist.rebin(&[0.0, 15.0, 30.0]).is_err());
        assert!(hist.rebin(&[0.0, 10.0, 20.0]).is_err());
    }

    #[test]
    fn clip_negative_zeroes_content_and_error() {
        let mut hist = h(&[1.0, -2.0, 3.0]);
        assert_eq!(hist.clip_negative_bins(), 1);
        assert_eq!(hist.bin_content, vec![1.0, 0.0, 3.0]);
        assert_eq!(hist.bin_error(1), 0.0);
        assert_relative_eq!(hist.bin_error(2), 3.0f64.sqrt());
    }

    #[test]
    fn envelope_is_binwise_max_min_without_errors() {
        let nominal = h(&[5.0, 5.0, 5.0]);
        let a = h(&[6.0, 4.0, 5.0]);
        let b = h(&[4.5, 7.0, 2.0]);
        let (up, down) = envelope(&nominal, &[a, b]).unwrap();
        assert_eq!(up.bin_content, vec![6.0, 7.0, 5.0]);
        assert_eq!(down.bin_content, vec![4.5, 4.0, 2.0]);
        assert!(up.sumw2.iter().chain(&down.sumw2).all(|&w| w == 0.0));
    }

    #[test]
    fn add_requires_same_binning() {
        let mut a = h(&[1.0, 2.0]);
        let b = h(&[1.0, 2.0, 3.0]);
        assert!(a.add(&b).is_err());
        a.add(&h(&[0.5, 0.5])).unwrap();
        assert_eq!(a.bin_content, vec![1.5, 2.5]);
    }
}
