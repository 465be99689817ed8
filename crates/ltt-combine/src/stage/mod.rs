//! Template staging: read upstream histograms for every enumerated cell and
//! write the rebinned, clipped templates under the names the datacard expects.
//!
//! Recoverable anomalies never abort staging. Missing variation inputs fall back
//! to the nominal histogram and cells with a non-positive template are skipped;
//! both are logged and recorded in the returned [`StagingReport`].

pub mod binning;
pub mod layout;

use std::path::Path;

use ltt_core::{Error, Result};
use ltt_hist::{Histogram, HistogramPath, HistogramSink, HistogramSource, envelope};
use serde::{Deserialize, Serialize};

use crate::catalog::Variation;
use crate::enumerate::{Cell, CellKey, CombineChannel, Enumeration};
use crate::nuisance::{applies, nuisance_name, shifted_name};
use crate::task::{FitTask, ObservationMode};

pub use binning::merge_empty_bins;
pub use layout::{DATA_SAMPLE, InputLayout, LayoutFields, PLACEHOLDERS};

/// Name of the observation histogram in every channel directory.
pub const DATA_OBS: &str = "data_obs";

/// Bin edges chosen for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBinning {
    /// Index into [`Enumeration::channels`].
    pub channel: usize,
    /// Channel name.
    pub name: String,
    /// Edges after empty-bin removal.
    pub edges: Vec<f64>,
}

/// Why a cell was left out of the fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Nominal template integral is not positive
    EmptyNominal {
        /// Integral after rebinning and clipping.
        integral: f64,
    },
    /// A variation template integral is not positive
    EmptyVariation {
        /// Offending variation (or envelope output).
        variation: String,
        /// Its integral.
        integral: f64,
    },
}

/// A cell left out of the fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCell {
    /// Position in the enumeration.
    pub cell: CellKey,
    /// Channel name.
    pub channel: String,
    /// Process name in the channel.
    pub process: String,
    /// Reason.
    pub reason: SkipReason,
}

/// A variation replaced by the nominal histogram because its input is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallback {
    /// Channel name.
    pub channel: String,
    /// Upstream sample name.
    pub process: String,
    /// Variation name.
    pub variation: String,
}

/// Everything staging decided that later steps must know about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingReport {
    /// Bin edges per channel.
    pub binnings: Vec<ChannelBinning>,
    /// Skipped cells.
    pub skipped: Vec<SkippedCell>,
    /// Variations that fell back to nominal.
    pub fallbacks: Vec<Fallback>,
    /// Bins clipped from negative content to zero.
    pub clipped_bins: usize,
    /// Histograms written.
    pub written: usize,
}

/// Stages the templates of one fit task.
pub struct TemplateStager<'a, S: HistogramSource + ?Sized> {
    task: &'a FitTask,
    source: &'a S,
}

impl<'a, S: HistogramSource + ?Sized> TemplateStager<'a, S> {
    /// Stager reading from `source`.
    pub fn new(task: &'a FitTask, source: &'a S) -> Self {
        Self { task, source }
    }

    /// Stage every channel of `enumeration` into `output_file` and flush `sink`.
    pub fn stage<W: HistogramSink + ?Sized>(
        &self,
        enumeration: &Enumeration,
        sink: &mut W,
        output_file: &Path,
    ) -> Result<StagingReport> {
        let mut report = StagingReport::default();
        for (ci, channel) in enumeration.channels.iter().enumerate() {
            self.stage_channel(ci, channel, enumeration, sink, output_file, &mut report)?;
        }
        sink.flush()?;
        log::info!(
            "staged {} histograms into {} ({} skipped cells, {} fallbacks, {} clipped bins)",
            report.written,
            output_file.display(),
            report.skipped.len(),
            report.fallbacks.len(),
            report.clipped_bins
        );
        Ok(report)
    }

    fn fields(&self, channel: &CombineChannel) -> LayoutFields {
        LayoutFields {
            period: channel.period.to_string(),
            channel: channel.channel.to_string(),
            tagger: self.task.tagger.name.clone(),
            wp: self.task.working_point.name.clone(),
            region: channel.region.to_string(),
            interval: channel.interval.name(),
            fit_variable: self.task.tagger.fit_variable.name.clone(),
        }
    }

    fn read_required(&self, path: &HistogramPath) -> Result<Histogram> {
        self.source
            .read(path)?
            .ok_or_else(|| Error::MissingInput(format!("nominal histogram {}", path)))
    }

    fn binning(&self, channel: &str, nominals: &[Histogram]) -> Result<Vec<f64>> {
        let Some(first) = nominals.first() else {
            return Err(Error::Validation(format!("channel {} has no processes", channel)));
        };
        if let Some(odd) = nominals.iter().find(|h| !h.same_binning(first)) {
            return Err(Error::Histogram(format!(
                "{}: '{}' and '{}' have different binnings",
                channel, first.name, odd.name
            )));
        }
        if !self.task.tagger.fit_variable.remove_empty_bins {
            return Ok(first.bin_edges.clone());
        }
        let mut totals = vec![0.0; first.n_bins()];
        for h in nominals {
            for (t, c) in totals.iter_mut().zip(&h.bin_content) {
                *t += c;
            }
        }
        let edges = merge_empty_bins(&first.bin_edges, &totals)?;
        if edges.len() < first.bin_edges.len() {
            log::debug!(
                "{}: removed {} empty bins",
                channel,
                first.bin_edges.len() - edges.len()
            );
        }
        Ok(edges)
    }

    fn prepare(&self, hist: &Histogram, edges: &[f64], report: &mut StagingReport) -> Result<Histogram> {
        let mut h = hist.rebin(edges)?;
        report.clipped_bins += h.clip_negative_bins();
        Ok(h)
    }

    fn stage_channel<W: HistogramSink + ?Sized>(
        &self,
        ci: usize,
        channel: &CombineChannel,
        enumeration: &Enumeration,
        sink: &mut W,
        output_file: &Path,
        report: &mut StagingReport,
    ) -> Result<()> {
        let layout = &self.task.input;
        let fields = self.fields(channel);
        let channel_name = channel.name();

        let raw_nominals = enumeration
            .processes
            .iter()
            .map(|p| {
                let path = layout.path(&fields, &p.sample_name(), &Variation::nominal());
                self.read_required(&path)
            })
            .collect::<Result<Vec<_>>>()?;
        let observed = match self.task.observation {
            ObservationMode::Data => {
                let path = layout.path(&fields, DATA_SAMPLE, &Variation::nominal());
                Some(self.read_required(&path)?)
            }
            ObservationMode::Asimov => None,
        };

        let edges = self.binning(&channel_name, &raw_nominals)?;
        report.binnings.push(ChannelBinning {
            channel: ci,
            name: channel_name.clone(),
            edges: edges.clone(),
        });

        let mut asimov = Histogram::zeros(DATA_OBS, edges.clone())?;
        for (pi, (process, raw)) in enumeration.processes.iter().zip(&raw_nominals).enumerate() {
            let cell = Cell { key: CellKey { channel: ci, process: pi }, channel, process };
            let fit_name = cell.fit_name();
            let sample = process.sample_name();
            let nominal = self.prepare(raw, &edges, report)?;

            let mut skip = (nominal.integral() <= 0.0)
                .then(|| SkipReason::EmptyNominal { integral: nominal.integral() });
            let mut shifted = Vec::new();

            for syst in self.task.systematics.fit_systematics() {
                if !applies(syst, &cell) {
                    continue;
                }
                let mut variations = Vec::with_capacity(syst.variations.len());
                for v in syst.all_variations() {
                    let path = layout.path(&fields, &sample, &v);
                    let hist = match self.source.read(&path)? {
                        Some(h) => h,
                        None => {
                            log::warn!(
                                "{}: no input for {} / {}, using nominal",
                                channel_name,
                                sample,
                                v.name
                            );
                            report.fallbacks.push(Fallback {
                                channel: channel_name.clone(),
                                process: sample.clone(),
                                variation: v.name.clone(),
                            });
                            raw.clone()
                        }
                    };
                    let h = self.prepare(&hist, &edges, report)?;
                    if skip.is_none() && h.integral() <= 0.0 {
                        skip = Some(SkipReason::EmptyVariation {
                            variation: v.name.clone(),
                            integral: h.integral(),
                        });
                    }
                    variations.push(h);
                }

                let (up, down) = if syst.envelope {
                    envelope(&nominal, &variations)?
                } else {
                    match variations.as_slice() {
                        [up, down] => (up.clone(), down.clone()),
                        _ => {
                            return Err(Error::Validation(format!(
                                "systematic '{}' does not have exactly two variations",
                                syst.name
                            )));
                        }
                    }
                };
                for (label, h) in [("up", &up), ("down", &down)] {
                    if skip.is_none() && h.integral() <= 0.0 {
                        skip = Some(SkipReason::EmptyVariation {
                            variation: format!("{} envelope {}", syst.name, label),
                            integral: h.integral(),
                        });
                    }
                }
                let nuisance = nuisance_name(syst, &cell);
                shifted.push(up.with_name(shifted_name(&fit_name, &nuisance, true)));
                shifted.push(down.with_name(shifted_name(&fit_name, &nuisance, false)));
            }

            if let Some(reason) = skip {
                log::warn!("{}: skipping {} ({:?})", channel_name, fit_name, reason);
                report.skipped.push(SkippedCell {
                    cell: cell.key,
                    channel: channel_name.clone(),
                    process: fit_name,
                    reason,
                });
                continue;
            }

            sink.write(output_file, &channel_name, &nominal.with_name(fit_name.as_str()))?;
            report.written += 1;
            for h in &shifted {
                sink.write(output_file, &channel_name, h)?;
                report.written += 1;
            }
            asimov.add(&nominal)?;
        }

        let data_obs = match observed {
            Some(data) => data.rebin(&edges)?.with_name(DATA_OBS),
            None => asimov,
        };
        sink.write(output_file, &channel_name, &data_obs)?;
        report.written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
