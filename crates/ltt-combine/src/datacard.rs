//! Combine datacard emission.
//!
//! Block order: header, shapes directive, observation, process grid, lnN rows,
//! shape rows, `autoMCStats`. Columns are exactly the active cells, in
//! enumeration order; skipped cells appear in no row.

use ltt_core::{Error, Result};

use crate::enumerate::{Cell, Enumeration};
use crate::nuisance::{applies, nuisance_name};
use crate::task::FitTask;

const SEPARATOR_WIDTH: usize = 100;
const MISSING: &str = "-";

/// One uncertainty row.
#[derive(Debug, Clone, PartialEq)]
struct Row {
    name: String,
    kind: &'static str,
    cells: Vec<String>,
}

/// Renders the datacard of one task from its (skip-applied) enumeration.
pub struct DatacardWriter<'a> {
    task: &'a FitTask,
    enumeration: &'a Enumeration,
}

impl<'a> DatacardWriter<'a> {
    /// Writer for `task`.
    pub fn new(task: &'a FitTask, enumeration: &'a Enumeration) -> Self {
        Self { task, enumeration }
    }

    /// Datacard text; `shapes_file` is the path of the staged templates as seen
    /// from the datacard.
    pub fn render(&self, shapes_file: &str) -> Result<String> {
        let active_channels = self.enumeration.active_channels();
        if active_channels.is_empty() {
            return Err(Error::Validation(format!(
                "{}: every cell was skipped, nothing to fit",
                self.task.name()
            )));
        }
        let cells: Vec<Cell<'_>> = self.enumeration.active_cells().collect();
        let separator = "-".repeat(SEPARATOR_WIDTH);

        let mut lines = vec![
            format!("# {} (ltt {})", self.task.name(), ltt_core::VERSION),
            "imax * number of channels".to_string(),
            "jmax * number of processes minus 1".to_string(),
            "kmax * number of nuisance parameters".to_string(),
            separator.clone(),
            format!("shapes * * {} $CHANNEL/$PROCESS $CHANNEL/$PROCESS_$SYSTEMATIC", shapes_file),
            separator.clone(),
        ];

        let channel_names: Vec<String> =
            active_channels.iter().map(|&ci| self.enumeration.channels[ci].name()).collect();
        let observation = vec!["-1".to_string(); channel_names.len()];
        lines.extend(table(&[("bin", "", &channel_names), ("observation", "", &observation)]));
        lines.push(separator.clone());

        let bins: Vec<String> = cells.iter().map(|c| c.channel.name()).collect();
        let names: Vec<String> = cells.iter().map(Cell::fit_name).collect();
        let ids: Vec<String> = cells.iter().map(|c| c.combine_id().to_string()).collect();
        let rates = vec!["-1".to_string(); cells.len()];
        lines.extend(table(&[
            ("bin", "", &bins),
            ("process", "", &names),
            ("process", "", &ids),
            ("rate", "", &rates),
        ]));
        lines.push(separator);

        let rows = self.uncertainty_rows(&cells);
        let rows: Vec<(&str, &str, &Vec<String>)> =
            rows.iter().map(|r| (r.name.as_str(), r.kind, &r.cells)).collect();
        lines.extend(table(&rows));
        lines.push("* autoMCStats 0 1 1".to_string());

        let mut out = lines.join("\n");
        out.push('\n');
        Ok(out)
    }

    fn uncertainty_rows(&self, cells: &[Cell<'_>]) -> Vec<Row> {
        let mut rows = Vec::new();

        for &period in &self.task.periods {
            if !cells.iter().any(|c| c.channel.period == period) {
                continue;
            }
            let value = format!("{:.3}", 1.0 + period.lumi_uncertainty());
            rows.push(Row {
                name: format!("lumi{}", period),
                kind: "lnN",
                cells: cells
                    .iter()
                    .map(|c| if c.channel.period == period { value.clone() } else { MISSING.into() })
                    .collect(),
            });
        }

        for base in &self.task.processes {
            let Some(unc) = base.xsec_uncertainty else { continue };
            if !cells.iter().any(|c| c.process.base == base.name) {
                continue;
            }
            let value = format!("{:.3}", 1.0 + unc);
            rows.push(Row {
                name: format!("xsec{}", base.name),
                kind: "lnN",
                cells: cells
                    .iter()
                    .map(|c| if c.process.base == base.name { value.clone() } else { MISSING.into() })
                    .collect(),
            });
        }

        for syst in self.task.systematics.fit_systematics() {
            let names: Vec<Option<String>> = cells
                .iter()
                .map(|c| applies(syst, c).then(|| nuisance_name(syst, c)))
                .collect();
            let mut seen: Vec<&String> = Vec::new();
            for name in names.iter().flatten() {
                if seen.contains(&name) {
                    continue;
                }
                seen.push(name);
                rows.push(Row {
                    name: name.clone(),
                    kind: "shape",
                    cells: names
                        .iter()
                        .map(|n| if n.as_ref() == Some(name) { "1.0".into() } else { MISSING.into() })
                        .collect(),
                });
            }
        }
        rows
    }
}

/// Lines `name kind cell cell ...` with every column padded to its widest entry.
fn table(rows: &[(&str, &str, &Vec<String>)]) -> Vec<String> {
    let name_width = rows.iter().map(|r| r.0.len()).max().unwrap_or(0);
    let kind_width = rows.iter().map(|r| r.1.len()).max().unwrap_or(0);
    let n_cols = rows.iter().map(|r| r.2.len()).max().unwrap_or(0);
    let widths: Vec<usize> = (0..n_cols)
        .map(|i| rows.iter().filter_map(|r| r.2.get(i)).map(String::len).max().unwrap_or(0))
        .collect();
    rows.iter()
        .map(|(name, kind, cells)| {
            let mut line =
                format!("{:<nw$} {:<kw$}", name, kind, nw = name_width, kw = kind_width);
            for (cell, w) in cells.iter().zip(&widths) {
                line.push_str("  ");
                line.push_str(&format!("{:<w$}", cell, w = *w));
            }
            line.trim_end().to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, MergeSplit, SystematicsFilter, WorkingPointKey};
    use crate::enumerate::{CategoryEnumerator, CellKey};
    use crate::stage::{SkipReason, SkippedCell, StagingReport};
    use crate::task::FitTaskConfig;
    use ltt_core::{DetectionChannel, Period};

    fn setup(whitelist: &[&str]) -> (FitTask, Enumeration) {
        let task = FitTaskConfig::new(
            "hotvr_t__tau",
            WorkingPointKey::Name("Standard".into()),
            &[Period::Ul17, Period::Ul18],
            MergeSplit::Top3,
        )
        .with_channels(&[DetectionChannel::Muon])
        .with_intervals(&["pt_200to250"])
        .with_systematics(SystematicsFilter {
            whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
            blacklist: vec![],
        })
        .resolve(&Catalog::standard().unwrap())
        .unwrap();
        let en = CategoryEnumerator::new().enumerate(&task).unwrap();
        (task, en)
    }

    fn row<'a>(card: &'a str, name: &str) -> Vec<&'a str> {
        card.lines()
            .find(|l| l.split_whitespace().next() == Some(name))
            .unwrap_or_else(|| panic!("no row {}", name))
            .split_whitespace()
            .collect()
    }

    #[test]
    fn block_layout() {
        let (task, en) = setup(&["pileup"]);
        let card = DatacardWriter::new(&task, &en).render("shapes.json").unwrap();
        let lines: Vec<&str> = card.lines().collect();
        assert!(lines[1].starts_with("imax *"));
        assert!(lines[2].starts_with("jmax *"));
        assert!(lines[3].starts_with("kmax *"));
        assert_eq!(
            lines[5],
            "shapes * * shapes.json $CHANNEL/$PROCESS $CHANNEL/$PROCESS_$SYSTEMATIC"
        );
        assert_eq!(*lines.last().unwrap(), "* autoMCStats 0 1 1");

        // 2 periods × 2 regions channels, 10 processes each.
        assert_eq!(row(&card, "observation").len(), 1 + 4);
        assert_eq!(row(&card, "rate").len(), 1 + 40);
    }

    #[test]
    fn lnn_rows_match_period_and_process() {
        let (task, en) = setup(&["pileup"]);
        let card = DatacardWriter::new(&task, &en).render("s.json").unwrap();

        let lumi17 = row(&card, "lumiUL17");
        assert_eq!(lumi17[1], "lnN");
        assert_eq!(lumi17[2..].iter().filter(|c| **c == "1.023").count(), 20);
        assert_eq!(lumi17[2..].iter().filter(|c| **c == "-").count(), 20);

        let qcd = row(&card, "xsecQCD");
        assert_eq!(qcd[2..].iter().filter(|c| **c == "2.000").count(), 4);
        assert!(card.lines().all(|l| !l.starts_with("xsecTTbar")));

        let pileup = row(&card, "pileup");
        assert_eq!(pileup[1], "shape");
        assert!(pileup[2..].iter().all(|c| *c == "1.0"));
    }

    #[test]
    fn skipped_cells_vanish_from_every_row() {
        let (task, mut en) = setup(&["pileup"]);
        let report = StagingReport {
            skipped: vec![SkippedCell {
                cell: CellKey { channel: 0, process: 9 },
                channel: en.channels[0].name(),
                process: "QCD".into(),
                reason: SkipReason::EmptyNominal { integral: 0.0 },
            }],
            ..StagingReport::default()
        };
        en.apply_skips(&report).unwrap();
        let card = DatacardWriter::new(&task, &en).render("s.json").unwrap();
        for name in ["bin", "rate", "lumiUL17", "lumiUL18", "pileup"] {
            // The first "bin" row is the observation block.
            let cols = card
                .lines()
                .rfind(|l| l.split_whitespace().next() == Some(name))
                .unwrap()
                .split_whitespace()
                .count();
            let expected = if matches!(name, "bin" | "rate") { 1 + 39 } else { 2 + 39 };
            assert_eq!(cols, expected, "row {}", name);
        }
        assert_eq!(row(&card, "xsecQCD")[2..].iter().filter(|c| **c == "2.000").count(), 3);
    }

    #[test]
    fn lumi_row_needs_an_active_cell_of_its_period() {
        let (task, mut en) = setup(&["pileup"]);
        let skipped = en
            .cells()
            .filter(|c| c.channel.period == Period::Ul18)
            .map(|c| SkippedCell {
                cell: c.key,
                channel: c.channel.name(),
                process: c.fit_name(),
                reason: SkipReason::EmptyNominal { integral: 0.0 },
            })
            .collect();
        let report = StagingReport { skipped, ..StagingReport::default() };
        en.apply_skips(&report).unwrap();
        let card = DatacardWriter::new(&task, &en).render("s.json").unwrap();
        assert!(card.lines().all(|l| !l.starts_with("lumiUL18")));
        let lumi17 = row(&card, "lumiUL17");
        assert!(lumi17[2..].iter().all(|c| *c == "1.023"));
        assert!(card.ends_with("* autoMCStats 0 1 1\n"));
    }

    #[test]
    fn uncorrelated_systematics_get_one_row_per_period() {
        let (task, en) = setup(&["jes", "isr"]);
        let card = DatacardWriter::new(&task, &en).render("s.json").unwrap();
        let jes17 = row(&card, "jes_UL17");
        assert_eq!(jes17[2..].iter().filter(|c| **c == "1.0").count(), 20);
        row(&card, "jes_UL18");
        for base in ["TTbar", "ST", "WJetsToLNu", "DYJetsToLL", "Diboson", "QCD"] {
            row(&card, &format!("isr_{}", base));
        }
    }

    #[test]
    fn process_ids_are_written_per_cell() {
        let (task, en) = setup(&["pileup"]);
        let card = DatacardWriter::new(&task, &en).render("s.json").unwrap();
        let id_row = card
            .lines()
            .filter(|l| l.starts_with("process"))
            .nth(1)
            .unwrap()
            .split_whitespace()
            .skip(1)
            .map(|s| s.parse::<i64>().unwrap())
            .collect::<Vec<_>>();
        let expected: Vec<i64> = en.cells().map(|c| c.combine_id()).collect();
        assert_eq!(id_row, expected);
    }
}
