//! Empty-bin removal for fit templates.

use ltt_core::{Error, Result};

/// Coarsen `edges` until every bin of the summed simulation has positive content.
///
/// `totals[i]` is the summed nominal content of fine bin `i`. A bin with
/// non-positive content is merged into its upper neighbour by dropping its upper
/// edge; the last bin is merged into the previous one instead, so the outer
/// edges never move. The result is a subset of `edges` and a fixed point: feeding
/// the totals regrouped by the result back in returns the same edges.
pub fn merge_empty_bins(edges: &[f64], totals: &[f64]) -> Result<Vec<f64>> {
    if edges.len() != totals.len() + 1 || totals.is_empty() {
        return Err(Error::Histogram(format!(
            "{} edges do not describe {} bins",
            edges.len(),
            totals.len()
        )));
    }
    let mut current = edges.to_vec();
    loop {
        let grouped = group_totals(edges, totals, &current)?;
        let next = coarsen_once(&current, &grouped);
        if next.len() == current.len() {
            return Ok(current);
        }
        log::debug!("coarsened binning from {} to {} bins", current.len() - 1, next.len() - 1);
        current = next;
    }
}

/// Sum fine-bin totals into the bins of `coarse` (a subset of `fine`).
fn group_totals(fine: &[f64], totals: &[f64], coarse: &[f64]) -> Result<Vec<f64>> {
    let mut out = vec![0.0; coarse.len().saturating_sub(1)];
    let mut bin = 0usize;
    for (i, &t) in totals.iter().enumerate() {
        while bin + 1 < out.len() && fine[i] >= coarse[bin + 1] {
            bin += 1;
        }
        match out.get_mut(bin) {
            Some(slot) => *slot += t,
            None => return Err(Error::Histogram("coarse binning has no bins".into())),
        }
    }
    Ok(out)
}

fn coarsen_once(edges: &[f64], totals: &[f64]) -> Vec<f64> {
    let n = totals.len();
    if n <= 1 {
        return edges.to_vec();
    }
    let mut out = vec![edges[0]];
    let mut acc = 0.0;
    for (i, &t) in totals.iter().enumerate() {
        acc += t;
        if i + 1 < n {
            if acc > 0.0 {
                out.push(edges[i + 1]);
                acc = 0.0;
            }
        } else {
            if acc <= 0.0 && out.len() > 1 {
                out.pop();
            }
            out.push(edges[n]);
        }
    }
    out
}
