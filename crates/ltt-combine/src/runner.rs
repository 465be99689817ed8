//! Running external commands.
//!
//! Independent commands are fanned out over a bounded rayon pool; the only shared
//! state is a progress counter. Failures are recorded, never retried.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use ltt_core::{Error, Result};
use rayon::prelude::*;
use serde::Serialize;

use crate::combine::ExternalCommand;

/// What happened to one command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    /// Command label.
    pub label: String,
    /// Shell rendering of the command.
    pub command: String,
    /// Exit code, if the process ran to completion.
    pub exit_code: Option<i32>,
    /// Spawn or wait error.
    pub error: Option<String>,
    /// Wall time in seconds.
    pub wall_s: f64,
}

impl JobOutcome {
    /// Zero exit status.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

fn run_one(cmd: &ExternalCommand) -> JobOutcome {
    let start = Instant::now();
    log::debug!("running [{}] {}", cmd.label, cmd.to_shell());
    let (exit_code, error) = match cmd.to_process().status() {
        Ok(status) => (status.code(), None),
        Err(e) => (None, Some(format!("failed to start '{}': {}", cmd.program, e))),
    };
    let outcome = JobOutcome {
        label: cmd.label.clone(),
        command: cmd.to_shell(),
        exit_code,
        error,
        wall_s: start.elapsed().as_secs_f64(),
    };
    if !outcome.success() {
        log::warn!(
            "[{}] failed (exit code {:?}{})",
            outcome.label,
            outcome.exit_code,
            outcome.error.as_deref().map(|e| format!(", {}", e)).unwrap_or_default()
        );
    }
    outcome
}

/// Run independent commands on `threads` workers (0 = rayon default).
///
/// Outcomes are returned in input order.
pub fn run_commands(jobs: &[ExternalCommand], threads: usize) -> Result<Vec<JobOutcome>> {
    let done = AtomicUsize::new(0);
    let total = jobs.len();
    let run_all = || -> Vec<JobOutcome> {
        jobs.par_iter()
            .map(|cmd| {
                let outcome = run_one(cmd);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                log::info!("[{}/{}] {} finished", n, total, cmd.label);
                outcome
            })
            .collect()
    };
    let outcomes = if threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::Validation(format!("failed to create thread pool: {e}")))?;
        pool.install(run_all)
    } else {
        run_all()
    };
    let failed = outcomes.iter().filter(|o| !o.success()).count();
    if failed > 0 {
        log::warn!("{} of {} commands failed", failed, total);
    }
    Ok(outcomes)
}

/// Run dependent commands in order, stopping after the first failure.
pub fn run_chain(jobs: &[ExternalCommand]) -> Vec<JobOutcome> {
    let mut outcomes = Vec::with_capacity(jobs.len());
    for cmd in jobs {
        let outcome = run_one(cmd);
        let ok = outcome.success();
        outcomes.push(outcome);
        if !ok {
            log::warn!("stopping chain after [{}]", cmd.label);
            break;
        }
    }
    outcomes
}
