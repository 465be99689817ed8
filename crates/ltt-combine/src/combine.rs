//! Command lines of the Combine tool chain for one task.
//!
//! The chain is sequential: `text2workspace.py` builds the workspace with the
//! multi-signal physics model, a regular `MultiDimFit` saves the fit result and a
//! snapshot, and a second `MultiDimFit` starts from that snapshot with every
//! constrained nuisance frozen.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::enumerate::Enumeration;
use crate::task::FitTask;

/// Physics model mapping processes to POIs.
pub const PHYSICS_MODEL: &str = "HiggsAnalysis.CombinedLimit.PhysicsModel:multiSignalModel";
/// Snapshot saved by the regular fit.
pub const SNAPSHOT: &str = "MultiDimFit";

/// An external program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalCommand {
    /// Short label for logs.
    pub label: String,
    /// Program name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub workdir: PathBuf,
}

impl ExternalCommand {
    /// New command run in `workdir`.
    pub fn new(label: impl Into<String>, program: impl Into<String>, workdir: &Path) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.to_path_buf(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Shell rendering, for logs and scripts.
    pub fn to_shell(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `std::process::Command` ready to spawn.
    pub fn to_process(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.workdir);
        cmd
    }
}

fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain { s.to_string() } else { format!("'{}'", s.replace('\'', r"'\''")) }
}

/// The three steps of one fit.
#[derive(Debug, Clone, Serialize)]
pub struct CombineCommands {
    /// Datacard to workspace conversion.
    pub text2workspace: ExternalCommand,
    /// Regular fit.
    pub regular_fit: ExternalCommand,
    /// Refit with constrained nuisances frozen.
    pub frozen_fit: ExternalCommand,
    /// Workspace file.
    pub workspace: PathBuf,
    /// Output file of the regular fit (fit result + snapshot).
    pub regular_output: PathBuf,
    /// Output file of the frozen fit.
    pub frozen_output: PathBuf,
}

impl CombineCommands {
    /// Commands for `task`, run in the task output directory.
    pub fn for_task(task: &FitTask, enumeration: &Enumeration) -> Self {
        let dir = &task.output_dir;
        let name = task.file_stem();
        let workspace = format!("{}.root", name);
        let regular_tag = format!(".{}.regular", name);
        let frozen_tag = format!(".{}.frozen", name);
        let regular_output = format!("higgsCombine{}.MultiDimFit.mH120.root", regular_tag);

        let pois: Vec<String> = enumeration.active_pois().map(|p| p.name()).collect();
        let set_parameters =
            pois.iter().map(|p| format!("{}=1", p)).collect::<Vec<_>>().join(",");
        let redefine = pois.join(",");

        let mut text2workspace = ExternalCommand::new("text2workspace", "text2workspace.py", dir)
            .arg(task.datacard_file())
            .args(["-o", workspace.as_str(), "-P", PHYSICS_MODEL, "--PO", "verbose"]);
        for map in enumeration.physics_model_maps() {
            text2workspace = text2workspace.arg("--PO").arg(map);
        }

        let regular_fit = ExternalCommand::new("fit-regular", "combine", dir)
            .args(["-M", "MultiDimFit", workspace.as_str()])
            .args(["-n", regular_tag.as_str()])
            .args(["--algo", "singles", "--saveFitResult", "--saveWorkspace"])
            .args(["--redefineSignalPOIs", redefine.as_str()])
            .args(["--setParameters", set_parameters.as_str()])
            .args(["--robustFit", "1"]);

        let frozen_fit = ExternalCommand::new("fit-frozen", "combine", dir)
            .args(["-M", "MultiDimFit", regular_output.as_str()])
            .args(["-n", frozen_tag.as_str()])
            .args(["--algo", "singles", "--saveFitResult"])
            .args(["--snapshotName", SNAPSHOT])
            .args(["--freezeParameters", "allConstrainedNuisances"])
            .args(["--redefineSignalPOIs", redefine.as_str()])
            .args(["--robustFit", "1"]);

        Self {
            text2workspace,
            regular_fit,
            frozen_fit,
            workspace: dir.join(workspace),
            regular_output: dir.join(regular_output),
            frozen_output: dir.join(format!("higgsCombine{}.MultiDimFit.mH120.root", frozen_tag)),
        }
    }

    /// The chain in execution order.
    pub fn chain(&self) -> Vec<ExternalCommand> {
        vec![self.text2workspace.clone(), self.regular_fit.clone(), self.frozen_fit.clone()]
    }

    /// Shell script running the chain, stopping at the first failure.
    pub fn to_script(&self) -> String {
        let mut out = String::from("#!/bin/sh\nset -e\n");
        for cmd in self.chain() {
            out.push_str(&format!("cd {}\n", shell_quote(&cmd.workdir.display().to_string())));
            out.push_str(&cmd.to_shell());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, MergeSplit, WorkingPointKey};
    use crate::enumerate::CategoryEnumerator;
    use crate::task::FitTaskConfig;
    use ltt_core::{DetectionChannel, Period};

    fn commands() -> CombineCommands {
        let task = FitTaskConfig::new(
            "hotvr_t__tau",
            WorkingPointKey::Name("Standard".into()),
            &[Period::Ul18],
            MergeSplit::Top3,
        )
        .with_channels(&[DetectionChannel::Muon])
        .with_intervals(&["pt_300to400"])
        .with_output_dir("out")
        .resolve(&Catalog::standard().unwrap())
        .unwrap();
        let en = CategoryEnumerator::new().enumerate(&task).unwrap();
        CombineCommands::for_task(&task, &en)
    }

    #[test]
    fn text2workspace_maps_every_signal_process() {
        let c = commands();
        let t2w = &c.text2workspace;
        assert_eq!(t2w.program, "text2workspace.py");
        assert!(t2w.args[0].starts_with("hotvr_t__tau-Standard-top3-"));
        assert!(t2w.args[0].ends_with(".txt"));
        let maps: Vec<&String> = t2w.args.iter().filter(|a| a.starts_with("map=")).collect();
        assert_eq!(maps.len(), 6);
        assert!(t2w.args.contains(&PHYSICS_MODEL.to_string()));
    }

    #[test]
    fn frozen_fit_starts_from_regular_snapshot() {
        let c = commands();
        let f = &c.frozen_fit;
        assert!(f.args.contains(&"allConstrainedNuisances".to_string()));
        assert!(f.args.contains(&SNAPSHOT.to_string()));
        let input = &f.args[2];
        assert_eq!(c.regular_output, PathBuf::from("out").join(input));
        assert!(c.regular_fit.args.contains(&"--saveWorkspace".to_string()));
    }

    #[test]
    fn shell_rendering_quotes_when_needed() {
        let cmd = ExternalCommand::new("x", "echo", Path::new("."))
            .arg("map=.*/TTbar:r[1,0,5]")
            .arg("plain");
        assert_eq!(cmd.to_shell(), "echo 'map=.*/TTbar:r[1,0,5]' plain");
        assert!(commands().to_script().starts_with("#!/bin/sh\nset -e\n"));
    }
}
