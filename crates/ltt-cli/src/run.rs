//! `ltt run` orchestration and the files a task leaves in its output directory.

use anyhow::Result;
use ltt_combine::catalog::Catalog;
use ltt_combine::enumerate::{CategoryEnumerator, Enumeration};
use ltt_combine::stage::StagingReport;
use ltt_combine::{CombineCommands, DatacardWriter, FitTask, FitTaskConfig, TemplateStager};
use ltt_hist::JsonStore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Output files of one task, all inside the task output directory.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskPaths {
    pub out_dir: PathBuf,
    pub shapes: PathBuf,
    pub report: PathBuf,
    pub datacard: PathBuf,
    pub script: PathBuf,
    pub manifest: PathBuf,
}

pub fn derive_paths(task: &FitTask) -> TaskPaths {
    let out_dir = task.output_dir.clone();
    let name = task.file_stem();
    TaskPaths {
        shapes: out_dir.join(task.shapes_file()),
        report: out_dir.join(format!("{}.staging.json", name)),
        datacard: out_dir.join(task.datacard_file()),
        script: out_dir.join(format!("{}.sh", name)),
        manifest: out_dir.join(format!("{}.manifest.json", name)),
        out_dir,
    }
}

/// Resolve a run configuration against the standard catalog.
pub fn load_task(config: &FitTaskConfig) -> Result<FitTask> {
    let catalog = Catalog::standard()?;
    let task = config.resolve(&catalog)?;
    tracing::info!(
        task = %task.name(),
        channels = task.periods.len() * task.regions.len() * task.channels.len() * task.intervals.len(),
        "task resolved"
    );
    Ok(task)
}

/// Stage the templates of `task` and store the staging report next to them.
pub fn stage(task: &FitTask, paths: &TaskPaths) -> Result<StagingReport> {
    std::fs::create_dir_all(&paths.out_dir)?;
    let enumeration = CategoryEnumerator::new().enumerate(task)?;
    let source = JsonStore::new(".");
    let mut sink = JsonStore::replacing(&paths.out_dir);
    let shapes_file = PathBuf::from(task.shapes_file());
    let report = TemplateStager::new(task, &source).stage(&enumeration, &mut sink, &shapes_file)?;
    std::fs::write(&paths.report, serde_json::to_string_pretty(&report)?)?;
    tracing::info!(
        written = report.written,
        skipped = report.skipped.len(),
        fallbacks = report.fallbacks.len(),
        "staging complete"
    );
    Ok(report)
}

pub fn read_report(path: &Path) -> Result<StagingReport> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Enumerate `task` and apply the skip decisions of a previous staging, if any.
pub fn load_enumeration(task: &FitTask, paths: &TaskPaths) -> Result<Enumeration> {
    let mut enumeration = CategoryEnumerator::new().enumerate(task)?;
    if paths.report.is_file() {
        let report = read_report(&paths.report)?;
        enumeration.apply_skips(&report)?;
        tracing::info!(skipped = enumeration.n_skipped(), "applied staging report");
    } else {
        tracing::warn!(
            report = %paths.report.display(),
            "no staging report, treating every cell as active"
        );
    }
    Ok(enumeration)
}

pub fn write_datacard(task: &FitTask, enumeration: &Enumeration, out: &Path) -> Result<()> {
    let card = DatacardWriter::new(task, enumeration).render(&task.shapes_file())?;
    if let Some(parent) = out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, card)?;
    tracing::info!(path = %out.display(), "datacard written");
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let out = h.finalize();
    let mut s = String::with_capacity(64);
    for b in out {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn sha256_file(path: &Path) -> Result<String> {
    Ok(sha256_hex(&std::fs::read(path)?))
}

#[derive(Debug, Clone, serde::Serialize)]
struct ManifestFile {
    path: String,
    bytes: u64,
    sha256: String,
}

#[derive(serde::Serialize)]
struct Manifest<'a> {
    tool: &'static str,
    version: &'static str,
    created_unix_ms: u128,
    config_path: Option<String>,
    config_sha256: Option<String>,
    task: &'a FitTask,
    files: Vec<ManifestFile>,
}

fn write_manifest(
    config: Option<&Path>,
    task: &FitTask,
    paths: &TaskPaths,
    files: &[&Path],
) -> Result<()> {
    let mut entries = Vec::with_capacity(files.len());
    for f in files.iter().copied() {
        entries.push(ManifestFile {
            path: f.strip_prefix(&paths.out_dir).unwrap_or(f).display().to_string(),
            bytes: std::fs::metadata(f)?.len(),
            sha256: sha256_file(f)?,
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    let created_unix_ms =
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
    let manifest = Manifest {
        tool: "ltt",
        version: ltt_core::VERSION,
        created_unix_ms,
        config_path: config.map(|p| p.display().to_string()),
        config_sha256: config.map(sha256_file).transpose()?,
        task,
        files: entries,
    };
    std::fs::write(&paths.manifest, serde_json::to_string_pretty(&manifest)?)?;
    Ok(())
}

/// What `ltt run` produced.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub task: String,
    pub channels: usize,
    pub active_channels: usize,
    pub active_cells: usize,
    pub skipped_cells: usize,
    pub fallbacks: usize,
    pub pois: Vec<String>,
    pub paths: TaskPaths,
}

/// Stage, write the datacard and the Combine script, then the manifest.
///
/// `config_path` is recorded in the manifest when the task came from a file.
pub fn run_pipeline(config: &FitTaskConfig, config_path: Option<&Path>) -> Result<RunSummary> {
    let task = load_task(config)?;
    let paths = derive_paths(&task);
    let report = stage(&task, &paths)?;

    let mut enumeration = CategoryEnumerator::new().enumerate(&task)?;
    enumeration.apply_skips(&report)?;
    write_datacard(&task, &enumeration, &paths.datacard)?;

    let commands = CombineCommands::for_task(&task, &enumeration);
    std::fs::write(&paths.script, commands.to_script())?;

    write_manifest(
        config_path,
        &task,
        &paths,
        &[&paths.shapes, &paths.report, &paths.datacard, &paths.script],
    )?;
    tracing::info!(manifest = %paths.manifest.display(), "run complete");

    Ok(RunSummary {
        task: task.name(),
        channels: enumeration.channels.len(),
        active_channels: enumeration.active_channels().len(),
        active_cells: enumeration.active_cells().count(),
        skipped_cells: enumeration.n_skipped(),
        fallbacks: report.fallbacks.len(),
        pois: enumeration.active_pois().map(|p| p.name()).collect(),
        paths,
    })
}
