//! ltt CLI

mod run;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ltt_combine::catalog::{Catalog, MergeSplit, SystematicsFilter, WorkingPointKey};
use ltt_combine::combine::ExternalCommand;
use ltt_combine::results::{FitOutput, OPEN_INTERVAL_DISPLAY_WIDTH};
use ltt_combine::{
    CategoryEnumerator, CombineCommands, FitTaskConfig, JobOutcome, ObservationMode,
    ResultExtractor, run_chain, run_commands,
};
use ltt_core::{DetectionChannel, Period};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ltt")]
#[command(about = "Legacy top-tagging scale-factor fits with Combine")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

/// One fit task, from a configuration file or from options.
///
/// The options after `--split` also override a configuration file.
#[derive(Args, Clone, Debug)]
struct TaskArgs {
    /// Run configuration (YAML; JSON if the extension is .json)
    #[arg(short, long, conflicts_with_all = ["tagger", "working_point", "periods", "split"])]
    config: Option<PathBuf>,

    /// Tagger name (see `ltt catalog`)
    #[arg(long, required_unless_present = "config")]
    tagger: Option<String>,

    /// Working point, by name or by index
    #[arg(long = "wp", required_unless_present = "config")]
    working_point: Option<WorkingPointKey>,

    /// Periods (UL16preVFP, UL16postVFP, UL17, UL18)
    #[arg(long = "period", value_delimiter = ',', required_unless_present = "config")]
    periods: Vec<Period>,

    /// Merge-scenario split (top3, top4, w2)
    #[arg(long, required_unless_present = "config")]
    split: Option<MergeSplit>,

    /// Detection channels (muo, ele). Defaults to both.
    #[arg(long = "channel", value_delimiter = ',')]
    channels: Vec<DetectionChannel>,

    /// Fit the full-range interval instead of the fit intervals
    #[arg(long)]
    total_range: bool,

    /// Keep only systematics with these prefixes
    #[arg(long = "only-syst", value_delimiter = ',')]
    whitelist: Vec<String>,

    /// Drop systematics with these prefixes
    #[arg(long = "skip-syst", value_delimiter = ',')]
    blacklist: Vec<String>,

    /// Use the sum of the staged simulation as observation
    #[arg(long)]
    asimov: bool,

    /// Directory of the upstream histogram files
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Output directory for templates, datacard and scripts
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

impl TaskArgs {
    fn to_config(&self) -> Result<FitTaskConfig> {
        let mut cfg = match &self.config {
            Some(path) => FitTaskConfig::from_path(path)?,
            None => {
                let (Some(tagger), Some(wp), Some(split)) =
                    (&self.tagger, &self.working_point, self.split)
                else {
                    anyhow::bail!("--tagger, --wp and --split are required without --config");
                };
                FitTaskConfig::new(tagger.clone(), wp.clone(), &self.periods, split)
            }
        };
        if !self.channels.is_empty() {
            cfg = cfg.with_channels(&self.channels);
        }
        if self.total_range {
            cfg = cfg.with_total_range(true);
        }
        if !self.whitelist.is_empty() || !self.blacklist.is_empty() {
            cfg = cfg.with_systematics(SystematicsFilter {
                whitelist: self.whitelist.clone(),
                blacklist: self.blacklist.clone(),
            });
        }
        if self.asimov {
            cfg = cfg.with_observation(ObservationMode::Asimov);
        }
        if let Some(dir) = &self.input_dir {
            cfg.input.base_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            cfg = cfg.with_output_dir(dir);
        }
        Ok(cfg)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print channels, processes and POIs with their ids
    Enumerate {
        #[command(flatten)]
        task: TaskArgs,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Stage templates and write the staging report
    Stage {
        #[command(flatten)]
        task: TaskArgs,
    },

    /// Write the datacard for previously staged templates
    Datacard {
        #[command(flatten)]
        task: TaskArgs,

        /// Datacard path. Defaults to `<output_dir>/<task>.txt`.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Stage, write the datacard, the Combine script and the manifest
    Run {
        #[command(flatten)]
        task: TaskArgs,
    },

    /// Run the Combine chain of one or more staged tasks
    Fit {
        /// Run configurations
        #[arg(required = true)]
        configs: Vec<PathBuf>,

        /// Concurrent external commands (0 = auto). Defaults to the largest
        /// `threads` of the configurations.
        #[arg(long)]
        threads: Option<usize>,

        /// Print the shell script instead of running it
        #[arg(long)]
        dry_run: bool,

        /// Output file for job outcomes (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract scale factors from the regular and frozen fit results
    Extract {
        #[command(flatten)]
        task: TaskArgs,

        /// Exported result of the regular fit (JSON)
        #[arg(long)]
        regular: PathBuf,

        /// Exported result of the fit with frozen nuisances (JSON)
        #[arg(long)]
        frozen: PathBuf,

        /// Output file for scale factors (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List taggers, working points, systematics and processes
    Catalog {
        /// Only this tagger
        #[arg(long)]
        tagger: Option<String>,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Enumerate { task, output } => cmd_enumerate(&task, output.as_ref()),
        Commands::Stage { task } => cmd_stage(&task),
        Commands::Datacard { task, output } => cmd_datacard(&task, output.as_ref()),
        Commands::Run { task } => cmd_run(&task),
        Commands::Fit { configs, threads, dry_run, output } => {
            cmd_fit(&configs, threads, dry_run, output.as_ref())
        }
        Commands::Extract { task, regular, frozen, output } => {
            cmd_extract(&task, &regular, &frozen, output.as_ref())
        }
        Commands::Catalog { tagger, output } => cmd_catalog(tagger.as_deref(), output.as_ref()),
        Commands::Version => {
            println!("ltt {}", ltt_core::VERSION);
            Ok(())
        }
    }
}

fn cmd_enumerate(args: &TaskArgs, output: Option<&PathBuf>) -> Result<()> {
    let task = run::load_task(&args.to_config()?)?;
    let en = CategoryEnumerator::new().enumerate(&task)?;

    let channels: Vec<_> = en
        .channels
        .iter()
        .map(|c| serde_json::json!({ "name": c.name(), "id_factor": c.id_factor }))
        .collect();
    let processes: Vec<_> = en
        .processes
        .iter()
        .map(|p| {
            serde_json::json!({
                "sample": p.sample_name(),
                "signal": p.is_signal(),
                "id_factor": p.id_factor,
            })
        })
        .collect();
    let pois: Vec<String> = en.pois.iter().map(|p| p.name()).collect();

    write_json(
        output,
        serde_json::json!({
            "task": task.name(),
            "channels": channels,
            "processes": processes,
            "pois": pois,
            "physics_model_maps": en.physics_model_maps(),
        }),
    )
}

fn cmd_stage(args: &TaskArgs) -> Result<()> {
    let task = run::load_task(&args.to_config()?)?;
    let paths = run::derive_paths(&task);
    let report = run::stage(&task, &paths)?;
    write_json(
        None,
        serde_json::json!({
            "task": task.name(),
            "shapes": paths.shapes,
            "report": paths.report,
            "written": report.written,
            "clipped_bins": report.clipped_bins,
            "fallbacks": report.fallbacks.len(),
            "skipped": report.skipped,
        }),
    )
}

fn cmd_datacard(args: &TaskArgs, output: Option<&PathBuf>) -> Result<()> {
    let task = run::load_task(&args.to_config()?)?;
    let paths = run::derive_paths(&task);
    let en = run::load_enumeration(&task, &paths)?;
    let out = output.cloned().unwrap_or(paths.datacard);
    run::write_datacard(&task, &en, &out)?;
    println!("{}", out.display());
    Ok(())
}

fn cmd_run(args: &TaskArgs) -> Result<()> {
    let summary = run::run_pipeline(&args.to_config()?, args.config.as_deref())?;
    write_json(None, serde_json::to_value(&summary)?)
}

struct FitPlan {
    task: String,
    threads: usize,
    commands: CombineCommands,
}

fn cmd_fit(
    configs: &[PathBuf],
    threads: Option<usize>,
    dry_run: bool,
    output: Option<&PathBuf>,
) -> Result<()> {
    let mut plans = Vec::with_capacity(configs.len());
    for path in configs {
        let task = run::load_task(&FitTaskConfig::from_path(path)?)?;
        let paths = run::derive_paths(&task);
        let en = run::load_enumeration(&task, &paths)?;
        plans.push(FitPlan {
            task: task.name(),
            threads: task.threads,
            commands: CombineCommands::for_task(&task, &en),
        });
    }

    if dry_run {
        for plan in &plans {
            print!("{}", plan.commands.to_script());
        }
        return Ok(());
    }

    let threads = threads.unwrap_or_else(|| plans.iter().map(|p| p.threads).max().unwrap_or(1));
    let outcomes = match plans.as_slice() {
        [single] => vec![run_chain(&single.commands.chain())],
        _ => run_in_steps(&plans, threads)?,
    };

    let results: Vec<_> = plans
        .iter()
        .zip(&outcomes)
        .map(|(plan, jobs)| {
            serde_json::json!({
                "task": plan.task,
                "success": jobs.len() == 3 && jobs.iter().all(JobOutcome::success),
                "regular_output": plan.commands.regular_output,
                "frozen_output": plan.commands.frozen_output,
                "jobs": jobs,
            })
        })
        .collect();
    write_json(output, serde_json::Value::Array(results))?;

    let failed = outcomes.iter().filter(|jobs| !jobs.iter().all(JobOutcome::success)).count();
    if failed > 0 {
        anyhow::bail!("{} of {} fit chains failed", failed, plans.len());
    }
    Ok(())
}

/// Run step `k` of every still-healthy chain as one parallel batch, for each `k`.
fn run_in_steps(plans: &[FitPlan], threads: usize) -> Result<Vec<Vec<JobOutcome>>> {
    let chains: Vec<Vec<ExternalCommand>> = plans.iter().map(|p| p.commands.chain()).collect();
    let steps = chains.iter().map(Vec::len).max().unwrap_or(0);
    let mut outcomes: Vec<Vec<JobOutcome>> = vec![Vec::new(); plans.len()];
    for step in 0..steps {
        let pending: Vec<usize> = (0..plans.len())
            .filter(|&i| step < chains[i].len() && outcomes[i].iter().all(JobOutcome::success))
            .collect();
        if pending.is_empty() {
            break;
        }
        let jobs: Vec<ExternalCommand> = pending.iter().map(|&i| chains[i][step].clone()).collect();
        tracing::info!(step, jobs = jobs.len(), threads, "running batch");
        for (i, outcome) in pending.into_iter().zip(run_commands(&jobs, threads)?) {
            outcomes[i].push(outcome);
        }
    }
    Ok(outcomes)
}

fn cmd_extract(
    args: &TaskArgs,
    regular: &Path,
    frozen: &Path,
    output: Option<&PathBuf>,
) -> Result<()> {
    let task = run::load_task(&args.to_config()?)?;
    let paths = run::derive_paths(&task);
    let mut en = run::load_enumeration(&task, &paths)?;

    let regular = FitOutput::from_path(regular)?;
    let frozen = FitOutput::from_path(frozen)?;
    let extraction = ResultExtractor::default().extract(&en, &regular, &frozen)?;
    let attached = en.attach_results(&extraction.scale_factors);
    tracing::info!(
        scale_factors = attached,
        warnings = extraction.warnings.len(),
        "extraction complete"
    );

    let warnings: Vec<String> = extraction.warnings.iter().map(ToString::to_string).collect();
    write_json(
        output,
        serde_json::json!({
            "task": task.name(),
            "scale_factors": extraction.scale_factors,
            "warnings": warnings,
            "graphs": extraction.graphs(OPEN_INTERVAL_DISPLAY_WIDTH),
        }),
    )
}

fn cmd_catalog(tagger: Option<&str>, output: Option<&PathBuf>) -> Result<()> {
    let catalog = Catalog::standard()?;
    let taggers = match tagger {
        Some(name) => vec![catalog.tagger(name)?],
        None => catalog.taggers().iter().collect(),
    };

    let taggers: Vec<_> = taggers
        .into_iter()
        .map(|t| {
            let working_points: Vec<_> = t
                .working_points()
                .iter()
                .enumerate()
                .map(|(i, wp)| {
                    let cuts: serde_json::Map<String, serde_json::Value> = Period::ALL
                        .into_iter()
                        .map(|p| (p.to_string(), serde_json::json!(wp.cut_value(p))))
                        .collect();
                    serde_json::json!({
                        "index": i,
                        "name": wp.name,
                        "label": wp.label,
                        "cuts": cuts,
                    })
                })
                .collect();
            let intervals: Vec<_> = t
                .intervals()
                .iter()
                .map(|iv| {
                    serde_json::json!({
                        "name": iv.name(),
                        "fit": iv.fit,
                        "total_range": iv.total_range,
                    })
                })
                .collect();
            serde_json::json!({
                "name": t.name,
                "kind": t.kind,
                "label": t.label,
                "discriminant": t.discriminant,
                "fit_variable": t.fit_variable,
                "working_points": working_points,
                "intervals": intervals,
            })
        })
        .collect();

    write_json(
        output,
        serde_json::json!({
            "version": ltt_core::VERSION,
            "taggers": taggers,
            "systematics": catalog.systematics(),
            "processes": catalog.processes(),
        }),
    )
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
