//! fftperf CLI — timing, analysis, tuning and merge commands.
//!
//! Commands:
//! - `run` — time every generated problem with the rider
//! - `post` — write median and speedup tables for a set of run directories
//! - `regress` — flag significant slowdowns against a reference run
//! - `tune` — run the tuner once per problem
//! - `merge` — evaluate tuned candidates and fold the winners into a solution map

mod config;

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fftperf_core::{ProblemGenerator, Run};
use fftperf_runner::merge::MERGE_REPORT_FILE;
use fftperf_runner::tuning::TUNING_CONFIG_FILE;
use fftperf_runner::{
    detect, BootstrapConfig, MergeConfig, MergeEngine, MergeInput, MergeReport, PostProcessor,
    ProcessLauncher, RegressionConfig, Timer, TuningMetadata, TuningOrchestrator,
};

use crate::config::RunFileConfig;

#[derive(Parser)]
#[command(
    name = "fftperf",
    about = "fftperf — FFT performance benchmarking, regression detection and tuning"
)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Time every generated problem with the rider.
    Run {
        /// Path to a TOML run config.
        #[arg(long)]
        config: PathBuf,

        /// Output directory per library target (overrides the config).
        #[arg(long = "output-dir")]
        output_dirs: Vec<PathBuf>,

        /// Trials per problem (overrides the config).
        #[arg(long)]
        ntrial: Option<usize>,
    },
    /// Write median and speedup tables. The first run is the reference.
    Post {
        /// Run directories.
        #[arg(required = true)]
        runs: Vec<PathBuf>,

        /// Output directory for derived tables.
        #[arg(long, default_value = "post")]
        outdir: PathBuf,

        /// Bootstrap resamples.
        #[arg(long, default_value_t = 2000)]
        resamples: usize,

        /// Process datasets one at a time.
        #[arg(long, default_value_t = false)]
        sequential: bool,
    },
    /// Flag significant slowdowns against a reference run.
    Regress {
        /// Reference run directory.
        #[arg(long)]
        reference: PathBuf,

        /// Run directories to check.
        #[arg(required = true)]
        runs: Vec<PathBuf>,

        /// Minimum slowdown, in percent.
        #[arg(long, default_value_t = 5.0)]
        percent: f64,

        /// p-value threshold.
        #[arg(long, default_value_t = 0.001)]
        significance: f64,
    },
    /// Run the tuner once per problem.
    Tune {
        /// Tuner executable.
        #[arg(long)]
        tuner: Option<PathBuf>,

        /// Directory for artifacts and tuning metadata.
        #[arg(long, default_value = "tuning")]
        output_dir: PathBuf,

        /// Problem token (repeatable).
        #[arg(long = "problem")]
        problems: Vec<String>,

        /// Take problems from a run config's generator and filter.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Replay a saved tuning-config.json (with --resume semantics).
        #[arg(long)]
        metadata: Option<PathBuf>,

        #[arg(long)]
        min_wgs: Option<u32>,

        #[arg(long)]
        max_wgs: Option<u32>,

        #[arg(long, default_value_t = false)]
        dump_candidates: bool,

        #[arg(long, default_value_t = false)]
        exact_token: bool,

        #[arg(long, default_value_t = false)]
        log_reject_reason: bool,

        /// Skip problems whose artifact already exists.
        #[arg(long, default_value_t = false)]
        resume: bool,
    },
    /// Evaluate tuned candidates and merge the winners into a solution map.
    Merge {
        /// merge-input.json written by `tune`.
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        rider: PathBuf,

        /// Solution-map merge tool executable.
        #[arg(long)]
        merge_tool: PathBuf,

        /// Reference solution map; also the base of the first insertion.
        #[arg(long)]
        reference_map: Option<PathBuf>,

        #[arg(long, default_value_t = 10)]
        ntrial: usize,

        #[arg(long)]
        device: Option<usize>,

        /// Directory for intermediate maps and the merge report.
        #[arg(long, default_value = "merge")]
        work_dir: PathBuf,

        /// Where the final solution map is copied.
        #[arg(long)]
        output: PathBuf,

        /// Only evaluate; do not insert.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            output_dirs,
            ntrial,
        } => run_timer(config, output_dirs, ntrial),
        Commands::Post {
            runs,
            outdir,
            resamples,
            sequential,
        } => run_post(runs, outdir, resamples, sequential),
        Commands::Regress {
            reference,
            runs,
            percent,
            significance,
        } => run_regress(reference, runs, percent, significance),
        Commands::Tune {
            tuner,
            output_dir,
            problems,
            config,
            metadata,
            min_wgs,
            max_wgs,
            dump_candidates,
            exact_token,
            log_reject_reason,
            resume,
        } => {
            let meta = match metadata {
                Some(path) => {
                    let mut meta = TuningMetadata::from_file(&path)?;
                    meta.resume = true;
                    meta
                }
                None => {
                    let Some(tuner) = tuner else {
                        bail!("--tuner is required unless --metadata is given");
                    };
                    let mut meta = TuningMetadata::new(tuner, output_dir);
                    meta.problems = collect_problems(problems, config)?;
                    meta.min_wgs = min_wgs;
                    meta.max_wgs = max_wgs;
                    meta.dump_candidates = dump_candidates;
                    meta.exact_token = exact_token;
                    meta.log_reject_reason = log_reject_reason;
                    meta.resume = resume;
                    meta
                }
            };
            run_tune(meta)
        }
        Commands::Merge {
            input,
            rider,
            merge_tool,
            reference_map,
            ntrial,
            device,
            work_dir,
            output,
            dry_run,
        } => {
            let config = MergeConfig {
                rider,
                merge_tool,
                reference_map,
                ntrial,
                device,
            };
            run_merge(input, config, work_dir, output, dry_run)
        }
    }
}

fn run_timer(config_path: PathBuf, output_dirs: Vec<PathBuf>, ntrial: Option<usize>) -> Result<()> {
    let file = RunFileConfig::from_file(&config_path)?;
    let generator = file.generator()?;
    tracing::debug!(config = %config_path.display(), "loaded run config");

    let mut timer_config = file.timer_config();
    if !output_dirs.is_empty() {
        timer_config.output_dirs = output_dirs;
    }
    if let Some(n) = ntrial {
        timer_config.ntrial = n;
    }
    if timer_config.output_dirs.is_empty() {
        bail!("no output directory: set output_dirs in the config or pass --output-dir");
    }

    let timer = Timer::new(timer_config, ProcessLauncher)?;
    let report = timer.run(generator.generate_problems())?;

    println!();
    println!("=== Timing Pass ===");
    println!("Attempted: {}", report.attempted());
    println!("Measured:  {}", report.measured);
    println!("Failed:    {}", report.failures.len());
    if !report.failures.is_empty() {
        println!();
        println!("{:<50} Reason", "Token");
        println!("{}", "-".repeat(80));
        for failure in &report.failures {
            println!("{:<50} {}", failure.token, failure.reason);
        }
    }
    for dir in &timer.config().output_dirs {
        println!("Results in: {}", dir.display());
    }
    Ok(())
}

fn load_runs(dirs: &[PathBuf]) -> Result<Vec<Run>> {
    dirs.iter()
        .map(|d| Run::load(d).with_context(|| format!("loading run {}", d.display())))
        .collect()
}

fn run_post(runs: Vec<PathBuf>, outdir: PathBuf, resamples: usize, sequential: bool) -> Result<()> {
    let runs = load_runs(&runs)?;
    let config = BootstrapConfig {
        n_resamples: resamples,
        ..BootstrapConfig::default()
    };
    let written = PostProcessor::new(config)
        .with_parallelism(!sequential)
        .run(&runs, &outdir)?;

    for path in &written {
        println!("{}", path.display());
    }
    println!("Wrote {} table(s) to {}", written.len(), outdir.display());
    Ok(())
}

fn run_regress(reference: PathBuf, runs: Vec<PathBuf>, percent: f64, significance: f64) -> Result<()> {
    let reference = Run::load(&reference)
        .with_context(|| format!("loading reference run {}", reference.display()))?;
    let others = load_runs(&runs)?;
    let config = RegressionConfig {
        percent,
        significance,
    };
    let report = detect(&reference, &others, &config);

    println!("Compared: {}", report.compared);
    if report.is_clean() {
        println!("No regressions.");
        return Ok(());
    }

    println!();
    println!(
        "{:<12} {:<32} {:<16} {:<14} {:>10} {:>10} {:>8} {:>10}",
        "Size", "Dataset", "Problem", "Run", "Ref", "New", "Diff%", "p"
    );
    println!("{}", "-".repeat(120));
    for r in &report.regressions {
        println!(
            "{:<12} {:<32} {:<16} {:<14} {:>10.4} {:>10.4} {:>8.2} {:>10.2e}",
            r.size,
            r.dataset,
            r.label,
            r.run,
            r.reference_median,
            r.comparison_median,
            r.percent_diff,
            r.p_value
        );
    }
    println!();
    println!("{} regression(s) found.", report.regressions.len());
    std::process::exit(1);
}

fn collect_problems(mut problems: Vec<String>, config: Option<PathBuf>) -> Result<Vec<String>> {
    if let Some(path) = config {
        let file = RunFileConfig::from_file(&path)?;
        problems.extend(file.generator()?.generate_problems().map(|p| p.token()));
    }
    if problems.is_empty() {
        bail!("no problems to tune: pass --problem or --config");
    }
    Ok(problems)
}

fn run_tune(meta: TuningMetadata) -> Result<()> {
    let output_dir = meta.output_dir.clone();
    let orchestrator = TuningOrchestrator::new(meta, ProcessLauncher)?;
    let outcome = orchestrator.run()?;

    println!();
    println!("=== Tuning Pass ===");
    println!("{:<50} {:<8} Artifact", "Token", "Status");
    println!("{}", "-".repeat(100));
    for record in &outcome.records {
        let status = match (record.success, record.resumed) {
            (true, true) => "resumed",
            (true, false) => "ok",
            (false, _) => "FAILED",
        };
        println!("{:<50} {:<8} {}", record.token, status, record.artifact.display());
    }
    println!();
    println!(
        "Succeeded: {}  Failed: {}",
        outcome.succeeded(),
        outcome.failed()
    );
    println!(
        "Metadata:  {}",
        output_dir.join(TUNING_CONFIG_FILE).display()
    );
    println!(
        "Merge input: {}",
        orchestrator.metadata().merge_input_path().display()
    );
    Ok(())
}

fn run_merge(
    input_path: PathBuf,
    config: MergeConfig,
    work_dir: PathBuf,
    output: PathBuf,
    dry_run: bool,
) -> Result<()> {
    let input = MergeInput::from_file(&input_path)?;
    tracing::info!(candidates = input.entries.len(), input = %input_path.display(), "loaded merge input");
    let base = config.reference_map.clone();
    let engine = MergeEngine::new(config, ProcessLauncher)?;

    let evaluation = engine.evaluate(&input);

    println!();
    println!("=== Candidate Evaluation ===");
    println!("{:<50} {:>10} {:>10} Verdict", "Token", "Ref", "New");
    println!("{}", "-".repeat(110));
    for d in &evaluation.decisions {
        println!(
            "{:<50} {:>10.4} {:>10.4} {}",
            d.token,
            d.reference_median,
            d.candidate_median,
            d.label()
        );
    }
    for s in &evaluation.skipped {
        println!("{:<50} {:>10} {:>10} skipped: {}", s.token, "-", "-", s.reason);
    }

    let outcome = if dry_run {
        Default::default()
    } else {
        engine.merge(evaluation.accepted(), base.as_deref(), &work_dir)?
    };

    println!();
    println!(
        "Accepted: {}  Rejected: {}  Skipped: {}  Inserted: {}",
        evaluation.accepted().count(),
        evaluation.decisions.len() - evaluation.accepted().count(),
        evaluation.skipped.len(),
        outcome.inserted()
    );

    match &outcome.final_map {
        Some(map) if !dry_run => {
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            fs::copy(map, &output)
                .with_context(|| format!("copying {} to {}", map.display(), output.display()))?;
            println!("Solution map: {}", output.display());
        }
        _ => println!("No solution map written."),
    }

    fs::create_dir_all(&work_dir).with_context(|| format!("creating {}", work_dir.display()))?;
    let report_path = work_dir.join(MERGE_REPORT_FILE);
    MergeReport {
        evaluation,
        outcome,
    }
    .save(&report_path)?;
    println!("Report: {}", report_path.display());
    Ok(())
}
