use crate::{
    agent::{AgentInvoker, process::ProcessAgent},
    batch::organize_batches,
    config::Config,
    dirscan,
    lock::LockManager,
    parser,
    processor::{MiniBatchProcessor, ThreadSleeper},
    runner, summary,
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "a11y-batch")]
#[command(about = "Resumable accessibility-scan batch runner (AI agent + mini-batching + checkpoints)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./a11y-batch.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the configured agent command is invocable.
    Doctor {},
    /// Parse an input file and print the batch plan without invoking the agent.
    Plan {
        #[arg(long)]
        input: PathBuf,
    },
    /// Process one input file.
    Run {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Watch a directory and process every eligible input file found in it.
    Watch {
        #[arg(long)]
        dir: PathBuf,
        /// Make a single pass instead of polling continuously.
        #[arg(long)]
        once: bool,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;
    let _guard = init_logging(&args, &cfg)?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Plan { input } => plan(&cfg, input),
        Command::Run { input, out_dir } => run(&cfg, input, out_dir.as_deref()),
        Command::Watch { dir, once } => watch(&cfg, dir, *once),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("a11y-batch.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("a11y-batch.example.toml"))
    }
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = resolve_log_path(cfg) {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(&path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.out_dir).join("a11y-batch.log"))
}

fn doctor(cfg: &Config) -> Result<()> {
    let agent = ProcessAgent::new(cfg)?;
    let diag = agent.doctor()?;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

fn plan(cfg: &Config, input: &Path) -> Result<()> {
    let parsed = parser::parse_input_file(input)?;
    let batches = organize_batches(
        &parsed.scans,
        cfg.batching.batch_size,
        cfg.batching.mini_batch_size,
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "total_rows": parsed.total_rows,
            "eligible": parsed.scans.len(),
            "skipped": parsed.skipped,
            "batches": batches,
        }))?
    );
    Ok(())
}

fn run(cfg: &Config, input: &Path, out_override: Option<&Path>) -> Result<()> {
    validate_input(cfg, input)?;

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write("effective-config.toml", raw)?;
    }

    let out_dir = out_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));

    let agent = ProcessAgent::new(cfg)?;
    let processor = MiniBatchProcessor::new(cfg, agent, ThreadSleeper);

    let lock = LockManager::new(&runner::working_dir(input));
    if !lock.acquire()? {
        bail!(
            "another run is active: lock {} held{}",
            lock.path().display(),
            dirscan::describe_holder(lock.read_info()?)
        );
    }

    let mut stats = summary::RunStats::new();
    let result = runner::run_file(cfg, &processor, input, &out_dir);
    if let Err(err) = lock.release() {
        warn!("releasing lock: {err:#}");
    }
    let run = result?;

    if run.source_error {
        bail!("{}", run.errors.join("; "));
    }

    run.fold_into(&mut stats);
    let report = summary::generate_summary(&stats);
    if cfg.global.print_summary {
        println!("{}", summary::json_summary(&report)?);
    }
    Ok(())
}

fn watch(cfg: &Config, dir: &Path, once: bool) -> Result<()> {
    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }
    let agent = ProcessAgent::new(cfg)?;
    let processor = MiniBatchProcessor::new(cfg, agent, ThreadSleeper);
    dirscan::watch(cfg, &processor, dir, once)
}

fn validate_input(cfg: &Config, input: &Path) -> Result<()> {
    if !input.exists() {
        bail!("input does not exist: {}", input.display());
    }
    match input.extension().and_then(|s| s.to_str()) {
        Some(ext)
            if cfg
                .input
                .extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(ext)) => {}
        Some(ext) => warn!("input extension .{ext} is not in input.extensions"),
        None => warn!("input has no extension: {}", input.display()),
    }
    Ok(())
}
