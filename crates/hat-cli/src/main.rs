use anyhow::Result;
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use hat_runner::{resolve_revision, BatchSummary, DriverConfig, Settings};

#[derive(Parser)]
#[command(
    name = "hat",
    version,
    about = "Run randomized trials against the decoder's heuristic assumption"
)]
struct Cli {
    /// CSV file trial results are appended to
    logfile: PathBuf,
    /// Directory failing instances are archived in
    cache_dir: PathBuf,
    /// YAML settings file; command line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,
    /// Thread count forwarded to the generator config (also --th) [default: 1]
    #[arg(long, alias = "th")]
    threads: Option<u64>,
    /// Number of trials to run [default: 1]
    #[arg(short, long)]
    iterations: Option<u64>,
    /// [default: 1000]
    #[arg(long)]
    min_n: Option<u64>,
    /// [default: 30000]
    #[arg(long)]
    max_n: Option<u64>,
    /// [default: 1]
    #[arg(long)]
    min_c: Option<u64>,
    /// [default: 60]
    #[arg(long)]
    max_c: Option<u64>,
    /// [default: 1]
    #[arg(long)]
    min_ell: Option<u64>,
    /// [default: 400]
    #[arg(long)]
    max_ell: Option<u64>,
    /// Family of instances to generate [default: adversarial]
    #[arg(short = 't', long)]
    instance_type: Option<String>,
    /// Promote low degree polynomials (also --lp)
    #[arg(long, alias = "lp")]
    low_polys: bool,
    /// Fix the max degree term of the polynomials to 1 (also --fmd)
    #[arg(long, alias = "fmd")]
    fix_max_degree: bool,
    /// Decoder executable (also --dc)
    #[arg(long, alias = "dc")]
    decoder_command: Option<PathBuf>,
    /// Generator program and leading arguments, one per flag
    /// [default: sage ../instance_generation/instance_generation.sage]
    #[arg(long = "generator-command", allow_hyphen_values = true)]
    generator_command: Vec<String>,
    /// Directory for per-trial scratch files [default: .]
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
    /// Kill the generator or decoder after this many seconds
    #[arg(long)]
    tool_timeout_secs: Option<u64>,
    /// Seed for parameter sampling
    #[arg(long)]
    seed: Option<u64>,
    /// Print the batch summary as JSON
    #[arg(long)]
    json: bool,
    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            threads: self.threads,
            iterations: self.iterations,
            min_n: self.min_n,
            max_n: self.max_n,
            min_c: self.min_c,
            max_c: self.max_c,
            min_ell: self.min_ell,
            max_ell: self.max_ell,
            instance_type: self.instance_type.clone(),
            low_polys: self.low_polys.then_some(true),
            fix_max_degree: self.fix_max_degree.then_some(true),
            decoder_command: self.decoder_command.clone(),
            generator_command: (!self.generator_command.is_empty())
                .then(|| self.generator_command.clone()),
            scratch_dir: self.scratch_dir.clone(),
            tool_timeout_secs: self.tool_timeout_secs,
            seed: self.seed,
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let json_mode = cli.json;
    match run(cli) {
        Ok((config, summary)) => {
            if json_mode {
                emit_json(&json!({
                    "ok": true,
                    "summary": summary_to_json(&config, &summary),
                }));
            } else {
                print_summary(&config, &summary);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                emit_json(&json_error("batch_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run(cli: Cli) -> Result<(DriverConfig, BatchSummary)> {
    let file_layer = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let settings = file_layer.overlay(cli.settings());
    let revision = resolve_revision(&std::env::current_dir()?)?;
    let config = settings.resolve(cli.logfile, cli.cache_dir, revision)?;
    let summary = hat_runner::run_batch(&config)?;
    Ok((config, summary))
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn summary_to_json(config: &DriverConfig, summary: &BatchSummary) -> Value {
    json!({
        "revision": config.revision,
        "logfile": config.logfile.display().to_string(),
        "cache_dir": config.cache_dir.display().to_string(),
        "trials": summary.trials,
        "succeeded": summary.succeeded,
        "decoder_failed": summary.decoder_failed,
        "harness_errors": summary.harness_errors,
        "archived": summary.archived,
    })
}

fn print_summary(config: &DriverConfig, summary: &BatchSummary) {
    println!("revision: {}", config.revision);
    println!("trials: {}", summary.trials);
    println!("succeeded: {}", summary.succeeded);
    println!("decoder_failed: {}", summary.decoder_failed);
    println!("harness_errors: {}", summary.harness_errors);
    println!("archived: {}", summary.archived);
    println!("logfile: {}", config.logfile.display());
    println!("cache_dir: {}", config.cache_dir.display());
}
