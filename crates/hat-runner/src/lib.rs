//! Randomized harness for the decoder's heuristic assumption.
//!
//! Every trial samples instance parameters, asks the external generator for
//! an instance, runs the external decoder on it, archives the artifacts of
//! failing trials and appends one row to the trial log. Trials run strictly
//! one after another.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod revision;
pub mod sampling;
pub mod tools;
pub mod trial_log;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use uuid::Uuid;

pub use artifacts::{
    DecoderResult, FailureArchive, GeneratorConfig, Instance, ScratchDir, TrialFiles,
};
pub use config::{DriverConfig, InstanceType, Settings};
pub use error::{ConfigError, ToolKind, TrialError};
pub use revision::resolve_revision;
pub use sampling::{DealerPartition, IntRange, ParameterRanges, TrialParameters, TrialPlan};
pub use tools::{ProcessTool, ToolInvocation, ToolOutput, ToolRunner};
pub use trial_log::{TrialLog, TrialRecord};

use artifacts::{read_decoder_result, read_instance};
use tools::{decoder_invocation, generator_invocation, invoke};

/// The two external collaborators of a trial.
#[derive(Clone, Copy)]
pub struct Tools<'a> {
    pub generator: &'a dyn ToolRunner,
    pub decoder: &'a dyn ToolRunner,
}

#[derive(Debug)]
pub enum TrialOutcome {
    Succeeded,
    /// The decoder ran and reported failure. This is what the harness is
    /// looking for.
    DecoderFailed,
    /// The trial could not be judged.
    Errored(TrialError),
}

impl TrialOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, TrialOutcome::Succeeded)
    }
}

#[derive(Debug)]
pub struct TrialReport {
    pub run_id: String,
    pub plan: TrialPlan,
    pub is_nice: Option<bool>,
    pub outcome: TrialOutcome,
    pub archived: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub trials: u64,
    pub succeeded: u64,
    pub decoder_failed: u64,
    pub harness_errors: u64,
    pub archived: u64,
}

impl BatchSummary {
    fn record(&mut self, report: &TrialReport) {
        self.trials += 1;
        match report.outcome {
            TrialOutcome::Succeeded => self.succeeded += 1,
            TrialOutcome::DecoderFailed => self.decoder_failed += 1,
            TrialOutcome::Errored(_) => self.harness_errors += 1,
        }
        if report.archived {
            self.archived += 1;
        }
    }
}

pub struct Driver<'a> {
    config: &'a DriverConfig,
    tools: Tools<'a>,
    scratch: ScratchDir,
    archive: FailureArchive,
    log: TrialLog,
}

impl<'a> Driver<'a> {
    /// Prepares the scratch dir, cache dir and log. Any failure here is
    /// fatal to the batch.
    pub fn new(config: &'a DriverConfig, tools: Tools<'a>) -> Result<Self> {
        Ok(Self {
            config,
            tools,
            scratch: ScratchDir::new(&config.scratch_dir)?,
            archive: FailureArchive::new(&config.cache_dir)?,
            log: TrialLog::open(&config.logfile)?,
        })
    }

    pub fn run_batch<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<BatchSummary> {
        info!(
            revision = %self.config.revision,
            iterations = self.config.iterations,
            instance_type = %self.config.instance_type,
            "starting batch"
        );
        let mut summary = BatchSummary::default();
        for _ in 0..self.config.iterations {
            let report = self.run_trial(rng)?;
            summary.record(&report);
        }
        info!(
            trials = summary.trials,
            succeeded = summary.succeeded,
            decoder_failed = summary.decoder_failed,
            harness_errors = summary.harness_errors,
            "batch finished"
        );
        Ok(summary)
    }

    /// Runs one trial. Only filesystem errors on the driver's own files
    /// escape as `Err`; tool failures are folded into the report.
    pub fn run_trial<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<TrialReport> {
        let plan = TrialPlan::sample(&self.config.ranges, rng);
        let params = plan.params;
        info!(
            "n={}, c={}, ell={}, t={}, ngsd={}, mp={}",
            params.n,
            params.c,
            params.ell,
            params.t,
            plan.partition.dealer_count(),
            plan.partition.max_points_display()
        );
        if params.t > params.n {
            warn!(n = params.n, t = params.t, "threshold exceeds batch size");
        }

        let run_id = Uuid::new_v4().to_string();
        let files = self.scratch.trial_files(&run_id);
        files.write_config(&GeneratorConfig {
            batch_sizes: vec![params.n],
            c_vals: vec![params.c],
            threads: self.config.threads,
        })?;

        let (is_nice, outcome) = match self.generate(&plan, &files) {
            Err(e) => (None, TrialOutcome::Errored(e)),
            Ok(instance) => {
                let outcome = match self.decode(&files) {
                    Ok(result) if result.succeeded => TrialOutcome::Succeeded,
                    Ok(_) => TrialOutcome::DecoderFailed,
                    Err(e) => TrialOutcome::Errored(e),
                };
                (Some(instance.parameters.is_nice), outcome)
            }
        };

        let archived = match &outcome {
            TrialOutcome::Succeeded => {
                files.discard()?;
                false
            }
            TrialOutcome::DecoderFailed => {
                self.archive.store(&run_id, &files)?;
                info!(run_id = %run_id, cache_dir = %self.archive.root().display(), "decoder failed; instance archived");
                true
            }
            TrialOutcome::Errored(e) => {
                warn!(run_id = %run_id, code = %e.code(), error = %e, "trial could not be judged");
                self.archive.store(&run_id, &files)?;
                self.archive.write_report(&run_id, e)?;
                true
            }
        };

        self.log.append(&self.record(&run_id, &params, is_nice, &outcome))?;

        Ok(TrialReport {
            run_id,
            plan,
            is_nice,
            outcome,
            archived,
        })
    }

    fn generate(&self, plan: &TrialPlan, files: &TrialFiles) -> Result<Instance, TrialError> {
        let invocation = generator_invocation(self.config, plan, &files.instance)?;
        let produced = invoke(ToolKind::Generator, self.tools.generator, &invocation)?;
        read_instance(&produced)
    }

    fn decode(&self, files: &TrialFiles) -> Result<DecoderResult, TrialError> {
        let invocation = decoder_invocation(&files.instance, &files.decoder_output);
        let produced = invoke(ToolKind::Decoder, self.tools.decoder, &invocation)?;
        read_decoder_result(&produced)
    }

    fn record(
        &self,
        run_id: &str,
        params: &TrialParameters,
        is_nice: Option<bool>,
        outcome: &TrialOutcome,
    ) -> TrialRecord {
        let ranges = &self.config.ranges;
        TrialRecord {
            id: run_id.to_string(),
            githash: self.config.revision.clone(),
            instance_type: self.config.instance_type.as_str().to_string(),
            min_n: ranges.n.min,
            max_n: ranges.n.max,
            min_c: ranges.c.min,
            max_c: ranges.c.max,
            min_ell: ranges.ell.min,
            max_ell: ranges.ell.max,
            n: params.n,
            c: params.c,
            ell: params.ell,
            t: params.t,
            is_nice,
            low_polys: self.config.low_polys,
            fixed_max_degree: self.config.fix_max_degree,
            succeeded: outcome.succeeded(),
        }
    }
}

/// Runs a batch against the configured generator and decoder programs.
pub fn run_batch(config: &DriverConfig) -> Result<BatchSummary> {
    let generator = ProcessTool::generator(config);
    let decoder = ProcessTool::decoder(config);
    let tools = Tools {
        generator: &generator,
        decoder: &decoder,
    };
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Driver::new(config, tools)?.run_batch(&mut rng)
}
