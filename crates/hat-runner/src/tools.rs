//! External tools: the instance generator and the decoder.
//!
//! Both are driven through [`ToolRunner`] so trials can run against mock
//! tools in tests. [`ProcessTool`] is the real implementation: it spawns the
//! program, waits with an optional deadline, and kills the child when the
//! deadline passes.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::DriverConfig;
use crate::error::{ToolKind, TrialError};
use crate::sampling::TrialPlan;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Arguments for one tool run plus the file it is expected to write.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub args: Vec<String>,
    pub produced: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub elapsed: Duration,
    pub stdout: String,
    pub stderr_tail: String,
    /// The expected output file, if it exists after the run.
    pub produced_file: Option<PathBuf>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

pub trait ToolRunner {
    /// Runs the tool to completion. `Err` means the tool could not be run at
    /// all; an unsuccessful run is reported through [`ToolOutput`].
    fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput>;
}

/// A program on disk, optionally with leading arguments (e.g. an
/// interpreter plus script).
#[derive(Debug, Clone)]
pub struct ProcessTool {
    pub program: String,
    pub prefix_args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl ProcessTool {
    pub fn generator(config: &DriverConfig) -> Self {
        let (program, prefix) = config
            .generator_command
            .split_first()
            .map(|(p, rest)| (p.clone(), rest.to_vec()))
            .unwrap_or_default();
        Self {
            program,
            prefix_args: prefix,
            timeout: config.tool_timeout,
        }
    }

    pub fn decoder(config: &DriverConfig) -> Self {
        Self {
            program: config.decoder_command.to_string_lossy().to_string(),
            prefix_args: Vec::new(),
            timeout: config.tool_timeout,
        }
    }
}

impl ToolRunner for ProcessTool {
    fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput> {
        let mut child = Command::new(&self.program)
            .args(&self.prefix_args)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let started_at = Instant::now();
        let deadline = self.timeout.map(|t| started_at + t);
        let (exit_code, mut timed_out) = loop {
            if let Some(status) = child.try_wait()? {
                break (status.code(), false);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let _ = child.kill();
                let status = child.wait()?;
                break (status.code(), true);
            }
            thread::sleep(POLL_INTERVAL);
        };

        // Grandchildren may outlive the child and keep the pipes open, so the
        // readers are collected against the same deadline.
        let mut collect = |rx: &Receiver<Vec<u8>>| -> Vec<u8> {
            if timed_out {
                return Vec::new();
            }
            let received = match deadline {
                Some(d) => rx
                    .recv_timeout(d.saturating_duration_since(Instant::now()))
                    .map_err(|e| e == RecvTimeoutError::Timeout),
                None => rx.recv().map_err(|_| false),
            };
            match received {
                Ok(buf) => buf,
                Err(expired) => {
                    timed_out = expired;
                    Vec::new()
                }
            }
        };
        let stdout = collect(&stdout);
        let stderr = collect(&stderr);
        let elapsed = started_at.elapsed();

        let stderr = String::from_utf8_lossy(&stderr);
        let stderr_tail = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string();

        Ok(ToolOutput {
            exit_code,
            timed_out,
            elapsed,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr_tail,
            produced_file: invocation
                .produced
                .exists()
                .then(|| invocation.produced.clone()),
        })
    }
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut r) = reader {
            let _ = r.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

/// Runs `runner` and turns anything short of "exited 0 and wrote its output
/// file" into a [`TrialError`].
pub fn invoke(
    tool: ToolKind,
    runner: &dyn ToolRunner,
    invocation: &ToolInvocation,
) -> Result<PathBuf, TrialError> {
    debug!(%tool, args = ?invocation.args, "invoking");
    let output = runner
        .run(invocation)
        .map_err(|source| TrialError::Spawn { tool, source })?;
    debug!(
        %tool,
        exit_code = ?output.exit_code,
        elapsed_ms = output.elapsed.as_millis() as u64,
        "finished"
    );
    if !output.stdout.trim().is_empty() {
        debug!(%tool, stdout = %output.stdout.trim_end(), "tool stdout");
    }
    if output.timed_out {
        return Err(TrialError::Timeout {
            tool,
            after: output.elapsed,
        });
    }
    if !output.success() {
        return Err(TrialError::Exit {
            tool,
            exit_code: output.exit_code,
            stderr_tail: output.stderr_tail,
        });
    }
    output.produced_file.ok_or_else(|| TrialError::MissingOutput {
        tool,
        path: invocation.produced.clone(),
    })
}

/// `<mode> <instance> -c <c> -l <ell> -mf <n+1> [-fldp] [-fmd] -e <counts..> <residual>`
pub fn generator_invocation(
    config: &DriverConfig,
    plan: &TrialPlan,
    instance_path: &Path,
) -> Result<ToolInvocation, TrialError> {
    let params = &plan.params;
    let residual = plan.partition.residual(params.n)?;
    let mut args = vec![
        config.instance_type.mode_code().to_string(),
        instance_path.to_string_lossy().to_string(),
        "-c".to_string(),
        params.c.to_string(),
        "-l".to_string(),
        params.ell.to_string(),
        "-mf".to_string(),
        (params.n + 1).to_string(),
    ];
    if config.low_polys {
        args.push("-fldp".to_string());
    }
    if config.fix_max_degree {
        args.push("-fmd".to_string());
    }
    args.push("-e".to_string());
    args.extend(plan.partition.sufficient.iter().map(|v| v.to_string()));
    args.push(residual.to_string());
    Ok(ToolInvocation {
        args,
        produced: instance_path.to_path_buf(),
    })
}

/// `<instance> --outfile <output>`
pub fn decoder_invocation(instance_path: &Path, output_path: &Path) -> ToolInvocation {
    ToolInvocation {
        args: vec![
            instance_path.to_string_lossy().to_string(),
            "--outfile".to_string(),
            output_path.to_string_lossy().to_string(),
        ],
        produced: output_path.to_path_buf(),
    }
}
