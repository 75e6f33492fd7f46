//! Trial artifacts: scratch files, typed decoding of tool output, and the
//! failure archive.

use anyhow::Result;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ToolKind, TrialError};

/// Configuration handed to the generator side of a trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub batch_sizes: Vec<u64>,
    pub c_vals: Vec<u64>,
    pub threads: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct InstanceParameters {
    pub is_nice: bool,
}

/// The part of a generated instance the driver reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Instance {
    pub parameters: InstanceParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DecoderResult {
    pub succeeded: bool,
}

pub fn read_instance(path: &Path) -> Result<Instance, TrialError> {
    read_artifact(ToolKind::Generator, path)
}

pub fn read_decoder_result(path: &Path) -> Result<DecoderResult, TrialError> {
    read_artifact(ToolKind::Decoder, path)
}

fn read_artifact<T: DeserializeOwned>(tool: ToolKind, path: &Path) -> Result<T, TrialError> {
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TrialError::MissingOutput {
                tool,
                path: path.to_path_buf(),
            }
        } else {
            TrialError::Malformed {
                tool,
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|e| TrialError::Malformed {
        tool,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn atomic_write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

/// Renames `from` to `to`, copying across filesystems when a rename is not
/// possible.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)?;
    Ok(())
}

/// Working directory for the transient files of each trial.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trial_files(&self, run_id: &str) -> TrialFiles {
        TrialFiles::in_dir(&self.root, run_id)
    }
}

/// The three files a trial produces, named by run ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialFiles {
    pub config: PathBuf,
    pub instance: PathBuf,
    pub decoder_output: PathBuf,
}

impl TrialFiles {
    pub fn in_dir(dir: &Path, run_id: &str) -> Self {
        Self {
            config: dir.join(format!("config-{}.json", run_id)),
            instance: dir.join(format!("instance-{}.json", run_id)),
            decoder_output: dir.join(format!("decoder-output-{}.json", run_id)),
        }
    }

    fn all(&self) -> [&Path; 3] {
        [&self.instance, &self.config, &self.decoder_output]
    }

    pub fn write_config(&self, config: &GeneratorConfig) -> Result<()> {
        let bytes = serde_json::to_vec(config)?;
        atomic_write_bytes(&self.config, &bytes)
    }

    /// Drops the scratch files of a trial that needs no archiving.
    pub fn discard(&self) -> Result<()> {
        for path in self.all() {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Append-only store of artifacts from failing trials.
#[derive(Debug, Clone)]
pub struct FailureArchive {
    root: PathBuf,
}

impl FailureArchive {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("failure-{}.json", run_id))
    }

    /// Moves whichever scratch files exist into the archive. Returns how
    /// many were moved.
    pub fn store(&self, run_id: &str, scratch: &TrialFiles) -> Result<usize> {
        let target = TrialFiles::in_dir(&self.root, run_id);
        let mut moved = 0;
        for (from, to) in scratch.all().into_iter().zip(target.all()) {
            if from.exists() {
                move_file(from, to)?;
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Records why a trial could not be judged.
    pub fn write_report(&self, run_id: &str, error: &TrialError) -> Result<PathBuf> {
        let path = self.report_path(run_id);
        let report = json!({
            "schema_version": "trial_failure_v1",
            "run_id": run_id,
            "code": error.code(),
            "message": error.to_string(),
            "recorded_at": Utc::now().to_rfc3339(),
        });
        atomic_write_json_pretty(&path, &report)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "hat_artifacts_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("temp dir");
        root
    }

    #[test]
    fn decodes_nested_nice_flag_and_ignores_extra_fields() {
        let root = temp_root("decode");
        let path = root.join("instance.json");
        fs::write(
            &path,
            r#"{"parameters":{"is_nice":true,"n":10},"points":[[1,2]]}"#,
        )
        .expect("write");
        let instance = read_instance(&path).expect("instance");
        assert!(instance.parameters.is_nice);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_field_is_malformed_not_missing() {
        let root = temp_root("malformed");
        let path = root.join("out.json");
        fs::write(&path, r#"{"result":"ok"}"#).expect("write");
        let err = read_decoder_result(&path).expect_err("no succeeded field");
        assert_eq!(err.code(), "decoder_malformed_output");

        let err = read_decoder_result(&root.join("absent.json")).expect_err("absent");
        assert_eq!(err.code(), "decoder_missing_output");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn generator_config_serializes_expected_shape() {
        let root = temp_root("config");
        let files = ScratchDir::new(&root).expect("scratch").trial_files("r1");
        files
            .write_config(&GeneratorConfig {
                batch_sizes: vec![10],
                c_vals: vec![1],
                threads: 4,
            })
            .expect("write");
        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&files.config).expect("read")).expect("json");
        assert_eq!(
            value,
            json!({"batch_sizes": [10], "c_vals": [1], "threads": 4})
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn archive_moves_files_under_run_id() {
        let root = temp_root("archive");
        let scratch = ScratchDir::new(root.join("scratch")).expect("scratch");
        let archive = FailureArchive::new(root.join("cache")).expect("archive");
        let files = scratch.trial_files("abc");
        for path in [&files.config, &files.instance, &files.decoder_output] {
            fs::write(path, "{}").expect("write");
        }
        assert_eq!(archive.store("abc", &files).expect("store"), 3);
        for name in [
            "instance-abc.json",
            "config-abc.json",
            "decoder-output-abc.json",
        ] {
            assert!(archive.root().join(name).exists(), "missing {}", name);
        }
        assert!(!files.instance.exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn discard_tolerates_partial_trials() {
        let root = temp_root("discard");
        let files = ScratchDir::new(&root).expect("scratch").trial_files("x");
        fs::write(&files.config, "{}").expect("write");
        files.discard().expect("discard");
        assert!(!files.config.exists());
        let _ = fs::remove_dir_all(root);
    }
}
