//! Batch configuration.
//!
//! Options come from two layers: an optional YAML settings file and the
//! command line. Both deserialize into [`Settings`], where every field is
//! optional; the command line layer is overlaid on the file layer and the
//! result is validated into a [`DriverConfig`].

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::sampling::{IntRange, ParameterRanges};

pub const DEFAULT_MIN_N: u64 = 1000;
pub const DEFAULT_MAX_N: u64 = 30000;
pub const DEFAULT_MIN_C: u64 = 1;
pub const DEFAULT_MAX_C: u64 = 60;
pub const DEFAULT_MIN_ELL: u64 = 1;
pub const DEFAULT_MAX_ELL: u64 = 400;

pub fn default_generator_command() -> Vec<String> {
    vec![
        "sage".to_string(),
        "../instance_generation/instance_generation.sage".to_string(),
    ]
}

/// Family of instances the generator is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceType {
    Adversarial,
}

impl InstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceType::Adversarial => "adversarial",
        }
    }

    /// Mode argument understood by the generator.
    pub fn mode_code(&self) -> &'static str {
        match self {
            InstanceType::Adversarial => "a",
        }
    }
}

impl FromStr for InstanceType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adversarial" => Ok(InstanceType::Adversarial),
            other => Err(ConfigError::UnknownInstanceType(other.to_string())),
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configuration layer. `None` means "not set here".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub threads: Option<u64>,
    pub iterations: Option<u64>,
    pub min_n: Option<u64>,
    pub max_n: Option<u64>,
    pub min_c: Option<u64>,
    pub max_c: Option<u64>,
    pub min_ell: Option<u64>,
    pub max_ell: Option<u64>,
    pub instance_type: Option<String>,
    pub low_polys: Option<bool>,
    pub fix_max_degree: Option<bool>,
    pub decoder_command: Option<PathBuf>,
    pub generator_command: Option<Vec<String>>,
    pub scratch_dir: Option<PathBuf>,
    pub tool_timeout_secs: Option<u64>,
    pub seed: Option<u64>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::SettingsParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Values set in `top` win over values set in `self`.
    pub fn overlay(self, top: Settings) -> Settings {
        Settings {
            threads: top.threads.or(self.threads),
            iterations: top.iterations.or(self.iterations),
            min_n: top.min_n.or(self.min_n),
            max_n: top.max_n.or(self.max_n),
            min_c: top.min_c.or(self.min_c),
            max_c: top.max_c.or(self.max_c),
            min_ell: top.min_ell.or(self.min_ell),
            max_ell: top.max_ell.or(self.max_ell),
            instance_type: top.instance_type.or(self.instance_type),
            low_polys: top.low_polys.or(self.low_polys),
            fix_max_degree: top.fix_max_degree.or(self.fix_max_degree),
            decoder_command: top.decoder_command.or(self.decoder_command),
            generator_command: top.generator_command.or(self.generator_command),
            scratch_dir: top.scratch_dir.or(self.scratch_dir),
            tool_timeout_secs: top.tool_timeout_secs.or(self.tool_timeout_secs),
            seed: top.seed.or(self.seed),
        }
    }

    /// Applies defaults and validates.
    pub fn resolve(
        self,
        logfile: PathBuf,
        cache_dir: PathBuf,
        revision: String,
    ) -> Result<DriverConfig, ConfigError> {
        let instance_type = self
            .instance_type
            .as_deref()
            .unwrap_or("adversarial")
            .parse::<InstanceType>()?;
        let ranges = ParameterRanges::new(
            IntRange::new(
                "n",
                self.min_n.unwrap_or(DEFAULT_MIN_N),
                self.max_n.unwrap_or(DEFAULT_MAX_N),
            )?,
            IntRange::new(
                "c",
                self.min_c.unwrap_or(DEFAULT_MIN_C),
                self.max_c.unwrap_or(DEFAULT_MAX_C),
            )?,
            IntRange::new(
                "ell",
                self.min_ell.unwrap_or(DEFAULT_MIN_ELL),
                self.max_ell.unwrap_or(DEFAULT_MAX_ELL),
            )?,
        )?;
        let threads = self.threads.unwrap_or(1);
        if threads == 0 {
            return Err(ConfigError::NonPositive { name: "threads" });
        }
        let decoder_command = self.decoder_command.ok_or(ConfigError::MissingDecoder)?;
        let generator_command = self
            .generator_command
            .unwrap_or_else(default_generator_command);
        if generator_command.is_empty() {
            return Err(ConfigError::EmptyGenerator);
        }
        Ok(DriverConfig {
            threads,
            iterations: self.iterations.unwrap_or(1),
            ranges,
            instance_type,
            low_polys: self.low_polys.unwrap_or(false),
            fix_max_degree: self.fix_max_degree.unwrap_or(false),
            decoder_command,
            generator_command,
            scratch_dir: self.scratch_dir.unwrap_or_else(|| PathBuf::from(".")),
            tool_timeout: self.tool_timeout_secs.map(Duration::from_secs),
            seed: self.seed,
            logfile,
            cache_dir,
            revision,
        })
    }
}

/// Validated configuration for a batch of trials.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Forwarded into the generator config; does not parallelize the driver.
    pub threads: u64,
    pub iterations: u64,
    pub ranges: ParameterRanges,
    pub instance_type: InstanceType,
    pub low_polys: bool,
    pub fix_max_degree: bool,
    pub decoder_command: PathBuf,
    pub generator_command: Vec<String>,
    pub scratch_dir: PathBuf,
    pub tool_timeout: Option<Duration>,
    pub seed: Option<u64>,
    pub logfile: PathBuf,
    pub cache_dir: PathBuf,
    pub revision: String,
}
