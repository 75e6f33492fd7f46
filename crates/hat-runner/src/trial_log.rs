//! Append-only CSV log, one row per trial.

use anyhow::Result;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const FIELD_NAMES: [&str; 17] = [
    "id",
    "githash",
    "instance_type",
    "min_n",
    "max_n",
    "min_c",
    "max_c",
    "min_ell",
    "max_ell",
    "n",
    "c",
    "ell",
    "t",
    "is_nice",
    "low_polys",
    "fixed_max_degree",
    "succeeded",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialRecord {
    pub id: String,
    pub githash: String,
    pub instance_type: String,
    pub min_n: u64,
    pub max_n: u64,
    pub min_c: u64,
    pub max_c: u64,
    pub min_ell: u64,
    pub max_ell: u64,
    pub n: u64,
    pub c: u64,
    pub ell: u64,
    pub t: u64,
    /// `None` when no instance was read.
    pub is_nice: Option<bool>,
    pub low_polys: bool,
    pub fixed_max_degree: bool,
    pub succeeded: bool,
}

impl TrialRecord {
    fn fields(&self) -> [String; 17] {
        [
            self.id.clone(),
            self.githash.clone(),
            self.instance_type.clone(),
            self.min_n.to_string(),
            self.max_n.to_string(),
            self.min_c.to_string(),
            self.max_c.to_string(),
            self.min_ell.to_string(),
            self.max_ell.to_string(),
            self.n.to_string(),
            self.c.to_string(),
            self.ell.to_string(),
            self.t.to_string(),
            self.is_nice.map(format_bool).unwrap_or_default(),
            format_bool(self.low_polys),
            format_bool(self.fixed_max_degree),
            format_bool(self.succeeded),
        ]
    }
}

fn format_bool(v: bool) -> String {
    let s = if v { "True" } else { "False" };
    s.to_string()
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

/// Log file shared across runs. Rows are only ever appended.
#[derive(Debug, Clone)]
pub struct TrialLog {
    path: PathBuf,
}

impl TrialLog {
    /// Opens (creating if needed) the log once so an unwritable path fails
    /// before any trial runs.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let log = Self { path: path.into() };
        log.open_append()?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_append(&self) -> Result<File> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?)
    }

    /// Appends `record`, writing the header first if the file is empty.
    pub fn append(&self, record: &TrialRecord) -> Result<()> {
        let mut file = self.open_append()?;
        let mut out = String::new();
        if file.metadata()?.len() == 0 {
            out.push_str(&csv_line(&FIELD_NAMES));
        }
        out.push_str(&csv_line(&record.fields()));
        file.write_all(out.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
