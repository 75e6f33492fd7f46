use std::path::Path;
use std::process::Command;

use crate::error::ConfigError;

pub const SHORT_REVISION_LEN: usize = 7;

/// Short commit hash of the checkout containing `dir` (searching parent
/// directories, as git does).
pub fn resolve_revision(dir: &Path) -> Result<String, ConfigError> {
    let output = Command::new("git")
        .arg("rev-parse")
        .arg("HEAD")
        .current_dir(dir)
        .output()
        .map_err(|e| ConfigError::Revision(format!("failed to execute git: {}", e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ConfigError::Revision(format!(
            "{}: {}",
            dir.display(),
            stderr.trim()
        )));
    }
    short_revision(&String::from_utf8_lossy(&output.stdout))
}

fn short_revision(raw: &str) -> Result<String, ConfigError> {
    let sha = raw.trim();
    if sha.len() < SHORT_REVISION_LEN || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::Revision(format!(
            "unexpected rev-parse output: {:?}",
            sha
        )));
    }
    Ok(sha[..SHORT_REVISION_LEN].to_string())
}
