//! Workspace staging and collection
//!
//! Stages uploaded input files into an execution's staging directory and,
//! after the run, collects any newly created files for client download.
//! Upload violations reject the whole request before anything is staged.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::sandbox::{Sandbox, SandboxError};
use crate::types::{GeneratedFile, UploadedFile};

/// Errors that occur during staging or collection
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("too many files: {count} uploaded, limit is {max}")]
    TooManyFiles { count: usize, max: usize },

    #[error("file '{name}' is {size} bytes, limit is {max}")]
    FileTooLarge { name: String, size: u64, max: u64 },

    #[error("file '{name}' has a disallowed extension")]
    DisallowedExtension { name: String },

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("file '{0}' not found in workspace")]
    NotFound(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Upload acceptance rules
#[derive(Debug, Clone, Deserialize)]
pub struct UploadPolicy {
    /// Per-file size cap in bytes
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Maximum number of files per request
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Allowed file extensions, without the dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_files: default_max_files(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl UploadPolicy {
    /// Check a whole upload set against the policy.
    ///
    /// Any violation rejects the entire request; no partial staging occurs.
    pub fn check(&self, files: &[UploadedFile]) -> Result<(), WorkspaceError> {
        if files.len() > self.max_files {
            return Err(WorkspaceError::TooManyFiles {
                count: files.len(),
                max: self.max_files,
            });
        }

        for file in files {
            if file.name.is_empty() || file.name.contains("..") || file.name.contains('/') {
                return Err(WorkspaceError::InvalidName(file.name.clone()));
            }

            let size = file.content.len() as u64;
            if size > self.max_file_bytes {
                return Err(WorkspaceError::FileTooLarge {
                    name: file.name.clone(),
                    size,
                    max: self.max_file_bytes,
                });
            }

            let extension = file.name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
            let allowed = self
                .allowed_extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(extension));
            if !allowed {
                return Err(WorkspaceError::DisallowedExtension {
                    name: file.name.clone(),
                });
            }
        }

        Ok(())
    }
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_files() -> usize {
    20
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "txt", "csv", "json", "xml", "yaml", "yml", "md", "dat", "in", "py", "js", "ts", "c",
        "cpp", "h", "hpp", "java", "rs", "go",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Stage uploaded files into a sandbox.
///
/// The whole set is checked against the policy before the first byte is
/// written. Returns the staged file names.
#[instrument(skip(sandbox, files, policy))]
pub async fn stage(
    sandbox: &Sandbox,
    policy: &UploadPolicy,
    files: &[UploadedFile],
) -> Result<Vec<String>, WorkspaceError> {
    policy.check(files)?;

    let mut staged = Vec::with_capacity(files.len());
    for file in files {
        sandbox.write_file(&file.name, &file.content).await?;
        staged.push(file.name.clone());
    }

    debug!(count = staged.len(), "staged upload set");
    Ok(staged)
}

/// Collect files generated by an execution.
///
/// Walks the staging directory and returns every file not present in the
/// original input set. Oversized outputs are flagged as truncated rather
/// than dropped; their recorded size is the real on-disk size.
#[instrument(skip(sandbox, policy, known_inputs))]
pub async fn collect(
    sandbox: &Sandbox,
    policy: &UploadPolicy,
    known_inputs: &HashSet<String>,
) -> Result<Vec<GeneratedFile>, WorkspaceError> {
    let root = sandbox.path().to_path_buf();
    let mut generated = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.clone()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = entry.metadata().await?;

            if meta.is_dir() {
                pending.push(path);
                continue;
            }

            let relative = path
                .strip_prefix(&root)
                .map_err(|_| WorkspaceError::InvalidName(path.display().to_string()))?
                .to_string_lossy()
                .into_owned();

            if known_inputs.contains(&relative) {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let size = meta.len();
            generated.push(GeneratedFile {
                name,
                relative_path: relative,
                size,
                truncated: size > policy.max_file_bytes,
            });
        }
    }

    generated.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    debug!(count = generated.len(), "collected generated files");
    Ok(generated)
}

/// Read a generated file's content, capped at the policy's per-file limit.
///
/// Returns the (possibly truncated) bytes and whether truncation occurred.
pub async fn read_generated(
    sandbox: &Sandbox,
    policy: &UploadPolicy,
    relative_path: &str,
) -> Result<(Vec<u8>, bool), WorkspaceError> {
    if !sandbox.file_exists(relative_path).await? {
        return Err(WorkspaceError::NotFound(relative_path.to_string()));
    }

    let mut content = sandbox.read_file(relative_path).await?;
    let cap = policy.max_file_bytes as usize;
    let truncated = content.len() > cap;
    if truncated {
        content.truncate(cap);
    }
    Ok((content, truncated))
}
