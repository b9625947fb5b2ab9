//! Host-side execution layer for tinyvm builds.
//!
//! Every external tool the pipeline touches (compilers, `make`, `git`, `cpio`,
//! `mknod`) runs through the [`Executor`] trait, so stages can be exercised
//! against [`MockExecutor`] without a toolchain. Source tarballs are downloaded
//! and unpacked by [`SourceAcquirer`], which caches purely on presence.

pub mod acquire;
pub mod exec;
pub mod mock;
pub mod prereq;

pub use acquire::{predicted_dir_name, FetchOutcome, SourceAcquirer};
pub use exec::{CommandSpec, Executor, HostExecutor, ProcessOutput};
pub use mock::MockExecutor;
pub use prereq::{check_build_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command has no program to run")]
    EmptyCommand,
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed ({status}): {stderr}")]
    ProcessFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("`{command}` timed out after {seconds}s and was killed")]
    Timeout { command: String, seconds: u64 },
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },
    #[error("unsupported archive format: {0} (expected a .gz or .xz tarball)")]
    UnsupportedArchive(String),
    #[error("directory not found: {0}")]
    MissingDirectory(String),
}
