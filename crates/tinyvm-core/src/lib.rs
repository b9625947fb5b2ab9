//! Build pipeline for tinyvm microVM images.
//!
//! The [`Engine`] drives a fixed sequence of stages against a [`Workspace`]:
//! kernel configuration and build, application build and install, rootfs
//! assembly with a generated init, and packaging into a newc cpio archive.
//! External tools are reached only through [`tinyvm_runtime::Executor`].

pub mod application;
pub mod archive;
pub mod concurrency;
pub mod engine;
pub mod initgen;
pub mod kernel;
pub mod lifecycle;
pub mod report;
pub mod rootfs;
pub mod settings;
pub mod workspace;

pub use application::ApplicationBuilder;
pub use archive::{write_archive, ARCHIVE_NAME};
pub use concurrency::WorkspaceLock;
pub use engine::{BuildResult, Engine, Stage};
pub use kernel::{KernelArtifact, KernelBuilder};
pub use lifecycle::{validate_transition, KernelState};
pub use report::BuildReport;
pub use rootfs::{DeviceFailure, DeviceReport, RootfsAssembler};
pub use settings::{BuildSettings, Toolchain};
pub use workspace::Workspace;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(#[from] tinyvm_schema::ConfigError),
    #[error("runtime error: {0}")]
    Runtime(#[from] tinyvm_runtime::RuntimeError),
    #[error("application '{app}' did not install {executable} into the rootfs")]
    Verification { app: String, executable: String },
    #[error("cannot parse {field} '{value}' as a command line")]
    InvalidCommand { field: &'static str, value: String },
    #[error("expected build artifact missing: {0}")]
    MissingArtifact(String),
    #[error("failed to create rootfs archive: {0}")]
    Archive(String),
    #[error("invalid kernel stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("workspace is locked by another build: {0}")]
    Locked(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
