//! Control of a running microVM over the QEMU Machine Protocol.
//!
//! The hypervisor is started with `-qmp unix:<socket>,server,nowait`; this
//! crate connects to that socket, negotiates capabilities, and issues the
//! lifecycle commands the CLI exposes.

pub mod qmp;

pub use qmp::{Negotiation, QmpClient, VmStatus};

/// Socket path used when none is given on the command line.
pub const DEFAULT_SOCKET: &str = "/tmp/qmp-socket";

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to connect to QMP socket {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("QMP I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("QMP protocol error: {0}")]
    Protocol(String),
    #[error("QMP command '{command}' failed ({class}): {desc}")]
    Command {
        command: String,
        class: String,
        desc: String,
    },
}
