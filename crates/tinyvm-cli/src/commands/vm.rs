//! Commands that talk to an already-running VM through its QMP socket.

use super::{colorize_state, describe, json_pretty, load_config, EXIT_SUCCESS};
use std::path::{Path, PathBuf};
use tinyvm_control::{Negotiation, QmpClient};
use tinyvm_core::{Engine, ARCHIVE_NAME};

fn open(socket: &Path) -> Result<QmpClient, String> {
    QmpClient::open(socket).map_err(|e| e.to_string())
}

/// Both boot artifacts of a finished build: kernel image and rootfs archive.
fn artifacts(config_file: &Path, build_dir: &Path) -> Result<(PathBuf, PathBuf), String> {
    let config = load_config(config_file)?;
    let arch = config.arch().map_err(|e| format!("config error: {e}"))?;
    let workspace = Engine::workspace(&config, build_dir).map_err(|e| describe(&e))?;
    let output = workspace.output_dir();
    let kernel = output.join(arch.kernel_image);
    let archive = output.join(ARCHIVE_NAME);
    for path in [&kernel, &archive] {
        if !path.is_file() {
            return Err(format!(
                "missing build artifact {} (run `tinyvm build` first)",
                path.display()
            ));
        }
    }
    Ok((kernel, archive))
}

pub fn start(
    config_file: &Path,
    build_dir: &Path,
    socket: &Path,
    json: bool,
) -> Result<u8, String> {
    let (kernel, archive) = artifacts(config_file, build_dir)?;
    let mut client = QmpClient::connect(socket).map_err(|e| e.to_string())?;
    let negotiation = client.negotiate().map_err(|e| e.to_string())?;
    let status = client.query_status().map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "kernel": kernel,
            "initrd": archive,
            "socket": socket,
            "already_negotiated": negotiation == Negotiation::AlreadyComplete,
            "status": status,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("kernel:  {}", kernel.display());
        println!("initrd:  {}", archive.display());
        println!("monitor: {}", socket.display());
        println!("status:  {}", colorize_state(&status.status));
    }
    Ok(EXIT_SUCCESS)
}

pub fn stop(socket: &Path, json: bool) -> Result<u8, String> {
    open(socket)?.powerdown().map_err(|e| e.to_string())?;
    acknowledge(json, "system_powerdown", "powerdown requested")
}

pub fn pause(socket: &Path, json: bool) -> Result<u8, String> {
    open(socket)?.pause().map_err(|e| e.to_string())?;
    acknowledge(json, "stop", "VM paused")
}

pub fn resume(socket: &Path, json: bool) -> Result<u8, String> {
    open(socket)?.resume().map_err(|e| e.to_string())?;
    acknowledge(json, "cont", "VM resumed")
}

pub fn status(socket: &Path, json: bool) -> Result<u8, String> {
    let status = open(socket)?.query_status().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&status)?);
    } else {
        println!("status:  {}", colorize_state(&status.status));
        println!("running: {}", status.running);
    }
    Ok(EXIT_SUCCESS)
}

fn acknowledge(json: bool, command: &str, message: &str) -> Result<u8, String> {
    if json {
        let payload = serde_json::json!({ "command": command, "ok": true });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{message}");
    }
    Ok(EXIT_SUCCESS)
}
