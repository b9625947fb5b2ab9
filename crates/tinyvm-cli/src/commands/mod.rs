pub mod build;
pub mod clean;
pub mod vm;

use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tinyvm_core::CoreError;
use tinyvm_schema::BuildConfig;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_VERIFICATION_FAILED: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// QMP run states that matter to a microVM user get a colour; others pass through.
pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "running" => Style::new().green().bold().apply_to(state).to_string(),
        "paused" => Style::new().yellow().apply_to(state).to_string(),
        "shutdown" => Style::new().dim().apply_to(state).to_string(),
        "internal-error" | "guest-panicked" | "io-error" => {
            Style::new().red().apply_to(state).to_string()
        }
        other => other.to_owned(),
    }
}

pub fn load_config(path: &Path) -> Result<BuildConfig, String> {
    tinyvm_schema::parse_config_file(path).map_err(|e| format!("config error: {e}"))
}

/// Render a core error with the prefix `main` maps to an exit code.
pub fn describe(err: &CoreError) -> String {
    match err {
        CoreError::Verification { .. } => format!("verification failed: {err}"),
        // already prefixed with "config error:"
        _ => err.to_string(),
    }
}
