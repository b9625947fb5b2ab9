use super::{describe, load_config, EXIT_SUCCESS};
use std::path::Path;
use tinyvm_core::{BuildSettings, Engine};
use tinyvm_runtime::HostExecutor;

pub fn run(config_file: &Path, build_dir: &Path, json: bool) -> Result<u8, String> {
    let config = load_config(config_file)?;
    let workspace = Engine::workspace(&config, build_dir).map_err(|e| describe(&e))?;
    let executor = HostExecutor;
    let engine = Engine::new(&executor, BuildSettings::default());
    let removed = engine
        .clean(&config, build_dir)
        .map_err(|e| describe(&e))?;

    if json {
        let payload = serde_json::json!({
            "workspace": workspace.root(),
            "removed": removed,
        });
        println!("{}", super::json_pretty(&payload)?);
    } else if removed {
        println!("removed {}", workspace.root().display());
    } else {
        println!("nothing to clean at {}", workspace.root().display());
    }
    Ok(EXIT_SUCCESS)
}
