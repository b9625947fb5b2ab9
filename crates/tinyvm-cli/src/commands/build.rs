use super::{describe, json_pretty, load_config, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use std::path::Path;
use tinyvm_core::{BuildSettings, Engine, Stage};
use tinyvm_runtime::HostExecutor;

pub fn run(config_file: &Path, build_dir: &Path, json: bool) -> Result<u8, String> {
    let config = load_config(config_file)?;
    let executor = HostExecutor;
    let engine = Engine::new(&executor, BuildSettings::from_env());

    let pb = if json {
        None
    } else {
        Some(spinner("starting build..."))
    };
    let on_stage = |stage: Stage| {
        if let Some(ref pb) = pb {
            pb.set_message(format!("{stage}..."));
        }
    };

    let result = match engine.build_with_progress(&config, build_dir, &on_stage) {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "microVM image built");
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "build failed");
            }
            return Err(describe(&e));
        }
    };

    if json {
        println!("{}", json_pretty(&result.report)?);
    } else {
        println!("kernel:  {}", result.kernel_image.display());
        println!("rootfs:  {}", result.archive.display());
        println!("report:  {}", result.report_path.display());
        for failure in &result.devices.failures {
            println!("warning: /dev/{} not created: {}", failure.name, failure.reason);
        }
    }
    Ok(EXIT_SUCCESS)
}
