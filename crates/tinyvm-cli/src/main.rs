mod commands;

use clap::{Parser, Subcommand};
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_VERIFICATION_FAILED};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "tinyvm",
    version,
    about = "Build and control minimal Linux microVM images"
)]
struct Cli {
    /// Path to the build configuration file.
    #[arg(short, long, default_value = "config.toml", global = true)]
    config_file: PathBuf,

    /// Directory that holds the `<name>-build` workspace.
    #[arg(short, long, default_value = ".", global = true)]
    build_dir: PathBuf,

    /// QMP socket of the running VM monitor.
    #[arg(long, default_value = tinyvm_control::DEFAULT_SOCKET, global = true)]
    socket: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the kernel, application, and rootfs archive.
    Build,
    /// Check the built artifacts and attach to the VM monitor.
    Start,
    /// Power the VM down.
    Stop,
    /// Pause VM execution.
    Pause,
    /// Resume a paused VM.
    Resume,
    /// Show the VM run state.
    Status,
    /// Delete the build workspace.
    Clean,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TINYVM_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if matches!(cli.command, Commands::Build)
        && std::env::var("TINYVM_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let missing = tinyvm_runtime::check_build_prereqs();
        if !missing.is_empty() {
            eprintln!("error: {}", tinyvm_runtime::format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Build => commands::build::run(&cli.config_file, &cli.build_dir, json_output),
        Commands::Start => {
            commands::vm::start(&cli.config_file, &cli.build_dir, &cli.socket, json_output)
        }
        Commands::Stop => commands::vm::stop(&cli.socket, json_output),
        Commands::Pause => commands::vm::pause(&cli.socket, json_output),
        Commands::Resume => commands::vm::resume(&cli.socket, json_output),
        Commands::Status => commands::vm::status(&cli.socket, json_output),
        Commands::Clean => commands::clean::run(&cli.config_file, &cli.build_dir, json_output),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("verification failed:") {
                EXIT_VERIFICATION_FAILED
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
