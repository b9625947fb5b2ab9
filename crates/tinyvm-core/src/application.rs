use crate::settings::BuildSettings;
use crate::CoreError;
use std::path::{Path, PathBuf};
use tinyvm_runtime::{CommandSpec, Executor, SourceAcquirer};
use tinyvm_schema::AppSpec;
use tracing::{error, info};

/// Builds the selected application and installs it into the rootfs.
pub struct ApplicationBuilder<'a> {
    executor: &'a dyn Executor,
    settings: &'a BuildSettings,
    key: &'a str,
    app: &'a AppSpec,
}

impl<'a> ApplicationBuilder<'a> {
    pub fn new(
        executor: &'a dyn Executor,
        settings: &'a BuildSettings,
        key: &'a str,
        app: &'a AppSpec,
    ) -> Self {
        Self {
            executor,
            settings,
            key,
            app,
        }
    }

    pub fn acquire(
        &self,
        acquirer: &SourceAcquirer,
        apps_dir: &Path,
    ) -> Result<PathBuf, CoreError> {
        let tarball = apps_dir.join(self.app.tarball_name());
        let source_dir = acquirer.acquire(&self.app.url, &tarball, apps_dir)?;
        info!("application '{}' source at {}", self.key, source_dir.display());
        Ok(source_dir)
    }

    /// Run `config_script`, if any.
    pub fn configure(&self, source_dir: &Path) -> Result<(), CoreError> {
        let Some(script) = &self.app.config_script else {
            return Ok(());
        };
        info!("configuring '{}'", self.key);
        let argv = split_command("config_script", script)?;
        self.run(argv, source_dir)
    }

    pub fn build(&self, source_dir: &Path) -> Result<(), CoreError> {
        info!("building '{}'", self.key);
        let argv = match &self.app.build_command {
            Some(cmd) => split_command("build_command", cmd)?,
            None => self.settings.toolchain.make_command.clone(),
        };
        self.run(argv, source_dir)
    }

    /// Run the install command with `DESTDIR=<rootfs>` appended.
    pub fn install(&self, source_dir: &Path, rootfs: &Path) -> Result<(), CoreError> {
        info!("installing '{}' into {}", self.key, rootfs.display());
        let mut argv = split_command("install_command", &self.app.install_command)?;
        argv.push(format!("DESTDIR={}", rootfs.display()));
        self.run(argv, source_dir)
    }

    /// Check that the declared executable landed in the rootfs.
    pub fn verify(&self, rootfs: &Path) -> Result<PathBuf, CoreError> {
        let executable = self.app.executable();
        let installed = rootfs.join(executable.trim_start_matches('/'));
        if installed.exists() {
            info!("verified {executable} in rootfs");
            return Ok(installed);
        }
        error!(
            "application '{}' did not install {executable} (looked for {})",
            self.key,
            installed.display()
        );
        Err(CoreError::Verification {
            app: self.key.to_owned(),
            executable: executable.to_owned(),
        })
    }

    /// Acquire, configure, build, install and verify.
    pub fn run_all(
        &self,
        acquirer: &SourceAcquirer,
        apps_dir: &Path,
        rootfs: &Path,
    ) -> Result<PathBuf, CoreError> {
        let source_dir = self.acquire(acquirer, apps_dir)?;
        self.configure(&source_dir)?;
        self.build(&source_dir)?;
        self.install(&source_dir, rootfs)?;
        self.verify(rootfs)
    }

    fn run(&self, argv: Vec<String>, source_dir: &Path) -> Result<(), CoreError> {
        let spec = CommandSpec::new(argv, source_dir).envs(&self.settings.toolchain.app_env());
        self.executor.run(&spec)?;
        Ok(())
    }
}

fn split_command(field: &'static str, raw: &str) -> Result<Vec<String>, CoreError> {
    shlex::split(raw)
        .filter(|argv| !argv.is_empty())
        .ok_or_else(|| CoreError::InvalidCommand {
            field,
            value: raw.to_owned(),
        })
}
