use crate::lifecycle::{validate_transition, KernelState};
use crate::settings::BuildSettings;
use crate::CoreError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tinyvm_runtime::{CommandSpec, Executor, ProcessOutput, RuntimeError, SourceAcquirer};
use tinyvm_schema::{ArchMapping, BuildConfig, KconfigValue, OrderedTable};
use tracing::{debug, info};

/// A built kernel tree and the image inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArtifact {
    pub source_dir: PathBuf,
    pub image_path: PathBuf,
}

/// Drives one kernel source tree from `tinyconfig` to a copied boot image.
///
/// Every step checks its transition first, so calling steps out of order
/// fails with [`CoreError::InvalidTransition`] before any command runs.
pub struct KernelBuilder<'a> {
    executor: &'a dyn Executor,
    settings: &'a BuildSettings,
    arch: ArchMapping,
    source_dir: PathBuf,
    env: BTreeMap<String, String>,
    state: KernelState,
}

impl<'a> KernelBuilder<'a> {
    /// Download (if needed) and extract the kernel tarball into `kernel_dir`,
    /// returning the source tree.
    pub fn acquire(
        acquirer: &SourceAcquirer,
        config: &BuildConfig,
        kernel_dir: &Path,
    ) -> Result<PathBuf, CoreError> {
        let tarball = kernel_dir.join(config.kernel_tarball_name());
        let source_dir = acquirer.acquire(&config.kernel_url(), &tarball, kernel_dir)?;
        info!("kernel source at {}", source_dir.display());
        Ok(source_dir)
    }

    pub fn new(
        executor: &'a dyn Executor,
        settings: &'a BuildSettings,
        arch: ArchMapping,
        source_dir: impl Into<PathBuf>,
    ) -> Result<Self, CoreError> {
        let source_dir = source_dir.into();
        if !source_dir.is_dir() {
            return Err(RuntimeError::MissingDirectory(source_dir.display().to_string()).into());
        }
        let env = settings.toolchain.kernel_env(arch.kernel_arch);
        Ok(Self {
            executor,
            settings,
            arch,
            source_dir,
            env,
            state: KernelState::Unconfigured,
        })
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn image_path(&self) -> PathBuf {
        self.source_dir.join(self.arch.image_relpath())
    }

    /// `make tinyconfig`.
    pub fn base_config(&mut self) -> Result<(), CoreError> {
        validate_transition(self.state, KernelState::BaseConfigured)?;
        info!(
            "configuring kernel (tinyconfig, ARCH={})",
            self.arch.kernel_arch
        );
        self.run(self.settings.toolchain.make("tinyconfig"))?;
        self.state = KernelState::BaseConfigured;
        Ok(())
    }

    /// One `scripts/config --set-val` per option, in file order.
    pub fn apply_options(
        &mut self,
        options: &OrderedTable<KconfigValue>,
    ) -> Result<(), CoreError> {
        validate_transition(self.state, KernelState::OptionsApplied)?;
        for (key, value) in options.iter() {
            let value = value.unquoted();
            debug!("kconfig {key}={value}");
            self.run(vec![
                "scripts/config".to_owned(),
                "--set-val".to_owned(),
                key.to_owned(),
                value.to_owned(),
            ])?;
        }
        info!("applied {} kernel option(s)", options.len());
        self.state = KernelState::OptionsApplied;
        Ok(())
    }

    /// `git apply` each patch in order; the first failure aborts.
    pub fn apply_patches(&mut self, patches: &[PathBuf]) -> Result<(), CoreError> {
        validate_transition(self.state, KernelState::OptionsApplied)?;
        for patch in patches {
            info!("applying patch {}", patch.display());
            self.run(vec![
                "git".to_owned(),
                "apply".to_owned(),
                patch.display().to_string(),
            ])?;
        }
        Ok(())
    }

    /// `make olddefconfig`.
    pub fn resolve_defaults(&mut self) -> Result<(), CoreError> {
        validate_transition(self.state, KernelState::DefaultsResolved)?;
        self.run(self.settings.toolchain.make("olddefconfig"))?;
        self.state = KernelState::DefaultsResolved;
        Ok(())
    }

    /// Build the boot image. The only step with a timeout.
    pub fn build(&mut self) -> Result<KernelArtifact, CoreError> {
        validate_transition(self.state, KernelState::Built)?;
        info!("building kernel {}", self.arch.kernel_image);
        let spec = CommandSpec::new(
            self.settings.toolchain.make(self.arch.kernel_image),
            &self.source_dir,
        )
        .envs(&self.env)
        .timeout(self.settings.kernel_build_timeout);
        self.executor.run(&spec)?;
        self.state = KernelState::Built;
        Ok(KernelArtifact {
            source_dir: self.source_dir.clone(),
            image_path: self.image_path(),
        })
    }

    /// Copy the image into `output_dir`, keeping its file name.
    pub fn copy_to_output(&mut self, output_dir: &Path) -> Result<PathBuf, CoreError> {
        validate_transition(self.state, KernelState::Copied)?;
        let image = self.image_path();
        if !image.is_file() {
            return Err(CoreError::MissingArtifact(image.display().to_string()));
        }
        fs::create_dir_all(output_dir)?;
        let dest = output_dir.join(self.arch.kernel_image);
        fs::copy(&image, &dest)?;
        info!("kernel image copied to {}", dest.display());
        self.state = KernelState::Copied;
        Ok(dest)
    }

    fn run(&self, argv: Vec<String>) -> Result<ProcessOutput, CoreError> {
        let spec = CommandSpec::new(argv, &self.source_dir).envs(&self.env);
        Ok(self.executor.run(&spec)?)
    }
}
