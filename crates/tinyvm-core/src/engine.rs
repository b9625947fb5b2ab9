use crate::application::ApplicationBuilder;
use crate::archive::write_archive;
use crate::concurrency::WorkspaceLock;
use crate::kernel::KernelBuilder;
use crate::report::{digest_file, timestamp, BuildReport};
use crate::rootfs::{DeviceReport, RootfsAssembler};
use crate::settings::BuildSettings;
use crate::workspace::Workspace;
use crate::CoreError;
use std::fmt;
use std::path::{Path, PathBuf};
use tinyvm_runtime::{Executor, SourceAcquirer};
use tinyvm_schema::BuildConfig;
use tracing::{info, warn};

/// Pipeline stages, reported to progress observers as they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Workspace,
    Kernel,
    Application,
    Rootfs,
    Archive,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Workspace => "preparing workspace",
            Self::Kernel => "building kernel",
            Self::Application => "building application",
            Self::Rootfs => "assembling rootfs",
            Self::Archive => "packing rootfs archive",
            Self::Report => "writing build report",
        };
        f.write_str(s)
    }
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildResult {
    pub workspace: Workspace,
    pub kernel_image: PathBuf,
    pub archive: PathBuf,
    pub report_path: PathBuf,
    pub report: BuildReport,
    pub devices: DeviceReport,
}

/// Runs the build pipeline.
///
/// The sequence is fixed: kernel through build, application install and
/// verification, rootfs assembly, kernel copy, archive, report. Any error ends
/// the run and leaves the workspace as it is for inspection or a rerun.
pub struct Engine<'a> {
    executor: &'a dyn Executor,
    acquirer: SourceAcquirer,
    settings: BuildSettings,
}

impl<'a> Engine<'a> {
    pub fn new(executor: &'a dyn Executor, settings: BuildSettings) -> Self {
        Self {
            executor,
            acquirer: SourceAcquirer::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    pub fn workspace(config: &BuildConfig, build_dir: &Path) -> Result<Workspace, CoreError> {
        Workspace::new(build_dir, &config.general.name)
    }

    pub fn build(&self, config: &BuildConfig, build_dir: &Path) -> Result<BuildResult, CoreError> {
        self.build_with_progress(config, build_dir, &|_: Stage| {})
    }

    pub fn build_with_progress(
        &self,
        config: &BuildConfig,
        build_dir: &Path,
        on_stage: &dyn Fn(Stage),
    ) -> Result<BuildResult, CoreError> {
        config.validate()?;
        let arch = config.arch()?;
        let (app_key, app) = config.selected_application()?;
        for ignored in config.ignored_applications() {
            warn!("only one application per image is supported; ignoring '{ignored}'");
        }
        let network = config.network_for(app);

        on_stage(Stage::Workspace);
        let workspace = Self::workspace(config, build_dir)?;
        let _lock = WorkspaceLock::acquire(&workspace.lock_file())?;
        workspace.initialize()?;
        info!(
            "building '{}' for {arch} in {}",
            config.general.name,
            workspace.root().display()
        );

        on_stage(Stage::Kernel);
        let source_dir = KernelBuilder::acquire(&self.acquirer, config, &workspace.kernel_dir())?;
        let mut kernel = KernelBuilder::new(self.executor, &self.settings, arch, source_dir)?;
        kernel.base_config()?;
        kernel.apply_options(&config.kernel.options)?;
        kernel.apply_patches(&config.kernel.patches)?;
        kernel.resolve_defaults()?;
        kernel.build()?;

        on_stage(Stage::Application);
        let rootfs_dir = workspace.rootfs_dir();
        ApplicationBuilder::new(self.executor, &self.settings, app_key, app).run_all(
            &self.acquirer,
            &workspace.apps_dir(),
            &rootfs_dir,
        )?;

        on_stage(Stage::Rootfs);
        let assembler = RootfsAssembler::new(
            self.executor,
            &self.settings,
            &rootfs_dir,
            workspace.generated_dir(),
        );
        assembler.create_skeleton()?;
        let devices = assembler.create_device_nodes();
        assembler.install_init(&app.exec_argv(), network.is_some())?;
        if let Some(net) = network {
            assembler.install_network(net)?;
        }
        assembler.install_terminfo()?;

        on_stage(Stage::Archive);
        let output_dir = workspace.output_dir();
        let kernel_image = kernel.copy_to_output(&output_dir)?;
        let archive = write_archive(self.executor, &rootfs_dir, &output_dir)?;

        on_stage(Stage::Report);
        let report = BuildReport {
            name: config.general.name.clone(),
            image_name: config.image_name().to_owned(),
            target_arch: arch.target_arch.to_owned(),
            kernel_version: config.kernel.version.clone(),
            application: app_key.to_owned(),
            network: network.is_some(),
            kernel_blake3: digest_file(&kernel_image)?,
            kernel_image: kernel_image.clone(),
            archive_blake3: digest_file(&archive)?,
            archive: archive.clone(),
            ignored_applications: config
                .ignored_applications()
                .into_iter()
                .map(str::to_owned)
                .collect(),
            device_failures: devices.failures.clone(),
            built_at: timestamp(),
        };
        let report_path = BuildReport::path_in(&output_dir, config.image_name());
        report.write(&report_path)?;
        info!("build complete: {}", output_dir.display());

        Ok(BuildResult {
            workspace,
            kernel_image,
            archive,
            report_path,
            report,
            devices,
        })
    }

    /// Delete the workspace of `config`. Returns whether anything was removed.
    pub fn clean(&self, config: &BuildConfig, build_dir: &Path) -> Result<bool, CoreError> {
        let workspace = Self::workspace(config, build_dir)?;
        if !workspace.exists() {
            return Ok(false);
        }
        let _lock = WorkspaceLock::acquire(&workspace.lock_file())?;
        workspace.remove()?;
        info!("removed {}", workspace.root().display());
        Ok(true)
    }
}
