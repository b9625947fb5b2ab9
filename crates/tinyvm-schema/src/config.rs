use crate::arch::ArchMapping;
use crate::ordered::{KconfigValue, OrderedTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Output image name used when `output.image_name` is not set.
pub const DEFAULT_IMAGE_NAME: &str = "microvm";
/// Install command used when an application does not set `install_command`.
pub const DEFAULT_INSTALL_COMMAND: &str = "make install";

const KERNEL_MIRROR: &str = "https://cdn.kernel.org/pub/linux/kernel";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("general.name must not be empty or contain '/'")]
    InvalidName,
    #[error("unsupported general.target_arch '{arch}', expected one of: {supported}")]
    UnsupportedArch { arch: String, supported: String },
    #[error("kernel.version must not be empty")]
    EmptyKernelVersion,
    #[error("no applications configured")]
    NoApplications,
    #[error("application '{0}': url must not be empty")]
    EmptyAppUrl(String),
    #[error("application '{0}': output_executable_path must be an absolute path")]
    RelativeExecutable(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub general: GeneralSection,
    pub kernel: KernelSection,
    pub applications: OrderedTable<AppSpec>,
    #[serde(default)]
    pub boot: BootSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GeneralSection {
    pub name: String,
    #[serde(default = "default_target_arch")]
    pub target_arch: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KernelSection {
    pub version: String,
    /// Overrides the versioned kernel.org mirror URL.
    #[serde(default)]
    pub url: Option<String>,
    /// kconfig overrides, applied in file order.
    #[serde(default)]
    pub options: OrderedTable<KconfigValue>,
    /// Patch files applied in list order. Relative paths are resolved against
    /// the config file's directory by [`parse_config_file`].
    #[serde(default)]
    pub patches: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppSpec {
    pub url: String,
    /// Configure step, shell-split. Skipped when absent.
    #[serde(default)]
    pub config_script: Option<String>,
    /// Build step, shell-split. Defaults to the host make command.
    #[serde(default)]
    pub build_command: Option<String>,
    /// Install step, shell-split, with `DESTDIR=<rootfs>` appended.
    #[serde(default = "default_install_command")]
    pub install_command: String,
    /// Absolute path inside the VM plus optional arguments, e.g. `/bin/app -v`.
    pub output_executable_path: String,
    #[serde(default)]
    pub include_net: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BootSection {
    #[serde(default)]
    pub network: Option<NetworkConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub ip_address: String,
    pub netmask: String,
    pub gateway: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    #[serde(default)]
    pub image_name: Option<String>,
}

fn default_target_arch() -> String {
    "x86_64".to_owned()
}

fn default_install_command() -> String {
    DEFAULT_INSTALL_COMMAND.to_owned()
}

impl BuildConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.name.trim().is_empty() || self.general.name.contains('/') {
            return Err(ConfigError::InvalidName);
        }
        self.arch()?;
        if self.kernel.version.trim().is_empty() {
            return Err(ConfigError::EmptyKernelVersion);
        }
        if self.applications.is_empty() {
            return Err(ConfigError::NoApplications);
        }
        for (key, app) in self.applications.iter() {
            if app.url.trim().is_empty() {
                return Err(ConfigError::EmptyAppUrl(key.to_owned()));
            }
            if !app.executable().starts_with('/') {
                return Err(ConfigError::RelativeExecutable(key.to_owned()));
            }
        }
        Ok(())
    }

    pub fn arch(&self) -> Result<ArchMapping, ConfigError> {
        ArchMapping::resolve(&self.general.target_arch).ok_or_else(|| {
            ConfigError::UnsupportedArch {
                arch: self.general.target_arch.clone(),
                supported: ArchMapping::supported().join(", "),
            }
        })
    }

    /// The single application this build produces: the first table entry.
    pub fn selected_application(&self) -> Result<(&str, &AppSpec), ConfigError> {
        self.applications.first().ok_or(ConfigError::NoApplications)
    }

    /// Keys of configured applications that a build ignores.
    pub fn ignored_applications(&self) -> Vec<&str> {
        self.applications.keys().skip(1).collect()
    }

    pub fn kernel_url(&self) -> String {
        if let Some(url) = &self.kernel.url {
            return url.clone();
        }
        let version = &self.kernel.version;
        let major = version.split('.').next().unwrap_or(version);
        format!("{KERNEL_MIRROR}/v{major}.x/linux-{version}.tar.xz")
    }

    pub fn kernel_tarball_name(&self) -> String {
        format!("linux-{}.tar.xz", self.kernel.version)
    }

    /// Network bootstrap parameters, present only when the application asks
    /// for networking and the boot section supplies it.
    pub fn network_for<'a>(&'a self, app: &AppSpec) -> Option<&'a NetworkConfig> {
        if app.include_net {
            self.boot.network.as_ref()
        } else {
            None
        }
    }

    pub fn image_name(&self) -> &str {
        self.output
            .image_name
            .as_deref()
            .unwrap_or(DEFAULT_IMAGE_NAME)
    }

    fn resolve_patch_paths(&mut self, base: &Path) {
        for patch in &mut self.kernel.patches {
            if patch.is_relative() {
                *patch = base.join(&*patch);
            }
        }
    }
}

impl AppSpec {
    /// Path of the executable inside the VM, without arguments.
    pub fn executable(&self) -> &str {
        self.output_executable_path
            .split_whitespace()
            .next()
            .unwrap_or("")
    }

    /// argv handed to the executable by init, `argv[0]` included.
    pub fn exec_argv(&self) -> Vec<String> {
        self.output_executable_path
            .split_whitespace()
            .map(str::to_owned)
            .collect()
    }

    /// File name the source tarball is cached under.
    pub fn tarball_name(&self) -> String {
        self.url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.trim_end_matches('/').rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("application.tar.gz")
            .to_owned()
    }
}

pub fn parse_config_str(input: &str) -> Result<BuildConfig, ConfigError> {
    let config: BuildConfig = toml::from_str(input)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<BuildConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let mut config = parse_config_str(&content)?;
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    config.resolve_patch_paths(base);
    Ok(config)
}
