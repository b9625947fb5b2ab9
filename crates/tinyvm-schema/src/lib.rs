//! Build configuration schema for tinyvm.
//!
//! This crate defines the typed view of a microVM build: TOML config parsing
//! (`BuildConfig`), per-application build instructions (`AppSpec`), boot-time
//! network parameters, and the fixed target-to-kernel architecture table
//! (`ArchMapping`). Every default lives next to the field it applies to.

pub mod arch;
pub mod config;
pub mod ordered;

pub use arch::ArchMapping;
pub use config::{
    parse_config_file, parse_config_str, AppSpec, BootSection, BuildConfig, ConfigError,
    GeneralSection, KernelSection, NetworkConfig, OutputSection, DEFAULT_IMAGE_NAME,
    DEFAULT_INSTALL_COMMAND,
};
pub use ordered::{KconfigValue, OrderedTable};
