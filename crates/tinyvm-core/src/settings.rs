use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TERMINFO_ROOT: &str = "/usr/share/terminfo";
pub const KERNEL_BUILD_TIMEOUT: Duration = Duration::from_secs(3600);

/// Compiler, linker and make invocation shared by every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub cc: String,
    pub ld: String,
    /// argv prefix used for every `make` call, e.g. `["make", "-j8"]`.
    pub make_command: Vec<String>,
    pub cross_compile: Option<String>,
}

impl Toolchain {
    /// `make_command` followed by `target`.
    pub fn make(&self, target: &str) -> Vec<String> {
        let mut argv = self.make_command.clone();
        argv.push(target.to_owned());
        argv
    }

    pub fn kernel_env(&self, kernel_arch: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("ARCH".to_owned(), kernel_arch.to_owned());
        env.insert("CC".to_owned(), self.cc.clone());
        if let Some(prefix) = &self.cross_compile {
            env.insert("CROSS_COMPILE".to_owned(), prefix.clone());
        }
        env
    }

    pub fn app_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("CC".to_owned(), self.cc.clone()),
            ("LD".to_owned(), self.ld.clone()),
        ])
    }
}

/// Host-side settings, read once from the environment and passed to every
/// stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub toolchain: Toolchain,
    /// Prefix for commands that need root, `["sudo", "-n"]` by default so a
    /// missing credential fails instead of prompting. Empty runs them directly.
    pub privilege_command: Vec<String>,
    pub terminfo_root: PathBuf,
    pub kernel_build_timeout: Duration,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl BuildSettings {
    /// Reads `CC`, `LD`, `MAKE_COMMAND`, `CROSS_COMPILE`, `TINYVM_PRIVILEGE`
    /// and `TINYVM_TERMINFO`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let cc = lookup("CC")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "cc".to_owned());
        let ld = lookup("LD")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "ld".to_owned());
        let make_command = lookup("MAKE_COMMAND")
            .and_then(|raw| split_or_warn("MAKE_COMMAND", &raw))
            .filter(|argv| !argv.is_empty())
            .unwrap_or_else(default_make_command);
        let cross_compile = lookup("CROSS_COMPILE").filter(|v| !v.is_empty());
        let privilege_command = match lookup("TINYVM_PRIVILEGE") {
            Some(raw) => split_or_warn("TINYVM_PRIVILEGE", &raw).unwrap_or_default(),
            None => vec!["sudo".to_owned(), "-n".to_owned()],
        };
        let terminfo_root = lookup("TINYVM_TERMINFO")
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_TERMINFO_ROOT), PathBuf::from);

        Self {
            toolchain: Toolchain {
                cc,
                ld,
                make_command,
                cross_compile,
            },
            privilege_command,
            terminfo_root,
            kernel_build_timeout: KERNEL_BUILD_TIMEOUT,
        }
    }

    /// `argv` prefixed with the privilege command.
    pub fn privileged(&self, argv: &[&str]) -> Vec<String> {
        self.privilege_command
            .iter()
            .cloned()
            .chain(argv.iter().map(|s| (*s).to_owned()))
            .collect()
    }
}

fn default_make_command() -> Vec<String> {
    let jobs = std::thread::available_parallelism().map_or(1, |n| n.get());
    vec!["make".to_owned(), format!("-j{jobs}")]
}

fn split_or_warn(var: &str, raw: &str) -> Option<Vec<String>> {
    let parsed = shlex::split(raw);
    if parsed.is_none() {
        warn!("ignoring {var}: unbalanced quotes in '{raw}'");
    }
    parsed
}
