use std::fmt;
use std::path::Path;

/// A host tool the build needs but cannot find on `PATH`.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

const BUILD_TOOLS: &[(&str, &str, &str)] = &[
    (
        "make",
        "kernel and application builds",
        "apt install make | dnf install make | pacman -S make",
    ),
    (
        "cc",
        "compiling the init and network setup programs",
        "apt install build-essential | dnf install gcc | pacman -S gcc",
    ),
    (
        "git",
        "applying kernel patches",
        "apt install git | dnf install git | pacman -S git",
    ),
    (
        "cpio",
        "packing the root filesystem",
        "apt install cpio | dnf install cpio | pacman -S cpio",
    ),
    (
        "find",
        "listing root filesystem entries",
        "part of findutils (usually pre-installed)",
    ),
    (
        "mknod",
        "creating device nodes",
        "part of coreutils (usually pre-installed)",
    ),
];

/// Whether `name` resolves to a file in one of the `PATH` directories.
pub fn command_exists(name: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| is_executable(&dir.join(name)))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Check every host tool the build pipeline shells out to.
/// An empty list means the host is ready.
pub fn check_build_prereqs() -> Vec<MissingPrereq> {
    check_with(command_exists)
}

fn check_with(exists: impl Fn(&str) -> bool) -> Vec<MissingPrereq> {
    BUILD_TOOLS
        .iter()
        .filter(|(name, _, _)| !exists(name))
        .map(|&(name, purpose, install_hint)| MissingPrereq {
            name,
            purpose,
            install_hint,
        })
        .collect()
}

pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\ntinyvm needs these tools on the build host to produce a microVM image.");
    msg
}
