use crate::CoreError;
use std::fs;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".tinyvm.lock";

/// Directory layout of one build: `<build_dir>/<name>-build/...`.
///
/// All paths are absolute so that stages can hand them to tools running in
/// other working directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Resolve the workspace for `name` under `build_dir`. `build_dir` is made
    /// absolute against the current directory; nothing is created yet.
    pub fn new(build_dir: &Path, name: &str) -> Result<Self, CoreError> {
        let base = if build_dir.is_absolute() {
            build_dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(build_dir)
        };
        Ok(Self {
            root: base.join(format!("{name}-build")),
        })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn kernel_dir(&self) -> PathBuf {
        self.root.join("kernel")
    }

    #[inline]
    pub fn apps_dir(&self) -> PathBuf {
        self.root.join("applications")
    }

    #[inline]
    pub fn rootfs_dir(&self) -> PathBuf {
        self.root.join("rootfs")
    }

    #[inline]
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output_vms")
    }

    /// Generated C sources. Kept outside the rootfs so they never end up in
    /// the archive.
    #[inline]
    pub fn generated_dir(&self) -> PathBuf {
        self.root.join("generated")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Create every directory. Safe to call on an existing workspace.
    pub fn initialize(&self) -> Result<(), CoreError> {
        for dir in [
            self.kernel_dir(),
            self.apps_dir(),
            self.rootfs_dir(),
            self.output_dir(),
            self.generated_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Remove the whole workspace. Missing workspaces are not an error.
    pub fn remove(&self) -> Result<(), CoreError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
