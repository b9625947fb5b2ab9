use std::fmt;
use std::path::PathBuf;

/// `(target_arch, kernel_arch, kernel_image)`
const ARCH_TABLE: &[(&str, &str, &str)] = &[
    ("aarch64", "arm64", "Image"),
    ("x86", "x86", "bzImage"),
    ("x86_64", "x86", "bzImage"),
];

/// Maps a configured target architecture to the kernel's `ARCH` value and the
/// image file the kernel build produces for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchMapping {
    pub target_arch: &'static str,
    pub kernel_arch: &'static str,
    pub kernel_image: &'static str,
}

impl ArchMapping {
    pub fn resolve(target_arch: &str) -> Option<Self> {
        ARCH_TABLE
            .iter()
            .find(|(target, _, _)| *target == target_arch)
            .map(|&(target_arch, kernel_arch, kernel_image)| Self {
                target_arch,
                kernel_arch,
                kernel_image,
            })
    }

    pub fn supported() -> Vec<&'static str> {
        ARCH_TABLE.iter().map(|(target, _, _)| *target).collect()
    }

    /// Location of the built image relative to the kernel source tree.
    pub fn image_relpath(&self) -> PathBuf {
        PathBuf::from("arch")
            .join(self.kernel_arch)
            .join("boot")
            .join(self.kernel_image)
    }
}

impl fmt::Display for ArchMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ARCH={}, image={})",
            self.target_arch, self.kernel_arch, self.kernel_image
        )
    }
}
