use crate::CoreError;
use std::fmt;

/// Progress of the kernel source tree through the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    Unconfigured,
    BaseConfigured,
    OptionsApplied,
    DefaultsResolved,
    Built,
    Copied,
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unconfigured => "unconfigured",
            Self::BaseConfigured => "base-configured",
            Self::OptionsApplied => "options-applied",
            Self::DefaultsResolved => "defaults-resolved",
            Self::Built => "built",
            Self::Copied => "copied",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: KernelState, to: KernelState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (KernelState::Unconfigured, KernelState::BaseConfigured)
            | (KernelState::BaseConfigured, KernelState::OptionsApplied)
            // Patching keeps the tree in OptionsApplied.
            | (KernelState::OptionsApplied, KernelState::OptionsApplied)
            | (KernelState::OptionsApplied, KernelState::DefaultsResolved)
            | (KernelState::DefaultsResolved, KernelState::Built)
            | (KernelState::Built, KernelState::Copied)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
