//! How a composite handler reacts to a child's phase result.
//!
//! | child result                              | parent flag             | loop        |
//! |-------------------------------------------|-------------------------|-------------|
//! | `{Install,Apply}RequiredImmediateReboot`  | immediate reboot        | abort       |
//! | `{Install,Apply}RequiredReboot`           | reboot                  | proceed     |
//! | `{Install,Apply}RequiredImmediateAgentRestart` | immediate restart  | abort       |
//! | `{Install,Apply}RequiredAgentRestart`     | agent restart           | proceed     |
//! | `InstallSkipped*`                         | none                    | next sibling|
//! | any failure                               | none                    | abort       |
//! | any other success                         | none                    | proceed     |
//!
//! `Apply*` signals are surfaced as the matching `Install*` code.
//! Requests a child raised directly on its node (rather than through its
//! result code) are honored the same way.

use du_agent_core::{AducResult, ResultCode};
use du_agent_workflow::Interrupts;

/// What the parent's loop does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Continue with the next phase for this child, then its siblings.
    Proceed,
    /// This child needs no further phases; continue with the next sibling.
    NextSibling,
    /// Stop processing siblings and surface [`Translation::result`].
    Abort,
}

/// A child result as seen by its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    /// The result at the parent's level.
    pub result: AducResult,
    /// Requests the parent must raise on its own node.
    pub interrupts: Interrupts,
    /// Whether the parent's loop continues.
    pub disposition: Disposition,
}

impl Translation {
    /// Returns true if the parent must stop its sibling loop.
    #[must_use]
    pub fn aborts(&self) -> bool {
        self.disposition == Disposition::Abort
    }
}

/// Classify a child's result together with the requests raised on its node.
#[must_use]
pub fn translate(result: AducResult, raised: Interrupts) -> Translation {
    use ResultCode as R;

    let signalled = match result.code {
        R::InstallRequiredImmediateReboot | R::ApplyRequiredImmediateReboot => Interrupts {
            immediate_reboot: true,
            ..Interrupts::default()
        },
        R::InstallRequiredReboot | R::ApplyRequiredReboot => Interrupts {
            reboot: true,
            ..Interrupts::default()
        },
        R::InstallRequiredImmediateAgentRestart | R::ApplyRequiredImmediateAgentRestart => {
            Interrupts {
                immediate_agent_restart: true,
                ..Interrupts::default()
            }
        }
        R::InstallRequiredAgentRestart | R::ApplyRequiredAgentRestart => Interrupts {
            agent_restart: true,
            ..Interrupts::default()
        },
        _ => Interrupts::default(),
    };
    let interrupts = signalled.merge(raised);

    let code = match result.code {
        R::ApplyRequiredImmediateReboot => R::InstallRequiredImmediateReboot,
        R::ApplyRequiredReboot => R::InstallRequiredReboot,
        R::ApplyRequiredImmediateAgentRestart => R::InstallRequiredImmediateAgentRestart,
        R::ApplyRequiredAgentRestart => R::InstallRequiredAgentRestart,
        other => other,
    };

    let (code, disposition) = if result.is_failure() {
        (code, Disposition::Abort)
    } else if interrupts.immediate_reboot {
        (R::InstallRequiredImmediateReboot, Disposition::Abort)
    } else if interrupts.immediate_agent_restart {
        (R::InstallRequiredImmediateAgentRestart, Disposition::Abort)
    } else if matches!(
        code,
        R::InstallSkippedUpdateAlreadyInstalled | R::InstallSkippedNoMatchingComponents
    ) {
        (code, Disposition::NextSibling)
    } else {
        (code, Disposition::Proceed)
    };

    Translation {
        result: AducResult::new(code, result.extended_code),
        interrupts,
        disposition,
    }
}
