//! Reboot and agent-restart actions.
//!
//! The driver acts on the reboot and restart requests a workflow raises
//! through a [`SystemActions`] implementation.

use std::sync::Arc;

use async_trait::async_trait;
use du_agent_handlers::CommandLauncher;
use tokio::sync::Notify;

use crate::error::{AgentError, Result};

/// Device-level actions requested by update content.
#[async_trait]
pub trait SystemActions: Send + Sync {
    /// Reboot the device.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::SystemAction` if the reboot could not be started.
    async fn reboot(&self) -> Result<()>;

    /// Restart the agent process.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::SystemAction` if the restart could not be requested.
    async fn restart_agent(&self) -> Result<()>;
}

/// Reboots through the privileged launcher and restarts the agent by
/// signalling its main loop, which exits so the service manager starts it
/// again.
pub struct LauncherSystemActions {
    launcher: Arc<dyn CommandLauncher>,
    restart: Arc<Notify>,
}

impl LauncherSystemActions {
    /// Create system actions backed by `launcher`. `restart` is notified
    /// when an agent restart is requested.
    #[must_use]
    pub fn new(launcher: Arc<dyn CommandLauncher>, restart: Arc<Notify>) -> Self {
        Self { launcher, restart }
    }
}

impl std::fmt::Debug for LauncherSystemActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LauncherSystemActions").finish_non_exhaustive()
    }
}

#[async_trait]
impl SystemActions for LauncherSystemActions {
    async fn reboot(&self) -> Result<()> {
        tracing::warn!("Rebooting the device");
        let launcher = Arc::clone(&self.launcher);
        let args: Vec<String> = ["--update-type", "common", "--update-action", "reboot"]
            .into_iter()
            .map(str::to_string)
            .collect();

        let status = tokio::task::spawn_blocking(move || launcher.launch(&args))
            .await
            .map_err(|e| AgentError::Worker(e.to_string()))?
            .map_err(|e| AgentError::SystemAction(format!("cannot launch reboot: {e}")))?;

        match status {
            Some(0) => Ok(()),
            Some(code) => Err(AgentError::SystemAction(format!(
                "reboot exited with status {code}"
            ))),
            None => Err(AgentError::SystemAction(
                "reboot was terminated by a signal".to_string(),
            )),
        }
    }

    async fn restart_agent(&self) -> Result<()> {
        tracing::warn!("Restarting the agent");
        self.restart.notify_one();
        Ok(())
    }
}

/// Logs requested actions without performing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSystemActions;

#[async_trait]
impl SystemActions for NoopSystemActions {
    async fn reboot(&self) -> Result<()> {
        tracing::info!("Reboot requested (not performed)");
        Ok(())
    }

    async fn restart_agent(&self) -> Result<()> {
        tracing::info!("Agent restart requested (not performed)");
        Ok(())
    }
}

/// System actions that record what was requested.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::{async_trait, Result, SystemActions};
    use parking_lot::Mutex;

    /// A requested action.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SystemAction {
        /// [`SystemActions::reboot`].
        Reboot,
        /// [`SystemActions::restart_agent`].
        RestartAgent,
    }

    /// Records every request in order.
    #[derive(Debug, Default)]
    pub struct RecordingSystemActions {
        requested: Mutex<Vec<SystemAction>>,
    }

    impl RecordingSystemActions {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Every request so far.
        #[must_use]
        pub fn requested(&self) -> Vec<SystemAction> {
            self.requested.lock().clone()
        }
    }

    #[async_trait]
    impl SystemActions for RecordingSystemActions {
        async fn reboot(&self) -> Result<()> {
            self.requested.lock().push(SystemAction::Reboot);
            Ok(())
        }

        async fn restart_agent(&self) -> Result<()> {
            self.requested.lock().push(SystemAction::RestartAgent);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct ScriptedLauncher {
        exit: Option<i32>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl CommandLauncher for ScriptedLauncher {
        fn launch(&self, args: &[String]) -> std::io::Result<Option<i32>> {
            self.calls.lock().push(args.to_vec());
            Ok(self.exit)
        }
    }

    fn actions(exit: Option<i32>) -> (LauncherSystemActions, Arc<ScriptedLauncher>, Arc<Notify>) {
        let launcher = Arc::new(ScriptedLauncher {
            exit,
            calls: Mutex::new(Vec::new()),
        });
        let restart = Arc::new(Notify::new());
        let actions = LauncherSystemActions::new(
            Arc::clone(&launcher) as Arc<dyn CommandLauncher>,
            Arc::clone(&restart),
        );
        (actions, launcher, restart)
    }

    #[tokio::test]
    async fn reboot_goes_through_the_launcher() {
        let (actions, launcher, _) = actions(Some(0));

        actions.reboot().await.unwrap();

        let calls = launcher.calls.lock().clone();
        assert_eq!(
            calls,
            vec![vec!["--update-type", "common", "--update-action", "reboot"]
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()]
        );
    }

    #[tokio::test]
    async fn failed_reboot_is_an_error() {
        let (actions, _, _) = actions(Some(1));
        assert!(matches!(
            actions.reboot().await,
            Err(AgentError::SystemAction(_))
        ));
    }

    #[tokio::test]
    async fn restart_notifies_the_main_loop() {
        let (actions, _, restart) = actions(Some(0));

        actions.restart_agent().await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), restart.notified())
            .await
            .unwrap();
    }
}
