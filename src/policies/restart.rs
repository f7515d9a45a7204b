//! # Restart policy for cluster processes.
//!
//! [`RestartPolicy`] decides whether a cluster whose process exited should be
//! respawned by its supervisor.
//!
//! - [`RestartPolicy::OnCrash`] respawn after a crash (default).
//! - [`RestartPolicy::Never`] leave the slot empty until the next fleet restart.
//!
//! ## What counts as a crash
//! ```text
//! exit code 0                  → clean shutdown, never respawned
//! killed by SIGTERM            → deliberate termination, never respawned
//! anything else                → crash, respawned after backoff (OnCrash)
//! ```
//!
//! The fleet-wide restarting/stopping flag is checked separately by the
//! supervisor; the policy only classifies the exit itself.

use serde::Deserialize;

use crate::process::ClusterExit;

/// Policy controlling whether a cluster is respawned after its process exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Never respawn; a crashed cluster stays down until the next restart-all.
    Never,
    /// Respawn after a crash (default).
    #[default]
    OnCrash,
}

impl RestartPolicy {
    /// Returns `true` if a process that ended with `exit` should be respawned.
    pub fn should_respawn(&self, exit: &ClusterExit) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::OnCrash => exit.is_crash(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_crash_respawns_non_zero_exit() {
        let exit = ClusterExit::new(Some(1), None);
        assert!(RestartPolicy::OnCrash.should_respawn(&exit));
        assert!(!RestartPolicy::Never.should_respawn(&exit));
    }

    #[test]
    fn test_clean_exit_is_never_respawned() {
        let exit = ClusterExit::new(Some(0), None);
        assert!(!RestartPolicy::OnCrash.should_respawn(&exit));
    }

    #[cfg(unix)]
    #[test]
    fn test_sigterm_is_not_a_crash() {
        let term = ClusterExit::new(None, Some(nix::sys::signal::Signal::SIGTERM as i32));
        assert!(!RestartPolicy::OnCrash.should_respawn(&term));

        let kill = ClusterExit::new(None, Some(nix::sys::signal::Signal::SIGKILL as i32));
        assert!(RestartPolicy::OnCrash.should_respawn(&kill));
    }
}
