//! Respawn policies.
//!
//! This module groups the knobs that control **if** a crashed cluster is
//! respawned and **how long** its supervisor waits first.
//!
//! ## Contents
//! - [`RestartPolicy`] whether an exit is respawned (never / on-crash)
//! - [`BackoffPolicy`] how the respawn delay evolves (first / factor / max)
//!
//! ## Quick wiring
//! ```text
//! Config { restart: RestartPolicy, backoff: BackoffPolicy }
//!      └─► core::cluster actor uses:
//!           - restart.should_respawn(&exit) to decide respawn/exit
//!           - backoff.next(crashes) to schedule the respawn
//! ```
//!
//! ## Defaults
//! - `RestartPolicy::OnCrash`.
//! - `BackoffPolicy::default()` → constant 5s, no retry cap.

mod backoff;
mod restart;

pub use backoff::BackoffPolicy;
pub use restart::RestartPolicy;
