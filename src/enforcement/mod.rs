// src/enforcement/mod.rs
//!
//! Enforcement state, the lock around it, checkpoints and the applier that
//! pushes compiled artifacts into the OS.

pub mod applier;
pub mod checkpoint;
pub mod lock;
pub mod state;

pub use applier::{EnforcementApplier, VerifyReport};
pub use checkpoint::{Checkpoint, CheckpointId, CheckpointStore};
pub use lock::{EnforcementLock, LockGuard};
pub use state::{AgentState, DisableOrigin, EnforcementState, StateStore};
