//! Restart backoff policies.
//!
//! This module groups the knobs that control **how long** to wait before a
//! crashed process is started again.
//!
//! ## Contents
//! - [`BackoffPolicy`] how restart delays evolve (first / factor / max + jitter)
//! - [`Backoff`] stateful generator over a policy (current interval, grow, reset)
//! - [`JitterPolicy`] randomization strategy to avoid thundering herd
//!
//! ## Quick wiring
//! ```text
//! JobStore ──► JobState.backoff: Backoff
//!                  └─► on a fast exit: restart_at = now + advance()
//!                  └─► on a healthy exit: reset()
//!
//! ConfigProcessManager ──► ConfigProcessPolicy.backoff.next(retries)
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=1s, factor=2.0, max=6h, jitter=None.
//! - `JitterPolicy::None` by default.

mod backoff;
mod jitter;

pub use backoff::{Backoff, BackoffPolicy};
pub use jitter::JitterPolicy;
