//! # Event subscribers.
//!
//! ```text
//! Supervisor ── publish(Event) ──► Bus ──► listener ──► SubscriberSet
//!                                                           │
//!                                              ┌────────────┼──────────┐
//!                                              ▼            ▼          ▼
//!                                          LogWriter     Custom       ...
//! ```
//!
//! - [`Subscribe`] the extension trait
//! - [`SubscriberSet`] per-subscriber queues and workers
//! - [`LogWriter`] renders events through `tracing`

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
