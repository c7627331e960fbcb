//! # Jobs: data model, validation and the job store.
//!
//! - [`JobConfig`] / [`JobState`] / [`Job`] the per-job record
//! - [`ConfigurationValidator`] raw source output → validated [`Configuration`]
//! - [`JobStore`] the state machine the supervisor loop reconciles against

mod job;
mod store;
mod validator;

pub use job::{
    CfState, Clock, Configuration, ExitStatus, Job, JobConfig, JobId, JobState, ManualClock, Pid,
    SystemClock, Timestamp, WorkerConfig,
};
pub use store::{Action, JobStatus, JobStore, Reconciled, StateStatus, UnknownJob};
pub use validator::{ConfigurationValidator, RawConfiguration};
