//! # Workers: the business logic behind each job.
//!
//! - [`Worker`] the `start(config)` / `cycle()` contract
//! - [`WorkerRegistry`] `workerClass` identifier → constructor
//! - [`WorkerProcess`] the loop run inside each worker child process
//! - [`MockWorker`] a logging worker bundled with the daemon

mod mock;
mod process;
mod worker;

pub use mock::MockWorker;
pub use process::WorkerProcess;
pub use worker::{Worker, WorkerFactory, WorkerRegistry};
