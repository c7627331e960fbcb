//! # Job store: the authoritative record of every known job.
//!
//! The [`JobStore`] holds, for each [`JobId`], its validated config and runtime
//! state, plus the bookkeeping the supervisor loop acts upon:
//!
//! ```text
//!                     ┌───────────────── JobStore ─────────────────┐
//! configuration ──►   │ jobs:  id → Job { config, state }          │
//!   reconcile()       │ pids:  pid → id         (live jobs only)   │
//!                     │ start / stop / restart  (pending actions)  │
//! SIGCHLD reap ──►    │ stopping: id → { pid, sent_at, killed }    │
//!   update_for_       └────────────────────────────────────────────┘
//!   terminated_process()
//! ```
//!
//! ## State machine (`cf_state`)
//! ```text
//!  (unseen) ──poll──► ADDED ──poll, same mtime──► UNCHANGED
//!                       │                           │  ▲
//!                       └──poll, mtime advanced──► UPDATED
//!  any ──absent from poll──► REMOVED ──reaped / not running──► purged
//! ```
//!
//! ## Rules
//! - A job has a `pid` only while its process is believed alive; `pids` is a
//!   bijection onto those jobs.
//! - An id sits in at most one of `start` / `stop` / `restart`; slating an id
//!   moves it out of the other two.
//! - `REMOVED` jobs are never slated for start.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::jobs::job::{
    CfState, Clock, Configuration, ExitStatus, Job, JobConfig, JobId, JobState, Pid, SystemClock,
    Timestamp,
};
use crate::policies::{Backoff, BackoffPolicy};

/// The given id is not in the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("job {0} does not exist")]
pub struct UnknownJob(pub JobId);

/// Pending action kinds, in the order the supervisor executes them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Terminate the running process; it is started again once reaped.
    Restart,
    /// Terminate the running process for good.
    Stop,
    /// Launch a process.
    Start,
}

/// Outcome of one [`JobStore::reconcile`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Reported for the first time.
    pub added: Vec<JobId>,
    /// `mtime` advanced.
    pub updated: Vec<JobId>,
    /// No longer reported (newly removed this pass).
    pub removed: Vec<JobId>,
    /// Deleted from the store: stopped REMOVED jobs, before and after diffing.
    pub purged: Vec<JobId>,
}

/// Graceful-termination bookkeeping for one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Stopping {
    /// Process that was signalled.
    pid: Pid,
    /// When SIGTERM was sent.
    sent_at: Timestamp,
    /// Whether SIGKILL has been sent already.
    killed: bool,
}

/// In-memory record of every known job.
pub struct JobStore {
    jobs: BTreeMap<JobId, Job>,
    pids: HashMap<Pid, JobId>,
    start: BTreeSet<JobId>,
    stop: BTreeSet<JobId>,
    restart: BTreeSet<JobId>,
    stopping: HashMap<JobId, Stopping>,
    on_demand: BTreeSet<JobId>,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(BackoffPolicy::default(), Arc::new(SystemClock))
    }
}

impl JobStore {
    /// Creates an empty store with the given per-job backoff policy and clock.
    pub fn new(backoff: BackoffPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: BTreeMap::new(),
            pids: HashMap::new(),
            start: BTreeSet::new(),
            stop: BTreeSet::new(),
            restart: BTreeSet::new(),
            stopping: HashMap::new(),
            on_demand: BTreeSet::new(),
            backoff,
            clock,
        }
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ---------------------------
    // Queries
    // ---------------------------

    /// Returns the job with this id.
    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// True if the id is known.
    pub fn has(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id)
    }

    /// Iterates all jobs in id order.
    pub fn jobs(&self) -> impl Iterator<Item = (&JobId, &Job)> {
        self.jobs.iter()
    }

    /// Number of known jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True if no job is known.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Owner of a live pid.
    pub fn job_id_by_pid(&self, pid: Pid) -> Option<&JobId> {
        self.pids.get(&pid)
    }

    /// All pids believed alive.
    pub fn pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.pids.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Number of live worker processes.
    pub fn running_count(&self) -> usize {
        self.pids.len()
    }

    /// True if `id` is slated for `action`.
    pub fn is_pending(&self, action: Action, id: &JobId) -> bool {
        self.set(action).contains(id)
    }

    /// Ids slated for `action`, in order.
    pub fn pending(&self, action: Action) -> Vec<JobId> {
        self.set(action).iter().cloned().collect()
    }

    /// Removes and returns the first id slated for `action`.
    pub fn pop_pending(&mut self, action: Action) -> Option<JobId> {
        self.set_mut(action).pop_first()
    }

    // ---------------------------
    // Configuration diff
    // ---------------------------

    /// Applies a freshly polled configuration and slates the resulting actions.
    ///
    /// Order: purge removed-and-stopped jobs, mark each reported job as
    /// ADDED / UPDATED / UNCHANGED by `mtime`, mark unreported jobs REMOVED,
    /// purge again so newly removed jobs without a process go at once, then
    /// [`slate_job_state_updates`](Self::slate_job_state_updates).
    pub fn reconcile(&mut self, config: &Configuration) -> Reconciled {
        let mut report = Reconciled {
            purged: self.purge_removed_jobs(),
            ..Reconciled::default()
        };

        for (id, new_config) in config {
            match self.jobs.get(id) {
                Some(job) if new_config.mtime > job.config.mtime => {
                    if self.update_job(id, new_config.clone()).is_ok() {
                        report.updated.push(id.clone());
                    }
                }
                Some(_) => {
                    let _ = self.mark_as_unchanged(id);
                }
                None => {
                    self.add_new_job(id.clone(), new_config.clone());
                    report.added.push(id.clone());
                }
            }
        }

        let gone: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(id, _)| !config.contains_key(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in gone {
            let newly = self
                .jobs
                .get(&id)
                .is_some_and(|j| j.state.cf_state != CfState::Removed);
            if self.remove_job(&id).is_ok() && newly {
                report.removed.push(id);
            }
        }
        report.purged.extend(self.purge_removed_jobs());

        self.slate_job_state_updates();
        report
    }

    /// Records a job reported for the first time.
    pub fn add_new_job(&mut self, id: JobId, config: JobConfig) {
        info!(job = %id, name = %config.name, "adding new job");
        let now = self.now();
        let backoff = Backoff::new(self.backoff);
        match self.jobs.get_mut(&id) {
            Some(job) => {
                job.config = config;
                job.state.backoff = backoff;
                job.state.restart_at = Some(now);
                job.state.cf_state = CfState::Added;
            }
            None => {
                let state = JobState {
                    pid: None,
                    started_at: None,
                    restart_at: Some(now),
                    backoff,
                    cf_state: CfState::Added,
                    last_exit_status: None,
                };
                self.jobs.insert(id, Job { config, state });
            }
        }
    }

    /// Replaces the config of a known job whose `mtime` advanced.
    pub fn update_job(&mut self, id: &JobId, config: JobConfig) -> Result<(), UnknownJob> {
        let now = self.now();
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| UnknownJob(id.clone()))?;
        info!(job = %id, mtime = config.mtime, "setting fresh config, resetting backoff");
        job.config = config;
        job.state.cf_state = CfState::Updated;
        job.state.restart_at = Some(now);
        job.state.backoff.reset();
        Ok(())
    }

    /// Marks a job whose `mtime` did not advance.
    pub fn mark_as_unchanged(&mut self, id: &JobId) -> Result<(), UnknownJob> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| UnknownJob(id.clone()))?;
        job.state.cf_state = CfState::Unchanged;
        Ok(())
    }

    /// Marks a job no longer reported by the configuration source.
    pub fn remove_job(&mut self, id: &JobId) -> Result<(), UnknownJob> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| UnknownJob(id.clone()))?;
        if job.state.cf_state != CfState::Removed {
            info!(job = %id, "job removed from configuration");
        }
        job.state.cf_state = CfState::Removed;
        self.start.remove(id);
        Ok(())
    }

    /// Deletes every REMOVED job without a live process; returns the purged ids.
    pub fn purge_removed_jobs(&mut self) -> Vec<JobId> {
        let mut purged = Vec::new();
        for (id, job) in &self.jobs {
            if job.state.cf_state != CfState::Removed {
                continue;
            }
            match job.state.pid {
                Some(pid) => warn!(job = %id, pid, "not purging job, it is still running"),
                None => purged.push(id.clone()),
            }
        }
        for id in &purged {
            info!(job = %id, "purging job");
            self.jobs.remove(id);
            self.start.remove(id);
            self.stop.remove(id);
            self.restart.remove(id);
            self.stopping.remove(id);
            self.on_demand.remove(id);
        }
        purged
    }

    /// Translates each job's `cf_state` into a pending action.
    ///
    /// - REMOVED with a pid → `stop`
    /// - ADDED → `start` (or `restart` if it somehow has a live process)
    /// - UPDATED with a pid → `restart`; without one it is left to
    ///   [`slate_scheduled_restarts`](Self::slate_scheduled_restarts)
    /// - UNCHANGED → nothing
    pub fn slate_job_state_updates(&mut self) {
        let mut slated = Vec::new();
        for (id, job) in &self.jobs {
            let action = match (job.state.cf_state, job.state.pid) {
                (CfState::Removed, Some(_)) => Some(Action::Stop),
                (CfState::Added, None) => Some(Action::Start),
                (CfState::Added, Some(_)) | (CfState::Updated, Some(_)) => Some(Action::Restart),
                _ => None,
            };
            if let Some(action) = action {
                slated.push((id.clone(), action));
            }
        }
        for (id, action) in slated {
            debug!(job = %id, ?action, "slating configuration change");
            self.slate(id, action);
        }
    }

    /// Slates for start every non-REMOVED, non-running job whose `restart_at` has passed.
    pub fn slate_scheduled_restarts(&mut self) {
        let now = self.now();
        let due: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(id, job)| {
                job.state.cf_state != CfState::Removed
                    && job.state.pid.is_none()
                    && job.state.restart_at.is_some_and(|at| at <= now)
                    && !self.restart.contains(*id)
                    && !self.stop.contains(*id)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            self.slate(id, Action::Start);
        }
    }

    // ---------------------------
    // Process lifecycle
    // ---------------------------

    /// Records a freshly launched process for `id`.
    pub fn update_started_job(&mut self, id: &JobId, pid: Pid) -> Result<(), UnknownJob> {
        if !self.jobs.contains_key(id) {
            return Err(UnknownJob(id.clone()));
        }
        if let Some(previous_owner) = self.pids.remove(&pid) {
            if let Some(job) = self.jobs.get_mut(&previous_owner) {
                job.state.pid = None;
            }
        }
        let now = self.now();
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| UnknownJob(id.clone()))?;
        if let Some(old) = job.state.pid.replace(pid) {
            self.pids.remove(&old);
        }
        job.state.started_at = Some(now);
        self.pids.insert(pid, id.clone());
        Ok(())
    }

    /// Handles a reaped process: records its status and schedules the next start.
    ///
    /// Restart backoff: a process that lived less than the job's
    /// `short_run_time_seconds` gets `restart_at = now + backoff` and the backoff
    /// doubles (capped); a longer-lived one resets the backoff and may restart now.
    /// A process terminated by [`schedule_restart_on_demand`](Self::schedule_restart_on_demand)
    /// is never penalised for its run time.
    ///
    /// Returns the owning id, or `None` if the pid belongs to no job.
    pub fn update_for_terminated_process(&mut self, pid: Pid, status: ExitStatus) -> Option<JobId> {
        let id = self.pids.remove(&pid)?;
        self.stopping.remove(&id);
        let requested = self.on_demand.remove(&id);
        let now = self.now();
        let Some(job) = self.jobs.get_mut(&id) else {
            return Some(id);
        };
        job.state.pid = None;
        job.state.last_exit_status = Some(status);

        if job.state.cf_state == CfState::Removed {
            info!(job = %id, pid, %status, "removed job exited");
            return Some(id);
        }

        let started_at = job.state.started_at.unwrap_or(0);
        let short_run = job.config.short_run_time_seconds;
        if requested {
            job.state.backoff.reset();
            job.state.restart_at = Some(now);
            info!(job = %id, pid, %status, "restarted on demand");
        } else if now < started_at.saturating_add(short_run) {
            let delay = job.state.backoff.advance();
            job.state.restart_at = Some(now + delay.as_secs());
            info!(
                job = %id,
                pid,
                %status,
                delay_secs = delay.as_secs(),
                next_backoff_secs = job.state.backoff_interval(),
                "run time was too short, backing off"
            );
        } else {
            job.state.backoff.reset();
            job.state.restart_at = Some(now);
            info!(job = %id, pid, %status, short_run, "run time was long enough, resetting backoff");
        }
        Some(id)
    }

    /// Records that a launch for `id` failed so it is retried after a backoff step.
    pub fn update_for_failed_start(&mut self, id: &JobId) {
        let now = self.now();
        if let Some(job) = self.jobs.get_mut(id) {
            let delay = job.state.backoff.advance();
            job.state.restart_at = Some(now + delay.as_secs());
            warn!(job = %id, delay_secs = delay.as_secs(), "start failed, retrying later");
        }
    }

    /// Operator-triggered immediate restart.
    ///
    /// Resets the backoff and slates `restart` (running) or `start` (stopped).
    /// The reap of a restarted process starts it again without a backoff step.
    /// Both outcomes carry a human-readable message for the operator.
    pub fn schedule_restart_on_demand(&mut self, id: &JobId) -> Result<String, String> {
        let now = self.now();
        let Some(job) = self.jobs.get_mut(id) else {
            return Err(format!("will not restart job {id}, it doesn't exist"));
        };
        if job.state.cf_state == CfState::Removed {
            return Err(format!("will not restart job {id}, it was removed"));
        }
        job.state.backoff.reset();
        job.state.restart_at = Some(now);
        let action = if job.state.pid.is_some() {
            Action::Restart
        } else {
            Action::Start
        };
        if action == Action::Restart {
            self.on_demand.insert(id.clone());
        }
        self.slate(id.clone(), action);
        Ok(match action {
            Action::Restart => format!("scheduled job {id} for restart"),
            _ => format!("scheduled job {id} to start"),
        })
    }

    /// Records that SIGTERM was sent to `id`'s process now.
    pub fn mark_as_stopping(&mut self, id: &JobId) -> Result<(), UnknownJob> {
        let now = self.now();
        let pid = self
            .jobs
            .get(id)
            .and_then(|j| j.state.pid)
            .ok_or_else(|| UnknownJob(id.clone()))?;
        self.stopping.insert(
            id.clone(),
            Stopping {
                pid,
                sent_at: now,
                killed: false,
            },
        );
        Ok(())
    }

    /// True if a graceful termination is already in progress for `id`.
    pub fn is_stopping(&self, id: &JobId) -> bool {
        self.stopping.contains_key(id)
    }

    /// Stops whose `shutdown_timeout_seconds` elapsed without a reap and that were not killed yet.
    pub fn overdue_stops(&self) -> Vec<(JobId, Pid)> {
        let now = self.now();
        self.stopping
            .iter()
            .filter(|(_, s)| !s.killed)
            .filter(|(id, s)| {
                let timeout = self
                    .jobs
                    .get(*id)
                    .map(|j| j.config.shutdown_timeout_seconds)
                    .unwrap_or(JobConfig::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS);
                now >= s.sent_at.saturating_add(timeout)
            })
            .map(|(id, s)| (id.clone(), s.pid))
            .collect()
    }

    /// Records that SIGKILL was sent to `id`'s process.
    pub fn mark_as_killed(&mut self, id: &JobId) {
        if let Some(s) = self.stopping.get_mut(id) {
            s.killed = true;
        }
    }

    /// Drops every pending action (used when draining).
    pub fn clear_pending(&mut self) {
        self.start.clear();
        self.stop.clear();
        self.restart.clear();
    }

    // ---------------------------
    // Status
    // ---------------------------

    /// Serializable dump of the full store keyed by id.
    pub fn status(&self) -> BTreeMap<JobId, JobStatus<'_>> {
        self.jobs
            .iter()
            .map(|(id, job)| {
                let state = StateStatus {
                    pid: job.state.pid,
                    started_at: job.state.started_at,
                    restart_at: job.state.restart_at,
                    backoff_interval: job.state.backoff_interval(),
                    cf_state: job.state.cf_state,
                    last_exit_status: job.state.last_exit_status.map(|s| s.code()),
                    stopping: self.stopping.contains_key(id),
                };
                (
                    id.clone(),
                    JobStatus {
                        config: &job.config,
                        state,
                    },
                )
            })
            .collect()
    }

    // ---------------------------
    // Helpers
    // ---------------------------

    fn slate(&mut self, id: JobId, action: Action) {
        for other in [Action::Restart, Action::Stop, Action::Start] {
            if other != action {
                self.set_mut(other).remove(&id);
            }
        }
        self.set_mut(action).insert(id);
    }

    fn set(&self, action: Action) -> &BTreeSet<JobId> {
        match action {
            Action::Restart => &self.restart,
            Action::Stop => &self.stop,
            Action::Start => &self.start,
        }
    }

    fn set_mut(&mut self, action: Action) -> &mut BTreeSet<JobId> {
        match action {
            Action::Restart => &mut self.restart,
            Action::Stop => &mut self.stop,
            Action::Start => &mut self.start,
        }
    }
}

/// Status view of one job.
#[derive(Debug, Serialize)]
pub struct JobStatus<'a> {
    /// Validated config.
    pub config: &'a JobConfig,
    /// Runtime state.
    pub state: StateStatus,
}

/// Status view of a job's runtime state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStatus {
    /// Live pid, if any.
    pub pid: Option<Pid>,
    /// Last start time.
    pub started_at: Option<Timestamp>,
    /// Earliest next start.
    pub restart_at: Option<Timestamp>,
    /// Current backoff interval in seconds.
    pub backoff_interval: u64,
    /// Configuration-diff status.
    pub cf_state: CfState,
    /// Shell-style exit status of the last reaped process.
    pub last_exit_status: Option<i32>,
    /// SIGTERM sent, waiting for the reap.
    pub stopping: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::ManualClock;

    fn store() -> (JobStore, ManualClock) {
        let clock = ManualClock::new(1_000);
        let store = JobStore::new(BackoffPolicy::default(), Arc::new(clock.clone()));
        (store, clock)
    }

    fn cfg(mtime: Timestamp) -> JobConfig {
        JobConfig::new("seven", "mock", mtime)
    }

    fn config_with(entries: &[(u64, Timestamp)]) -> Configuration {
        entries
            .iter()
            .map(|(id, mtime)| (JobId::from(*id), cfg(*mtime)))
            .collect()
    }

    fn seven() -> JobId {
        JobId::from(7)
    }

    fn assert_disjoint(store: &JobStore) {
        for (id, _) in store.jobs() {
            let n = [Action::Restart, Action::Stop, Action::Start]
                .iter()
                .filter(|a| store.is_pending(**a, id))
                .count();
            assert!(n <= 1, "job {id} is in {n} pending sets");
        }
    }

    #[test]
    fn test_first_poll_adds_and_slates_start() {
        let (mut store, _) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        let job = store.get(&seven()).unwrap();
        assert_eq!(job.state.cf_state, CfState::Added);
        assert!(store.is_pending(Action::Start, &seven()));
    }

    #[test]
    fn test_newer_mtime_on_running_job_slates_restart() {
        let (mut store, _) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        assert_eq!(store.pop_pending(Action::Start), Some(seven()));
        store.update_started_job(&seven(), 4242).unwrap();

        store.reconcile(&config_with(&[(7, 150)]));
        assert_eq!(store.get(&seven()).unwrap().state.cf_state, CfState::Updated);
        assert!(store.is_pending(Action::Restart, &seven()));
        assert!(!store.is_pending(Action::Start, &seven()));
    }

    #[test]
    fn test_same_mtime_marks_unchanged_without_action() {
        let (mut store, _) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        store.update_started_job(&seven(), 4242).unwrap();

        store.reconcile(&config_with(&[(7, 100)]));
        assert_eq!(store.get(&seven()).unwrap().state.cf_state, CfState::Unchanged);
        assert!(store.pending(Action::Restart).is_empty());
        assert!(store.pending(Action::Start).is_empty());
    }

    #[test]
    fn test_omitted_job_is_stopped_then_purged_after_reap() {
        let (mut store, clock) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        store.update_started_job(&seven(), 4242).unwrap();

        store.reconcile(&config_with(&[]));
        assert_eq!(store.get(&seven()).unwrap().state.cf_state, CfState::Removed);
        assert!(store.is_pending(Action::Stop, &seven()));

        clock.advance(30);
        assert_eq!(
            store.update_for_terminated_process(4242, ExitStatus::Signaled(15)),
            Some(seven())
        );
        assert_eq!(store.purge_removed_jobs(), vec![seven()]);
        assert!(!store.has(&seven()));
    }

    #[test]
    fn test_removed_job_is_never_restarted() {
        let (mut store, clock) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        store.update_started_job(&seven(), 4242).unwrap();
        store.reconcile(&config_with(&[]));
        store.pop_pending(Action::Stop);
        store.update_for_terminated_process(4242, ExitStatus::Exited(0));
        clock.advance(3_600);
        store.slate_scheduled_restarts();
        assert!(store.pending(Action::Start).is_empty());
    }

    #[test]
    fn test_fast_exits_double_backoff() {
        let (mut store, clock) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        assert_eq!(store.get(&seven()).unwrap().state.backoff_interval(), 1);

        store.update_started_job(&seven(), 1).unwrap();
        clock.advance(1);
        store.update_for_terminated_process(1, ExitStatus::Exited(1));
        let state = &store.get(&seven()).unwrap().state;
        assert_eq!(state.backoff_interval(), 2);
        assert_eq!(state.restart_at, Some(1_001 + 1));

        clock.advance(1);
        store.update_started_job(&seven(), 2).unwrap();
        clock.advance(1);
        store.update_for_terminated_process(2, ExitStatus::Exited(1));
        let state = &store.get(&seven()).unwrap().state;
        assert_eq!(state.backoff_interval(), 4);
        assert_eq!(state.restart_at, Some(1_003 + 2));
        assert_eq!(state.last_exit_status, Some(ExitStatus::Exited(1)));
    }

    #[test]
    fn test_backoff_is_capped() {
        let (mut store, clock) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        for pid in 1..40 {
            store.update_started_job(&seven(), pid).unwrap();
            store.update_for_terminated_process(pid, ExitStatus::Exited(1));
            clock.advance(1);
        }
        assert_eq!(
            store.get(&seven()).unwrap().state.backoff_interval(),
            6 * 60 * 60
        );
    }

    #[test]
    fn test_long_run_resets_backoff() {
        let (mut store, clock) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        for pid in 1..4 {
            store.update_started_job(&seven(), pid).unwrap();
            store.update_for_terminated_process(pid, ExitStatus::Exited(1));
        }
        assert_eq!(store.get(&seven()).unwrap().state.backoff_interval(), 8);

        store.update_started_job(&seven(), 10).unwrap();
        clock.advance(5);
        store.update_for_terminated_process(10, ExitStatus::Exited(0));
        let state = &store.get(&seven()).unwrap().state;
        assert_eq!(state.backoff_interval(), 1);
        assert_eq!(state.restart_at, Some(clock.now()));
    }

    #[test]
    fn test_backoff_delays_scheduled_restart() {
        let (mut store, clock) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        store.update_started_job(&seven(), 1).unwrap();
        store.update_for_terminated_process(1, ExitStatus::Exited(1));
        store.update_started_job(&seven(), 2).unwrap();
        store.update_for_terminated_process(2, ExitStatus::Exited(1));

        store.slate_scheduled_restarts();
        assert!(store.pending(Action::Start).is_empty());
        clock.advance(1);
        store.slate_scheduled_restarts();
        assert!(store.pending(Action::Start).is_empty());
        clock.advance(1);
        store.slate_scheduled_restarts();
        assert_eq!(store.pending(Action::Start), vec![seven()]);
    }

    #[test]
    fn test_updated_stopped_job_is_started_by_schedule() {
        let (mut store, _) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        store.reconcile(&config_with(&[(7, 200)]));
        assert!(store.pending(Action::Restart).is_empty());
        store.slate_scheduled_restarts();
        assert_eq!(store.pending(Action::Start), vec![seven()]);
    }

    #[test]
    fn test_pending_sets_stay_disjoint() {
        let (mut store, _) = store();
        store.reconcile(&config_with(&[(1, 1), (2, 1), (3, 1), (4, 1)]));
        store.pop_pending(Action::Start);
        store.update_started_job(&JobId::from(1), 11).unwrap();
        store.update_started_job(&JobId::from(2), 12).unwrap();
        store.schedule_restart_on_demand(&JobId::from(3)).unwrap();

        store.reconcile(&config_with(&[(1, 5), (3, 5), (4, 1)]));
        store.slate_scheduled_restarts();
        assert_disjoint(&store);
        assert!(store.is_pending(Action::Restart, &JobId::from(1)));
        assert!(store.is_pending(Action::Stop, &JobId::from(2)));
        assert!(store.is_pending(Action::Start, &JobId::from(3)));
    }

    #[test]
    fn test_reconcile_reports_the_diff() {
        let (mut store, _) = store();
        let first = store.reconcile(&config_with(&[(1, 1), (2, 1)]));
        assert_eq!(first.added, vec![JobId::from(1), JobId::from(2)]);
        assert!(first.updated.is_empty() && first.removed.is_empty());

        store.update_started_job(&JobId::from(1), 11).unwrap();
        store.update_started_job(&JobId::from(2), 12).unwrap();
        let second = store.reconcile(&config_with(&[(1, 2)]));
        assert_eq!(second.updated, vec![JobId::from(1)]);
        assert_eq!(second.removed, vec![JobId::from(2)]);
        assert!(second.purged.is_empty());

        store.update_for_terminated_process(12, ExitStatus::Signaled(15));
        let third = store.reconcile(&config_with(&[(1, 2)]));
        assert_eq!(third.purged, vec![JobId::from(2)]);
        assert!(third.removed.is_empty());
    }

    #[test]
    fn test_removed_job_in_backoff_is_purged_in_same_reconcile() {
        let (mut store, clock) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        store.update_started_job(&seven(), 11).unwrap();
        clock.advance(1);
        store.update_for_terminated_process(11, ExitStatus::Exited(1));
        assert!(store.get(&seven()).unwrap().state.restart_at > Some(clock.now()));

        let report = store.reconcile(&config_with(&[]));
        assert_eq!(report.removed, vec![seven()]);
        assert_eq!(report.purged, vec![seven()]);
        assert!(!store.has(&seven()));
        assert!(store.pending(Action::Stop).is_empty());
    }

    #[test]
    fn test_pid_index_is_injective() {
        let (mut store, _) = store();
        store.reconcile(&config_with(&[(1, 1), (2, 1)]));
        store.update_started_job(&JobId::from(1), 500).unwrap();
        store.update_started_job(&JobId::from(2), 500).unwrap();
        assert_eq!(store.job_id_by_pid(500), Some(&JobId::from(2)));
        assert_eq!(store.get(&JobId::from(1)).unwrap().state.pid, None);
        assert_eq!(store.running_count(), 1);

        store.update_started_job(&JobId::from(2), 501).unwrap();
        assert_eq!(store.pids(), vec![501]);
    }

    #[test]
    fn test_purge_and_unchanged_are_idempotent() {
        let (mut store, _) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.mark_as_unchanged(&seven()).unwrap();
        store.mark_as_unchanged(&seven()).unwrap();
        assert_eq!(store.get(&seven()).unwrap().state.cf_state, CfState::Unchanged);
        assert!(store.purge_removed_jobs().is_empty());
        assert!(store.purge_removed_jobs().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_running_removed_job_is_not_purged() {
        let (mut store, _) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.update_started_job(&seven(), 9).unwrap();
        store.remove_job(&seven()).unwrap();
        assert!(store.purge_removed_jobs().is_empty());
        assert!(store.has(&seven()));
    }

    #[test]
    fn test_restart_on_demand_of_stopped_job_starts_it() {
        let (mut store, clock) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        store.update_started_job(&seven(), 1).unwrap();
        store.update_for_terminated_process(1, ExitStatus::Exited(1));
        store.update_started_job(&seven(), 2).unwrap();
        store.update_for_terminated_process(2, ExitStatus::Exited(1));

        let msg = store.schedule_restart_on_demand(&seven()).unwrap();
        assert!(msg.contains("scheduled"));
        assert!(store.is_pending(Action::Start, &seven()));
        let state = &store.get(&seven()).unwrap().state;
        assert_eq!(state.backoff_interval(), 1);
        assert_eq!(state.restart_at, Some(clock.now()));
    }

    #[test]
    fn test_restart_on_demand_of_running_job_restarts_it() {
        let (mut store, _) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        store.update_started_job(&seven(), 1).unwrap();
        store.schedule_restart_on_demand(&seven()).unwrap();
        assert!(store.is_pending(Action::Restart, &seven()));
    }

    #[test]
    fn test_restart_on_demand_skips_short_run_backoff() {
        let (mut store, clock) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.pop_pending(Action::Start);
        store.update_started_job(&seven(), 1).unwrap();
        clock.advance(1);
        store.schedule_restart_on_demand(&seven()).unwrap();
        assert_eq!(store.pop_pending(Action::Restart), Some(seven()));
        store.mark_as_stopping(&seven()).unwrap();

        store.update_for_terminated_process(1, ExitStatus::Signaled(15));
        let state = &store.get(&seven()).unwrap().state;
        assert_eq!(state.backoff_interval(), 1);
        assert_eq!(state.restart_at, Some(clock.now()));

        store.update_started_job(&seven(), 2).unwrap();
        store.update_for_terminated_process(2, ExitStatus::Exited(1));
        assert_eq!(store.get(&seven()).unwrap().state.backoff_interval(), 2);
    }

    #[test]
    fn test_restart_on_demand_rejects_unknown_and_removed() {
        let (mut store, _) = store();
        let err = store.schedule_restart_on_demand(&seven()).unwrap_err();
        assert!(err.contains("doesn't exist"));

        store.reconcile(&config_with(&[(7, 100)]));
        store.update_started_job(&seven(), 1).unwrap();
        store.remove_job(&seven()).unwrap();
        let err = store.schedule_restart_on_demand(&seven()).unwrap_err();
        assert!(err.contains("removed"));
    }

    #[test]
    fn test_stop_timeout_becomes_overdue_once() {
        let (mut store, clock) = store();
        let mut config = config_with(&[(7, 100)]);
        config.get_mut(&seven()).unwrap().shutdown_timeout_seconds = 3;
        store.reconcile(&config);
        store.update_started_job(&seven(), 77).unwrap();
        store.mark_as_stopping(&seven()).unwrap();
        assert!(store.is_stopping(&seven()));

        clock.advance(2);
        assert!(store.overdue_stops().is_empty());
        clock.advance(1);
        assert_eq!(store.overdue_stops(), vec![(seven(), 77)]);
        store.mark_as_killed(&seven());
        assert!(store.overdue_stops().is_empty());

        store.update_for_terminated_process(77, ExitStatus::Signaled(9));
        assert!(!store.is_stopping(&seven()));
    }

    #[test]
    fn test_unknown_pid_is_ignored() {
        let (mut store, _) = store();
        assert_eq!(
            store.update_for_terminated_process(31337, ExitStatus::Exited(0)),
            None
        );
    }

    #[test]
    fn test_status_exposes_config_and_state() {
        let (mut store, _) = store();
        store.reconcile(&config_with(&[(7, 100)]));
        store.update_started_job(&seven(), 55).unwrap();
        let json = serde_json::to_value(store.status()).unwrap();
        assert_eq!(json["7"]["config"]["name"], "seven");
        assert_eq!(json["7"]["state"]["pid"], 55);
        assert_eq!(json["7"]["state"]["cfState"], "ADDED");
        assert_eq!(json["7"]["state"]["backoffInterval"], 1);
    }
}
