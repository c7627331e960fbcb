//! Runtime core: the supervisor loop and the child process roles.
//!
//! Internal modules:
//! - [`supervisor`]: the main loop (reap, reconcile, restart, stop, start, kill);
//! - [`config_manager`]: restart bookkeeping of the configuration process;
//! - [`config_process`]: the configuration process itself (poll and push);
//! - [`control`]: operator command parsing and rendering;
//! - [`spawn`]: re-exec based process launching and child roles;
//! - [`reaper`]: non-blocking `waitpid` loop;
//! - [`signals`]: OS signals turned into messages;
//! - [`builder`]: role dispatch ([`Launcher`]).

mod builder;
mod config;
mod config_manager;
mod config_process;
mod control;
mod exit;
mod reaper;
mod signals;
mod spawn;
mod supervisor;

pub use builder::Launcher;
pub use config::{
    ConfigProcessPolicy, ENV_CONFIG_POLL_SECONDS, ENV_SOCKET_DIR, ENV_TICK_SECONDS, ENV_WORKER_CYCLE_SECONDS,
    SupervisorConfig,
};
pub use config_manager::{ConfigProcessAction, ConfigProcessManager};
pub use config_process::{ConfigurationProcess, is_fresher};
pub use control::ControlCommand;
pub use exit::ExitCode;
pub use signals::SignalEvent;
pub use spawn::{
    ChildRole, ENV_CONFIG_SOCKET, ENV_JOB_CONFIG, ENV_JOB_ID, ENV_ROLE, ENV_SUPERVISOR_PID, ExecLauncher,
    ProcessLauncher, parent_pid,
};
pub use supervisor::{LoopInputs, Supervisor};
