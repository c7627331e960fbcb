//! # Demo: mock_fleet
//!
//! Runs a small fleet of [`MockWorker`] jobs and prints lifecycle events.
//!
//! Shows how to:
//! - Register a worker class and a configuration source on a [`Launcher`].
//! - Attach a custom [`Subscribe`] implementation next to the default log output.
//! - Watch crash-loop backoff: job `crashy` fails on its third cycle, so its
//!   restarts are spaced 1s, 2s, 4s, ...
//!
//! ## Flow
//! ```text
//! Launcher::run()
//!   ├─► Supervisor (this process)
//!   │     ├─► config process (re-exec, PROCVISOR_ROLE=config) ──► pushes the mock jobs
//!   │     └─► worker per job   (re-exec, PROCVISOR_ROLE=worker)
//!   └─► Console.on_event() for every lifecycle event
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example mock_fleet
//! # in another terminal
//! PROCVISOR_SOCKET_DIR=/tmp/procvisor-demo cargo run --bin procvisorctl -- status
//! ```
//! Stop with Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use procvisor::{Event, EventKind, JobId, Launcher, MockConfigurationSource, MockWorker, Subscribe, SupervisorConfig};
use serde_json::json;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Prints job lifecycle events to stdout.
struct Console;

#[async_trait]
impl Subscribe for Console {
    async fn on_event(&self, ev: &Event) {
        let job = ev.job.as_deref().unwrap_or("-");
        match ev.kind {
            EventKind::JobStarted => println!("[demo] started  job={job} pid={:?}", ev.pid),
            EventKind::JobExited => println!(
                "[demo] exited   job={job} status={:?} next_start_in_ms={:?}",
                ev.status, ev.delay_ms
            ),
            EventKind::ShutdownRequested => println!("[demo] shutting down: {:?}", ev.reason),
            EventKind::Drained => println!("[demo] all processes stopped"),
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

fn fleet() -> MockConfigurationSource {
    let source = MockConfigurationSource::new();
    source.upsert(
        JobId::from("steady"),
        json!({"name": "steady", "workerClass": "mock", "mtime": 1}),
    );
    source.upsert(
        JobId::from("crashy"),
        json!({
            "name": "crashy",
            "workerClass": "mock",
            "mtime": 1,
            "workerConfig": {"failAfterCycles": 3},
            "shortRunTimeSeconds": 30
        }),
    );
    source
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "procvisor=info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cfg = SupervisorConfig {
        tick: Duration::from_millis(500),
        config_poll_interval: Duration::from_secs(5),
        worker_cycle_interval: Duration::from_secs(1),
        socket_dirs: vec![PathBuf::from("/tmp/procvisor-demo")],
        ..SupervisorConfig::default()
    };

    Launcher::new(cfg)
        .with_worker("mock", MockWorker::factory)
        .with_source(fleet())
        .with_subscribers(vec![Arc::new(Console)])
        .run()
        .await
        .into()
}
