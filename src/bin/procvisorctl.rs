//! `procvisorctl`: sends one control message to a running procvisor and prints the reply.
//!
//! ```text
//! procvisorctl status
//! procvisorctl restart 42
//! procvisorctl --socket-dir /tmp/pv stop
//! ```

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;

use procvisor::{CONTROL_SOCKET, ENV_SOCKET_DIR, MessageClient, default_socket_dirs, find_in};

#[derive(Parser, Debug)]
#[command(name = "procvisorctl", version, about = "Control a running procvisor")]
struct Args {
    /// Directory holding the control socket (defaults to the standard locations).
    #[arg(long, value_name = "DIR", env = ENV_SOCKET_DIR)]
    socket_dir: Option<PathBuf>,

    /// Message to send: help, status, jsonstatus, restart <job_id>, reload, metrics, stop.
    #[arg(required = true, num_args = 1.., value_name = "MESSAGE")]
    message: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let dirs = match args.socket_dir {
        Some(dir) => vec![dir],
        None => default_socket_dirs(),
    };
    let Some(path) = find_in(CONTROL_SOCKET, &dirs) else {
        bail!("no control socket found in {dirs:?}, is procvisor running?");
    };

    let mut client = MessageClient::new(&path);
    client
        .connect()
        .await
        .with_context(|| format!("cannot connect to {}", path.display()))?;
    let response = client
        .request(&args.message.join(" "))
        .await
        .context("control message failed")?;
    client.disconnect();

    println!("{response}");
    Ok(())
}
