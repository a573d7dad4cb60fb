//! Process execution
//!
//! Runs a backend as a child process (usually a container runtime such as
//! `docker run ...`). The invocation envelope is passed on the command line
//! and the callback URL in the environment; the backend answers through the
//! callback endpoint. Output lines are relayed to the log.

use std::collections::HashMap;
use std::process::Stdio;

use harmony_core::dto::service::InvocationEnvelope;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use super::worker::{DispatchContext, DispatchError, Worker};

pub const CALLBACK_ENV: &str = "HARMONY_CALLBACK_URL";

/// Arguments appended to the configured command
pub fn invocation_args(ctx: &DispatchContext) -> Result<Vec<String>, DispatchError> {
    let envelope = InvocationEnvelope {
        request_id: ctx.request_id,
        callback: ctx.callback_url.clone(),
        user: ctx.user.clone(),
        operation: (*ctx.operation).clone(),
    };

    Ok(vec![
        "--harmony-action".to_string(),
        "invoke".to_string(),
        "--harmony-input".to_string(),
        serde_json::to_string(&envelope)?,
    ])
}

/// Spawns the backend process
pub fn spawn(
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
    ctx: &DispatchContext,
) -> Result<Worker, DispatchError> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .args(invocation_args(ctx)?)
        .envs(env)
        .env(CALLBACK_ENV, &ctx.callback_url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    info!(
        "Spawned backend process '{}' (pid {:?}) for request {}",
        command,
        child.id(),
        ctx.request_id
    );

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(relay_output(ctx.request_id, "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(relay_output(ctx.request_id, "stderr", stderr));
    }

    Ok(Worker::child(child))
}

async fn relay_output<R>(request_id: Uuid, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[{}] {}: {}", request_id, stream, line);
    }
}
