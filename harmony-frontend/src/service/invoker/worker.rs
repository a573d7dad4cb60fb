//! Backend dispatch
//!
//! Starts a backend for one request and hands back a [`Worker`] handle that
//! can be awaited or terminated the same way whatever the execution mode.

use std::sync::Arc;

use harmony_core::domain::operation::Operation;
use thiserror::Error;
use tokio::process::Child;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::registry::ExecutionMode;
use super::{in_process, process};
use crate::service::callback::CallbackRegistry;

/// Everything a backend needs to run one request and report back
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub request_id: Uuid,
    pub operation: Arc<Operation>,
    pub user: String,
    pub callback_url: String,
    pub callbacks: CallbackRegistry,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to spawn backend process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to encode invocation: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unknown in-process service '{0}'")]
    UnknownService(String),
}

/// Starts the backend selected by `mode`
pub fn dispatch(mode: &ExecutionMode, ctx: &DispatchContext) -> Result<Worker, DispatchError> {
    match mode {
        ExecutionMode::InProcess { service } => {
            let local = in_process::local_service(service)
                .ok_or_else(|| DispatchError::UnknownService(service.clone()))?;
            Ok(in_process::spawn(local, ctx))
        }
        ExecutionMode::Process { command, args, env } => process::spawn(command, args, env, ctx),
        ExecutionMode::Stub(stub) => Ok(stub.spawn(ctx)),
    }
}

enum Handle {
    Child(Child),
    Task(JoinHandle<()>),
}

/// A running backend
pub struct Worker {
    handle: Handle,
    exit: Option<String>,
}

impl Worker {
    pub fn child(child: Child) -> Self {
        Self {
            handle: Handle::Child(child),
            exit: None,
        }
    }

    pub fn task(task: JoinHandle<()>) -> Self {
        Self {
            handle: Handle::Task(task),
            exit: None,
        }
    }

    /// How the backend stopped, if it has
    pub fn exit_description(&self) -> Option<&str> {
        self.exit.as_deref()
    }

    /// Waits for the backend to stop. Cancel-safe, and cheap once it has stopped.
    pub async fn wait(&mut self) -> String {
        if let Some(exit) = &self.exit {
            return exit.clone();
        }

        let description = match &mut self.handle {
            Handle::Child(child) => match child.wait().await {
                Ok(status) => format!("process exited with {}", status),
                Err(e) => format!("process could not be awaited: {}", e),
            },
            Handle::Task(task) => match task.await {
                Ok(()) => "service returned".to_string(),
                Err(e) if e.is_panic() => "service panicked".to_string(),
                Err(_) => "service was aborted".to_string(),
            },
        };

        self.exit = Some(description.clone());
        description
    }

    /// Stops the backend if it is still running
    pub async fn terminate(&mut self) {
        if self.exit.is_some() {
            return;
        }

        match &mut self.handle {
            Handle::Child(child) => {
                if let Err(e) = child.kill().await {
                    tracing::debug!("Failed to kill backend process: {}", e);
                }
                self.exit = Some("process was killed".to_string());
            }
            Handle::Task(task) => {
                task.abort();
                self.exit = Some("service was aborted".to_string());
            }
        }
    }
}
