//! Scripted backend
//!
//! Replays a fixed sequence of reports and records the operations it was
//! handed. Used to exercise the invoker and the HTTP surface without a real
//! backend.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use bytes::Bytes;
use harmony_core::domain::operation::Operation;
use tracing::warn;

use super::worker::{DispatchContext, Worker};
use crate::service::callback::BackendMessage;

/// One scripted report
#[derive(Debug, Clone)]
pub enum StubMessage {
    Error(String),
    Redirect(String),
    Payload {
        content_type: Option<String>,
        body: Bytes,
    },
    Progress(i32),
    Completed(Vec<String>),
}

impl From<StubMessage> for BackendMessage {
    fn from(message: StubMessage) -> Self {
        match message {
            StubMessage::Error(m) => BackendMessage::Error(m),
            StubMessage::Redirect(url) => BackendMessage::Redirect(url),
            StubMessage::Payload { content_type, body } => {
                BackendMessage::payload(content_type, Body::from(body))
            }
            StubMessage::Progress(progress) => BackendMessage::Progress {
                progress,
                message: None,
            },
            StubMessage::Completed(links) => BackendMessage::Completed {
                links,
                message: None,
            },
        }
    }
}

/// What the stub does once its script is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubEnding {
    Exit,
    Hang,
}

#[derive(Debug, Clone)]
pub struct StubBackend {
    script: Vec<StubMessage>,
    ending: StubEnding,
    operations: Arc<Mutex<Vec<Operation>>>,
}

impl StubBackend {
    /// Sends `script` then exits
    pub fn replying(script: Vec<StubMessage>) -> Self {
        Self {
            script,
            ending: StubEnding::Exit,
            operations: Arc::default(),
        }
    }

    /// Never reports and never exits
    pub fn silent() -> Self {
        Self::replying(vec![]).ending(StubEnding::Hang)
    }

    /// Exits without reporting
    pub fn crashing() -> Self {
        Self::replying(vec![])
    }

    pub fn ending(mut self, ending: StubEnding) -> Self {
        self.ending = ending;
        self
    }

    /// Operations handed to this backend, oldest first
    pub fn operations(&self) -> Vec<Operation> {
        self.operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last_operation(&self) -> Option<Operation> {
        self.operations().pop()
    }

    pub fn spawn(&self, ctx: &DispatchContext) -> Worker {
        self.operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((*ctx.operation).clone());

        let script = self.script.clone();
        let ending = self.ending;
        let request_id = ctx.request_id;
        let callbacks = ctx.callbacks.clone();

        Worker::task(tokio::spawn(async move {
            for message in script {
                if let Err(e) = callbacks.deliver(request_id, message.into()).await {
                    warn!("Stub report was not delivered: {}", e);
                    return;
                }
            }
            if ending == StubEnding::Hang {
                std::future::pending::<()>().await;
            }
        }))
    }
}
