//! Backend callback routing
//!
//! Backends report back through `POST /service/{id}/response`. Each in-flight
//! invocation registers its request id here and receives the reports over a
//! bounded channel; the registration is removed when it is dropped.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use axum::body::{Body, BodyDataStream};
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Reports buffered per invocation before senders wait
const CHANNEL_CAPACITY: usize = 16;

/// A report from a backend about one request
#[derive(Debug)]
pub enum BackendMessage {
    /// The backend rejected the request
    Error(String),
    /// The result lives at this URL
    Redirect(String),
    /// The result is streamed in this body. `relayed` resolves once the
    /// consumer has read it to the end or dropped it.
    Payload {
        content_type: Option<String>,
        body: Body,
        relayed: RelayDone,
    },
    /// Work is underway
    Progress {
        progress: i32,
        message: Option<String>,
    },
    /// Work finished with results at these locations
    Completed {
        links: Vec<String>,
        message: Option<String>,
    },
}

impl BackendMessage {
    /// A payload whose relay is tracked from here on
    pub fn payload(content_type: Option<String>, body: Body) -> Self {
        let (body, relayed) = relay_body(body);
        BackendMessage::Payload {
            content_type,
            body,
            relayed,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("no in-flight request {0}")]
    UnknownRequest(Uuid),
}

/// Routes backend reports to the invocation waiting for them
#[derive(Debug, Clone, Default)]
pub struct CallbackRegistry {
    senders: Arc<Mutex<HashMap<Uuid, mpsc::Sender<BackendMessage>>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts accepting reports for `request_id`
    pub fn register(&self, request_id: Uuid) -> Registration {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(request_id, tx);

        Registration {
            request_id,
            rx,
            registry: self.clone(),
        }
    }

    /// Hands a report to the invocation registered for `request_id`
    ///
    /// Waits while that invocation's queue is full.
    pub async fn deliver(
        &self,
        request_id: Uuid,
        message: BackendMessage,
    ) -> Result<(), DeliveryError> {
        let sender = self
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&request_id)
            .cloned()
            .ok_or(DeliveryError::UnknownRequest(request_id))?;

        sender
            .send(message)
            .await
            .map_err(|_| DeliveryError::UnknownRequest(request_id))
    }

    pub fn is_registered(&self, request_id: Uuid) -> bool {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&request_id)
    }

    fn remove(&self, request_id: Uuid) {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&request_id);
    }
}

/// Receiving side of one request's reports
#[derive(Debug)]
pub struct Registration {
    request_id: Uuid,
    rx: mpsc::Receiver<BackendMessage>,
    registry: CallbackRegistry,
}

impl Registration {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Next report. Cancel-safe.
    pub async fn recv(&mut self) -> Option<BackendMessage> {
        self.rx.recv().await
    }

    /// A report that has already arrived, if any
    pub fn try_recv(&mut self) -> Option<BackendMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.request_id);
    }
}

/// Wraps a callback request body so its sender learns when the relay is over
///
/// The returned [`RelayDone`] resolves once the body has been read to the end
/// or dropped by the consumer. Data is only pulled from the backend as fast as
/// the consumer polls.
pub fn relay_body(body: Body) -> (Body, RelayDone) {
    let (done_tx, done_rx) = watch::channel(false);
    let stream = RelayStream {
        inner: body.into_data_stream(),
        done: done_tx,
    };
    (Body::from_stream(stream), RelayDone(done_rx))
}

/// Completion signal of one relayed body. Clones share the signal.
#[derive(Debug, Clone)]
pub struct RelayDone(watch::Receiver<bool>);

impl RelayDone {
    pub async fn finished(mut self) {
        // A closed channel also means the stream is gone
        let _ = self.0.wait_for(|done| *done).await;
    }

    pub fn is_finished(&self) -> bool {
        *self.0.borrow()
    }
}

struct RelayStream {
    inner: BodyDataStream,
    done: watch::Sender<bool>,
}

impl RelayStream {
    fn finish(&mut self) {
        self.done.send_replace(true);
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = poll {
            self.finish();
        }
        poll
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        self.finish();
    }
}
