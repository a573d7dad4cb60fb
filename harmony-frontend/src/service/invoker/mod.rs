//! Service Invoker
//!
//! Runs an operation on the backend configured for its collection. Synchronous
//! services answer inline with a redirect, a streamed payload, or an error.
//! Asynchronous services get a job that is driven to a terminal status in the
//! background while the caller gets the job right away.

pub mod in_process;
pub mod process;
pub mod registry;
pub mod stub;
pub mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::StatusCode;
use harmony_core::domain::job::{Job, JobLink, JobUpdate, TransitionError};
use harmony_core::domain::operation::Operation;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repository::{JobStore, StoreError};
use crate::service::callback::{BackendMessage, CallbackRegistry, Registration, RelayDone};

pub use registry::{ExecutionMode, ServiceConfig, ServiceRegistry};
use worker::{DispatchContext, Worker, dispatch};

/// Reported when a backend stops or times out without answering
pub const PROCESS_DIED_MESSAGE: &str = "Child process died without responding.";

pub const FAILED_MESSAGE: &str = "Service request failed";

const ASYNC_PAYLOAD_MESSAGE: &str = "Asynchronous services must report results as links";

/// Deadline used when a timeout does not fit on the clock
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Attempts at writing a terminal status before the job is given up on
const TERMINAL_WRITE_ATTEMPTS: u32 = 10;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

// =============================================================================
// Results
// =============================================================================

/// What a synchronous invocation hands back to the client
#[derive(Debug)]
pub enum InvocationResult {
    /// Stream these bytes back
    Payload {
        body: Body,
        content_type: Option<String>,
        status: StatusCode,
    },
    /// Send the client here, verbatim
    Redirect(String),
    /// The request failed with this message
    Error { message: String, status: StatusCode },
}

/// Why a backend did not produce a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceFailure {
    /// The backend reported an error
    Reported(String),
    /// The backend stopped without answering
    Died,
    /// The backend did not answer in time
    TimedOut,
    /// The backend could not be started
    Dispatch,
    /// The backend answered without anything to return
    Incomplete,
}

impl ServiceFailure {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceFailure::Reported(_) => StatusCode::BAD_REQUEST,
            ServiceFailure::TimedOut => StatusCode::GATEWAY_TIMEOUT,
            ServiceFailure::Died | ServiceFailure::Dispatch | ServiceFailure::Incomplete => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    pub fn message(&self) -> String {
        match self {
            ServiceFailure::Reported(message) => message.clone(),
            ServiceFailure::Died | ServiceFailure::TimedOut => PROCESS_DIED_MESSAGE.to_string(),
            ServiceFailure::Dispatch => "Service request failed to start.".to_string(),
            ServiceFailure::Incomplete => "Service completed without producing a result.".to_string(),
        }
    }
}

impl From<ServiceFailure> for InvocationResult {
    fn from(failure: ServiceFailure) -> Self {
        InvocationResult::Error {
            message: failure.message(),
            status: failure.status(),
        }
    }
}

/// Outcome of handing an operation to a service
#[derive(Debug)]
pub enum Invocation {
    /// Synchronous service answered
    Completed(InvocationResult),
    /// Asynchronous service accepted the work as this job
    Accepted(Job),
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("no service is configured for collection {0}")]
    NoService(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// Invoker
// =============================================================================

pub struct ServiceInvoker {
    services: ServiceRegistry,
    store: Arc<dyn JobStore>,
    callbacks: CallbackRegistry,
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    callback_root: String,
    default_timeout: Duration,
}

impl ServiceInvoker {
    pub fn new(
        services: ServiceRegistry,
        store: Arc<dyn JobStore>,
        callbacks: CallbackRegistry,
        callback_root: &str,
        default_timeout: Duration,
    ) -> Self {
        Self {
            services,
            store,
            callbacks,
            running: Arc::default(),
            callback_root: callback_root.trim_end_matches('/').to_string(),
            default_timeout,
        }
    }

    /// Runs `operation` on behalf of `user`
    pub async fn invoke(&self, operation: Operation, user: &str) -> Result<Invocation, InvokeError> {
        let service = self.services.resolve(&operation).cloned().ok_or_else(|| {
            InvokeError::NoService(operation.primary_collection().unwrap_or_default().to_string())
        })?;
        let operation = Arc::new(operation);

        if service.is_async {
            let job = self.start_job(&service, operation, user).await?;
            Ok(Invocation::Accepted(job))
        } else {
            let result = self.invoke_sync(&service, operation, user).await;
            Ok(Invocation::Completed(result))
        }
    }

    /// Stops the backend working on `job_id`
    ///
    /// The job's status must already have been recorded. Returns false when
    /// no backend was running for it.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let token = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&job_id);

        match token {
            Some(token) => {
                info!("Signalling backend for job {} to stop", job_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn context(&self, request_id: Uuid, operation: Arc<Operation>, user: &str) -> DispatchContext {
        DispatchContext {
            request_id,
            operation,
            user: user.to_string(),
            callback_url: format!("{}/service/{}", self.callback_root, request_id),
            callbacks: self.callbacks.clone(),
        }
    }

    async fn invoke_sync(
        &self,
        service: &ServiceConfig,
        operation: Arc<Operation>,
        user: &str,
    ) -> InvocationResult {
        let request_id = Uuid::new_v4();
        let registration = self.callbacks.register(request_id);
        let ctx = self.context(request_id, operation, user);
        let timeout = service.timeout(self.default_timeout);

        info!("Invoking service {} for request {}", service.name, request_id);
        let worker = match dispatch(&service.mode, &ctx) {
            Ok(worker) => worker,
            Err(e) => {
                error!("Failed to start service {}: {}", service.name, e);
                return ServiceFailure::Dispatch.into();
            }
        };

        let mut execution = Execution::new(registration, worker, timeout);
        let (result, relayed) = loop {
            match execution.next_event(None).await {
                Event::Message(BackendMessage::Progress { progress, .. }) => {
                    debug!("Request {} reported progress {}", request_id, progress);
                }
                Event::Message(message) => break sync_result(message),
                Event::Exited(how) => {
                    warn!("Service {} for request {}: {}", service.name, request_id, how);
                    break (ServiceFailure::Died.into(), None);
                }
                Event::TimedOut | Event::Canceled => {
                    warn!(
                        "Service {} timed out after {:?} on request {}",
                        service.name, timeout, request_id
                    );
                    execution.worker.terminate().await;
                    break (ServiceFailure::TimedOut.into(), None);
                }
            }
        };

        tokio::spawn(execution.reap(relayed, timeout));
        result
    }

    async fn start_job(
        &self,
        service: &ServiceConfig,
        operation: Arc<Operation>,
        user: &str,
    ) -> Result<Job, StoreError> {
        // Stored as running in a single write so a fault never strands a created job
        let mut job = Job::new(user);
        job.apply(JobUpdate::running())
            .map_err(|source| StoreError::InvalidTransition { id: job.id, source })?;
        self.store.create(&job).await?;
        info!("Created job {} for {} on service {}", job.id, user, service.name);

        let registration = self.callbacks.register(job.id);
        let ctx = self.context(job.id, operation, user);

        let worker = match dispatch(&service.mode, &ctx) {
            Ok(worker) => worker,
            Err(e) => {
                error!("Failed to start service {} for job {}: {}", service.name, job.id, e);
                let failed = JobUpdate::failed(ServiceFailure::Dispatch.message());
                return record_terminal(self.store.as_ref(), job.id, failed).await;
            }
        };

        let token = CancellationToken::new();
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job.id, token.clone());

        let timeout = service.timeout(self.default_timeout);
        let driver = JobDriver {
            job_id: job.id,
            store: self.store.clone(),
            running: self.running.clone(),
            execution: Execution::new(registration, worker, timeout),
            token,
            timeout,
        };
        tokio::spawn(driver.run());

        Ok(job)
    }
}

/// The client's answer, and the relay to wait on when it is a streamed body
fn sync_result(message: BackendMessage) -> (InvocationResult, Option<RelayDone>) {
    match message {
        BackendMessage::Payload {
            content_type,
            body,
            relayed,
        } => {
            let result = InvocationResult::Payload {
                body,
                content_type,
                status: StatusCode::OK,
            };
            (result, Some(relayed))
        }
        BackendMessage::Error(message) => (ServiceFailure::Reported(message).into(), None),
        BackendMessage::Redirect(url) => (InvocationResult::Redirect(url), None),
        BackendMessage::Completed { links, .. } => match links.into_iter().next() {
            Some(url) => (InvocationResult::Redirect(url), None),
            None => (ServiceFailure::Incomplete.into(), None),
        },
        BackendMessage::Progress { .. } => (ServiceFailure::Incomplete.into(), None),
    }
}

/// Writes a terminal update, retrying while the store is faulting
async fn record_terminal(
    store: &dyn JobStore,
    id: Uuid,
    update: JobUpdate,
) -> Result<Job, StoreError> {
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 1;
    loop {
        match store.update_status(id, update.clone()).await {
            Err(e) if e.is_fault() && attempt < TERMINAL_WRITE_ATTEMPTS => {
                warn!(
                    "Failed to record {} for job {} (attempt {}): {}",
                    update.status, id, attempt, e
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RETRY_MAX_DELAY);
                attempt += 1;
            }
            result => return result,
        }
    }
}

// =============================================================================
// Execution
// =============================================================================

enum Event {
    Message(BackendMessage),
    Exited(String),
    TimedOut,
    Canceled,
}

/// One running backend and the reports coming back from it
struct Execution {
    registration: Registration,
    worker: Worker,
    deadline: Instant,
}

impl Execution {
    fn new(registration: Registration, worker: Worker, timeout: Duration) -> Self {
        Self {
            registration,
            worker,
            deadline: Instant::now()
                .checked_add(timeout)
                .unwrap_or_else(|| Instant::now() + FAR_FUTURE),
        }
    }

    async fn next_event(&mut self, cancel: Option<&CancellationToken>) -> Event {
        if let Some(how) = self.worker.exit_description() {
            return match self.registration.try_recv() {
                Some(message) => Event::Message(message),
                None => Event::Exited(how.to_string()),
            };
        }

        tokio::select! {
            biased;
            _ = canceled(cancel) => Event::Canceled,
            Some(message) = self.registration.recv() => Event::Message(message),
            how = self.worker.wait() => {
                // Reports sent just before exiting are still queued
                match self.registration.try_recv() {
                    Some(message) => Event::Message(message),
                    None => Event::Exited(how),
                }
            }
            _ = tokio::time::sleep_until(self.deadline) => Event::TimedOut,
        }
    }

    /// Lets the backend wind down once its answer is in, killing it if it lingers
    ///
    /// A backend streaming a payload is left alone until the relay is over.
    async fn reap(self, relayed: Option<RelayDone>, grace: Duration) {
        let Execution {
            registration,
            mut worker,
            ..
        } = self;
        let request_id = registration.request_id();
        drop(registration);

        if let Some(relayed) = relayed {
            relayed.finished().await;
        }

        match tokio::time::timeout(grace, worker.wait()).await {
            Ok(how) => debug!("Backend for request {} stopped: {}", request_id, how),
            Err(_) => {
                warn!("Backend for request {} did not exit, terminating", request_id);
                worker.terminate().await;
            }
        }
    }
}

async fn canceled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Job driver
// =============================================================================

/// Whether a job can still take updates
enum Recorded {
    Open,
    Closed,
}

/// Drives one asynchronous job to a terminal status
struct JobDriver {
    job_id: Uuid,
    store: Arc<dyn JobStore>,
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    execution: Execution,
    token: CancellationToken,
    timeout: Duration,
}

impl JobDriver {
    async fn run(mut self) {
        loop {
            let update = match self.execution.next_event(Some(&self.token)).await {
                Event::Canceled => {
                    info!("Job {} was canceled, stopping its backend", self.job_id);
                    self.execution.worker.terminate().await;
                    break;
                }
                Event::Message(BackendMessage::Progress { progress, message }) => {
                    JobUpdate::progress(progress, message)
                }
                Event::Message(BackendMessage::Completed { links, message }) => {
                    if links.is_empty() {
                        JobUpdate::failed(ServiceFailure::Incomplete.message())
                    } else {
                        let links = links.into_iter().map(JobLink::new).collect();
                        JobUpdate::successful(links, message)
                    }
                }
                Event::Message(BackendMessage::Redirect(url)) => {
                    JobUpdate::successful(vec![JobLink::new(url)], None)
                }
                Event::Message(BackendMessage::Error(message)) if message.trim().is_empty() => {
                    JobUpdate::failed(FAILED_MESSAGE)
                }
                Event::Message(BackendMessage::Error(message)) => JobUpdate::failed(message),
                Event::Message(BackendMessage::Payload { .. }) => {
                    JobUpdate::failed(ASYNC_PAYLOAD_MESSAGE.to_string())
                }
                Event::Exited(how) => {
                    warn!("Backend for job {} stopped without finishing: {}", self.job_id, how);
                    JobUpdate::failed(ServiceFailure::Died.message())
                }
                Event::TimedOut => {
                    warn!("Job {} timed out after {:?}", self.job_id, self.timeout);
                    self.execution.worker.terminate().await;
                    JobUpdate::failed(ServiceFailure::TimedOut.message())
                }
            };

            let terminal = update.status.is_terminal();
            if let Recorded::Closed = self.record(update).await {
                self.execution.worker.terminate().await;
                break;
            }
            if terminal {
                break;
            }
        }

        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.job_id);
        self.execution.reap(None, self.timeout).await;
    }

    async fn record(&self, update: JobUpdate) -> Recorded {
        let status = update.status;
        let result = if status.is_terminal() {
            record_terminal(self.store.as_ref(), self.job_id, update).await
        } else {
            self.store.update_status(self.job_id, update).await
        };

        match result {
            Ok(job) => {
                debug!("Job {} is now {} ({}%)", job.id, job.status(), job.progress());
                Recorded::Open
            }
            Err(StoreError::InvalidTransition {
                source: TransitionError::Terminal { from, .. },
                ..
            }) => {
                info!("Job {} already {}, ignoring {} update", self.job_id, from, status);
                Recorded::Closed
            }
            Err(StoreError::InvalidTransition { source, .. }) => {
                warn!("Ignoring update for job {}: {}", self.job_id, source);
                Recorded::Open
            }
            Err(e) if status.is_terminal() => {
                error!("Giving up on recording {} for job {}: {}", status, self.job_id, e);
                Recorded::Closed
            }
            Err(e) => {
                error!("Failed to record {} for job {}: {}", status, self.job_id, e);
                Recorded::Open
            }
        }
    }
}
