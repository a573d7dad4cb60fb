//! Backend service definitions
//!
//! Maps collections to the backend that serves them and to how that backend
//! is executed. Loaded once at startup.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use harmony_core::domain::operation::Operation;
use serde::{Deserialize, Serialize};

use super::in_process;
use super::stub::StubBackend;

/// Matches every collection
pub const ANY_COLLECTION: &str = "*";

/// Longest time any backend may be given to respond
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// One backend service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub collections: Vec<String>,
    pub mode: ExecutionMode,
    /// Track requests as jobs instead of answering inline
    #[serde(default, rename = "async")]
    pub is_async: bool,
    /// Overrides the frontend's default service timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// How a backend is executed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// A library call inside the frontend process
    InProcess { service: String },
    /// A spawned child process, typically a container runtime
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Scripted test double
    #[serde(skip)]
    Stub(StubBackend),
}

impl ServiceConfig {
    pub fn serves(&self, collection: &str) -> bool {
        self.collections
            .iter()
            .any(|c| c == ANY_COLLECTION || c == collection)
    }

    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }
}

/// All configured backend services, in priority order
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<ServiceConfig>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<ServiceConfig>) -> anyhow::Result<Self> {
        for service in &services {
            if service.collections.is_empty() {
                anyhow::bail!("service '{}' serves no collections", service.name);
            }
            match &service.mode {
                ExecutionMode::InProcess { service: name } => {
                    if in_process::local_service(name).is_none() {
                        anyhow::bail!(
                            "service '{}' names unknown in-process service '{}'",
                            service.name,
                            name
                        );
                    }
                }
                ExecutionMode::Process { command, .. } if command.is_empty() => {
                    anyhow::bail!("service '{}' has an empty command", service.name);
                }
                _ => {}
            }
            match service.timeout_secs {
                Some(0) => anyhow::bail!("service '{}' has a zero timeout", service.name),
                Some(secs) if secs > MAX_TIMEOUT_SECS => anyhow::bail!(
                    "service '{}' timeout of {}s exceeds the {}s limit",
                    service.name,
                    secs,
                    MAX_TIMEOUT_SECS
                ),
                _ => {}
            }
        }

        Ok(Self { services })
    }

    /// Loads service definitions from a JSON file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read services config {}", path.display()))?;
        let services: Vec<ServiceConfig> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse services config {}", path.display()))?;
        Self::new(services)
    }

    /// Fallback used when no services file is configured
    pub fn default_services() -> Self {
        Self {
            services: vec![ServiceConfig {
                name: "harmony/noop".to_string(),
                collections: vec![ANY_COLLECTION.to_string()],
                mode: ExecutionMode::InProcess {
                    service: in_process::NOOP.to_string(),
                },
                is_async: false,
                timeout_secs: None,
            }],
        }
    }

    /// The service responsible for an operation
    pub fn resolve(&self, operation: &Operation) -> Option<&ServiceConfig> {
        let collection = operation.primary_collection()?;
        self.services.iter().find(|s| s.serves(collection))
    }

    pub fn services(&self) -> &[ServiceConfig] {
        &self.services
    }
}
