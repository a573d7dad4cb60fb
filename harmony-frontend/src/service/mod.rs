//! Service Module
//!
//! Business logic layer for the frontend.
//! Services sit between the HTTP handlers, the job store and the backends.

pub mod callback;
pub mod invoker;
pub mod job;

// Re-export for convenience
pub use job as job_service;
