//! Data Transfer Objects
//!
//! Wire representations used by the HTTP API and by backend services.

pub mod job;
pub mod service;
