//! Core domain types
//!
//! This module contains the core domain structures used across Harmony services.
//! Jobs are persisted by the job store; operations are built by protocol
//! adapters and handed to backend services.

pub mod job;
pub mod operation;
