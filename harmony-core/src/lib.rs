//! Harmony Core
//!
//! Core types and abstractions for the Harmony request broker.
//!
//! This crate contains:
//! - Domain types: Core business entities (Job, Operation)
//! - DTOs: Wire representations for the HTTP API and backend services

pub mod domain;
pub mod dto;
