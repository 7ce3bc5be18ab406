//! Kotta Core
//!
//! Wire and domain types for the Kotta batch-computation client.
//!
//! This crate contains:
//! - Domain types: the job status enumeration and the mutable job description
//! - DTOs: the submit/status/upload response shapes exchanged with the service
//! - Pack format: the wire encoding that carries a function and its call
//!   arguments to the compute side
//!
//! Everything here is pure data; protocol behavior lives in `kotta-client`.

pub mod domain;
pub mod dto;
pub mod pack;
