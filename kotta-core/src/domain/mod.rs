//! Core domain types
//!
//! The job status enumeration and job description are shared between the
//! client (which mutates and submits them) and every consumer that inspects
//! a job's last-known server-reported state.

pub mod job;
