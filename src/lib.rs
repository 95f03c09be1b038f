//! Napguard - per-identity request quotas
//!
//! This crate implements the abuse-control layer of the sleep-plan web
//! service: a process-local registry of named fixed-window limiters, keyed
//! by caller identity, answering allow/deny with a retry hint.

pub mod config;
pub mod error;
pub mod identity;
pub mod ratelimit;
