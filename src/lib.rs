//! # adhound
//!
//! An Active Directory collector: it enumerates objects and relationships
//! in one or more domains over LDAP, resolves and enriches them, and emits
//! a zipped bundle of BloodHound-compatible JSON files.
//!
//! ## Overview
//!
//! The crate is organized around one orchestration chain of named links
//! executed over a shared [`context::RunContext`]. All concurrency lives
//! inside a single collection pass: one or two producers stream directory
//! objects into a bounded channel, a worker pool dispatches them through
//! pluggable processors, and a router partitions the resulting records
//! into per-kind JSON writers.
//!
//! ## Features
//!
//! - **Three producer strategies**: full LDAP enumeration, stealth
//!   enumeration derived from user attribute paths, and explicit host
//!   lists
//! - **Cross-domain discovery**: single domain, forest-wide, or recursive
//!   trust traversal
//! - **Looped collection**: timed re-collection of session data with
//!   two-level cancellation semantics
//! - **Persistent resolver cache**: name/SID/type resolutions survive
//!   across runs
//!
//! ## Module Organization
//!
//! - [`cli`]: command-line definitions and argument parsing
//! - [`context`]: the run context threaded through the chain
//! - [`links`]: the orchestration chain and loop manager
//! - [`discovery`]: target domain resolution
//! - [`producers`]: the three producer strategies
//! - [`pipeline`]: worker pool and per-pass orchestration
//! - [`processors`]: pluggable per-object processing
//! - [`output`]: per-kind writers, routing and zip bundling
//! - [`ldap`]: the directory transport seam and its `ldap3` adapter
//! - [`cache`]: the persistent resolver cache

pub mod cache;
pub mod cli;
pub mod constants;
pub mod context;
pub mod discovery;
pub mod ldap;
pub mod links;
pub mod methods;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod processors;
pub mod producers;

/// Test utilities and the in-memory directory mock.
#[doc(hidden)]
pub mod test_utils;
