//! Remedy library crate
//!
//! Exposes the fix engine so the CLI, benchmarks and external tooling share
//! one implementation of localization, editing, validation and retry.

pub mod config;
pub mod controller;
pub mod diff;
pub mod edit;
pub mod error;
pub mod generator;
pub mod git_ops;
pub mod issue;
pub mod localize;
pub mod outcome_log;
pub mod run;
pub mod storage;
pub mod syntax;
pub mod transaction;
pub mod util;
pub mod validate;
pub mod xref;
