//! Boundary to the external edit generator
//!
//! The generator is opaque and unreliable. Whatever it returns is decoded by
//! [`parse_generator_output`] into an [`EditSet`] or rejected as a
//! [`GeneratorError`]; nothing it produces reaches the engine unchecked.

pub mod client;
pub mod parse;
pub mod prompts;

pub use client::ChatGenerator;
pub use parse::parse_generator_output;

use crate::controller::AttemptRecord;
use crate::edit::EditSet;
use crate::error::GeneratorError;
use crate::issue::Issue;
use crate::localize::IssueContext;
use std::future::Future;
use std::pin::Pin;

pub type GenerateFuture<'a> =
    Pin<Box<dyn Future<Output = Result<EditSet, GeneratorError>> + Send + 'a>>;

/// Everything the generator sees for one attempt.
///
/// Built fresh for every PROPOSE step; `history` is a copy of the attempt
/// records so far, never a shared handle.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub issue: Issue,
    pub context: IssueContext,
    pub file_content: String,
    /// `path:line: text` hits for the localized symbol elsewhere in the repo
    pub cross_references: Vec<String>,
    pub history: Vec<AttemptRecord>,
    /// 1-based index of the attempt being requested
    pub attempt: usize,
    pub max_retries: usize,
}

impl GenerationRequest {
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_retries
    }
}

/// Produces candidate edits for an issue.
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> GenerateFuture<'a>;
}
