//! Continuous-delivery scheduler for AI coding agents.
//!
//! The engine repeatedly picks the most important unblocked ticket from an
//! issue tracker, runs the job configured for the ticket's type and state
//! (prompting an LLM or a coding agent, running project commands, committing
//! and merging on per-ticket git branches), then moves the ticket along the
//! workflow's success or fail transition.
//!
//! - **[`core`]**: Pure, deterministic logic (workflow model and validation,
//!   selection, plan validation, branch naming, reference scraping, backoff).
//! - **[`io`]**: Side-effecting adapters (tracker, LLM, coding agent, git,
//!   processes, prompts, configuration).
//!
//! Orchestration modules ([`routine`], [`transitions`], [`select`],
//! [`looping`]) combine both through an explicit [`engine::Engine`] context.

pub mod branches;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod handlers;
pub mod io;
pub mod knowledge;
pub mod logging;
pub mod looping;
pub mod routine;
pub mod select;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod transitions;
