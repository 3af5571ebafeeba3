//! Labeling services layer.
//!
//! This module contains the engine that turns mailbox threads into taxonomy
//! labels, coordinating between the mailbox and LLM providers and the domain
//! types.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (interval loop)
//!          |
//!          v
//!   RunCoordinator  --> RunReporter (JSON + trace on disk)
//!          |
//!          v
//! per thread: fetch -> Classifier -> reconciler -> modify
//! ```
//!
//! # Services Overview
//!
//! - [`Classifier`]: Prompts the LLM and validates its answer against the taxonomy
//! - [`compute_delta`] / [`LabelCache`]: Minimal label changes and name to id resolution
//! - [`RunCoordinator`]: One run end to end, isolating per-thread failures
//! - [`RunReporter`]: Action and error records plus the persisted run report
//! - [`Scheduler`]: Runs the coordinator on a fixed interval until shutdown

mod classifier;
mod coordinator;
mod reconciler;
mod reporter;
mod scheduler;

pub use classifier::{
    build_system_prompt, build_user_prompt, parse_response, strip_code_fence,
    ClassificationError, Classifier,
};
pub use coordinator::{candidate_query, FetchError, RunCoordinator, RunOptions, ThreadError};
pub use reconciler::{
    apply_delta, compute_delta, kept_labels, ApplyError, ApplyOutcome, LabelCache,
};
pub use reporter::{
    write_report, ActionRecord, ErrorKind, ErrorRecord, ReportError, RunReport, RunReporter,
    RunStats, Trigger,
};
pub use scheduler::{shutdown_signal, Scheduler};
