//! Domain layer types for the labeler.
//!
//! This module contains the taxonomy catalog, the classification record, the
//! thread snapshot the classifier reads, and the label types the reconciler
//! works with.

mod classification;
mod label;
mod taxonomy;
mod thread;
mod types;

pub use classification::Classification;
pub use label::{system_labels, LabelDelta, MailboxLabel};
pub use taxonomy::{
    qualify, Category, Taxonomy, ValidationError, PREPARE_REPLY, TAXONOMY_VERSION,
};
pub use thread::{ThreadContext, ThreadMessage};
pub use types::{LabelId, ThreadId};
