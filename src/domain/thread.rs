//! Thread snapshot handed to the classifier.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::label::system_labels;
use super::{LabelId, ThreadId};

/// One message of a thread, reduced to what classification needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    /// Raw `From` header.
    pub sender: String,
    /// Raw `Date` header.
    pub timestamp: String,
    /// Labels on this message.
    pub label_ids: Vec<LabelId>,
    /// Plain-text excerpt of the body.
    pub body_excerpt: String,
}

impl ThreadMessage {
    /// Whether this message was sent from the mailbox itself.
    ///
    /// Approximate: relies on the mailbox tagging outgoing mail with its sent
    /// marker. Mail sent from another client and imported later may not carry it.
    pub fn is_from_us(&self) -> bool {
        self.label_ids.contains(&system_labels::sent())
    }
}

/// A thread as fetched at the start of processing. Built fresh every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadContext {
    pub id: ThreadId,
    pub subject: String,
    /// Messages in chronological order.
    pub messages: Vec<ThreadMessage>,
    /// Union of the label ids on all messages.
    pub label_ids: BTreeSet<LabelId>,
}

impl ThreadContext {
    /// Builds a context, deriving the thread's label set from its messages.
    pub fn new(id: ThreadId, subject: impl Into<String>, messages: Vec<ThreadMessage>) -> Self {
        let label_ids = messages
            .iter()
            .flat_map(|m| m.label_ids.iter().cloned())
            .collect();
        Self {
            id,
            subject: subject.into(),
            messages,
            label_ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the most recent message came from us.
    pub fn last_message_from_us(&self) -> bool {
        self.messages.last().is_some_and(ThreadMessage::is_from_us)
    }
}
