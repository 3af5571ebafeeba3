//! Label domain types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::LabelId;

/// A label as listed by the mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxLabel {
    pub id: LabelId,
    /// Display name; for managed labels this is `CATEGORY/VALUE`.
    pub name: String,
}

impl MailboxLabel {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: LabelId(id.into()),
            name: name.into(),
        }
    }
}

/// Label changes needed to move a thread to its classified state.
///
/// `to_add` and `to_remove` never overlap, and `to_remove` only ever holds
/// managed labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDelta {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl LabelDelta {
    /// True when the thread is already labeled correctly.
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Well-known system label ids.
pub mod system_labels {
    use super::LabelId;

    /// Marker the mailbox puts on messages it sent.
    pub fn sent() -> LabelId {
        LabelId::from("SENT")
    }
}
