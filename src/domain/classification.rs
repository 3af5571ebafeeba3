//! The typed classification record produced for one thread.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

use super::taxonomy::{qualify, Category, PREPARE_REPLY};

/// One value per managed category plus a short rationale.
///
/// Values are bare (`New`, not `STATUS/New`); prefixes are attached by
/// [`target_labels`](Self::target_labels). The wire shape is exactly these
/// six fields, anything else fails to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Classification {
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Only set for finance-related threads. The key must be present;
    /// `null` means no finance label.
    #[serde(deserialize_with = "present_or_null")]
    pub finance: Option<String>,
    pub action: String,
    pub priority: String,
    pub reason: String,
}

/// Like `Option::deserialize`, but a missing key is an error rather than `None`.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)
}

impl Classification {
    /// Category/value pairs carried by this record. `FINANCE` is omitted when null.
    pub fn assignments(&self) -> Vec<(Category, &str)> {
        let mut pairs = vec![
            (Category::Status, self.status.as_str()),
            (Category::Type, self.kind.as_str()),
            (Category::Action, self.action.as_str()),
            (Category::Priority, self.priority.as_str()),
        ];
        if let Some(finance) = &self.finance {
            pairs.push((Category::Finance, finance.as_str()));
        }
        pairs
    }

    /// The fully-qualified labels this thread should carry.
    pub fn target_labels(&self) -> BTreeSet<String> {
        self.assignments()
            .into_iter()
            .map(|(category, value)| qualify(category, value))
            .collect()
    }

    /// Whether the thread was handed to the reply-drafting agent.
    pub fn requires_follow_up(&self) -> bool {
        self.action == PREPARE_REPLY
    }
}
