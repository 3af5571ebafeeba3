//! The closed label catalog every classification is checked against.
//!
//! Managed labels are written `CATEGORY/VALUE`, e.g. `STATUS/New`. The
//! `DRAFT` category is reserved for downstream agents: it is part of the
//! catalog (so it shows up in dumps) but never produces managed labels.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Classification;

/// Version of the built-in catalog. Bump when values are added or removed.
pub const TAXONOMY_VERSION: u32 = 1;

/// The `ACTION` value that hands a thread to the reply-drafting agent.
pub const PREPARE_REPLY: &str = "Prepare-reply";

/// A label category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Status,
    Type,
    Finance,
    Action,
    Priority,
    /// Reserved; owned by the draft agent.
    Draft,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Status,
        Category::Type,
        Category::Finance,
        Category::Action,
        Category::Priority,
        Category::Draft,
    ];

    /// Label prefix for this category (`STATUS`, `TYPE`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Status => "STATUS",
            Category::Type => "TYPE",
            Category::Finance => "FINANCE",
            Category::Action => "ACTION",
            Category::Priority => "PRIORITY",
            Category::Draft => "DRAFT",
        }
    }

    /// Parses a label prefix. Matching is exact; `status` is not `STATUS`.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == prefix)
    }

    /// Whether labels in this category are left alone by the labeler.
    pub fn is_reserved(&self) -> bool {
        matches!(self, Category::Draft)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classification field that does not belong to the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{category} value {value:?} is not in the taxonomy")]
    UnknownValue { category: Category, value: String },
}

/// Builds the fully-qualified label name for a category value.
pub fn qualify(category: Category, value: &str) -> String {
    format!("{}/{}", category.as_str(), value)
}

/// The label catalog: category to ordered allowed values.
#[derive(Debug, Clone, Serialize)]
pub struct Taxonomy {
    version: u32,
    categories: BTreeMap<Category, Vec<String>>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Taxonomy {
    /// The catalog the labeler ships with.
    pub fn builtin() -> Self {
        let mut categories = BTreeMap::new();
        let mut insert = |category: Category, values: &[&str]| {
            categories.insert(
                category,
                values.iter().map(|v| (*v).to_string()).collect::<Vec<_>>(),
            );
        };

        insert(
            Category::Status,
            &["New", "Processed", "Waiting-for-reply", "Closed"],
        );
        insert(
            Category::Type,
            &[
                "Order",
                "Complaint",
                "Return",
                "Shipping",
                "Payment",
                "Product-inquiry",
                "General-inquiry",
                "Supplier",
                "Newsletter-inbound",
                "Spam",
                "Internal",
            ],
        );
        insert(
            Category::Finance,
            &[
                "Invoice-incoming",
                "Invoice-overdue",
                "Invoice-outgoing",
                "Payment-confirmation",
                "Credit-note",
                "Contract",
            ],
        );
        insert(
            Category::Action,
            &[
                PREPARE_REPLY,
                "Escalate",
                "Forward-internally",
                "No-action",
                "Waiting-for-info",
            ],
        );
        insert(Category::Priority, &["Urgent", "Normal", "Low"]);
        insert(Category::Draft, &[]);

        Self {
            version: TAXONOMY_VERSION,
            categories,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Allowed values for a category, in catalog order.
    pub fn values(&self, category: Category) -> &[String] {
        self.categories
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `value` is listed under `category`.
    pub fn contains(&self, category: Category, value: &str) -> bool {
        self.values(category).iter().any(|v| v == value)
    }

    /// Every `CATEGORY/VALUE` pair outside the reserved category.
    pub fn fully_qualified_labels(&self) -> BTreeSet<String> {
        self.categories
            .iter()
            .filter(|(category, _)| !category.is_reserved())
            .flat_map(|(category, values)| values.iter().map(|v| qualify(*category, v)))
            .collect()
    }

    /// Whether an existing mailbox label is owned by the labeler and may be
    /// removed during reconciliation.
    pub fn is_managed(&self, label: &str) -> bool {
        let Some((prefix, value)) = label.split_once('/') else {
            return false;
        };
        match Category::from_prefix(prefix) {
            Some(category) if !category.is_reserved() => self.contains(category, value),
            _ => false,
        }
    }

    /// Checks every field of a classification against the catalog.
    ///
    /// Values are compared verbatim: a prefixed value such as `STATUS/New` or
    /// a case variant such as `new` is rejected rather than repaired.
    pub fn validate(&self, classification: &Classification) -> Result<(), ValidationError> {
        for (category, value) in classification.assignments() {
            if !self.contains(category, value) {
                return Err(ValidationError::UnknownValue {
                    category,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// The catalog as a `CATEGORY -> [values]` map, for dumps.
    pub fn as_map(&self) -> BTreeMap<&'static str, &[String]> {
        self.categories
            .iter()
            .map(|(category, values)| (category.as_str(), values.as_slice()))
            .collect()
    }
}
