//! Label reconciliation.
//!
//! Computes the minimal [`LabelDelta`] that moves a thread from its current
//! labels to the ones its classification calls for, and applies it through a
//! per-run [`LabelCache`] that maps label names to mailbox ids.
//!
//! Only managed labels (`CATEGORY/VALUE` with a listed value) are ever
//! removed. Everything else on a thread is left alone.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::domain::{Classification, LabelDelta, LabelId, MailboxLabel, Taxonomy, ThreadId};
use crate::providers::email::{MailboxProvider, ProviderError};

/// Applying a label delta failed.
#[derive(Debug, Error)]
#[error("label update failed: {0}")]
pub struct ApplyError(#[from] pub ProviderError);

/// Computes the label changes for a thread.
///
/// `current` holds label *names*. The result adds every target label the
/// thread lacks and removes every managed label that is not a target.
pub fn compute_delta(
    taxonomy: &Taxonomy,
    current: &BTreeSet<String>,
    classification: &Classification,
) -> LabelDelta {
    let target = classification.target_labels();

    let to_add = target.difference(current).cloned().collect();
    let to_remove = current
        .iter()
        .filter(|label| taxonomy.is_managed(label) && !target.contains(*label))
        .cloned()
        .collect();

    LabelDelta { to_add, to_remove }
}

/// Managed labels the thread already carries and keeps.
pub fn kept_labels(current: &BTreeSet<String>, classification: &Classification) -> BTreeSet<String> {
    classification
        .target_labels()
        .intersection(current)
        .cloned()
        .collect()
}

/// Name to id map of the mailbox's labels, owned by a single run.
#[derive(Debug, Default)]
pub struct LabelCache {
    by_name: HashMap<String, LabelId>,
    by_id: HashMap<LabelId, String>,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cache from an existing label listing.
    pub fn from_labels(labels: impl IntoIterator<Item = MailboxLabel>) -> Self {
        let mut cache = Self::new();
        for label in labels {
            cache.insert(label.id, label.name);
        }
        cache
    }

    pub fn insert(&mut self, id: LabelId, name: String) {
        self.by_id.insert(id.clone(), name.clone());
        self.by_name.insert(name, id);
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn id_of(&self, name: &str) -> Option<&LabelId> {
        self.by_name.get(name)
    }

    /// Replaces the cache contents with the mailbox's current labels.
    pub async fn rebuild(&mut self, mailbox: &dyn MailboxProvider) -> Result<(), ProviderError> {
        let labels = mailbox.list_labels().await?;
        self.by_name.clear();
        self.by_id.clear();
        for label in labels {
            self.insert(label.id, label.name);
        }
        tracing::debug!(labels = self.len(), "Label cache rebuilt");
        Ok(())
    }

    /// Creates every taxonomy label the mailbox lacks.
    ///
    /// Failures are logged per label and do not stop the remaining creates.
    /// Returns the names that could not be created.
    pub async fn ensure_labels(
        &mut self,
        mailbox: &dyn MailboxProvider,
        taxonomy: &Taxonomy,
    ) -> Vec<(String, ProviderError)> {
        let mut failures = Vec::new();

        for name in taxonomy.fully_qualified_labels() {
            if self.by_name.contains_key(&name) {
                continue;
            }
            match mailbox.create_label(&name).await {
                Ok(id) => {
                    tracing::info!(label = %name, "Created missing taxonomy label");
                    self.insert(id, name);
                }
                Err(e) => {
                    tracing::warn!(label = %name, error = %e, "Failed to create taxonomy label");
                    failures.push((name, e));
                }
            }
        }

        failures
    }

    /// Translates label ids to names.
    ///
    /// Ids the cache does not know (system labels such as `INBOX`) are kept
    /// verbatim, so they can never collide with a managed name.
    pub fn names_for<'a>(&self, ids: impl IntoIterator<Item = &'a LabelId>) -> BTreeSet<String> {
        ids.into_iter()
            .map(|id| self.by_id.get(id).cloned().unwrap_or_else(|| id.0.clone()))
            .collect()
    }

    /// Maps label names to ids, dropping unknown names.
    pub fn resolve<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Vec<LabelId> {
        names
            .into_iter()
            .filter_map(|name| self.by_name.get(name).cloned())
            .collect()
    }

    /// Splits names into those the mailbox has and those it does not.
    pub fn partition(&self, names: &BTreeSet<String>) -> (BTreeSet<String>, BTreeSet<String>) {
        names
            .iter()
            .cloned()
            .partition(|name| self.by_name.contains_key(name))
    }
}

/// What [`apply_delta`] actually did to a thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Changes sent to the mailbox.
    pub applied: LabelDelta,
    /// Names dropped because the cache has no id for them.
    pub unresolved: BTreeSet<String>,
}

impl ApplyOutcome {
    /// Whether a modify call was made.
    pub fn modified(&self) -> bool {
        !self.applied.is_noop()
    }
}

/// Applies a delta to a thread in one modify call.
///
/// Names are resolved best-effort. Unknown names are left out of the call
/// and reported in [`ApplyOutcome::unresolved`]; when nothing resolves no
/// call is made.
pub async fn apply_delta(
    mailbox: &dyn MailboxProvider,
    cache: &LabelCache,
    thread_id: &ThreadId,
    delta: &LabelDelta,
) -> Result<ApplyOutcome, ApplyError> {
    let (to_add, mut unresolved) = cache.partition(&delta.to_add);
    let (to_remove, missing) = cache.partition(&delta.to_remove);
    unresolved.extend(missing);

    for name in &unresolved {
        tracing::warn!(
            thread_id = %thread_id,
            label = %name,
            "Label missing from mailbox, skipping"
        );
    }

    let outcome = ApplyOutcome {
        applied: LabelDelta { to_add, to_remove },
        unresolved,
    };
    if !outcome.modified() {
        tracing::warn!(thread_id = %thread_id, "No labels resolved, skipping modify");
        return Ok(outcome);
    }

    let add = cache.resolve(&outcome.applied.to_add);
    let remove = cache.resolve(&outcome.applied.to_remove);
    mailbox
        .modify_thread_labels(thread_id, &add, &remove)
        .await?;
    Ok(outcome)
}
