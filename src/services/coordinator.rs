//! One labeling run, end to end.
//!
//! The [`RunCoordinator`] ensures the taxonomy labels exist, collects recent
//! threads, and processes each one in turn: fetch, classify, reconcile,
//! apply, record. A failure inside a thread is recorded against that thread
//! and the run moves on; [`run_once`](RunCoordinator::run_once) always
//! returns a report.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use super::classifier::{ClassificationError, Classifier};
use super::reconciler::{
    apply_delta, compute_delta, kept_labels, ApplyError, ApplyOutcome, LabelCache,
};
use super::reporter::{ErrorKind, RunReport, RunReporter, RunStats, Trigger};
use crate::domain::{Taxonomy, ThreadId};
use crate::providers::ai::LlmProvider;
use crate::providers::email::{MailboxProvider, ProviderError};

/// Listing or fetching from the mailbox failed.
#[derive(Debug, Error)]
#[error("fetch failed: {0}")]
pub struct FetchError(#[from] pub ProviderError);

/// Everything that can go wrong while processing a single thread.
#[derive(Debug, Error)]
pub enum ThreadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Apply(#[from] ApplyError),
}

impl ThreadError {
    /// Tag used in error records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ThreadError::Fetch(_) => ErrorKind::Fetch,
            ThreadError::Classification(ClassificationError::Parse(_)) => ErrorKind::Parse,
            ThreadError::Classification(ClassificationError::Validation(_)) => {
                ErrorKind::Validation
            }
            ThreadError::Classification(ClassificationError::Llm(_)) => ErrorKind::Llm,
            ThreadError::Apply(_) => ErrorKind::Apply,
        }
    }
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Only threads with activity in the last `lookback_days` days.
    pub lookback_days: u32,
    /// Stop after this many candidates.
    pub limit: Option<usize>,
    /// Accepted for compatibility; every candidate is classified regardless.
    pub force_rescan: bool,
    pub trigger: Trigger,
}

impl RunOptions {
    pub fn new(lookback_days: u32, trigger: Trigger) -> Self {
        Self {
            lookback_days,
            limit: None,
            force_rescan: false,
            trigger,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_force_rescan(mut self, force_rescan: bool) -> Self {
        self.force_rescan = force_rescan;
        self
    }
}

/// Mailbox search expression for the candidate window.
pub fn candidate_query(lookback_days: u32) -> String {
    format!("newer_than:{}d", lookback_days)
}

/// How a thread that did not fail was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadOutcome {
    /// No messages; nothing to classify.
    Empty,
    Labeled { modified: bool, follow_up: bool },
}

/// Orchestrates labeling runs against one mailbox.
pub struct RunCoordinator {
    mailbox: Arc<dyn MailboxProvider>,
    classifier: Classifier,
    taxonomy: Arc<Taxonomy>,
    report_dir: PathBuf,
}

impl RunCoordinator {
    pub fn new(
        mailbox: Arc<dyn MailboxProvider>,
        llm: Arc<dyn LlmProvider>,
        taxonomy: Arc<Taxonomy>,
        report_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mailbox,
            classifier: Classifier::new(llm, Arc::clone(&taxonomy)),
            taxonomy,
            report_dir: report_dir.into(),
        }
    }

    /// Runs one batch and returns its report. Never fails.
    pub async fn run_once(&self, options: &RunOptions) -> RunReport {
        let mut reporter =
            RunReporter::new(options.trigger, self.taxonomy.version(), &self.report_dir);
        let mut stats = RunStats::default();

        if options.force_rescan {
            reporter.log("force_rescan requested; every candidate is classified regardless");
        }

        let cache = self.prepare_labels(&mut reporter, &mut stats).await;
        let candidates = self.collect_candidates(options, &mut reporter, &mut stats).await;

        for thread_id in &candidates {
            stats.threads_scanned += 1;

            match self.process_thread(thread_id, &cache, &mut reporter).await {
                Ok(ThreadOutcome::Empty) => stats.threads_skipped += 1,
                Ok(ThreadOutcome::Labeled {
                    modified,
                    follow_up,
                }) => {
                    if modified {
                        stats.threads_modified += 1;
                    } else {
                        stats.threads_skipped += 1;
                    }
                    if follow_up {
                        stats.threads_requiring_follow_up += 1;
                    }
                }
                Err(e) => {
                    stats.errors += 1;
                    reporter.log_error(Some(thread_id), e.kind(), &e);
                }
            }
        }

        reporter.finish(stats).await
    }

    /// Builds the run's label cache and creates missing taxonomy labels.
    async fn prepare_labels(
        &self,
        reporter: &mut RunReporter,
        stats: &mut RunStats,
    ) -> LabelCache {
        let mut cache = LabelCache::new();

        if let Err(e) = cache.rebuild(self.mailbox.as_ref()).await {
            stats.errors += 1;
            reporter.log_error(None, ErrorKind::Run, &FetchError(e));
            return cache;
        }

        let failures = cache
            .ensure_labels(self.mailbox.as_ref(), &self.taxonomy)
            .await;
        for (name, e) in failures {
            reporter.log(format!("LABEL | create failed | label={} | {}", name, e));
        }

        reporter.log(format!("LABELS | cached={}", cache.len()));
        cache
    }

    /// Pages through the candidate search, stopping at `limit`.
    ///
    /// A listing failure is recorded and whatever was collected so far is
    /// still processed.
    async fn collect_candidates(
        &self,
        options: &RunOptions,
        reporter: &mut RunReporter,
        stats: &mut RunStats,
    ) -> Vec<ThreadId> {
        let query = candidate_query(options.lookback_days);
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = match self
                .mailbox
                .list_threads(&query, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    stats.errors += 1;
                    reporter.log_error(None, ErrorKind::Run, &FetchError(e));
                    break;
                }
            };

            for id in page.thread_ids {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }

            if options.limit.is_some_and(|limit| ids.len() >= limit) {
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if let Some(limit) = options.limit {
            ids.truncate(limit);
        }

        reporter.log(format!(
            "CANDIDATES | query={} | found={}",
            query,
            ids.len()
        ));
        ids
    }

    async fn process_thread(
        &self,
        thread_id: &ThreadId,
        cache: &LabelCache,
        reporter: &mut RunReporter,
    ) -> Result<ThreadOutcome, ThreadError> {
        let thread = self
            .mailbox
            .get_thread(thread_id)
            .await
            .map_err(FetchError)?;

        if thread.is_empty() {
            reporter.log(format!("THREAD | id={} | no messages, skipped", thread_id));
            return Ok(ThreadOutcome::Empty);
        }

        let classification = self.classifier.classify(&thread).await?;

        let current = cache.names_for(&thread.label_ids);
        let delta = compute_delta(&self.taxonomy, &current, &classification);
        let kept = kept_labels(&current, &classification);

        let outcome = if delta.is_noop() {
            ApplyOutcome::default()
        } else {
            apply_delta(self.mailbox.as_ref(), cache, thread_id, &delta).await?
        };

        reporter.log_action(
            thread_id,
            &thread.subject,
            &outcome.applied,
            &kept,
            &outcome.unresolved,
            &classification.reason,
        );

        Ok(ThreadOutcome::Labeled {
            modified: outcome.modified(),
            follow_up: classification.requires_follow_up(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LabelId, MailboxLabel, ThreadContext, ThreadMessage};
    use crate::providers::ai::{
        CompletionRequest, CompletionResponse, FinishReason, LlmResult, Usage,
    };
    use crate::providers::email::{Result as ProviderResult, ThreadPage};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory mailbox with two pages of threads.
    #[derive(Default)]
    struct MockMailbox {
        labels: Mutex<Vec<MailboxLabel>>,
        pages: Vec<Vec<&'static str>>,
        threads: HashMap<&'static str, ThreadContext>,
        fail_list_labels: bool,
        fail_page: Option<usize>,
        refuse_create: Option<&'static str>,
        modifies: Mutex<Vec<(ThreadId, Vec<LabelId>)>>,
    }

    #[async_trait]
    impl MailboxProvider for MockMailbox {
        async fn list_labels(&self) -> ProviderResult<Vec<MailboxLabel>> {
            if self.fail_list_labels {
                return Err(ProviderError::Connection("timed out".to_string()));
            }
            Ok(self.labels.lock().unwrap().clone())
        }

        async fn create_label(&self, name: &str) -> ProviderResult<LabelId> {
            if self.refuse_create == Some(name) {
                return Err(ProviderError::InvalidRequest("refused".to_string()));
            }
            let mut labels = self.labels.lock().unwrap();
            let id = LabelId::from(format!("Label_{}", labels.len()));
            labels.push(MailboxLabel {
                id: id.clone(),
                name: name.to_string(),
            });
            Ok(id)
        }

        async fn list_threads(
            &self,
            query: &str,
            page_token: Option<&str>,
        ) -> ProviderResult<ThreadPage> {
            assert_eq!(query, "newer_than:14d");
            let index: usize = page_token.map_or(0, |t| t.parse().unwrap());
            if self.fail_page == Some(index) {
                return Err(ProviderError::Internal("listing broke".to_string()));
            }
            Ok(ThreadPage {
                thread_ids: self.pages[index].iter().map(|id| ThreadId::from(*id)).collect(),
                next_page_token: (index + 1 < self.pages.len()).then(|| (index + 1).to_string()),
            })
        }

        async fn get_thread(&self, thread_id: &ThreadId) -> ProviderResult<ThreadContext> {
            self.threads
                .get(thread_id.0.as_str())
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(thread_id.to_string()))
        }

        async fn modify_thread_labels(
            &self,
            thread_id: &ThreadId,
            add: &[LabelId],
            _remove: &[LabelId],
        ) -> ProviderResult<()> {
            self.modifies
                .lock()
                .unwrap()
                .push((thread_id.clone(), add.to_vec()));
            Ok(())
        }
    }

    /// LLM fake answering by the subject line in the prompt.
    struct SubjectLlm {
        replies: HashMap<&'static str, &'static str>,
    }

    #[async_trait]
    impl LlmProvider for SubjectLlm {
        fn name(&self) -> &str {
            "subject"
        }

        fn model(&self) -> &str {
            "subject"
        }

        async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
            let prompt = &request.user_prompt;
            let text = self
                .replies
                .iter()
                .find(|(subject, _)| prompt.contains(&format!("Subject: {}\n", subject)))
                .map(|(_, reply)| reply.to_string())
                .unwrap_or_else(|| "not json".to_string());
            Ok(CompletionResponse {
                text,
                usage: Usage::default(),
                finish_reason: FinishReason::Complete,
            })
        }
    }

    const PROCESSED: &str = r#"{"status":"Processed","type":"Order","finance":null,
        "action":"No-action","priority":"Normal","reason":"Confirmed."}"#;
    const REPLY: &str = r#"{"status":"New","type":"Complaint","finance":null,
        "action":"Prepare-reply","priority":"Urgent","reason":"Angry customer."}"#;

    fn thread(id: &str, subject: &str, labels: &[&str]) -> ThreadContext {
        ThreadContext::new(
            ThreadId::from(id),
            subject,
            vec![ThreadMessage {
                sender: "customer@example.com".to_string(),
                timestamp: "Tue, 7 Jan 2025 09:00:00 +0100".to_string(),
                label_ids: labels.iter().map(|l| LabelId::from(*l)).collect(),
                body_excerpt: "Hello".to_string(),
            }],
        )
    }

    fn coordinator(
        mailbox: MockMailbox,
        dir: &std::path::Path,
    ) -> (RunCoordinator, Arc<MockMailbox>) {
        let mailbox = Arc::new(mailbox);
        let llm = Arc::new(SubjectLlm {
            replies: HashMap::from([("Order 1", PROCESSED), ("Broken chair", REPLY)]),
        });
        let coordinator = RunCoordinator::new(
            mailbox.clone(),
            llm,
            Arc::new(Taxonomy::builtin()),
            dir,
        );
        (coordinator, mailbox)
    }

    fn options() -> RunOptions {
        RunOptions::new(14, Trigger::Manual)
    }

    #[tokio::test]
    async fn labels_threads_across_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = MockMailbox {
            pages: vec![vec!["t-1"], vec!["t-2", "t-1"]],
            threads: HashMap::from([
                ("t-1", thread("t-1", "Order 1", &["INBOX"])),
                ("t-2", thread("t-2", "Broken chair", &["INBOX"])),
            ]),
            ..Default::default()
        };
        let (coordinator, mailbox) = coordinator(mailbox, dir.path());

        let report = coordinator.run_once(&options()).await;

        assert_eq!(
            report.stats,
            RunStats {
                threads_scanned: 2,
                threads_modified: 2,
                threads_skipped: 0,
                threads_requiring_follow_up: 1,
                errors: 0,
            }
        );
        assert_eq!(report.actions_required.len(), 2);
        assert_eq!(mailbox.modifies.lock().unwrap().len(), 2);
        assert!(report.report_path.is_some());
        // Every taxonomy label was created up front.
        assert_eq!(mailbox.labels.lock().unwrap().len(), 29);
    }

    #[tokio::test]
    async fn already_labeled_thread_is_skipped_but_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let taxonomy = Taxonomy::builtin();
        let labels: Vec<MailboxLabel> = taxonomy
            .fully_qualified_labels()
            .into_iter()
            .enumerate()
            .map(|(i, name)| MailboxLabel::new(format!("L{i}"), name))
            .collect();
        let id_of = |name: &str| {
            labels
                .iter()
                .find(|l| l.name == name)
                .map(|l| l.id.0.clone())
                .unwrap()
        };
        let current = [
            id_of("STATUS/Processed"),
            id_of("TYPE/Order"),
            id_of("ACTION/No-action"),
            id_of("PRIORITY/Normal"),
        ];
        let current: Vec<&str> = current.iter().map(String::as_str).collect();

        let mailbox = MockMailbox {
            labels: Mutex::new(labels.clone()),
            pages: vec![vec!["t-1"]],
            threads: HashMap::from([("t-1", thread("t-1", "Order 1", &current))]),
            ..Default::default()
        };
        let (coordinator, mailbox) = coordinator(mailbox, dir.path());

        let report = coordinator.run_once(&options()).await;
        assert_eq!(report.stats.threads_scanned, 1);
        assert_eq!(report.stats.threads_skipped, 1);
        assert_eq!(report.stats.threads_modified, 0);
        assert!(mailbox.modifies.lock().unwrap().is_empty());

        let action = &report.actions_required[0];
        assert!(action.labels_added.is_empty());
        assert!(action.labels_removed.is_empty());
        assert_eq!(action.labels_kept.len(), 4);
    }

    #[tokio::test]
    async fn empty_thread_counts_as_skipped_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = MockMailbox {
            pages: vec![vec!["t-0"]],
            threads: HashMap::from([(
                "t-0",
                ThreadContext::new(ThreadId::from("t-0"), "", vec![]),
            )]),
            ..Default::default()
        };
        let (coordinator, _) = coordinator(mailbox, dir.path());

        let report = coordinator.run_once(&options()).await;
        assert_eq!(report.stats.threads_scanned, 1);
        assert_eq!(report.stats.threads_skipped, 1);
        assert_eq!(report.stats.errors, 0);
        assert!(report.actions_required.is_empty());
    }

    #[tokio::test]
    async fn per_thread_failures_are_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = MockMailbox {
            pages: vec![vec!["gone", "t-prose", "t-1"]],
            threads: HashMap::from([
                ("t-prose", thread("t-prose", "Unknown subject", &["INBOX"])),
                ("t-1", thread("t-1", "Order 1", &["INBOX"])),
            ]),
            ..Default::default()
        };
        let (coordinator, _) = coordinator(mailbox, dir.path());

        let report = coordinator.run_once(&options()).await;
        assert_eq!(report.stats.threads_scanned, 3);
        assert_eq!(report.stats.errors, 2);
        assert_eq!(report.stats.threads_modified, 1);

        let kinds: Vec<ErrorKind> = report.errors.iter().map(|e| e.error_kind).collect();
        assert_eq!(kinds, vec![ErrorKind::Fetch, ErrorKind::Parse]);
        assert_eq!(report.errors[0].thread_id, Some(ThreadId::from("gone")));
    }

    #[tokio::test]
    async fn limit_truncates_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = MockMailbox {
            pages: vec![vec!["t-1", "t-2"], vec!["t-3"]],
            threads: HashMap::from([
                ("t-1", thread("t-1", "Order 1", &[])),
                ("t-2", thread("t-2", "Order 1", &[])),
                ("t-3", thread("t-3", "Order 1", &[])),
            ]),
            ..Default::default()
        };
        let (coordinator, _) = coordinator(mailbox, dir.path());

        let report = coordinator
            .run_once(&options().with_limit(Some(1)).with_force_rescan(true))
            .await;
        assert_eq!(report.stats.threads_scanned, 1);
    }

    #[tokio::test]
    async fn run_level_failures_do_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = MockMailbox {
            fail_list_labels: true,
            pages: vec![vec!["t-1"], vec!["t-2"]],
            fail_page: Some(1),
            threads: HashMap::from([("t-1", thread("t-1", "Order 1", &["INBOX"]))]),
            ..Default::default()
        };
        let (coordinator, mailbox) = coordinator(mailbox, dir.path());

        let report = coordinator.run_once(&options()).await;

        // Label listing and the second page failed; the first page still ran.
        assert_eq!(report.stats.threads_scanned, 1);
        assert_eq!(report.stats.errors, 2);
        assert!(report
            .errors
            .iter()
            .all(|e| e.thread_id.is_none() && e.error_kind == ErrorKind::Run));
        // Nothing resolved without a label cache, so no modify call was made
        // and the record says so.
        assert!(mailbox.modifies.lock().unwrap().is_empty());
        assert_eq!(report.stats.threads_skipped, 1);

        let action = &report.actions_required[0];
        assert!(action.labels_added.is_empty());
        assert!(action.labels_removed.is_empty());
        assert_eq!(
            action.labels_unresolved,
            vec![
                "ACTION/No-action",
                "PRIORITY/Normal",
                "STATUS/Processed",
                "TYPE/Order",
            ]
        );
    }

    #[tokio::test]
    async fn record_lists_only_labels_that_reached_the_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = MockMailbox {
            refuse_create: Some("ACTION/No-action"),
            pages: vec![vec!["t-1"]],
            threads: HashMap::from([("t-1", thread("t-1", "Order 1", &["INBOX"]))]),
            ..Default::default()
        };
        let (coordinator, mailbox) = coordinator(mailbox, dir.path());

        let report = coordinator.run_once(&options()).await;

        assert_eq!(report.stats.threads_modified, 1);
        let action = &report.actions_required[0];
        assert_eq!(
            action.labels_added,
            vec!["PRIORITY/Normal", "STATUS/Processed", "TYPE/Order"]
        );
        assert_eq!(action.labels_unresolved, vec!["ACTION/No-action"]);

        let modifies = mailbox.modifies.lock().unwrap();
        assert_eq!(modifies.len(), 1);
        assert_eq!(modifies[0].1.len(), 3);
    }

    #[test]
    fn thread_error_kinds() {
        let fetch = ThreadError::from(FetchError(ProviderError::NotFound("t".into())));
        assert_eq!(fetch.kind(), ErrorKind::Fetch);

        let apply = ThreadError::from(ApplyError(ProviderError::Internal("x".into())));
        assert_eq!(apply.kind(), ErrorKind::Apply);
        assert_eq!(candidate_query(7), "newer_than:7d");
    }
}
