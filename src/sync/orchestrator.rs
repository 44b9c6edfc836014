//! Drives scopes end to end under run records
//!
//! One orchestrated run per scope: open a run record, resolve the window,
//! walk the pages (each pull retried, each page committed atomically with
//! its cursor), then close the record exactly once with success or failure.
//! A mid-run failure or cancellation keeps every already-committed page;
//! the next run resumes from the stored cursor.

use crate::config::{EtlConfig, ScopeSpec, WindowsConfig};
use crate::jira::SearchProvider;
use crate::retry::RetryConfig;
use crate::store::{CursorStore, RunLedger, RunStatus};
use crate::sync::window;
use crate::sync::{PageFetcher, PageLoader};
use crate::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What kind of run to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Crawl the whole configured window; resumable by page offset
    Backfill,
    /// Pull everything updated since the stored cursor, minus the skew
    Incremental,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Backfill => "backfill",
            RunMode::Incremental => "incremental",
        }
    }
}

/// Outcome of one scope's run
#[derive(Debug, Clone)]
pub struct ScopeRunReport {
    pub scope: String,
    pub run_id: i64,
    pub status: RunStatus,
    pub pages: u64,
    pub issues: u64,
    pub links: u64,
    pub changes: u64,
    pub skipped: u64,
    pub error: Option<String>,
}

impl ScopeRunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }
}

#[derive(Debug, Default)]
struct DriveTally {
    pages: u64,
    issues: u64,
    links: u64,
    changes: u64,
    skipped: u64,
    cancelled: bool,
}

pub struct SyncOrchestrator<'a, S> {
    provider: &'a dyn SearchProvider,
    store: &'a mut S,
    windows: WindowsConfig,
    retry: RetryConfig,
    validate_query: bool,
    cancel: Arc<AtomicBool>,
}

impl<'a, S: CursorStore + RunLedger> SyncOrchestrator<'a, S> {
    pub fn new(provider: &'a dyn SearchProvider, store: &'a mut S, config: &EtlConfig) -> Self {
        Self {
            provider,
            store,
            windows: config.windows.clone(),
            retry: config.retry.retry_config(),
            validate_query: config.jira.validate_query,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative stop flag, checked between pages. Stopping never loses
    /// committed work; the run closes as failed so operators notice.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run every scope sequentially; one scope's failure does not stop the
    /// others
    pub async fn run(
        &mut self,
        scopes: &[ScopeSpec],
        mode: RunMode,
    ) -> Result<Vec<ScopeRunReport>> {
        let mut reports = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let report = self.run_scope(scope, mode).await?;
            reports.push(report);
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
        }

        let failed = reports.iter().filter(|r| !r.succeeded()).count();
        info!(
            scopes = reports.len(),
            failed,
            issues = reports.iter().map(|r| r.issues).sum::<u64>(),
            "Sync pass finished"
        );
        Ok(reports)
    }

    /// Run one scope under a run record, closing it exactly once
    pub async fn run_scope(&mut self, scope: &ScopeSpec, mode: RunMode) -> Result<ScopeRunReport> {
        let run_id = self.store.open_run(&scope.name)?;
        info!(
            scope = %scope.name,
            mode = mode.as_str(),
            run_id,
            "Starting sync run"
        );

        let mut tally = DriveTally::default();
        match self.drive(scope, mode, &mut tally).await {
            Ok(()) if tally.cancelled => {
                self.store
                    .close_run(run_id, RunStatus::Failed, Some("cancelled"))?;
                warn!(
                    scope = %scope.name,
                    pages = tally.pages,
                    "Run cancelled; committed pages are preserved"
                );
                Ok(report(scope, run_id, RunStatus::Failed, tally, Some("cancelled".to_string())))
            }
            Ok(()) => {
                self.store.close_run(run_id, RunStatus::Success, None)?;
                info!(
                    scope = %scope.name,
                    pages = tally.pages,
                    issues = tally.issues,
                    links = tally.links,
                    changes = tally.changes,
                    skipped = tally.skipped,
                    "Sync run complete"
                );
                Ok(report(scope, run_id, RunStatus::Success, tally, None))
            }
            Err(err) => {
                error!(scope = %scope.name, pages = tally.pages, error = %err, "Sync run failed");
                let message = err.to_string();
                self.store
                    .close_run(run_id, RunStatus::Failed, Some(&message))?;
                Ok(report(scope, run_id, RunStatus::Failed, tally, Some(message)))
            }
        }
    }

    async fn drive(
        &mut self,
        scope: &ScopeSpec,
        mode: RunMode,
        tally: &mut DriveTally,
    ) -> Result<()> {
        let stored = self.store.read(&scope.name)?;
        let now = Utc::now();
        let boundary = match mode {
            RunMode::Backfill => window::backfill_boundary(&self.windows, now),
            RunMode::Incremental => window::resolve_since(&stored, &self.windows, now),
        };
        info!(
            scope = %scope.name,
            since = %boundary.since,
            last_issue_id = ?boundary.tie_break_id,
            "Resolved extraction window"
        );

        let mut fetcher = PageFetcher::new(
            self.provider,
            scope,
            &boundary,
            self.validate_query,
            self.retry.clone(),
        );
        // Stored markers were recorded under the backfill anchor, so only a
        // backfill run may consume them
        if mode == RunMode::Backfill {
            fetcher = fetcher.resume_from(&stored);
        }
        let mut loader = PageLoader::new(&scope.name, mode, stored);

        while let Some(page) = fetcher.next_page().await? {
            let stats = loader.apply(self.store, &page)?;
            tally.pages += 1;
            tally.issues += stats.issues;
            tally.links += stats.links;
            tally.changes += stats.changes;
            tally.skipped = loader.skipped();
            info!(
                scope = %scope.name,
                page = tally.pages,
                issues = stats.issues,
                "Committed page"
            );

            if self.cancel.load(Ordering::Relaxed) {
                tally.cancelled = true;
                break;
            }
        }
        Ok(())
    }
}

fn report(
    scope: &ScopeSpec,
    run_id: i64,
    status: RunStatus,
    tally: DriveTally,
    error: Option<String>,
) -> ScopeRunReport {
    ScopeRunReport {
        scope: scope.name.clone(),
        run_id,
        status,
        pages: tally.pages,
        issues: tally.issues,
        links: tally.links,
        changes: tally.changes,
        skipped: tally.skipped,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, JiraConfig, RetrySettings};
    use crate::jira::{Continuation, RawIssue, SearchPage, SearchRequest};
    use crate::store::{Cursor, MemoryStore};
    use crate::EtlError;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<SearchPage>>>,
        requests: Mutex<Vec<SearchRequest>>,
    }

    impl ScriptedProvider {
        fn with(responses: Vec<Result<SearchPage>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<SearchRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedProvider {
        async fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(page(Vec::new(), Continuation::End)))
        }
    }

    fn raw(id: &str, key: &str, updated: &str) -> RawIssue {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "key": key,
            "fields": {"updated": updated}
        }))
        .unwrap()
    }

    fn page(issues: Vec<RawIssue>, continuation: Continuation) -> SearchPage {
        SearchPage {
            start_at: 0,
            total: None,
            issues,
            continuation,
        }
    }

    fn transient() -> EtlError {
        EtlError::Api {
            status: 503,
            body: "maintenance".to_string(),
        }
    }

    fn scope_spec() -> ScopeSpec {
        ScopeSpec {
            name: "DEMO:Bug".to_string(),
            project: "DEMO".to_string(),
            issue_type: "Bug".to_string(),
            fields: Vec::new(),
            jql_base: None,
            page_size: 2,
            expand_changelog: true,
        }
    }

    fn test_config() -> EtlConfig {
        EtlConfig {
            jira: JiraConfig {
                base_url: "https://jira.example.com".to_string(),
                ..Default::default()
            },
            scopes: Vec::new(),
            windows: WindowsConfig {
                initial_days: 90,
                safety_skew_s: 60,
                initial_start: NaiveDate::from_ymd_opt(2024, 1, 1),
            },
            retry: RetrySettings {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_secs: 1,
            },
            database: DatabaseConfig::default(),
        }
    }

    fn at(minute: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn test_backfill_commits_pages_and_closes_run() {
        let provider = ScriptedProvider::with(vec![
            Ok(page(
                vec![
                    raw("10001", "DEMO-1", "2024-06-01T00:00:00.000+0000"),
                    raw("10002", "DEMO-2", "2024-06-01T00:05:00.000+0000"),
                ],
                Continuation::AtOffset(2),
            )),
            Ok(page(
                vec![raw("10003", "DEMO-3", "2024-06-01T00:10:00.000+0000")],
                Continuation::End,
            )),
        ]);
        let mut store = MemoryStore::new();
        let config = test_config();

        let mut orchestrator = SyncOrchestrator::new(&provider, &mut store, &config);
        let report = orchestrator
            .run_scope(&scope_spec(), RunMode::Backfill)
            .await
            .unwrap();
        drop(orchestrator);

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.pages, 2);
        assert_eq!(report.issues, 3);
        assert_eq!(report.skipped, 0);

        // One atomic commit per page, cursor landing on the last issue
        assert_eq!(store.commits().len(), 2);
        let (_, cursor, _) = store.commits().last().unwrap();
        assert_eq!(cursor.last_updated_at, Some(at(10)));
        assert_eq!(cursor.last_issue_id, Some(10003));
        assert_eq!(cursor.resume_page_at, None);
        assert_eq!(cursor.resume_token, None);

        assert_eq!(store.runs().len(), 1);
        assert_eq!(store.runs()[0].status, RunStatus::Success);

        // Backfill anchors at the configured fixed start
        assert!(provider.requests()[0]
            .jql
            .contains("updated >= '2024-01-01 00:00'"));
    }

    #[tokio::test]
    async fn test_incremental_skews_window_and_ignores_offset() {
        let mut store = MemoryStore::new();
        // A previous run left a cursor and a stale page offset behind
        store
            .commit(
                "DEMO:Bug",
                &Cursor {
                    last_updated_at: Some(at(10)),
                    last_issue_id: Some(10003),
                    resume_page_at: Some(1),
                    resume_token: None,
                },
                &[],
            )
            .unwrap();

        let provider = ScriptedProvider::with(vec![Ok(page(
            vec![
                raw("10003", "DEMO-3", "2024-06-01T00:10:00.000+0000"),
                raw("10004", "DEMO-4", "2024-06-01T00:20:00.000+0000"),
            ],
            Continuation::End,
        ))]);
        let config = test_config();

        let mut orchestrator = SyncOrchestrator::new(&provider, &mut store, &config);
        let report = orchestrator
            .run_scope(&scope_spec(), RunMode::Incremental)
            .await
            .unwrap();
        drop(orchestrator);

        assert!(report.succeeded());
        let requests = provider.requests();
        assert!(requests[0].jql.contains("updated >= '2024-06-01 00:09'"));
        assert_eq!(requests[0].start_at, 0);

        let (_, cursor, _) = store.commits().last().unwrap();
        assert_eq!(cursor.last_updated_at, Some(at(20)));
        assert_eq!(cursor.last_issue_id, Some(10004));
        // The stale bookmark is dropped, not carried into the new cursor
        assert_eq!(cursor.resume_page_at, None);
    }

    #[tokio::test]
    async fn test_failure_midway_keeps_committed_pages() {
        let provider = ScriptedProvider::with(vec![
            Ok(page(
                vec![
                    raw("10001", "DEMO-1", "2024-06-01T00:00:00.000+0000"),
                    raw("10002", "DEMO-2", "2024-06-01T00:05:00.000+0000"),
                ],
                Continuation::AtOffset(2),
            )),
            Err(transient()),
            Err(transient()),
            Err(transient()),
        ]);
        let mut store = MemoryStore::new();
        let config = test_config();

        let mut orchestrator = SyncOrchestrator::new(&provider, &mut store, &config);
        let report = orchestrator
            .run_scope(&scope_spec(), RunMode::Backfill)
            .await
            .unwrap();
        drop(orchestrator);

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.is_some());
        assert_eq!(report.pages, 1);

        // Page one survived with its resume marker
        assert_eq!(store.commits().len(), 1);
        let (_, cursor, _) = &store.commits()[0];
        assert_eq!(cursor.resume_page_at, Some(2));

        assert_eq!(store.runs()[0].status, RunStatus::Failed);
        assert!(store.runs()[0].note.is_some());

        // First page + the configured three attempts at the second
        assert_eq!(provider.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_backfill_after_failed_incremental_crawls_from_the_anchor() {
        let mut store = MemoryStore::new();
        store
            .commit(
                "DEMO:Bug",
                &Cursor {
                    last_updated_at: Some(at(10)),
                    last_issue_id: Some(10003),
                    resume_page_at: None,
                    resume_token: None,
                },
                &[],
            )
            .unwrap();

        // An incremental run commits one page, then dies on the next pull
        let provider = ScriptedProvider::with(vec![
            Ok(page(
                vec![
                    raw("10004", "DEMO-4", "2024-06-01T00:20:00.000+0000"),
                    raw("10005", "DEMO-5", "2024-06-01T00:25:00.000+0000"),
                ],
                Continuation::AtOffset(2),
            )),
            Err(transient()),
            Err(transient()),
            Err(transient()),
        ]);
        let config = test_config();
        let mut orchestrator = SyncOrchestrator::new(&provider, &mut store, &config);
        let report = orchestrator
            .run_scope(&scope_spec(), RunMode::Incremental)
            .await
            .unwrap();
        drop(orchestrator);

        assert_eq!(report.status, RunStatus::Failed);
        // The committed page advanced the cursor but bookmarked nothing
        let (_, cursor, _) = store.commits().last().unwrap();
        assert_eq!(cursor.last_issue_id, Some(10005));
        assert_eq!(cursor.resume_page_at, None);
        assert_eq!(cursor.resume_token, None);

        // So the next backfill covers its whole window from page zero
        let provider = ScriptedProvider::with(vec![Ok(page(
            vec![raw("10001", "DEMO-1", "2024-06-01T00:00:00.000+0000")],
            Continuation::End,
        ))]);
        let mut orchestrator = SyncOrchestrator::new(&provider, &mut store, &config);
        let report = orchestrator
            .run_scope(&scope_spec(), RunMode::Backfill)
            .await
            .unwrap();
        drop(orchestrator);

        assert!(report.succeeded());
        let requests = provider.requests();
        assert_eq!(requests[0].start_at, 0);
        assert_eq!(requests[0].next_page_token, None);
        assert!(requests[0].jql.contains("updated >= '2024-01-01 00:00'"));
    }

    #[tokio::test]
    async fn test_retry_recovers_and_run_succeeds() {
        let provider = ScriptedProvider::with(vec![
            Ok(page(
                vec![
                    raw("10001", "DEMO-1", "2024-06-01T00:00:00.000+0000"),
                    raw("10002", "DEMO-2", "2024-06-01T00:05:00.000+0000"),
                ],
                Continuation::AtOffset(2),
            )),
            Err(transient()),
            Ok(page(
                vec![raw("10003", "DEMO-3", "2024-06-01T00:10:00.000+0000")],
                Continuation::End,
            )),
        ]);
        let mut store = MemoryStore::new();
        let config = test_config();

        let mut orchestrator = SyncOrchestrator::new(&provider, &mut store, &config);
        let report = orchestrator
            .run_scope(&scope_spec(), RunMode::Backfill)
            .await
            .unwrap();
        drop(orchestrator);

        assert!(report.succeeded());
        assert_eq!(report.pages, 2);
        assert_eq!(provider.requests().len(), 3);
        assert_eq!(store.commits().len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_pages() {
        let provider = ScriptedProvider::with(vec![
            Ok(page(
                vec![raw("10001", "DEMO-1", "2024-06-01T00:00:00.000+0000")],
                Continuation::AtOffset(1),
            )),
            Ok(page(
                vec![raw("10002", "DEMO-2", "2024-06-01T00:05:00.000+0000")],
                Continuation::End,
            )),
        ]);
        let mut store = MemoryStore::new();
        let config = test_config();

        let mut orchestrator = SyncOrchestrator::new(&provider, &mut store, &config);
        orchestrator.cancel_flag().store(true, Ordering::Relaxed);
        let report = orchestrator
            .run_scope(&scope_spec(), RunMode::Backfill)
            .await
            .unwrap();
        drop(orchestrator);

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.error.as_deref(), Some("cancelled"));
        assert_eq!(report.pages, 1);

        // The committed page stays; the second was never pulled
        assert_eq!(store.commits().len(), 1);
        assert_eq!(provider.requests().len(), 1);
        assert_eq!(store.runs()[0].note.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_one_scope_failing_does_not_stop_the_next() {
        let provider = ScriptedProvider::with(vec![
            Err(EtlError::Api {
                status: 400,
                body: "bad jql".to_string(),
            }),
            Ok(page(
                vec![raw("20001", "DEMO-10", "2024-06-01T00:00:00.000+0000")],
                Continuation::End,
            )),
        ]);
        let mut store = MemoryStore::new();
        let config = test_config();
        let mut task_scope = scope_spec();
        task_scope.name = "DEMO:Task".to_string();
        task_scope.issue_type = "Task".to_string();

        let mut orchestrator = SyncOrchestrator::new(&provider, &mut store, &config);
        let reports = orchestrator
            .run([scope_spec(), task_scope].as_slice(), RunMode::Incremental)
            .await
            .unwrap();
        drop(orchestrator);

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].status, RunStatus::Failed);
        assert!(reports[1].succeeded());
        assert_eq!(store.runs().len(), 2);
        assert_eq!(store.runs()[1].status, RunStatus::Success);
    }
}
