//! Page application: transform, checkpoint, commit
//!
//! One loader tracks one scope's cursor across a run. For each fetched page
//! it transforms the raw issues, folds the observed (updated, id) pairs into
//! the cursor, bookmarks the page's continuation when the run is a backfill,
//! and hands everything to the store as a single atomic commit. A crash
//! between pages therefore loses nothing and duplicates nothing.

use crate::jira::{Continuation, SearchPage};
use crate::store::{Cursor, CursorStore, LoadStats};
use crate::sync::RunMode;
use crate::transform::transform_issue;
use crate::Result;
use tracing::warn;

pub struct PageLoader {
    scope: String,
    mode: RunMode,
    cursor: Cursor,
    skipped: u64,
}

impl PageLoader {
    pub fn new(scope: &str, mode: RunMode, cursor: Cursor) -> Self {
        Self {
            scope: scope.to_string(),
            mode,
            cursor,
            skipped: 0,
        }
    }

    /// Apply one page as one atomic commit
    ///
    /// Issues that fail to transform are logged and skipped; a single
    /// malformed issue must not sink the page. The cursor only moves
    /// forward, so re-read overlap pages commit harmlessly.
    pub fn apply<S: CursorStore>(&mut self, store: &mut S, page: &SearchPage) -> Result<LoadStats> {
        let mut rowsets = Vec::with_capacity(page.issues.len());
        for raw in &page.issues {
            match transform_issue(raw) {
                Ok(rowset) => rowsets.push(rowset),
                Err(err) => {
                    warn!(
                        issue = raw.key.as_deref().unwrap_or("<unknown>"),
                        error = %err,
                        "Skipping untransformable issue"
                    );
                    self.skipped += 1;
                }
            }
        }

        let mut cursor = self.cursor.clone();
        for rowset in &rowsets {
            // Issues without a parseable `updated` cannot order the cursor
            if let Some(updated_at) = rowset.issue.updated_at {
                cursor.observe(updated_at, rowset.issue.issue_id);
            }
        }
        // Resume markers are backfill bookmarks: they are only meaningful
        // against the fixed backfill anchor. An incremental run re-anchors
        // its JQL every time and recovers through the skew overlap, so its
        // commits clear stale markers instead of recording new ones.
        match &page.continuation {
            Continuation::AtOffset(next) if self.mode == RunMode::Backfill => {
                cursor.resume_page_at = Some(*next);
                cursor.resume_token = None;
            }
            Continuation::WithToken(token) if self.mode == RunMode::Backfill => {
                cursor.resume_token = Some(token.clone());
                cursor.resume_page_at = None;
            }
            _ => cursor.clear_resume(),
        }

        let stats = store.commit(&self.scope, &cursor, &rowsets)?;
        self.cursor = cursor;
        Ok(stats)
    }

    /// The cursor as of the last committed page
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Issues dropped because they would not transform
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jira::RawIssue;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

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

    #[test]
    fn test_apply_commits_rows_and_advances_cursor() {
        let mut store = MemoryStore::new();
        let mut loader = PageLoader::new("DEMO:Bug", RunMode::Backfill, Cursor::default());

        let stats = loader
            .apply(
                &mut store,
                &page(
                    vec![
                        raw("10001", "DEMO-1", "2024-06-01T00:00:00.000+0000"),
                        raw("10002", "DEMO-2", "2024-06-01T00:05:00.000+0000"),
                    ],
                    Continuation::AtOffset(2),
                ),
            )
            .unwrap();

        assert_eq!(stats.issues, 2);
        assert_eq!(store.commits().len(), 1);

        let cursor = loader.cursor();
        assert_eq!(
            cursor.last_updated_at,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 5, 0).unwrap())
        );
        assert_eq!(cursor.last_issue_id, Some(10002));
        assert_eq!(cursor.resume_page_at, Some(2));
        assert_eq!(cursor.resume_token, None);
    }

    #[test]
    fn test_final_page_clears_resume_markers() {
        let mut store = MemoryStore::new();
        let mut loader = PageLoader::new(
            "DEMO:Bug",
            RunMode::Backfill,
            Cursor {
                resume_page_at: Some(2),
                ..Default::default()
            },
        );

        loader
            .apply(
                &mut store,
                &page(
                    vec![raw("10003", "DEMO-3", "2024-06-01T00:10:00.000+0000")],
                    Continuation::End,
                ),
            )
            .unwrap();

        let cursor = loader.cursor();
        assert_eq!(cursor.resume_page_at, None);
        assert_eq!(cursor.resume_token, None);
        assert_eq!(cursor.last_issue_id, Some(10003));
    }

    #[test]
    fn test_token_continuation_recorded_as_resume_marker() {
        let mut store = MemoryStore::new();
        let mut loader = PageLoader::new("DEMO:Bug", RunMode::Backfill, Cursor::default());

        loader
            .apply(
                &mut store,
                &page(
                    vec![raw("10001", "DEMO-1", "2024-06-01T00:00:00.000+0000")],
                    Continuation::WithToken("tok-2".to_string()),
                ),
            )
            .unwrap();

        assert_eq!(loader.cursor().resume_token.as_deref(), Some("tok-2"));
        assert_eq!(loader.cursor().resume_page_at, None);
    }

    #[test]
    fn test_incremental_commit_never_records_resume_markers() {
        let mut store = MemoryStore::new();
        let mut loader = PageLoader::new(
            "DEMO:Bug",
            RunMode::Incremental,
            Cursor {
                resume_page_at: Some(4),
                ..Default::default()
            },
        );

        loader
            .apply(
                &mut store,
                &page(
                    vec![raw("10005", "DEMO-5", "2024-06-01T00:20:00.000+0000")],
                    Continuation::AtOffset(2),
                ),
            )
            .unwrap();

        // The mid-walk continuation is not bookmarked, and the stale
        // backfill marker does not ride along into the commit
        let cursor = loader.cursor();
        assert_eq!(cursor.resume_page_at, None);
        assert_eq!(cursor.resume_token, None);
        assert_eq!(cursor.last_issue_id, Some(10005));
    }

    #[test]
    fn test_malformed_issue_is_skipped_not_fatal() {
        let mut store = MemoryStore::new();
        let mut loader = PageLoader::new("DEMO:Bug", RunMode::Backfill, Cursor::default());

        let stats = loader
            .apply(
                &mut store,
                &page(
                    vec![
                        raw("not-numeric", "DEMO-X", "2024-06-01T00:00:00.000+0000"),
                        raw("10002", "DEMO-2", "2024-06-01T00:05:00.000+0000"),
                    ],
                    Continuation::End,
                ),
            )
            .unwrap();

        assert_eq!(stats.issues, 1);
        assert_eq!(loader.skipped(), 1);
        assert_eq!(store.commits().len(), 1);
        assert_eq!(loader.cursor().last_issue_id, Some(10002));
    }

    #[test]
    fn test_overlap_page_never_regresses_the_cursor() {
        let mut store = MemoryStore::new();
        let seeded = Cursor {
            last_updated_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 10, 0).unwrap()),
            last_issue_id: Some(10003),
            ..Default::default()
        };
        let mut loader = PageLoader::new("DEMO:Bug", RunMode::Incremental, seeded.clone());

        // A pure-overlap page of already-seen issues
        loader
            .apply(
                &mut store,
                &page(
                    vec![
                        raw("10001", "DEMO-1", "2024-06-01T00:00:00.000+0000"),
                        raw("10002", "DEMO-2", "2024-06-01T00:05:00.000+0000"),
                    ],
                    Continuation::End,
                ),
            )
            .unwrap();

        let cursor = loader.cursor();
        assert_eq!(cursor.last_updated_at, seeded.last_updated_at);
        assert_eq!(cursor.last_issue_id, seeded.last_issue_id);
    }
}
