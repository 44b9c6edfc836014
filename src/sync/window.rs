//! Extraction window resolution
//!
//! Every run extracts issues with `updated >=` some lower bound. Backfill
//! runs anchor at the configured initial window so interrupted crawls can
//! resume by page offset against the same JQL. Incremental runs anchor at
//! the stored cursor minus the safety skew, deliberately re-reading a short
//! overlap so edits that raced the previous run (and the minute truncation
//! JQL imposes) are never lost. Re-read issues are harmless: every load is
//! an idempotent upsert.

use crate::config::WindowsConfig;
use crate::store::Cursor;
use chrono::{DateTime, Utc};

/// The resolved lower bound for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinceBoundary {
    /// Inclusive lower bound on `updated`
    pub since: DateTime<Utc>,

    /// Issue id behind the stored cursor stamp, for overlap diagnostics
    pub tie_break_id: Option<i64>,
}

/// Lower bound for a backfill run: the configured initial window, always
///
/// The stored cursor is ignored so the crawl covers the whole window; any
/// resume happens via the cursor's page markers, not the anchor.
pub fn backfill_boundary(windows: &WindowsConfig, now: DateTime<Utc>) -> SinceBoundary {
    SinceBoundary {
        since: windows.initial_window_start(now),
        tie_break_id: None,
    }
}

/// Lower bound for an incremental run
///
/// With a stored cursor, the boundary is the cursor stamp minus the safety
/// skew. A scope that has never committed falls back to the initial window.
pub fn resolve_since(
    cursor: &Cursor,
    windows: &WindowsConfig,
    now: DateTime<Utc>,
) -> SinceBoundary {
    match cursor.last_updated_at {
        Some(last) => SinceBoundary {
            since: last - windows.safety_skew(),
            tie_break_id: cursor.last_issue_id,
        },
        None => backfill_boundary(windows, now),
    }
}
