//! Durable sync state: cursors, run records, and the warehouse
//!
//! The engine talks to storage through two small seams. [`CursorStore`]
//! couples a page's data writes to its cursor advance in one atomic commit;
//! [`RunLedger`] records one row per orchestrated run. [`Warehouse`] is the
//! SQLite implementation of both; [`MemoryStore`] is the in-memory fake used
//! by the engine's tests.

mod warehouse;

pub use warehouse::{Warehouse, WarehouseTotals};

use crate::transform::IssueRowSet;
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Durable resume position for one scope
///
/// `last_updated_at`/`last_issue_id` mark the maximum (timestamp, id) pair
/// committed so far; the resume markers carry an interrupted backfill's
/// in-flight page position and are null after a run completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Maximum committed update timestamp; null means the scope never ran
    pub last_updated_at: Option<DateTime<Utc>>,

    /// Issue id that produced `last_updated_at` (tie-break for equal stamps)
    pub last_issue_id: Option<i64>,

    /// Offset of the next unprocessed page, valid only against a fixed anchor
    pub resume_page_at: Option<u32>,

    /// Provider-side pagination token for the next page
    pub resume_token: Option<String>,
}

impl Cursor {
    /// True when the scope has never committed anything
    pub fn is_initial(&self) -> bool {
        self.last_updated_at.is_none()
    }

    /// Fold one observed (updated_at, issue_id) pair into the cursor,
    /// keeping the running maximum. A page of pure overlap therefore never
    /// moves the cursor backwards.
    pub fn observe(&mut self, updated_at: DateTime<Utc>, issue_id: i64) {
        match self.last_updated_at {
            None => {
                self.last_updated_at = Some(updated_at);
                self.last_issue_id = Some(issue_id);
            }
            Some(current) if updated_at > current => {
                self.last_updated_at = Some(updated_at);
                self.last_issue_id = Some(issue_id);
            }
            Some(current) if updated_at == current => {
                if self.last_issue_id.map_or(true, |id| issue_id > id) {
                    self.last_issue_id = Some(issue_id);
                }
            }
            Some(_) => {}
        }
    }

    /// Drop the in-flight page markers
    pub fn clear_resume(&mut self) {
        self.resume_page_at = None;
        self.resume_token = None;
    }
}

/// Row counts from one committed page
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadStats {
    pub issues: u64,
    pub links: u64,
    pub changes: u64,
}

/// The checkpoint seam: data writes and cursor advances commit together
pub trait CursorStore {
    /// Read the cursor for a scope; all fields null if it never ran
    fn read(&mut self, scope: &str) -> Result<Cursor>;

    /// Apply a page's row-sets and persist `cursor` as one atomic unit:
    /// both land or neither does
    fn commit(&mut self, scope: &str, cursor: &Cursor, rowsets: &[IssueRowSet])
        -> Result<LoadStats>;
}

/// Terminal and in-flight states of a run record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "success" => RunStatus::Success,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

/// One orchestrated run of one scope
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: i64,
    pub scope: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

/// Run bookkeeping: opened at orchestration start, closed exactly once
pub trait RunLedger {
    /// Insert a `running` run record and return its id
    fn open_run(&mut self, scope: &str) -> Result<i64>;

    /// Close a run with its terminal status and an optional note
    fn close_run(&mut self, run_id: i64, status: RunStatus, note: Option<&str>) -> Result<()>;
}

/// In-memory store used in tests
///
/// Applies nothing; remembers every committed page so tests can assert how
/// many commits happened and with which cursors.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cursors: HashMap<String, Cursor>,
    commits: Vec<(String, Cursor, usize)>,
    runs: Vec<RunRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every commit as (scope, cursor, rowset count), in order
    pub fn commits(&self) -> &[(String, Cursor, usize)] {
        &self.commits
    }

    /// Every run record opened through the ledger
    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }
}

impl CursorStore for MemoryStore {
    fn read(&mut self, scope: &str) -> Result<Cursor> {
        Ok(self.cursors.get(scope).cloned().unwrap_or_default())
    }

    fn commit(
        &mut self,
        scope: &str,
        cursor: &Cursor,
        rowsets: &[IssueRowSet],
    ) -> Result<LoadStats> {
        let stats = LoadStats {
            issues: rowsets.len() as u64,
            links: rowsets.iter().map(|r| r.links.len() as u64).sum(),
            changes: rowsets.iter().map(|r| r.changes.len() as u64).sum(),
        };
        self.cursors.insert(scope.to_string(), cursor.clone());
        self.commits
            .push((scope.to_string(), cursor.clone(), rowsets.len()));
        Ok(stats)
    }
}

impl RunLedger for MemoryStore {
    fn open_run(&mut self, scope: &str) -> Result<i64> {
        let run_id = self.runs.len() as i64 + 1;
        self.runs.push(RunRecord {
            run_id,
            scope: scope.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            note: None,
        });
        Ok(run_id)
    }

    fn close_run(&mut self, run_id: i64, status: RunStatus, note: Option<&str>) -> Result<()> {
        if let Some(run) = self.runs.iter_mut().find(|r| r.run_id == run_id) {
            run.status = status;
            run.finished_at = Some(Utc::now());
            run.note = note.map(str::to_string);
        }
        Ok(())
    }
}
