//! SQLite reporting warehouse
//!
//! Owns the star-ish reporting schema (dimension tables, the `issues` fact
//! table, bridge tables, link edges, flattened changelog) plus the engine's
//! own bookkeeping tables (`etl_cursors`, `etl_runs`, `custom_field_defs`).
//!
//! The important property lives in [`CursorStore::commit`]: a page's data
//! writes and its cursor advance happen in one SQLite transaction, so a crash
//! can never persist data without the matching cursor or vice versa. Re-apply
//! of an already-committed page is harmless; every write is an upsert or a
//! delete-then-insert keyed replacement.

use crate::config::DatabaseConfig;
use crate::store::{Cursor, CursorStore, LoadStats, RunLedger, RunRecord, RunStatus};
use crate::transform::{IssueRow, IssueRowSet};
use crate::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Row totals across the fact tables, for the status command
#[derive(Debug, Default, Clone, Copy)]
pub struct WarehouseTotals {
    pub issues: i64,
    pub links: i64,
    pub changes: i64,
}

pub struct Warehouse {
    conn: Connection,
    path: PathBuf,
}

impl Warehouse {
    /// Open (or create) the warehouse database and ensure the schema exists
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        info!(path = %config.path.display(), "Opening warehouse database");
        let conn = Connection::open(&config.path)?;
        conn.pragma_update(None, "journal_mode", &"WAL")?;

        let warehouse = Self {
            conn,
            path: config.path.clone(),
        };
        warehouse.init_schema()?;
        Ok(warehouse)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                project_id INTEGER PRIMARY KEY,
                project_key TEXT,
                name TEXT
            );

            CREATE TABLE IF NOT EXISTS issue_types (
                issue_type_id INTEGER PRIMARY KEY,
                name TEXT
            );

            CREATE TABLE IF NOT EXISTS priorities (
                priority_id INTEGER PRIMARY KEY,
                name TEXT
            );

            CREATE TABLE IF NOT EXISTS statuses (
                status_id INTEGER PRIMARY KEY,
                name TEXT
            );

            CREATE TABLE IF NOT EXISTS components (
                component_id INTEGER PRIMARY KEY,
                project_id INTEGER,
                name TEXT
            );

            CREATE TABLE IF NOT EXISTS fix_versions (
                fix_version_id INTEGER PRIMARY KEY,
                project_id INTEGER,
                name TEXT,
                released INTEGER,
                release_date TEXT
            );

            CREATE TABLE IF NOT EXISTS issues (
                issue_id INTEGER PRIMARY KEY,
                issue_key TEXT,
                project_id INTEGER,
                issue_type_id INTEGER,
                status_id INTEGER,
                priority_id INTEGER,
                summary TEXT,
                description TEXT,
                reporter_id TEXT,
                assignee_id TEXT,
                created_at TEXT,
                updated_at TEXT,
                resolution_date TEXT,
                due_date TEXT,
                custom_fields TEXT NOT NULL DEFAULT '{}',
                raw_issue TEXT,
                raw_changelog TEXT
            );

            CREATE TABLE IF NOT EXISTS labels (
                label TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS issue_labels (
                issue_id INTEGER NOT NULL,
                label TEXT NOT NULL,
                PRIMARY KEY (issue_id, label)
            );

            CREATE TABLE IF NOT EXISTS issue_components (
                issue_id INTEGER NOT NULL,
                component_id INTEGER NOT NULL,
                PRIMARY KEY (issue_id, component_id)
            );

            CREATE TABLE IF NOT EXISTS issue_fix_versions (
                issue_id INTEGER NOT NULL,
                fix_version_id INTEGER NOT NULL,
                PRIMARY KEY (issue_id, fix_version_id)
            );

            CREATE TABLE IF NOT EXISTS issue_links (
                src_issue_id INTEGER NOT NULL,
                dst_issue_id INTEGER NOT NULL,
                link_type_key TEXT NOT NULL DEFAULT '',
                link_type_name TEXT,
                direction TEXT NOT NULL,
                PRIMARY KEY (src_issue_id, dst_issue_id, link_type_key, direction)
            );

            CREATE TABLE IF NOT EXISTS change_groups (
                history_id INTEGER PRIMARY KEY,
                issue_id INTEGER NOT NULL,
                author_id TEXT,
                created_at TEXT
            );

            CREATE TABLE IF NOT EXISTS change_items (
                history_id INTEGER NOT NULL,
                item_seq INTEGER NOT NULL,
                field TEXT,
                field_type TEXT,
                from_value TEXT,
                to_value TEXT,
                from_string TEXT,
                to_string TEXT,
                PRIMARY KEY (history_id, item_seq)
            );

            CREATE TABLE IF NOT EXISTS custom_field_defs (
                field_id TEXT PRIMARY KEY,
                name TEXT,
                custom INTEGER NOT NULL DEFAULT 0,
                schema_json TEXT
            );

            CREATE TABLE IF NOT EXISTS etl_cursors (
                scope_name TEXT PRIMARY KEY,
                last_updated_at TEXT,
                last_issue_id INTEGER,
                resume_page_at INTEGER,
                resume_token TEXT
            );

            CREATE TABLE IF NOT EXISTS etl_runs (
                run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                note TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_issues_key ON issues(issue_key);
            CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id);
            CREATE INDEX IF NOT EXISTS idx_issues_updated ON issues(updated_at);
            CREATE INDEX IF NOT EXISTS idx_change_groups_issue ON change_groups(issue_id);
            CREATE INDEX IF NOT EXISTS idx_issue_links_dst ON issue_links(dst_issue_id);
            CREATE INDEX IF NOT EXISTS idx_etl_runs_scope ON etl_runs(scope_name, run_id);
            "#,
        )?;
        Ok(())
    }

    /// Upsert the field catalog fetched from `/rest/api/2/field`
    pub fn upsert_field_defs(&mut self, defs: &[crate::jira::FieldDef]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        for def in defs {
            let schema_json = def
                .schema
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO custom_field_defs (field_id, name, custom, schema_json)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(field_id) DO UPDATE SET
                     name = excluded.name,
                     custom = excluded.custom,
                     schema_json = excluded.schema_json",
                params![def.id, def.name, def.custom, schema_json],
            )?;
        }
        tx.commit()?;
        Ok(defs.len())
    }

    /// Most recent run records for a scope, newest first
    pub fn recent_runs(&self, scope: &str, limit: u32) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, scope_name, status, started_at, finished_at, note
             FROM etl_runs WHERE scope_name = ?1
             ORDER BY run_id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![scope, limit], |row| {
            Ok(RunRecord {
                run_id: row.get(0)?,
                scope: row.get(1)?,
                status: RunStatus::parse(&row.get::<_, String>(2)?),
                started_at: row.get(3)?,
                finished_at: row.get(4)?,
                note: row.get(5)?,
            })
        })?;
        let mut runs = Vec::new();
        for run in rows {
            runs.push(run?);
        }
        Ok(runs)
    }

    /// Row totals for the status command
    pub fn totals(&self) -> Result<WarehouseTotals> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };
        Ok(WarehouseTotals {
            issues: count("SELECT COUNT(*) FROM issues")?,
            links: count("SELECT COUNT(*) FROM issue_links")?,
            changes: count("SELECT COUNT(*) FROM change_items")?,
        })
    }

    /// All issue keys in id order; handy for tests and spot checks
    pub fn issue_keys(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_key FROM issues WHERE issue_key IS NOT NULL ORDER BY issue_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }
}

impl CursorStore for Warehouse {
    fn read(&mut self, scope: &str) -> Result<Cursor> {
        let cursor = self
            .conn
            .query_row(
                "SELECT last_updated_at, last_issue_id, resume_page_at, resume_token
                 FROM etl_cursors WHERE scope_name = ?1",
                params![scope],
                |row| {
                    Ok(Cursor {
                        last_updated_at: row.get(0)?,
                        last_issue_id: row.get(1)?,
                        resume_page_at: row.get(2)?,
                        resume_token: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(cursor.unwrap_or_default())
    }

    fn commit(
        &mut self,
        scope: &str,
        cursor: &Cursor,
        rowsets: &[IssueRowSet],
    ) -> Result<LoadStats> {
        let tx = self.conn.transaction()?;
        let stats = apply_rowsets(&tx, rowsets)?;
        tx.execute(
            "INSERT INTO etl_cursors
                 (scope_name, last_updated_at, last_issue_id, resume_page_at, resume_token)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(scope_name) DO UPDATE SET
                 last_updated_at = excluded.last_updated_at,
                 last_issue_id = excluded.last_issue_id,
                 resume_page_at = excluded.resume_page_at,
                 resume_token = excluded.resume_token",
            params![
                scope,
                cursor.last_updated_at,
                cursor.last_issue_id,
                cursor.resume_page_at,
                cursor.resume_token,
            ],
        )?;
        tx.commit()?;

        debug!(
            scope = %scope,
            issues = stats.issues,
            links = stats.links,
            changes = stats.changes,
            "Committed page"
        );
        Ok(stats)
    }
}

impl RunLedger for Warehouse {
    fn open_run(&mut self, scope: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO etl_runs (scope_name, status, started_at) VALUES (?1, ?2, ?3)",
            params![scope, RunStatus::Running.as_str(), Utc::now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn close_run(&mut self, run_id: i64, status: RunStatus, note: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE etl_runs SET status = ?1, finished_at = ?2, note = ?3 WHERE run_id = ?4",
            params![status.as_str(), Utc::now(), note, run_id],
        )?;
        Ok(())
    }
}

fn apply_rowsets(tx: &Transaction<'_>, rowsets: &[IssueRowSet]) -> Result<LoadStats> {
    let mut stats = LoadStats::default();

    for rowset in rowsets {
        upsert_dimensions(tx, rowset)?;
    }
    for rowset in rowsets {
        upsert_issue(tx, &rowset.issue)?;
        stats.issues += 1;
    }
    for rowset in rowsets {
        replace_bridges(tx, rowset)?;
    }
    // Links go last so edges between issues of the same page resolve
    stats.links = apply_links(tx, rowsets)?;
    for rowset in rowsets {
        stats.changes += apply_changes(tx, rowset)?;
    }

    Ok(stats)
}

fn upsert_dimensions(tx: &Transaction<'_>, rowset: &IssueRowSet) -> Result<()> {
    let issue = &rowset.issue;

    if let Some(project_id) = issue.project_id {
        tx.execute(
            "INSERT INTO projects (project_id, project_key, name) VALUES (?1, ?2, ?3)
             ON CONFLICT(project_id) DO UPDATE SET
                 project_key = excluded.project_key, name = excluded.name",
            params![project_id, issue.project_key, issue.project_name],
        )?;
    }
    if let Some(issue_type_id) = issue.issue_type_id {
        tx.execute(
            "INSERT INTO issue_types (issue_type_id, name) VALUES (?1, ?2)
             ON CONFLICT(issue_type_id) DO UPDATE SET name = excluded.name",
            params![issue_type_id, issue.issue_type_name],
        )?;
    }
    if let Some(priority_id) = issue.priority_id {
        tx.execute(
            "INSERT INTO priorities (priority_id, name) VALUES (?1, ?2)
             ON CONFLICT(priority_id) DO UPDATE SET name = excluded.name",
            params![priority_id, issue.priority_name],
        )?;
    }
    if let Some(status_id) = issue.status_id {
        tx.execute(
            "INSERT INTO statuses (status_id, name) VALUES (?1, ?2)
             ON CONFLICT(status_id) DO UPDATE SET name = excluded.name",
            params![status_id, issue.status_name],
        )?;
    }

    // Dimension rows need a project to hang off; the bridge rows below do not
    for component in &rowset.components {
        if let Some(project_id) = component.project_id {
            tx.execute(
                "INSERT INTO components (component_id, project_id, name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(component_id) DO UPDATE SET
                     project_id = excluded.project_id, name = excluded.name",
                params![component.component_id, project_id, component.name],
            )?;
        }
    }
    for version in &rowset.fix_versions {
        if let Some(project_id) = version.project_id {
            tx.execute(
                "INSERT INTO fix_versions
                     (fix_version_id, project_id, name, released, release_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(fix_version_id) DO UPDATE SET
                     project_id = excluded.project_id,
                     name = excluded.name,
                     released = excluded.released,
                     release_date = excluded.release_date",
                params![
                    version.fix_version_id,
                    project_id,
                    version.name,
                    version.released,
                    version.release_date,
                ],
            )?;
        }
    }
    for label in &rowset.labels {
        tx.execute(
            "INSERT INTO labels (label) VALUES (?1) ON CONFLICT DO NOTHING",
            params![label],
        )?;
    }

    Ok(())
}

fn upsert_issue(tx: &Transaction<'_>, issue: &IssueRow) -> Result<()> {
    let custom_fields = serde_json::to_string(&issue.custom_fields)?;
    let raw_issue = serde_json::to_string(&issue.raw_issue)?;
    let raw_changelog = issue
        .raw_changelog
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    tx.execute(
        "INSERT INTO issues (
             issue_id, issue_key, project_id, issue_type_id, status_id, priority_id,
             summary, description, reporter_id, assignee_id,
             created_at, updated_at, resolution_date, due_date,
             custom_fields, raw_issue, raw_changelog
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
         ON CONFLICT(issue_id) DO UPDATE SET
             issue_key = excluded.issue_key,
             project_id = excluded.project_id,
             issue_type_id = excluded.issue_type_id,
             status_id = excluded.status_id,
             priority_id = excluded.priority_id,
             summary = excluded.summary,
             description = excluded.description,
             reporter_id = excluded.reporter_id,
             assignee_id = excluded.assignee_id,
             created_at = excluded.created_at,
             updated_at = excluded.updated_at,
             resolution_date = excluded.resolution_date,
             due_date = excluded.due_date,
             custom_fields = excluded.custom_fields,
             raw_issue = excluded.raw_issue,
             raw_changelog = excluded.raw_changelog",
        params![
            issue.issue_id,
            issue.issue_key,
            issue.project_id,
            issue.issue_type_id,
            issue.status_id,
            issue.priority_id,
            issue.summary,
            issue.description,
            issue.reporter_id,
            issue.assignee_id,
            issue.created_at,
            issue.updated_at,
            issue.resolution_date,
            issue.due_date,
            custom_fields,
            raw_issue,
            raw_changelog,
        ],
    )?;
    Ok(())
}

/// Replace the bridge rows for one issue with what the snapshot carries now
fn replace_bridges(tx: &Transaction<'_>, rowset: &IssueRowSet) -> Result<()> {
    let issue_id = rowset.issue.issue_id;

    tx.execute(
        "DELETE FROM issue_labels WHERE issue_id = ?1",
        params![issue_id],
    )?;
    for label in &rowset.labels {
        tx.execute(
            "INSERT INTO issue_labels (issue_id, label) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
            params![issue_id, label],
        )?;
    }

    tx.execute(
        "DELETE FROM issue_components WHERE issue_id = ?1",
        params![issue_id],
    )?;
    for component in &rowset.components {
        tx.execute(
            "INSERT INTO issue_components (issue_id, component_id) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
            params![issue_id, component.component_id],
        )?;
    }

    tx.execute(
        "DELETE FROM issue_fix_versions WHERE issue_id = ?1",
        params![issue_id],
    )?;
    for version in &rowset.fix_versions {
        tx.execute(
            "INSERT INTO issue_fix_versions (issue_id, fix_version_id) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
            params![issue_id, version.fix_version_id],
        )?;
    }

    Ok(())
}

/// Insert link edges, resolving destination keys to issue ids
///
/// Edges whose destination has not been synced yet are skipped; the edge
/// materializes from the other side once that issue arrives.
fn apply_links(tx: &Transaction<'_>, rowsets: &[IssueRowSet]) -> Result<u64> {
    let mut applied = 0u64;
    let mut lookup = tx.prepare("SELECT issue_id FROM issues WHERE issue_key = ?1")?;

    for rowset in rowsets {
        for link in &rowset.links {
            let dst_issue_id: Option<i64> = lookup
                .query_row(params![link.dst_issue_key], |row| row.get(0))
                .optional()?;
            let Some(dst_issue_id) = dst_issue_id else {
                debug!(
                    src = rowset.issue.issue_id,
                    dst = %link.dst_issue_key,
                    "Skipping link to un-synced issue"
                );
                continue;
            };
            tx.execute(
                "INSERT INTO issue_links
                     (src_issue_id, dst_issue_id, link_type_key, link_type_name, direction)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT DO NOTHING",
                params![
                    link.src_issue_id,
                    dst_issue_id,
                    link.link_type_key.as_deref().unwrap_or(""),
                    link.link_type_name,
                    link.direction.as_str(),
                ],
            )?;
            applied += 1;
        }
    }

    Ok(applied)
}

fn apply_changes(tx: &Transaction<'_>, rowset: &IssueRowSet) -> Result<u64> {
    let mut applied = 0u64;

    for change in &rowset.changes {
        tx.execute(
            "INSERT INTO change_groups (history_id, issue_id, author_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(history_id) DO UPDATE SET
                 issue_id = excluded.issue_id,
                 author_id = excluded.author_id,
                 created_at = excluded.created_at",
            params![
                change.history_id,
                change.issue_id,
                change.author_id,
                change.created_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO change_items
                 (history_id, item_seq, field, field_type,
                  from_value, to_value, from_string, to_string)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(history_id, item_seq) DO UPDATE SET
                 field = excluded.field,
                 field_type = excluded.field_type,
                 from_value = excluded.from_value,
                 to_value = excluded.to_value,
                 from_string = excluded.from_string,
                 to_string = excluded.to_string",
            params![
                change.history_id,
                change.item_seq,
                change.field,
                change.field_type,
                change.from_value,
                change.to_value,
                change.from_string,
                change.to_string,
            ],
        )?;
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{ChangeRow, ComponentRow, LinkDirection, LinkRow};
    use chrono::{DateTime, TimeZone};
    use tempfile::NamedTempFile;

    fn scratch() -> (Warehouse, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let config = DatabaseConfig {
            path: file.path().to_path_buf(),
        };
        (Warehouse::open(&config).unwrap(), file)
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, minute, 0).unwrap()
    }

    fn rowset(issue_id: i64, issue_key: &str, minute: u32) -> IssueRowSet {
        IssueRowSet {
            issue: IssueRow {
                issue_id,
                issue_key: Some(issue_key.to_string()),
                project_id: Some(10),
                project_key: Some("DEMO".to_string()),
                project_name: Some("Demo".to_string()),
                issue_type_id: Some(100),
                issue_type_name: Some("Bug".to_string()),
                summary: Some(format!("Issue {issue_key}")),
                description: None,
                priority_id: None,
                priority_name: None,
                status_id: Some(3),
                status_name: Some("Open".to_string()),
                reporter_id: Some("reporter".to_string()),
                assignee_id: None,
                created_at: Some(at(0)),
                updated_at: Some(at(minute)),
                resolution_date: None,
                due_date: None,
                custom_fields: serde_json::Map::new(),
                raw_issue: serde_json::json!({"id": issue_id.to_string(), "key": issue_key}),
                raw_changelog: None,
            },
            labels: vec!["backend".to_string()],
            components: vec![ComponentRow {
                component_id: 200,
                name: Some("API".to_string()),
                project_id: Some(10),
            }],
            fix_versions: vec![],
            links: vec![],
            changes: vec![ChangeRow {
                history_id: issue_id * 100,
                item_seq: 0,
                issue_id,
                author_id: Some("user".to_string()),
                created_at: Some(at(minute)),
                field: Some("status".to_string()),
                field_type: Some("jira".to_string()),
                from_value: Some("1".to_string()),
                to_value: Some("3".to_string()),
                from_string: Some("New".to_string()),
                to_string: Some("Open".to_string()),
            }],
        }
    }

    fn link(src: i64, dst_key: &str) -> LinkRow {
        LinkRow {
            src_issue_id: src,
            dst_issue_key: dst_key.to_string(),
            link_type_key: Some("1000".to_string()),
            link_type_name: Some("Relates".to_string()),
            direction: LinkDirection::Outward,
        }
    }

    #[test]
    fn test_open_is_idempotent() {
        let file = NamedTempFile::new().unwrap();
        let config = DatabaseConfig {
            path: file.path().to_path_buf(),
        };
        let _first = Warehouse::open(&config).unwrap();
        let second = Warehouse::open(&config).unwrap();
        assert_eq!(second.totals().unwrap().issues, 0);
    }

    #[test]
    fn test_commit_applies_rows_and_cursor_together() {
        let (mut warehouse, _file) = scratch();

        assert!(warehouse.read("DEMO:Bug").unwrap().is_initial());

        let mut cursor = Cursor::default();
        cursor.observe(at(5), 10002);
        let stats = warehouse
            .commit(
                "DEMO:Bug",
                &cursor,
                &[rowset(10001, "DEMO-1", 0), rowset(10002, "DEMO-2", 5)],
            )
            .unwrap();

        assert_eq!(stats.issues, 2);
        assert_eq!(stats.changes, 2);
        assert_eq!(warehouse.read("DEMO:Bug").unwrap(), cursor);
        assert_eq!(warehouse.issue_keys().unwrap(), vec!["DEMO-1", "DEMO-2"]);

        let totals = warehouse.totals().unwrap();
        assert_eq!(totals.issues, 2);
        assert_eq!(totals.changes, 2);
    }

    #[test]
    fn test_reapplying_a_page_changes_nothing() {
        let (mut warehouse, _file) = scratch();
        let page = vec![rowset(10001, "DEMO-1", 0), rowset(10002, "DEMO-2", 5)];
        let mut cursor = Cursor::default();
        cursor.observe(at(5), 10002);

        warehouse.commit("DEMO:Bug", &cursor, &page).unwrap();
        warehouse.commit("DEMO:Bug", &cursor, &page).unwrap();

        let totals = warehouse.totals().unwrap();
        assert_eq!(totals.issues, 2);
        assert_eq!(totals.changes, 2);
        let labels: i64 = warehouse
            .conn
            .query_row("SELECT COUNT(*) FROM issue_labels", [], |row| row.get(0))
            .unwrap();
        assert_eq!(labels, 2);
        assert_eq!(warehouse.read("DEMO:Bug").unwrap(), cursor);
    }

    #[test]
    fn test_upsert_refreshes_dimension_names() {
        let (mut warehouse, _file) = scratch();
        let cursor = Cursor::default();

        warehouse
            .commit("DEMO:Bug", &cursor, &[rowset(10001, "DEMO-1", 0)])
            .unwrap();

        let mut renamed = rowset(10001, "DEMO-1", 7);
        renamed.issue.status_name = Some("Reopened".to_string());
        warehouse
            .commit("DEMO:Bug", &cursor, &[renamed])
            .unwrap();

        let (count, name): (i64, String) = warehouse
            .conn
            .query_row(
                "SELECT COUNT(*), MAX(name) FROM statuses WHERE status_id = 3",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(name, "Reopened");
        assert_eq!(warehouse.totals().unwrap().issues, 1);
    }

    #[test]
    fn test_bridge_rows_follow_the_snapshot() {
        let (mut warehouse, _file) = scratch();
        let cursor = Cursor::default();

        warehouse
            .commit("DEMO:Bug", &cursor, &[rowset(10001, "DEMO-1", 0)])
            .unwrap();

        let mut relabeled = rowset(10001, "DEMO-1", 5);
        relabeled.labels = vec!["frontend".to_string()];
        warehouse
            .commit("DEMO:Bug", &cursor, &[relabeled])
            .unwrap();

        let labels: Vec<String> = {
            let mut stmt = warehouse
                .conn
                .prepare("SELECT label FROM issue_labels WHERE issue_id = 10001")
                .unwrap();
            let rows = stmt.query_map([], |row| row.get(0)).unwrap();
            rows.map(|r| r.unwrap()).collect()
        };
        assert_eq!(labels, vec!["frontend"]);
    }

    #[test]
    fn test_links_resolve_within_and_across_pages() {
        let (mut warehouse, _file) = scratch();
        let cursor = Cursor::default();

        // DEMO-1 links to DEMO-2 (same page) and to an un-synced issue
        let mut first = rowset(10001, "DEMO-1", 0);
        first.links = vec![link(10001, "DEMO-2"), link(10001, "OTHER-9")];
        let stats = warehouse
            .commit("DEMO:Bug", &cursor, &[first, rowset(10002, "DEMO-2", 5)])
            .unwrap();
        assert_eq!(stats.links, 1);

        // A later page links back across pages
        let mut third = rowset(10003, "DEMO-3", 10);
        third.links = vec![link(10003, "DEMO-1")];
        let stats = warehouse
            .commit("DEMO:Bug", &cursor, &[third])
            .unwrap();
        assert_eq!(stats.links, 1);

        let totals = warehouse.totals().unwrap();
        assert_eq!(totals.links, 2);
        let dst: i64 = warehouse
            .conn
            .query_row(
                "SELECT dst_issue_id FROM issue_links WHERE src_issue_id = 10001",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(dst, 10002);
    }

    #[test]
    fn test_failed_commit_rolls_back_data_and_cursor() {
        let (mut warehouse, _file) = scratch();

        // Break the cursor table so the commit fails after the data writes
        warehouse
            .conn
            .execute_batch(
                "DROP TABLE etl_cursors;
                 CREATE TABLE etl_cursors (scope_name TEXT PRIMARY KEY);",
            )
            .unwrap();

        let mut cursor = Cursor::default();
        cursor.observe(at(0), 10001);
        let result = warehouse.commit("DEMO:Bug", &cursor, &[rowset(10001, "DEMO-1", 0)]);

        assert!(result.is_err());
        let totals = warehouse.totals().unwrap();
        assert_eq!(totals.issues, 0);
        assert_eq!(totals.changes, 0);
    }

    #[test]
    fn test_cursor_survives_reopen() {
        let file = NamedTempFile::new().unwrap();
        let config = DatabaseConfig {
            path: file.path().to_path_buf(),
        };

        {
            let mut warehouse = Warehouse::open(&config).unwrap();
            let cursor = Cursor {
                last_updated_at: Some(at(10)),
                last_issue_id: Some(10003),
                resume_page_at: Some(4),
                resume_token: Some("tok".to_string()),
            };
            warehouse.commit("DEMO:Bug", &cursor, &[]).unwrap();
        }

        let mut reopened = Warehouse::open(&config).unwrap();
        let cursor = reopened.read("DEMO:Bug").unwrap();
        assert_eq!(cursor.last_updated_at, Some(at(10)));
        assert_eq!(cursor.last_issue_id, Some(10003));
        assert_eq!(cursor.resume_page_at, Some(4));
        assert_eq!(cursor.resume_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_run_ledger_round_trip() {
        let (mut warehouse, _file) = scratch();

        let run_id = warehouse.open_run("DEMO:Bug").unwrap();
        let runs = warehouse.recent_runs("DEMO:Bug", 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Running);
        assert!(runs[0].finished_at.is_none());

        warehouse
            .close_run(run_id, RunStatus::Success, None)
            .unwrap();
        let runs = warehouse.recent_runs("DEMO:Bug", 10).unwrap();
        assert_eq!(runs[0].status, RunStatus::Success);
        assert!(runs[0].finished_at.is_some());

        // Newest first
        let second = warehouse.open_run("DEMO:Bug").unwrap();
        warehouse
            .close_run(second, RunStatus::Failed, Some("gave up after 4 attempts"))
            .unwrap();
        let runs = warehouse.recent_runs("DEMO:Bug", 10).unwrap();
        assert_eq!(runs[0].run_id, second);
        assert_eq!(runs[0].note.as_deref(), Some("gave up after 4 attempts"));
    }

    #[test]
    fn test_field_defs_upsert() {
        let (mut warehouse, _file) = scratch();
        let defs: Vec<crate::jira::FieldDef> = serde_json::from_value(serde_json::json!([
            {"id": "summary", "name": "Summary", "custom": false},
            {"id": "customfield_123", "name": "Team", "custom": true,
             "schema": {"type": "string"}}
        ]))
        .unwrap();

        warehouse.upsert_field_defs(&defs).unwrap();
        warehouse.upsert_field_defs(&defs).unwrap();

        let count: i64 = warehouse
            .conn
            .query_row("SELECT COUNT(*) FROM custom_field_defs", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 2);
        let custom: bool = warehouse
            .conn
            .query_row(
                "SELECT custom FROM custom_field_defs WHERE field_id = 'customfield_123'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(custom);
    }
}
