//! Transform raw Jira issues into warehouse row-sets
//!
//! Pure functions, no I/O. One [`RawIssue`] in, one [`IssueRowSet`] out:
//! a snapshot row for `issues`, bridge rows for labels/components/fix
//! versions, directed link edges, and flattened changelog rows. Unknown
//! fields never fail a transform; `customfield_*` entries are bagged into
//! the `custom_fields` JSON column and the full payload is preserved in the
//! raw audit columns. The only hard requirement is a numeric issue id.

use crate::jira::{parse_jira_timestamp, RawIssue};
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// The issues-table snapshot row
#[derive(Debug, Clone)]
pub struct IssueRow {
    pub issue_id: i64,
    pub issue_key: Option<String>,
    pub project_id: Option<i64>,
    pub project_key: Option<String>,
    pub project_name: Option<String>,
    pub issue_type_id: Option<i64>,
    pub issue_type_name: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub priority_id: Option<i64>,
    pub priority_name: Option<String>,
    pub status_id: Option<i64>,
    pub status_name: Option<String>,
    pub reporter_id: Option<String>,
    pub assignee_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub resolution_date: Option<DateTime<Utc>>,
    pub due_date: Option<String>,
    /// The customfield_* bag, stored as JSON text
    pub custom_fields: Map<String, Value>,
    /// Full issue payload for audit
    pub raw_issue: Value,
    /// Changelog payload for audit, when the request expanded it
    pub raw_changelog: Option<Value>,
}

/// A component attached to an issue
#[derive(Debug, Clone)]
pub struct ComponentRow {
    pub component_id: i64,
    pub name: Option<String>,
    pub project_id: Option<i64>,
}

/// A fix version attached to an issue
#[derive(Debug, Clone)]
pub struct FixVersionRow {
    pub fix_version_id: i64,
    pub name: Option<String>,
    pub released: Option<bool>,
    pub release_date: Option<String>,
    pub project_id: Option<i64>,
}

/// Direction of a link edge relative to the source issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Outward,
    Inward,
}

impl LinkDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkDirection::Outward => "outward",
            LinkDirection::Inward => "inward",
        }
    }
}

/// A directed, typed link edge from the source issue
///
/// The destination is carried by key; the loader resolves it to an issue id
/// at apply time, once both ends have been synced.
#[derive(Debug, Clone)]
pub struct LinkRow {
    pub src_issue_id: i64,
    pub dst_issue_key: String,
    pub link_type_key: Option<String>,
    pub link_type_name: Option<String>,
    pub direction: LinkDirection,
}

/// One flattened changelog item
///
/// `item_seq` is the item's position within its history group, giving every
/// row a stable (history_id, item_seq) identity even when Jira reports
/// multiple items with null values for the same field.
#[derive(Debug, Clone)]
pub struct ChangeRow {
    pub history_id: i64,
    pub item_seq: i64,
    pub issue_id: i64,
    pub author_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub field: Option<String>,
    pub field_type: Option<String>,
    pub from_value: Option<String>,
    pub to_value: Option<String>,
    pub from_string: Option<String>,
    pub to_string: Option<String>,
}

/// Container for all derived rows from one issue
#[derive(Debug, Clone)]
pub struct IssueRowSet {
    pub issue: IssueRow,
    pub labels: Vec<String>,
    pub components: Vec<ComponentRow>,
    pub fix_versions: Vec<FixVersionRow>,
    pub links: Vec<LinkRow>,
    pub changes: Vec<ChangeRow>,
}

/// Explode one raw issue into its warehouse row-sets
///
/// Fails only when the issue carries no usable numeric id; every other
/// malformed shape degrades to null columns or skipped sub-rows.
pub fn transform_issue(raw: &RawIssue) -> Result<IssueRowSet> {
    let issue_id = raw.issue_id().ok_or_else(|| {
        crate::EtlError::Transform(format!(
            "issue {} has a missing or non-numeric id",
            raw.key.as_deref().unwrap_or("<unknown>")
        ))
    })?;

    let fields = &raw.fields;
    let project = object_at(fields, "project");
    let issue_type = object_at(fields, "issuetype");
    let priority = object_at(fields, "priority");
    let status = object_at(fields, "status");

    let issue = IssueRow {
        issue_id,
        issue_key: raw.key.clone(),
        project_id: project.and_then(|p| int_at(p, "id")),
        project_key: project.and_then(|p| string_at(p, "key")),
        project_name: project.and_then(|p| string_at(p, "name")),
        issue_type_id: issue_type.and_then(|t| int_at(t, "id")),
        issue_type_name: issue_type.and_then(|t| string_at(t, "name")),
        summary: string_at(fields, "summary"),
        description: string_at(fields, "description"),
        priority_id: priority.and_then(|p| int_at(p, "id")),
        priority_name: priority.and_then(|p| string_at(p, "name")),
        status_id: status.and_then(|s| int_at(s, "id")),
        status_name: status.and_then(|s| string_at(s, "name")),
        reporter_id: object_at(fields, "reporter").and_then(|u| string_at(u, "accountId")),
        assignee_id: object_at(fields, "assignee").and_then(|u| string_at(u, "accountId")),
        created_at: timestamp_at(fields, "created"),
        updated_at: timestamp_at(fields, "updated"),
        resolution_date: timestamp_at(fields, "resolutiondate"),
        due_date: string_at(fields, "duedate"),
        custom_fields: extract_custom_fields(fields),
        raw_issue: serde_json::to_value(raw)?,
        raw_changelog: raw.changelog.clone(),
    };

    let labels = fields
        .get("labels")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut components = Vec::new();
    for component in array_at(fields, "components") {
        let Some(component) = component.as_object() else {
            continue;
        };
        // A component without a numeric id cannot be keyed anywhere
        if let Some(component_id) = int_at(component, "id") {
            components.push(ComponentRow {
                component_id,
                name: string_at(component, "name"),
                project_id: project.and_then(|p| int_at(p, "id")),
            });
        }
    }

    let mut fix_versions = Vec::new();
    for version in array_at(fields, "fixVersions") {
        let Some(version) = version.as_object() else {
            continue;
        };
        if let Some(fix_version_id) = int_at(version, "id") {
            fix_versions.push(FixVersionRow {
                fix_version_id,
                name: string_at(version, "name"),
                released: version.get("released").and_then(Value::as_bool),
                release_date: string_at(version, "releaseDate"),
                project_id: project.and_then(|p| int_at(p, "id")),
            });
        }
    }

    let mut links = Vec::new();
    for link in array_at(fields, "issuelinks") {
        let Some(link) = link.as_object() else {
            continue;
        };
        let link_type = object_at(link, "type");
        let type_name = link_type.and_then(|t| string_at(t, "name"));
        let type_key = link_type
            .and_then(|t| string_at(t, "id"))
            .or_else(|| type_name.clone());
        for (direction, end) in [
            (LinkDirection::Outward, "outwardIssue"),
            (LinkDirection::Inward, "inwardIssue"),
        ] {
            if let Some(dst_issue_key) = object_at(link, end).and_then(|e| string_at(e, "key")) {
                links.push(LinkRow {
                    src_issue_id: issue_id,
                    dst_issue_key,
                    link_type_key: type_key.clone(),
                    link_type_name: type_name.clone(),
                    direction,
                });
            }
        }
    }

    let mut changes = Vec::new();
    let histories = raw
        .changelog
        .as_ref()
        .and_then(|log| log.get("histories"))
        .and_then(Value::as_array);
    for history in histories.into_iter().flatten() {
        let Some(history) = history.as_object() else {
            continue;
        };
        // Histories without a numeric id cannot be keyed; skip them
        let Some(history_id) = int_at(history, "id") else {
            continue;
        };
        let author_id = object_at(history, "author").and_then(|a| string_at(a, "accountId"));
        let created_at = timestamp_at(history, "created");
        for (item_seq, item) in array_at(history, "items").iter().enumerate() {
            let Some(item) = item.as_object() else {
                continue;
            };
            changes.push(ChangeRow {
                history_id,
                item_seq: item_seq as i64,
                issue_id,
                author_id: author_id.clone(),
                created_at,
                field: string_at(item, "field"),
                field_type: string_at(item, "fieldtype"),
                from_value: string_at(item, "from"),
                to_value: string_at(item, "to"),
                from_string: string_at(item, "fromString"),
                to_string: string_at(item, "toString"),
            });
        }
    }

    Ok(IssueRowSet {
        issue,
        labels,
        components,
        fix_versions,
        links,
        changes,
    })
}

fn extract_custom_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .filter(|(key, _)| key.starts_with("customfield_"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn object_at<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    map.get(key).and_then(Value::as_object)
}

fn array_at<'a>(map: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    map.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn string_at(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Jira serializes most ids as strings; accept both numbers and numeric text
fn int_at(map: &Map<String, Value>, key: &str) -> Option<i64> {
    match map.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn timestamp_at(map: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    map.get(key)
        .and_then(Value::as_str)
        .and_then(parse_jira_timestamp)
}
