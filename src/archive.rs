// Cold storage archiving of document snapshots before they are purged
use crate::client::StoreClient;
use crate::resolver::DocumentSnapshot;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Cold storage id for a snapshot: `<database>:<id>:<revision>`
pub fn cold_storage_id(database: &str, id: &str, rev: &str) -> String {
    format!("{}:{}:{}", database, id, rev)
}

/// A snapshot rewritten for the archive database.
///
/// The id is derived from (database, id, revision) so re-archiving the same
/// snapshot targets the same record, and `_rev` is removed so the archive
/// assigns its own.
#[derive(Debug, Clone, PartialEq)]
pub struct ColdStorageRecord {
    pub id: String,
    pub body: Map<String, Value>,
}

impl ColdStorageRecord {
    pub fn from_snapshot(snapshot: &DocumentSnapshot) -> Result<Self> {
        let Value::Object(mut body) = snapshot.body.clone() else {
            anyhow::bail!(
                "Document {}@{} in {} is not a JSON object",
                snapshot.id,
                snapshot.rev,
                snapshot.database
            );
        };

        let id = cold_storage_id(&snapshot.database, &snapshot.id, &snapshot.rev);
        body.remove("_rev");
        body.insert("_id".to_string(), Value::String(id.clone()));

        Ok(Self { id, body })
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

/// Per-document result row of a `_bulk_docs` write
#[derive(Debug, Deserialize)]
pub struct BulkDocsRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Outcome of archiving one batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Records written for the first time
    pub written: usize,
    /// Records that already existed in cold storage
    pub existing: usize,
}

impl ArchiveSummary {
    pub fn total(&self) -> usize {
        self.written + self.existing
    }
}

/// Build the archive records for every snapshot of a batch
pub fn build_records(docs: &BTreeMap<String, Vec<DocumentSnapshot>>) -> Result<Vec<ColdStorageRecord>> {
    docs.values()
        .flatten()
        .map(ColdStorageRecord::from_snapshot)
        .collect()
}

/// Write every snapshot of a batch to `cold_storage_db` in one bulk request.
///
/// Not retried here: any failure aborts the batch before anything is purged.
/// A `conflict` row means the record was archived by an earlier run and is
/// left untouched; any other per-document error fails the archive.
pub async fn archive_snapshots(
    client: &StoreClient,
    cold_storage_db: &str,
    docs: &BTreeMap<String, Vec<DocumentSnapshot>>,
    database: &str,
) -> Result<ArchiveSummary> {
    let records: Vec<Value> = build_records(docs)?
        .into_iter()
        .map(ColdStorageRecord::into_value)
        .collect();
    let submitted = records.len();

    let url = client.url(&format!("/{}/_bulk_docs", cold_storage_db), &[]);
    let rows: Vec<BulkDocsRow> = client
        .post(url, &json!({ "docs": records }))
        .await
        .with_context(|| format!("Failed to archive {} docs from {} to {}", submitted, database, cold_storage_db))?;

    let mut summary = ArchiveSummary::default();
    for row in rows {
        match row.error.as_deref() {
            None => summary.written += 1,
            Some("conflict") => {
                log::debug!("{} already archived", row.id.as_deref().unwrap_or("?"));
                summary.existing += 1;
            }
            Some(error) => anyhow::bail!(
                "Failed to archive {} to {}: {} ({})",
                row.id.as_deref().unwrap_or("?"),
                cold_storage_db,
                error,
                row.reason.as_deref().unwrap_or("no reason given")
            ),
        }
    }

    Ok(summary)
}
