//! Leaf revision resolution for a batch of document ids, using the changes
//! feed and per-revision fetches for conflicted documents
use crate::client::StoreClient;
use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Document id -> leaf revisions. More than one leaf means an unresolved conflict.
pub type RevisionMap = BTreeMap<String, Vec<String>>;

/// Full body of one document at one leaf revision
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub database: String,
    pub id: String,
    pub rev: String,
    pub body: Value,
}

/// Result of resolving one batch
#[derive(Debug, Default)]
pub struct ResolvedBatch {
    pub revs: RevisionMap,
    /// Snapshots per document id; revisions that were already gone have none
    pub docs: BTreeMap<String, Vec<DocumentSnapshot>>,
    /// Number of per-revision fetches issued for conflicted documents
    pub revision_fetches: usize,
}

impl ResolvedBatch {
    pub fn is_empty(&self) -> bool {
        self.revs.is_empty()
    }

    pub fn revision_count(&self) -> usize {
        self.revs.values().map(Vec::len).sum()
    }

    pub fn snapshot_count(&self) -> usize {
        self.docs.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeRow>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    pub changes: Vec<RevEntry>,
    #[serde(default)]
    pub doc: Option<Value>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct RevEntry {
    pub rev: String,
}

/// Resolve every leaf revision of `ids` in `database`.
///
/// Documents missing from the changes feed are already purged and left out.
/// Single-leaf documents take their body from the feed; conflicted ones
/// fetch each leaf concurrently, and a 404 for a leaf yields no snapshot.
pub async fn resolve_revisions(client: &StoreClient, ids: &[String], database: &str) -> Result<ResolvedBatch> {
    let url = client.url(
        &format!("/{}/_changes", database),
        &[
            ("style", json!("all_docs")),
            ("filter", json!("_doc_ids")),
            ("include_docs", json!("true")),
            ("attachments", json!("true")),
        ],
    );
    let changes: ChangesResponse = client
        .post(url, &json!({ "doc_ids": ids }))
        .await
        .with_context(|| format!("Failed to read changes for {} docs in {}", ids.len(), database))?;

    let mut resolved = ResolvedBatch::default();

    for row in changes.results {
        let revs: Vec<String> = row.changes.into_iter().map(|c| c.rev).collect();
        if revs.is_empty() {
            continue;
        }
        if row.deleted {
            log::debug!("{} is deleted in {}, archiving its tombstone", row.id, database);
        }

        let snapshots = if revs.len() > 1 {
            log::debug!("{} has {} conflicting leaves in {}", row.id, revs.len(), database);
            resolved.revision_fetches += revs.len();
            fetch_leaves(client, database, &row.id, &revs).await?
        } else {
            match row.doc {
                Some(body) if !body.is_null() => vec![DocumentSnapshot {
                    database: database.to_string(),
                    id: row.id.clone(),
                    rev: revs[0].clone(),
                    body,
                }],
                _ => {
                    log::warn!("Changes feed returned no body for {} in {}", row.id, database);
                    Vec::new()
                }
            }
        };

        resolved.docs.insert(row.id.clone(), snapshots);
        resolved.revs.insert(row.id, revs);
    }

    Ok(resolved)
}

async fn fetch_leaves(client: &StoreClient, database: &str, id: &str, revs: &[String]) -> Result<Vec<DocumentSnapshot>> {
    let fetches = revs.iter().map(|rev| client.get_doc(database, id, Some(rev)));
    let bodies = join_all(fetches).await;

    let mut snapshots = Vec::with_capacity(revs.len());
    for (rev, body) in revs.iter().zip(bodies) {
        match body? {
            Some(body) => snapshots.push(DocumentSnapshot {
                database: database.to_string(),
                id: id.to_string(),
                rev: rev.clone(),
                body,
            }),
            None => log::info!("{}@{} already gone from {}", id, rev, database),
        }
    }
    Ok(snapshots)
}
