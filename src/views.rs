// View rewarming after purges of the primary database
use crate::client::StoreClient;
use crate::constants;
use anyhow::{Context, Result};
use serde_json::{json, Value};

/// A view queried to force index materialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRef {
    pub design_doc: String,
    pub view: String,
}

impl ViewRef {
    pub fn new(design_doc: impl Into<String>, view: impl Into<String>) -> Self {
        Self {
            design_doc: design_doc.into(),
            view: view.into(),
        }
    }

    pub fn path(&self, database: &str) -> String {
        format!("/{}/_design/{}/_view/{}", database, self.design_doc, self.view)
    }
}

impl std::str::FromStr for ViewRef {
    type Err = anyhow::Error;

    /// Parses `ddoc/view`
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((ddoc, view)) if !ddoc.is_empty() && !view.is_empty() && !view.contains('/') => {
                Ok(Self::new(ddoc, view))
            }
            _ => anyhow::bail!("Invalid view '{}', expected <design doc>/<view>", s),
        }
    }
}

/// Views warmed by default
pub fn default_views() -> Vec<ViewRef> {
    constants::REWARM_VIEWS
        .iter()
        .map(|(ddoc, view)| ViewRef::new(*ddoc, *view))
        .collect()
}

/// Query each view with `limit=1` when `database` is the primary database.
///
/// Returns whether any query was issued. Failures propagate like any other
/// request failure.
pub async fn rewarm_views(client: &StoreClient, database: &str, primary_db: &str, views: &[ViewRef]) -> Result<bool> {
    if database != primary_db {
        return Ok(false);
    }

    log::info!("calling views");
    for view in views {
        let url = client.url(&view.path(database), &[("limit", json!(1))]);
        client
            .get::<Value>(url)
            .await
            .with_context(|| format!("Failed to query view {}/{}", view.design_doc, view.view))?;
    }

    Ok(!views.is_empty())
}
