// Purge executor with bounded retries
use crate::client::StoreClient;
use crate::resolver::RevisionMap;
use anyhow::{Context, Result};
use serde_json::Value;

/// Successful purge of one batch
#[derive(Debug, Clone)]
pub struct PurgeOutcome {
    /// Attempts made, including the successful one
    pub attempts: usize,
}

/// Purge `revs` from `database`, retrying up to `max_attempts` times.
///
/// Every attempt submits the same body with no backoff. `on_retry` is called
/// after each failed attempt that will be retried. The last failure is
/// returned once all attempts are exhausted.
pub async fn purge_with_retry<F>(
    client: &StoreClient,
    database: &str,
    revs: &RevisionMap,
    max_attempts: usize,
    mut on_retry: F,
) -> Result<PurgeOutcome>
where
    F: FnMut(usize, &anyhow::Error),
{
    let max_attempts = max_attempts.max(1);
    let url = client.url(&format!("/{}/_purge", database), &[]);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match client.post::<Value, _>(url.clone(), revs).await {
            // The store's purge report is not validated
            Ok(_) => return Ok(PurgeOutcome { attempts: attempt }),
            Err(e) if attempt < max_attempts => on_retry(attempt, &e),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Purge of {} docs in {} failed after {} attempts", revs.len(), database, attempt)
                })
            }
        }
    }
}
