//! Batch orchestration: resolve, archive, purge and rewarm, one batch at a time,
//! across every database group of every input file
use crate::archive::archive_snapshots;
use crate::client::StoreClient;
use crate::constants;
use crate::input::{self, DocumentGroup};
use crate::purge::purge_with_retry;
use crate::resolver::resolve_revisions;
use crate::views::{default_views, rewarm_views, ViewRef};
use anyhow::{Context, Result};
use std::path::Path;
use std::time::{Duration, Instant};

// ============================================================================
// Purge Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct PurgeConfig {
    /// Maximum number of document ids per batch
    pub batch_size: usize,
    /// Maximum purge attempts per batch
    pub purge_retry: usize,
    /// Database receiving archived snapshots
    pub cold_storage_db: String,
    /// Purges of this database are followed by view rewarming
    pub primary_db: String,
    /// Views queried after each purge of the primary database
    pub views: Vec<ViewRef>,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            batch_size: constants::BATCH_SIZE,
            purge_retry: constants::PURGE_RETRY,
            cold_storage_db: constants::COLD_STORAGE_DB.to_string(),
            primary_db: constants::PRIMARY_DB.to_string(),
            views: default_views(),
        }
    }
}

impl PurgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("batch size must be at least 1");
        }
        if self.purge_retry == 0 {
            anyhow::bail!("purge retry count must be at least 1");
        }
        if self.cold_storage_db.is_empty() {
            anyhow::bail!("cold storage database name must not be empty");
        }
        Ok(())
    }
}

// ============================================================================
// Purge Events and Stats
// ============================================================================

/// Per-file totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStats {
    pub file: String,
    /// Document ids read from the file
    pub documents: usize,
    pub batches: usize,
    /// Batches with no remaining revisions
    pub skipped_batches: usize,
    pub purged_revisions: usize,
    pub archived_records: usize,
    pub elapsed: Duration,
}

impl FileStats {
    fn record(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        match outcome {
            BatchOutcome::Skipped => self.skipped_batches += 1,
            BatchOutcome::Purged {
                revisions, archived, ..
            } => {
                self.purged_revisions += revisions;
                self.archived_records += archived;
            }
        }
    }
}

/// Result of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing left to purge for these ids
    Skipped,
    Purged {
        documents: usize,
        revisions: usize,
        archived: usize,
        attempts: usize,
        views_rewarmed: bool,
    },
}

#[derive(Debug, Clone)]
pub enum PurgeEvent {
    FileStarted {
        file: String,
    },
    BatchStarted {
        database: String,
        size: usize,
        remaining: usize,
    },
    BatchSkipped {
        database: String,
        size: usize,
    },
    BatchArchived {
        database: String,
        written: usize,
        existing: usize,
    },
    PurgeRetry {
        database: String,
        attempt: usize,
        max_attempts: usize,
        error: String,
    },
    BatchPurged {
        database: String,
        documents: usize,
        revisions: usize,
        attempts: usize,
    },
    ViewsRewarmed {
        database: String,
    },
    FileCompleted {
        stats: FileStats,
    },
    Error {
        error: String,
    },
}

// ============================================================================
// Purge Logger Trait
// ============================================================================

/// Trait for logging purge progress
pub trait PurgeLogger: Send + Sync {
    fn on_file_start(&self, file: &str);

    fn on_batch_start(&self, database: &str, size: usize, remaining: usize);

    fn on_batch_skipped(&self, database: &str, size: usize);

    fn on_batch_archived(&self, database: &str, written: usize, existing: usize);

    fn on_purge_retry(&self, database: &str, attempt: usize, max_attempts: usize, error: &str);

    fn on_batch_purged(&self, database: &str, documents: usize, revisions: usize, attempts: usize);

    fn on_views_rewarmed(&self, database: &str);

    fn on_file_complete(&self, stats: &FileStats);

    fn on_error(&self, error: &str);
}

/// Logger that routes every event through the `log` facade
pub struct LogLogger;

impl PurgeLogger for LogLogger {
    fn on_file_start(&self, file: &str) {
        log::info!("purging file {}", file);
    }

    fn on_batch_start(&self, database: &str, size: usize, remaining: usize) {
        log::info!("Purging {} docs from {}. Uuids left {}", size, database, remaining);
    }

    fn on_batch_skipped(&self, database: &str, size: usize) {
        log::info!("No revisions left for {} docs in {}, skipping", size, database);
    }

    fn on_batch_archived(&self, database: &str, written: usize, existing: usize) {
        log::debug!("Archived {} docs from {} ({} already archived)", written, database, existing);
    }

    fn on_purge_retry(&self, database: &str, attempt: usize, max_attempts: usize, error: &str) {
        log::warn!(
            "Purge in {} failed (attempt {}/{}): {}, retrying",
            database,
            attempt,
            max_attempts,
            error
        );
    }

    fn on_batch_purged(&self, database: &str, documents: usize, revisions: usize, attempts: usize) {
        log::debug!(
            "Purged {} revisions of {} docs from {} in {} attempt(s)",
            revisions,
            documents,
            database,
            attempts
        );
    }

    fn on_views_rewarmed(&self, database: &str) {
        log::debug!("Views rewarmed in {}", database);
    }

    fn on_file_complete(&self, stats: &FileStats) {
        log::info!("{} {} {}", stats.file, stats.elapsed.as_millis(), stats.documents);
    }

    fn on_error(&self, error: &str) {
        log::error!("{}", error);
    }
}

// ============================================================================
// Purge Manager
// ============================================================================

pub struct PurgeManager {
    client: StoreClient,
    config: PurgeConfig,
    logger: Option<Box<dyn PurgeLogger>>,
    event_callback: Option<Box<dyn Fn(&PurgeEvent) + Send + Sync>>,
}

impl PurgeManager {
    pub fn new(client: StoreClient, config: PurgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            logger: None,
            event_callback: None,
        })
    }

    /// Set a logger for purge events
    pub fn with_logger<L>(mut self, logger: L) -> Self
    where
        L: PurgeLogger + 'static,
    {
        self.logger = Some(Box::new(logger));
        self
    }

    /// Set a custom event callback
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PurgeEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &PurgeConfig {
        &self.config
    }

    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    fn handle_event(&self, event: &PurgeEvent) {
        if let Some(callback) = &self.event_callback {
            callback(event);
        }

        let Some(logger) = &self.logger else {
            return;
        };
        match event {
            PurgeEvent::FileStarted { file } => logger.on_file_start(file),
            PurgeEvent::BatchStarted {
                database,
                size,
                remaining,
            } => logger.on_batch_start(database, *size, *remaining),
            PurgeEvent::BatchSkipped { database, size } => logger.on_batch_skipped(database, *size),
            PurgeEvent::BatchArchived {
                database,
                written,
                existing,
            } => logger.on_batch_archived(database, *written, *existing),
            PurgeEvent::PurgeRetry {
                database,
                attempt,
                max_attempts,
                error,
            } => logger.on_purge_retry(database, *attempt, *max_attempts, error),
            PurgeEvent::BatchPurged {
                database,
                documents,
                revisions,
                attempts,
            } => logger.on_batch_purged(database, *documents, *revisions, *attempts),
            PurgeEvent::ViewsRewarmed { database } => logger.on_views_rewarmed(database),
            PurgeEvent::FileCompleted { stats } => logger.on_file_complete(stats),
            PurgeEvent::Error { error } => logger.on_error(error),
        }
    }

    /// Purge every file of an input directory, in name order.
    ///
    /// Stops at the first file that fails; files already processed keep
    /// their effects.
    pub async fn purge_directory(&self, dir: impl AsRef<Path>) -> Result<Vec<FileStats>> {
        let mut all_stats = Vec::new();
        for file in input::list_files(dir)? {
            all_stats.push(self.purge_file(&file).await?);
        }
        Ok(all_stats)
    }

    pub async fn purge_file(&self, path: &Path) -> Result<FileStats> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let groups = input::read_groups(path)?;
        self.purge_groups(&name, groups).await
    }

    /// Purge the groups of one file, sequentially.
    ///
    /// The first failing batch aborts the whole file.
    pub async fn purge_groups(&self, file: &str, groups: Vec<DocumentGroup>) -> Result<FileStats> {
        self.handle_event(&PurgeEvent::FileStarted {
            file: file.to_string(),
        });

        let started = Instant::now();
        let mut stats = FileStats {
            file: file.to_string(),
            ..Default::default()
        };

        for group in &groups {
            stats.documents += group.document_ids.len();
            if let Err(e) = self.purge_group(group, &mut stats).await {
                self.handle_event(&PurgeEvent::Error {
                    error: format!("{:#}", e),
                });
                return Err(e).with_context(|| format!("Failed to purge {}", file));
            }
        }

        stats.elapsed = started.elapsed();
        self.handle_event(&PurgeEvent::FileCompleted { stats: stats.clone() });
        Ok(stats)
    }

    async fn purge_group(&self, group: &DocumentGroup, stats: &mut FileStats) -> Result<()> {
        let mut remaining = group.document_ids.len();
        for batch in group.document_ids.chunks(self.config.batch_size) {
            remaining -= batch.len();
            self.handle_event(&PurgeEvent::BatchStarted {
                database: group.database.clone(),
                size: batch.len(),
                remaining,
            });
            let outcome = self.purge_batch(&group.database, batch).await?;
            stats.record(&outcome);
        }
        Ok(())
    }

    /// Run one batch through resolve -> archive -> purge -> rewarm.
    ///
    /// Nothing is purged unless every resolved snapshot was archived first.
    pub async fn purge_batch(&self, database: &str, ids: &[String]) -> Result<BatchOutcome> {
        let resolved = resolve_revisions(&self.client, ids, database).await?;
        if resolved.is_empty() {
            self.handle_event(&PurgeEvent::BatchSkipped {
                database: database.to_string(),
                size: ids.len(),
            });
            return Ok(BatchOutcome::Skipped);
        }

        let archived = archive_snapshots(&self.client, &self.config.cold_storage_db, &resolved.docs, database).await?;
        self.handle_event(&PurgeEvent::BatchArchived {
            database: database.to_string(),
            written: archived.written,
            existing: archived.existing,
        });

        let max_attempts = self.config.purge_retry;
        let purged = purge_with_retry(&self.client, database, &resolved.revs, max_attempts, |attempt, err| {
            self.handle_event(&PurgeEvent::PurgeRetry {
                database: database.to_string(),
                attempt,
                max_attempts,
                error: format!("{:#}", err),
            })
        })
        .await?;

        let documents = resolved.revs.len();
        let revisions = resolved.revision_count();
        self.handle_event(&PurgeEvent::BatchPurged {
            database: database.to_string(),
            documents,
            revisions,
            attempts: purged.attempts,
        });

        // Rewarm failures abort the file like any other request failure
        let views_rewarmed = rewarm_views(&self.client, database, &self.config.primary_db, &self.config.views).await?;
        if views_rewarmed {
            self.handle_event(&PurgeEvent::ViewsRewarmed {
                database: database.to_string(),
            });
        }

        Ok(BatchOutcome::Purged {
            documents,
            revisions,
            archived: archived.total(),
            attempts: purged.attempts,
            views_rewarmed,
        })
    }
}
