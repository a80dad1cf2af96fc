//! Defaults for batching, retries, database names, rewarm views and input parsing
// Constants for version and binary identification

/// Binary name used in user agents
pub const BINARY_NAME: &str = "couchpurge";

/// Package version from Cargo.toml (set at compile time)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the user agent string for HTTP requests
pub fn user_agent() -> String {
    format!("{}/{}", BINARY_NAME, VERSION)
}

// ============================================================================
// Pipeline Constants
// ============================================================================

/// Number of document ids resolved, archived and purged together
pub const BATCH_SIZE: usize = 50;

/// Maximum number of purge attempts per batch
pub const PURGE_RETRY: usize = 10;

// ============================================================================
// Database Constants
// ============================================================================

/// Database receiving archived copies of purged revisions
pub const COLD_STORAGE_DB: &str = "medic-cold-storage";

/// Primary database; only purges against it trigger view rewarming
pub const PRIMARY_DB: &str = "medic";

/// Database holding user documents
pub const USERS_DB: &str = "_users";

/// Prefix of user document ids in the users database
pub const USER_DOC_PREFIX: &str = "org.couchdb.user:";

/// Path of the user info API
pub const USERS_INFO_PATH: &str = "/api/v1/users-info";

/// Views queried after each purge of the primary database, as (design doc, view)
pub const REWARM_VIEWS: [(&str, &str); 2] = [
    ("medic", "contacts_by_depth"),
    ("medic-client", "contacts_by_last_visited"),
];

// ============================================================================
// Timeout Constants (in seconds)
// ============================================================================

/// Default HTTP request timeout
pub const HTTP_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Input Constants
// ============================================================================

/// Header lines of input files start with this prefix
pub const INPUT_HEADER_PREFIX: &str = "uuid,";

/// Query parameter prefixes whose values are always JSON encoded
pub const JSON_PARAM_PREFIXES: [&str; 3] = ["start", "end", "doc_ids"];
