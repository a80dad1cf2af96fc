// Operator lookup: user document and the user info API
use crate::client::StoreClient;
use crate::constants;
use anyhow::{Context, Result};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct UserLookup {
    pub user_doc: Value,
    pub user_info: Value,
}

pub fn user_doc_id(user: &str) -> String {
    format!("{}{}", constants::USER_DOC_PREFIX, user)
}

/// Fetch a user's document, then query the user info API with its contact,
/// facility and roles
pub async fn lookup_user(client: &StoreClient, user: &str) -> Result<UserLookup> {
    let user_doc = client
        .get_doc(constants::USERS_DB, &user_doc_id(user), None)
        .await?
        .with_context(|| format!("User {} not found", user))?;

    let field = |name: &str| user_doc.get(name).cloned().unwrap_or(Value::Null);
    let params = [
        ("contact_id", field("contact_id")),
        ("facility_id", field("facility_id")),
        ("role", field("roles")),
    ];
    let url = client.url(constants::USERS_INFO_PATH, &params);
    let user_info = client
        .get(url)
        .await
        .with_context(|| format!("Failed to fetch user info for {}", user))?;

    Ok(UserLookup { user_doc, user_info })
}
