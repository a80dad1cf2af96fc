// Store Client - HTTP client for the CouchDB-compatible document store
use crate::constants;
use crate::error::{is_not_found_error, HttpError};
use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use reqwest::header::ACCEPT;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// HTTP client for the document store.
///
/// Credentials are taken from the server URL once and sent only through the
/// `Authorization` header; every URL built by this client has them stripped.
pub struct StoreClient {
    client: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
}

impl StoreClient {
    pub fn new(server_url: &str) -> Result<Self> {
        Self::with_timeout(server_url, Duration::from_secs(constants::HTTP_TIMEOUT_SECS))
    }

    pub fn with_timeout(server_url: &str, timeout: Duration) -> Result<Self> {
        // Error messages must not echo the URL, it may carry a password
        let mut base_url = Url::parse(server_url).context("Invalid server URL")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Server URL must be an http(s) URL");
        }

        // The URL keeps userinfo percent-encoded, basic auth wants it raw
        let username = decode_userinfo(base_url.username())?;
        let password = decode_userinfo(base_url.password().unwrap_or_default())?;
        base_url.set_path("/");
        strip_credentials(&mut base_url);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(constants::user_agent())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            username,
            password,
        })
    }

    /// Server URL without credentials
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a URL for `path` with query parameters serialized per [`stringify_param`]
    pub fn url(&self, path: &str, params: &[(&str, Value)]) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        apply_params(&mut url, params);
        strip_credentials(&mut url);
        url
    }

    /// Build a document URL, percent-encoding the database and document id
    /// as single path segments
    pub fn doc_url(&self, database: &str, doc_id: &str, params: &[(&str, Value)]) -> Url {
        let mut url = self.base_url.clone();
        url.set_path("/");
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.clear().push(database).push(doc_id);
        }
        apply_params(&mut url, params);
        strip_credentials(&mut url);
        url
    }

    /// Execute a request and decode the JSON response.
    ///
    /// A non-2xx status fails with [`HttpError`], carrying the parsed error
    /// payload (or the raw body when it is not JSON).
    pub async fn execute<T, B>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            // Sets Content-Type: application/json
            request = request.json(body);
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, url))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?;

        if !status.is_success() {
            log::warn!(
                "{} {} error after {}ms",
                method,
                url,
                started.elapsed().as_millis()
            );
            let payload = sonic_rs::from_str::<Value>(&text).unwrap_or_else(|_| Value::String(text));
            return Err(HttpError::new(
                status.as_u16(),
                status.canonical_reason().unwrap_or_default(),
                payload,
            )
            .into());
        }

        log::debug!(
            "{} {} -> {} in {}ms ({} bytes)",
            method,
            url,
            status.as_u16(),
            started.elapsed().as_millis(),
            text.len()
        );

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        sonic_rs::from_str(text).with_context(|| format!("Failed to parse response JSON from {}", url))
    }

    pub async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        self.execute::<T, Value>(Method::GET, url, None).await
    }

    pub async fn post<T, B>(&self, url: Url, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.execute(Method::POST, url, Some(body)).await
    }

    /// Fetch a document (optionally at a specific revision) with inline attachments.
    ///
    /// Returns `None` when the store answers 404.
    pub async fn get_doc(&self, database: &str, doc_id: &str, rev: Option<&str>) -> Result<Option<Value>> {
        let mut params = vec![("attachments", json!(true))];
        if let Some(rev) = rev {
            params.push(("rev", json!(rev)));
        }
        let url = self.doc_url(database, doc_id, &params);

        match self.get::<Value>(url).await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if is_not_found_error(&e) => {
                log::debug!("{}/{} (rev {:?}) not found", database, doc_id, rev);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Serialize a query parameter value.
///
/// Values of parameters named `start*`, `end*` or `doc_ids*`, and any array
/// value, are JSON encoded; everything else is sent as plain text. `null`
/// values outside the JSON-encoded set are omitted.
pub fn stringify_param(key: &str, value: &Value) -> Option<String> {
    if constants::JSON_PARAM_PREFIXES.iter().any(|prefix| key.starts_with(prefix)) || value.is_array() {
        return Some(value.to_string());
    }
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn apply_params(url: &mut Url, params: &[(&str, Value)]) {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    for (key, value) in params {
        let Some(value) = stringify_param(key, value) else {
            continue;
        };
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value,
            None => pairs.push((key.to_string(), value)),
        }
    }

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }
}

fn strip_credentials(url: &mut Url) {
    // Only fails for URLs that cannot carry credentials in the first place
    let _ = url.set_username("");
    let _ = url.set_password(None);
}

fn decode_userinfo(raw: &str) -> Result<String> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .context("Server URL credentials are not valid UTF-8")?;
    Ok(decoded.into_owned())
}
