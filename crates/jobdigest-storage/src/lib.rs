//! HTTP fetch utilities and atomic JSON state files for the job digest.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobdigest-storage";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing state for {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads a JSON object of string values. A missing file, unreadable file, malformed JSON or a
/// non-object document all yield an empty map; non-string entries are dropped.
pub async fn load_string_map(path: impl AsRef<Path>) -> BTreeMap<String, String> {
    let path = path.as_ref();
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %err, "state file unreadable; treating as empty");
            }
            return BTreeMap::new();
        }
    };
    parse_string_map(&text)
}

pub fn parse_string_map(text: &str) -> BTreeMap<String, String> {
    let Ok(JsonValue::Object(object)) = serde_json::from_str::<JsonValue>(text) else {
        return BTreeMap::new();
    };
    object
        .into_iter()
        .filter_map(|(key, value)| match value {
            JsonValue::String(s) => Some((key, s)),
            _ => None,
        })
        .collect()
}

/// Writes `value` as pretty JSON via a temp file in the same directory and an atomic rename,
/// so readers never observe a half-written state file.
pub async fn write_json_atomic<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), StateError> {
    let path = path.as_ref();
    let io_err = |source| StateError::Io {
        path: path.display().to_string(),
        source,
    };
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StateError::Serialize {
        path: path.display().to_string(),
        source,
    })?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await.map_err(io_err)?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(io_err)?;
    let written = async {
        file.write_all(&bytes).await?;
        file.flush().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(io_err(err));
    }

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(io_err(err));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Sleep inserted between consecutive requests to the same source.
    pub politeness_delay: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            politeness_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid json from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Shared HTTP client. Requests are single-shot: a timeout or non-success status is returned
/// to the connector, which decides how much of its result survives.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    politeness_delay: Duration,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            politeness_delay: config.politeness_delay,
        })
    }

    pub fn politeness_delay(&self) -> Duration {
        self.politeness_delay
    }

    /// Politeness sleep between paginated or fanned-out requests to one source.
    pub async fn pause(&self) {
        if !self.politeness_delay.is_zero() {
            tokio::time::sleep(self.politeness_delay).await;
        }
    }

    pub async fn get_text(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        self.send_get(source_id, url, query, None).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let resp = self.send_get(source_id, url, query, None).await?;
        decode_json(&resp)
    }

    /// GET with HTTP basic auth (username, empty password), as used by key-in-username APIs.
    pub async fn get_json_basic_auth<T: DeserializeOwned>(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
        username: &str,
    ) -> Result<T, FetchError> {
        let resp = self.send_get(source_id, url, query, Some(username)).await?;
        decode_json(&resp)
    }

    async fn send_get(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
        basic_auth: Option<&str>,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url, method = "GET");
        async {
            let mut req = self.client.get(url).query(query);
            if let Some(username) = basic_auth {
                req = req.basic_auth(username, Some(""));
            }
            let resp = req.send().await?;
            Self::read_success(resp).await
        }
        .instrument(span)
        .await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        source_id: &str,
        url: &str,
        body: &B,
    ) -> Result<T, FetchError> {
        let span = info_span!("http_fetch", source_id, url, method = "POST");
        let resp = async {
            let resp = self.client.post(url).json(body).send().await?;
            Self::read_success(resp).await
        }
        .instrument(span)
        .await?;
        decode_json(&resp)
    }

    async fn read_success(resp: reqwest::Response) -> Result<FetchedResponse, FetchError> {
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = resp.text().await?;
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}

fn decode_json<T: DeserializeOwned>(resp: &FetchedResponse) -> Result<T, FetchError> {
    serde_json::from_str(&resp.body).map_err(|source| FetchError::Decode {
        url: resp.final_url.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn string_map_drops_non_string_entries() {
        let map = parse_string_map(r#"{"a": "1", "b": 2, "c": null, "d": "x"}"#);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a").map(String::as_str), Some("1"));
        assert_eq!(map.get("d").map(String::as_str), Some("x"));
    }

    #[test]
    fn string_map_tolerates_garbage_and_non_objects() {
        assert!(parse_string_map("{not json").is_empty());
        assert!(parse_string_map(r#"["a", "b"]"#).is_empty());
        assert!(parse_string_map("").is_empty());
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempdir().expect("tempdir");
        let map = load_string_map(dir.path().join("absent.json")).await;
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn atomic_write_round_trips_and_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");
        let mut state = BTreeMap::new();
        state.insert("last_run_date".to_string(), "2026-02-24".to_string());

        write_json_atomic(&path, &state).await.expect("write");
        write_json_atomic(&path, &state).await.expect("overwrite");

        assert_eq!(load_string_map(&path).await, state);
        let leftovers = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn write_into_unwritable_location_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let err = write_json_atomic(blocker.join("state.json"), &BTreeMap::<String, String>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Io { .. }));
    }
}
