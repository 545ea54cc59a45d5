//! Consul HTTP KV client.
//!
//! # Responsibilities
//! - Single-key reads (`GET /v1/kv/<key>`)
//! - Recursive listings (`?recurse`) and blocking queries (`?index=&wait=`)
//! - Writes for tooling (`PUT /v1/kv/<key>`)
//!
//! Values arrive base64-encoded; the entry version is its `ModifyIndex` and
//! the listing index comes from the `X-Consul-Index` header.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::kv::{KvError, KvListing, KvPair, KvResult, KvStore};

const INDEX_HEADER: &str = "x-consul-index";

/// Extra time granted on top of the server-side wait before giving up.
const WAIT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulEntry {
    key: String,
    value: Option<String>,
    modify_index: u64,
}

impl ConsulEntry {
    fn into_pair(self) -> KvResult<KvPair> {
        let value = match self.value {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| KvError::Decode(format!("value of '{}': {}", self.key, e)))?,
            None => Vec::new(),
        };
        Ok(KvPair {
            key: self.key,
            value,
            version: self.modify_index,
        })
    }
}

/// KV client for a Consul agent.
#[derive(Clone)]
pub struct ConsulKv {
    client: Client,
    base: Url,
    request_timeout: Duration,
}

impl ConsulKv {
    /// Create a client for the agent at `address` ("host:port" or a full URL).
    pub fn new(address: &str, request_timeout: Duration) -> KvResult<Self> {
        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let mut base: Url = with_scheme
            .parse()
            .map_err(|_| KvError::InvalidAddress(address.to_string()))?;
        if base.cannot_be_a_base() || base.host_str().is_none() {
            return Err(KvError::InvalidAddress(address.to_string()));
        }
        // `join` replaces the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            base,
            request_timeout,
        })
    }

    /// Agent base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn key_url(&self, key: &str) -> KvResult<Url> {
        self.base
            .join(&format!("v1/kv/{}", key.trim_start_matches('/')))
            .map_err(|_| KvError::InvalidAddress(format!("{}v1/kv/{}", self.base, key)))
    }

    /// Write a raw value under `key`.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<()> {
        let response = self
            .client
            .put(self.key_url(key)?)
            .timeout(self.request_timeout)
            .body(value)
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(KvError::Unavailable(format!(
                "PUT {} returned {}",
                key,
                response.status()
            )));
        }
        Ok(())
    }

    async fn fetch_listing(&self, prefix: &str, query: &[(&str, String)], timeout: Duration) -> KvResult<KvListing> {
        let response = self
            .client
            .get(self.key_url(prefix)?)
            .query(&[("recurse", "true")])
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(unavailable)?;

        let last_index = index_header(&response)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(KvListing {
                pairs: Vec::new(),
                last_index,
            });
        }

        let pairs = decode_entries(response).await?;
        Ok(KvListing { pairs, last_index })
    }
}

fn unavailable(e: reqwest::Error) -> KvError {
    KvError::Unavailable(e.to_string())
}

fn index_header(response: &Response) -> KvResult<u64> {
    match response.headers().get(INDEX_HEADER) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| KvError::Decode(format!("bad {} header", INDEX_HEADER))),
        None => Ok(0),
    }
}

async fn decode_entries(response: Response) -> KvResult<Vec<KvPair>> {
    let status = response.status();
    if !status.is_success() {
        return Err(KvError::Unavailable(format!("store returned {}", status)));
    }

    let entries: Vec<ConsulEntry> = response
        .json()
        .await
        .map_err(|e| KvError::Decode(e.to_string()))?;
    entries.into_iter().map(ConsulEntry::into_pair).collect()
}

#[async_trait]
impl KvStore for ConsulKv {
    async fn get(&self, key: &str) -> KvResult<Option<KvPair>> {
        let response = self
            .client
            .get(self.key_url(key)?)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(unavailable)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let pairs = decode_entries(response).await?;
        Ok(pairs.into_iter().find(|pair| pair.key == key))
    }

    async fn list(&self, prefix: &str) -> KvResult<KvListing> {
        self.fetch_listing(prefix, &[], self.request_timeout).await
    }

    async fn list_wait(&self, prefix: &str, from_index: u64, wait: Duration) -> KvResult<KvListing> {
        let query = [
            ("index", from_index.to_string()),
            ("wait", format!("{}s", wait.as_secs().max(1))),
        ];
        self.fetch_listing(prefix, &query, wait + WAIT_GRACE).await
    }
}
