//! Blocking HTTP client for peer blob transfer

use crate::model::Hash;
use crate::{Error, Result};
use reqwest::blocking::{Body, Client, Response};
use reqwest::StatusCode;
use std::fs::File;
use std::io::Read;
use std::time::Duration;

/// Header carrying the expected hash on internal uploads
pub const HASH_HEADER: &str = "X-Blob-Hash";

/// Peer client configuration
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig { timeout_secs: 60 }
    }
}

/// Result of sending a blob to a peer
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    /// The peer stored the blob
    Stored,
    /// The peer already had it
    AlreadyPresent,
}

/// Streams blobs to and from peers' internal endpoints
#[derive(Clone, Debug, Default)]
pub struct PeerClient {
    config: PeerConfig,
}

/// A streaming blob body fetched from a peer
pub struct Fetched {
    response: Response,
}

impl Read for Fetched {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.response.read(buf)
    }
}

impl PeerClient {
    pub fn new(config: PeerConfig) -> Self {
        PeerClient { config }
    }

    /// Built per transfer: a blocking client must never be dropped on an
    /// async executor thread.
    fn client(&self) -> Result<Client> {
        Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))
    }

    /// Build the full URL for an endpoint on a peer
    fn url(peer: &str, path: &str) -> String {
        let base = peer.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}{}", base, path)
        } else {
            format!("http://{}{}", base, path)
        }
    }

    /// Open a peer's copy of a blob for streaming
    pub fn fetch(&self, peer: &str, hash: &Hash) -> Result<Fetched> {
        let url = Self::url(peer, &format!("/internal/blob/{}", hash.to_hex()));
        let response = self
            .client()?
            .get(&url)
            .send()
            .map_err(|e| Error::Http(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(Fetched { response }),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("{} on {}", hash, peer))),
            status => {
                let text = response.text().unwrap_or_default();
                Err(Error::Remote(format!(
                    "fetch {} from {} failed: {} - {}",
                    hash.short(),
                    peer,
                    status,
                    text.trim()
                )))
            }
        }
    }

    /// Upload a blob to a peer, announcing its hash so the peer can check it
    pub fn send(&self, peer: &str, hash: &Hash, file: File) -> Result<PushOutcome> {
        let url = Self::url(peer, "/internal/upload");
        let len = file.metadata()?.len();
        let response = self
            .client()?
            .post(&url)
            .header(HASH_HEADER, hash.to_hex())
            .header("Content-Type", "application/octet-stream")
            .body(Body::sized(file, len))
            .send()
            .map_err(|e| Error::Http(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(PushOutcome::Stored),
            StatusCode::CONFLICT => Ok(PushOutcome::AlreadyPresent),
            status => {
                let text = response.text().unwrap_or_default();
                Err(Error::Remote(format!(
                    "push {} to {} failed: {} - {}",
                    hash.short(),
                    peer,
                    status,
                    text.trim()
                )))
            }
        }
    }
}
