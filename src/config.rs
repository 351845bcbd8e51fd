//! Node configuration
//!
//! Stored as JSON. Every field has a default, so a config file only needs
//! the settings that differ.

use crate::digest::MAX_PREFIX_BITS;
use crate::store::ShardSchema;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Configuration for a store node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the sharded blobs
    pub data_dir: PathBuf,
    /// Directory holding the digest layer files
    pub cache_dir: PathBuf,
    /// fsync blobs and directories before publishing
    pub fsync: bool,
    /// Address the HTTP server binds to
    pub listen: SocketAddr,
    /// Bits per shard directory level
    pub shard_bits: Vec<u8>,
    /// Number of digest layers
    pub digest_layers: u32,
    /// Prefix bits added by each digest layer
    pub digest_layer_bits: u32,
    /// Peer base URLs
    pub peers: Vec<String>,
    /// Timeout for peer transfers
    pub peer_timeout_secs: u64,
    /// Push newly uploaded blobs to every peer
    pub replicate_uploads: bool,
    /// Expose debug endpoints
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data"),
            cache_dir: PathBuf::from("cache"),
            fsync: false,
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            shard_bits: vec![8, 8],
            digest_layers: 6,
            digest_layer_bits: 4,
            peers: Vec::new(),
            peer_timeout_secs: 60,
            replicate_uploads: false,
            debug: false,
        }
    }
}

impl Config {
    /// Load a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the given config file, or defaults when none is given
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Save as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The shard schema described by `shard_bits`
    pub fn schema(&self) -> Result<ShardSchema> {
        ShardSchema::new(self.shard_bits.clone())
    }

    /// Reject settings the stores cannot be opened with
    pub fn validate(&self) -> Result<()> {
        self.schema()?;
        if self.digest_layers == 0 {
            return Err(Error::Config("digest_layers must be at least 1".into()));
        }
        if self.digest_layer_bits == 0 || self.digest_layer_bits > MAX_PREFIX_BITS {
            return Err(Error::Config(format!(
                "digest_layer_bits must be within 1..={}",
                MAX_PREFIX_BITS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.shard_bits, vec![8, 8]);
        assert_eq!(c.digest_layers, 6);
        assert_eq!(c.digest_layer_bits, 4);
        assert!(!c.fsync);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"fsync": true, "peers": ["10.0.0.2:8080"]}"#).unwrap();

        let c = Config::load(&path).unwrap();
        assert!(c.fsync);
        assert_eq!(c.peers, vec!["10.0.0.2:8080".to_string()]);
        assert_eq!(c.digest_layers, 6);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let c = Config {
            shard_bits: vec![4, 4, 4],
            debug: true,
            ..Config::default()
        };
        c.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), c);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let empty_schema = Config {
            shard_bits: vec![],
            ..Config::default()
        };
        assert!(matches!(empty_schema.validate(), Err(Error::Config(_))));

        let no_layers = Config {
            digest_layers: 0,
            ..Config::default()
        };
        assert!(matches!(no_layers.validate(), Err(Error::Config(_))));

        let wide_layers = Config {
            digest_layer_bits: 40,
            ..Config::default()
        };
        assert!(wide_layers.validate().is_err());
    }
}
