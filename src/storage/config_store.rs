//! Deployed-address config persistence
//!
//! Patches the deployed account address into a JSON config file consumed
//! by the external indexing service. Read-modify-write through a sibling
//! temp file plus rename, so a crash never leaves a half-written config.

use ethers_core::types::Address;
use ethers_core::utils::to_checksum;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config key the indexer reads the account address from
const ADDRESS_KEY: &str = "safe_address";

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Config root is not a JSON object: {0}")]
    InvalidConfig(PathBuf),
}

/// Patches deployment results into the external config surface
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the deployed account address, creating the config file if
    /// it does not exist and preserving all other keys if it does.
    pub fn set_deployed_address(&self, address: Address) -> Result<(), StorageError> {
        let mut root = self.load_or_default()?;
        root.insert(
            ADDRESS_KEY.to_string(),
            Value::String(to_checksum(&address, None)),
        );

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(&Value::Object(root))?)?;
        fs::rename(&tmp_path, &self.path)?;

        log::info!("deployed address written to {}", self.path.display());
        Ok(())
    }

    /// Read back the stored address, if any
    pub fn deployed_address(&self) -> Result<Option<Address>, StorageError> {
        let root = self.load_or_default()?;
        Ok(root
            .get(ADDRESS_KEY)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok()))
    }

    fn load_or_default(&self) -> Result<Map<String, Value>, StorageError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let raw = fs::read(&self.path)?;
        match serde_json::from_slice::<Value>(&raw)? {
            Value::Object(map) => Ok(map),
            _ => Err(StorageError::InvalidConfig(self.path.clone())),
        }
    }
}
