//! Owner secret export
//!
//! Writes owner1's private key, mnemonic, and the account address to a
//! user-chosen location. Fire-and-forget from the orchestration flow:
//! a failed export is logged, never fatal.

use crate::crypto::OwnerKeyPair;
use crate::storage::StorageError;
use ethers_core::types::Address;
use ethers_core::utils::to_checksum;
use std::fs;
use std::path::{Path, PathBuf};

/// Default export file name, matching what users of the desktop flow expect
pub const DEFAULT_EXPORT_FILE: &str = "safe-key-and-address.txt";

/// Writes owner secrets and the account address to disk
pub struct SecretExporter {
    path: PathBuf,
}

impl SecretExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Export into a directory using the default file name
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(DEFAULT_EXPORT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write owner1's key material and the account address.
    ///
    /// The file contains a raw private key; the caller chooses where it
    /// lands and is responsible for that location.
    pub fn export(&self, owner: &OwnerKeyPair, account: Address) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut content = format!(
            "Private Key (Key 1):\n{}\n\nSafe Address:\n{}\n",
            owner.private_key_hex(),
            to_checksum(&account, None)
        );
        if !owner.mnemonic().is_empty() {
            content.push_str(&format!("\nMnemonic (Key 1):\n{}\n", owner.mnemonic()));
        }

        fs::write(&self.path, content)?;
        log::info!("owner key exported to {}", self.path.display());
        Ok(())
    }
}
