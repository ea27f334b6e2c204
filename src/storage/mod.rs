//! Local persistence collaborators
//!
//! Both collaborators here are deliberately non-fatal to the account
//! lifecycle: a failed config patch or secret export is logged and
//! reported, never escalated.

pub mod config_store;
pub mod secret_export;

pub use config_store::{ConfigStore, StorageError};
pub use secret_export::SecretExporter;
