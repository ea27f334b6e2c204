//! Remote custody server integration
//!
//! The third owner's private key lives on a custody server; only its
//! address-resolution endpoint is consumed here.

pub mod resolver;

pub use resolver::{KeyProvenance, ResolvedOwner, ServerKeyResolver, FALLBACK_SERVER_OWNER};
