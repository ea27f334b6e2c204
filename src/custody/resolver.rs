//! Server owner key resolution
//!
//! Fetches the custody server's owner address with a bounded timeout and
//! falls back to a fixed, documented address when the server cannot be
//! reached. The fallback keeps setup available offline, but it is NOT the
//! custody server's real key — resolution therefore always carries a
//! provenance flag so callers can warn the user about degraded mode.

use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout for the custody server request
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Documented fallback owner address used when the custody server is
/// unreachable or returns a malformed response.
pub const FALLBACK_SERVER_OWNER: &str = "0x8626f6940E2eb28930eFb4CeF49B2d1F2C9C1199";

/// Where a resolved server owner address came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyProvenance {
    /// Fetched from the live custody server
    Live,
    /// Fixed fallback address; the custody server was not consulted
    /// successfully and must not be treated as holding this key
    Fallback,
}

/// A resolved server owner address plus its provenance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedOwner {
    pub address: Address,
    pub provenance: KeyProvenance,
}

impl ResolvedOwner {
    /// True when the address came from the live custody server
    pub fn is_live(&self) -> bool {
        self.provenance == KeyProvenance::Live
    }

    /// Classify an externally supplied server owner address. The
    /// documented fallback address is never live; anything else is taken
    /// at the caller's word.
    pub fn from_known_address(address: Address) -> Self {
        let fallback: Address = FALLBACK_SERVER_OWNER
            .parse()
            .unwrap_or_else(|_| Address::zero());
        let provenance = if address == fallback {
            KeyProvenance::Fallback
        } else {
            KeyProvenance::Live
        };
        Self {
            address,
            provenance,
        }
    }
}

#[derive(Deserialize)]
struct AddressBody {
    address: String,
}

/// Resolves the custody server's owner address
pub struct ServerKeyResolver {
    http: reqwest::Client,
    base_url: String,
    fallback: Address,
    timeout: Duration,
}

impl ServerKeyResolver {
    /// Create a resolver for the given custody server base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            fallback: FALLBACK_SERVER_OWNER
                .parse()
                .unwrap_or_else(|_| Address::zero()),
            timeout: RESOLVE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the server owner address.
    ///
    /// Never fails: timeout, non-2xx status, or a malformed body all
    /// degrade to the fallback address with `KeyProvenance::Fallback`.
    pub async fn resolve_server_owner(&self) -> ResolvedOwner {
        match self.fetch_address().await {
            Ok(address) => {
                log::info!("custody server owner resolved: {address:#x}");
                ResolvedOwner {
                    address,
                    provenance: KeyProvenance::Live,
                }
            }
            Err(reason) => {
                log::warn!(
                    "custody server unavailable ({reason}), using fallback owner {}",
                    FALLBACK_SERVER_OWNER
                );
                ResolvedOwner {
                    address: self.fallback,
                    provenance: KeyProvenance::Fallback,
                }
            }
        }
    }

    async fn fetch_address(&self) -> Result<Address, String> {
        let url = format!("{}/address", self.base_url.trim_end_matches('/'));
        // Bound is applied per request; a default client carries no
        // timeout of its own.
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        let body: AddressBody = response.json().await.map_err(|e| e.to_string())?;
        body.address
            .parse::<Address>()
            .map_err(|_| format!("malformed address {:?}", body.address))
    }
}
