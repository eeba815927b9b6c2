//! Secret provisioning is an external collaborator a host process provides.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Provides the terminal's NTAG424 authentication key. Out of scope to
/// implement concretely (provisioning, rotation, storage) — this is the
/// seam the verifier calls through.
#[async_trait]
pub trait SecretsProvider: Send + Sync {
    /// Returns the 16-byte terminal key, or `NotFound` if the terminal has
    /// not yet been provisioned.
    async fn get_ntag_terminal_key(&self) -> Result<[u8; 16]>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;

    pub struct StaticSecrets {
        pub key: Option<[u8; 16]>,
    }

    impl StaticSecrets {
        pub fn provisioned(key: [u8; 16]) -> Self {
            StaticSecrets { key: Some(key) }
        }

        pub fn not_provisioned() -> Self {
            StaticSecrets { key: None }
        }
    }

    #[async_trait]
    impl SecretsProvider for StaticSecrets {
        async fn get_ntag_terminal_key(&self) -> Result<[u8; 16]> {
            self.key
                .ok_or_else(|| Error::not_found("terminal key not provisioned"))
        }
    }
}
