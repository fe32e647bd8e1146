//! TLS material for talking to the cluster.
//!
//! The same CA, client certificate, and key are used for the metadata
//! service and for the storage members.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tonic::transport::{Certificate, ClientTlsConfig, Identity};
use tracing::debug;

use crate::error::{MetaError, MetaResult};

/// Paths to PEM-encoded TLS material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// CA bundle used to verify servers. TLS is disabled when unset.
    pub ca_path: Option<PathBuf>,
    /// Client certificate for mutual TLS.
    pub cert_path: Option<PathBuf>,
    /// Private key matching `cert_path`.
    pub key_path: Option<PathBuf>,
    /// Override for the server name checked against certificates.
    pub domain_name: Option<String>,
}

impl SecurityConfig {
    /// Whether TLS should be used at all.
    pub fn is_enabled(&self) -> bool {
        self.ca_path.is_some()
    }

    /// Build a tonic client TLS config, or `None` for plaintext.
    pub fn load_tls(&self) -> MetaResult<Option<ClientTlsConfig>> {
        let Some(ca_path) = &self.ca_path else {
            return Ok(None);
        };

        let ca = read_pem(ca_path)?;
        let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca));

        match (&self.cert_path, &self.key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = read_pem(cert_path)?;
                let key = read_pem(key_path)?;
                tls = tls.identity(Identity::from_pem(cert, key));
            }
            (None, None) => {}
            _ => {
                return Err(MetaError::Tls(
                    "cert_path and key_path must be set together".to_string(),
                ));
            }
        }

        if let Some(domain) = &self.domain_name {
            tls = tls.domain_name(domain.clone());
        }

        debug!(ca = %ca_path.display(), mutual = self.cert_path.is_some(), "loaded tls config");
        Ok(Some(tls))
    }
}

fn read_pem(path: &Path) -> MetaResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| MetaError::Tls(format!("read {}: {e}", path.display())))
}
