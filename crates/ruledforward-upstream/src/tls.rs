//! TLS client configuration for `tls://` upstreams.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::UpstreamError;

/// TLS settings for a proxy: optional CA bundle, optional client
/// certificate, optional SNI override.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// CA bundle (PEM). When absent, the webpki root store is used.
    pub ca: Option<PathBuf>,
    /// Client certificate chain + key (PEM).
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    /// SNI / certificate name. When absent, the upstream host is used.
    pub server_name: Option<String>,
}

/// A ready-to-use connector with its resolved server name.
#[derive(Clone)]
pub struct TlsClient {
    pub connector: TlsConnector,
    pub server_name: ServerName<'static>,
}

impl TlsClient {
    /// Build a connector for an upstream `host` from the given options.
    pub fn new(options: &TlsOptions, host: &str) -> Result<Self, UpstreamError> {
        let roots = match &options.ca {
            Some(path) => load_roots(path)?,
            None => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                roots
            }
        };

        let builder = ClientConfig::builder().with_root_certificates(roots);
        let config = match (&options.cert, &options.key) {
            (Some(cert), Some(key)) => {
                let certs = load_certs(cert)?;
                let key = load_key(key)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| UpstreamError::Tls(format!("client cert: {e}")))?
            }
            _ => builder.with_no_client_auth(),
        };

        let name = options.server_name.as_deref().unwrap_or(host);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|_| UpstreamError::Tls(format!("invalid server name: {name}")))?;

        Ok(TlsClient {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }
}

impl std::fmt::Debug for TlsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsClient")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

fn load_roots(path: &Path) -> Result<RootCertStore, UpstreamError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| UpstreamError::Tls(format!("{}: {e}", path.display())))?;
    }
    Ok(roots)
}

fn load_certs(
    path: &Path,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, UpstreamError> {
    let data = std::fs::read(path)?;
    rustls_pemfile::certs(&mut data.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| UpstreamError::Tls(format!("{}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>, UpstreamError> {
    let data = std::fs::read(path)?;
    rustls_pemfile::private_key(&mut data.as_slice())
        .map_err(|e| UpstreamError::Tls(format!("{}: {e}", path.display())))?
        .ok_or_else(|| UpstreamError::Tls(format!("{}: no private key found", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roots_and_sni() {
        let client = TlsClient::new(&TlsOptions::default(), "dns.example.net").unwrap();
        assert!(matches!(client.server_name, ServerName::DnsName(_)));
    }

    #[test]
    fn server_name_override() {
        let options = TlsOptions {
            server_name: Some("override.example.net".into()),
            ..Default::default()
        };
        let client = TlsClient::new(&options, "9.9.9.9").unwrap();
        assert!(matches!(client.server_name, ServerName::DnsName(_)));
    }

    #[test]
    fn ip_host_is_a_valid_server_name() {
        let client = TlsClient::new(&TlsOptions::default(), "9.9.9.9").unwrap();
        assert!(matches!(client.server_name, ServerName::IpAddress(_)));
    }

    #[test]
    fn missing_ca_file_is_an_error() {
        let options = TlsOptions {
            ca: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        assert!(TlsClient::new(&options, "host").is_err());
    }
}
