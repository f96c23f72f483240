//! TLS termination with ClientHello-driven certificate selection.
//!
//! # Responsibilities
//! - Load certificate/key pairs from PEM files
//! - Sniff the ClientHello, pick a certificate by server name
//! - Replay the sniffed bytes into the rustls handshake
//!
//! # Design Decisions
//! - Fails closed: a malformed ClientHello, an unknown server name without a
//!   default certificate, or an `acme-tls/1` handshake drops the connection
//! - Certificates are loaded once; rotating them requires a restart

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::config::schema::TlsConfig;
use crate::io::Rewind;
use crate::observability::metrics;
use crate::tls::{sniff, ClientHello, SniffError};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to load certificate: {0}")]
    Load(std::io::Error),

    #[error(transparent)]
    Sniff(#[from] SniffError),

    /// ACME TLS-ALPN-01 validation is not served by this listener.
    #[error("refusing acme-tls/1 handshake")]
    AcmeRefused,

    #[error("no certificate for server name {0:?}")]
    UnknownServerName(Option<String>),

    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),

    #[error("TLS handshake not completed within {0:?}")]
    Timeout(Duration),
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }
    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Certificates keyed by lower-cased server name, plus an optional default.
#[derive(Clone, Default)]
pub struct CertificateStore {
    by_name: HashMap<String, RustlsConfig>,
    default: Option<RustlsConfig>,
}

impl CertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every certificate named in the listener's TLS section.
    pub async fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let mut store = Self::new();
        for cert in &config.certificates {
            let rustls = load_tls_config(Path::new(&cert.cert_path), Path::new(&cert.key_path))
                .await
                .map_err(TlsError::Load)?;
            store.insert(cert.server_name.as_deref(), rustls);
        }
        tracing::info!(
            names = store.by_name.len(),
            has_default = store.default.is_some(),
            "Certificates loaded"
        );
        Ok(store)
    }

    /// Register a certificate. `None` sets the default.
    pub fn insert(&mut self, server_name: Option<&str>, config: RustlsConfig) {
        match server_name {
            Some(name) => {
                self.by_name.insert(name.to_ascii_lowercase(), config);
            }
            None => self.default = Some(config),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty() && self.default.is_none()
    }

    /// Acceptor for `server_name`, falling back to the default certificate.
    pub fn acceptor_for(&self, server_name: Option<&str>) -> Option<TlsAcceptor> {
        let config = server_name
            .and_then(|name| self.by_name.get(&name.to_ascii_lowercase()))
            .or(self.default.as_ref())?;
        Some(TlsAcceptor::from(config.get_inner()))
    }

    /// Pick the acceptor a ClientHello should be served with.
    pub fn select(&self, hello: &ClientHello) -> Result<TlsAcceptor, TlsError> {
        if hello.is_acme_tls() {
            return Err(TlsError::AcmeRefused);
        }
        let server_name = hello.server_name();
        self.acceptor_for(server_name)
            .ok_or_else(|| TlsError::UnknownServerName(server_name.map(str::to_string)))
    }

    /// Sniff the ClientHello on `stream` and complete the TLS handshake.
    pub async fn accept<S>(&self, mut stream: S) -> Result<(TlsStream<Rewind<S>>, ClientHello), TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (hello, consumed) = match sniff(&mut stream).await {
            Ok(sniffed) => sniffed,
            Err(e) => {
                metrics::record_tls_sniff("error");
                return Err(e.into());
            }
        };

        let acceptor = match self.select(&hello) {
            Ok(acceptor) => acceptor,
            Err(e) => {
                metrics::record_tls_sniff(match e {
                    TlsError::AcmeRefused => "acme_refused",
                    _ => "unknown_sni",
                });
                return Err(e);
            }
        };
        metrics::record_tls_sniff("ok");
        tracing::debug!(
            server_name = hello.server_name().unwrap_or("-"),
            alpn = ?hello.alpn_protocols(),
            version = %hello.version,
            "ClientHello sniffed"
        );

        let tls = acceptor
            .accept(Rewind::new(consumed, stream))
            .await
            .map_err(TlsError::Handshake)?;
        Ok((tls, hello))
    }
}

impl CertificateStore {
    /// [`accept`](Self::accept), giving up if the client has not finished the
    /// handshake within `limit`.
    pub async fn accept_within<S>(
        &self,
        stream: S,
        limit: Duration,
    ) -> Result<(TlsStream<Rewind<S>>, ClientHello), TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match tokio::time::timeout(limit, self.accept(stream)).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_tls_sniff("timeout");
                Err(TlsError::Timeout(limit))
            }
        }
    }
}

impl std::fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateStore")
            .field("names", &self.by_name.keys().collect::<Vec<_>>())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}
