//! rustls-backed [`Connector`] authenticating with a client certificate.
//!
//! Certificate material is re-read on every connect, so a rotated PEM file is
//! picked up by the next reconnect without rebuilding the client. The
//! platform trust store is loaded once per connector.

use async_trait::async_trait;
use rustls::{
    ClientConfig, RootCertStore,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{net::TcpStream, sync::OnceCell, task, time::timeout};
use tokio_rustls::{TlsConnector as RustlsConnector, client::TlsStream};
use tracing::{debug, info, instrument};

use super::{Connector, Endpoint, private_key::parse_private_key};
use crate::{error::GatewayError, settings::GatewayConfig};

/// Where the client identity and trust anchors come from.
#[derive(Debug, Clone, Default)]
pub struct TlsCredentials {
    /// PEM file holding the client certificate, and the key unless
    /// `private_key_path` is set.
    pub certificate_path: Option<PathBuf>,
    pub private_key_path: Option<PathBuf>,
    pub passphrase: Option<String>,
    /// Trust anchors for the gateway. The platform store when unset.
    pub ca_certificate_path: Option<PathBuf>,
}

/// Client certificate and key read from disk, plus the configured CA roots.
struct LoadedIdentity {
    certificates: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    ca_roots: Option<RootCertStore>,
}

pub struct TlsConnector {
    credentials: TlsCredentials,
    connect_timeout: Duration,
    platform_roots: OnceCell<Arc<RootCertStore>>,
}

impl TlsConnector {
    pub fn new(credentials: TlsCredentials, connect_timeout: Duration) -> Self {
        Self {
            credentials,
            connect_timeout,
            platform_roots: OnceCell::new(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let credentials = TlsCredentials {
            certificate_path: config.certificate_path.clone(),
            private_key_path: config.private_key_path.clone(),
            passphrase: config.passphrase.clone(),
            ca_certificate_path: config.ca_certificate_path.clone(),
        };
        Self::new(credentials, config.connect_timeout())
    }

    /// Builds the rustls client configuration.
    ///
    /// Certificate and key files are read on a blocking thread on every call.
    /// The platform trust store is loaded once and reused.
    pub async fn client_config(&self) -> Result<Arc<ClientConfig>, GatewayError> {
        let credentials = self.credentials.clone();
        let identity = task::spawn_blocking(move || load_identity(&credentials))
            .await
            .map_err(|err| GatewayError::Io(io::Error::other(err)))??;

        let roots = match identity.ca_roots {
            Some(ca_roots) => Arc::new(ca_roots),
            None => self.platform_roots().await?,
        };

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|err| GatewayError::Configuration(err.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(identity.certificates, identity.private_key)
            .map_err(|err| {
                GatewayError::Configuration(format!("unusable client certificate: {err}"))
            })?;

        Ok(Arc::new(config))
    }

    async fn platform_roots(&self) -> Result<Arc<RootCertStore>, GatewayError> {
        self.platform_roots
            .get_or_try_init(|| async {
                task::spawn_blocking(load_platform_roots)
                    .await
                    .map_err(|err| GatewayError::Io(io::Error::other(err)))?
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Stream = TlsStream<TcpStream>;

    #[instrument(skip_all, fields(endpoint = %endpoint))]
    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Stream, GatewayError> {
        let client_config = self.client_config().await?;
        let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|err| {
            GatewayError::Configuration(format!("invalid gateway host {}: {err}", endpoint.host))
        })?;

        let handshake = async {
            let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
            RustlsConnector::from(client_config)
                .connect(server_name, tcp)
                .await
        };

        let stream = timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| GatewayError::connection(endpoint, "timed out"))?
            .map_err(|err| GatewayError::connection(endpoint, err))?;

        info!("connected to gateway");
        Ok(stream)
    }
}

fn load_identity(credentials: &TlsCredentials) -> Result<LoadedIdentity, GatewayError> {
    let certificate_path = credentials.certificate_path.as_deref().ok_or_else(|| {
        GatewayError::Configuration("no client certificate path configured".to_string())
    })?;

    let certificate_pem = read_pem_file(certificate_path)?;
    let certificates = parse_certificates(&certificate_pem)?;
    if certificates.is_empty() {
        return Err(GatewayError::Configuration(format!(
            "no certificate found in {}",
            certificate_path.display()
        )));
    }

    let passphrase = credentials.passphrase.as_deref();
    let private_key = match credentials.private_key_path.as_deref() {
        Some(key_path) => parse_private_key(&read_pem_file(key_path)?, passphrase)?,
        None => parse_private_key(&certificate_pem, passphrase)?,
    };

    let ca_roots = credentials
        .ca_certificate_path
        .as_deref()
        .map(load_ca_roots)
        .transpose()?;

    Ok(LoadedIdentity {
        certificates,
        private_key,
        ca_roots,
    })
}

fn load_ca_roots(ca_path: &Path) -> Result<RootCertStore, GatewayError> {
    let mut roots = RootCertStore::empty();
    for certificate in parse_certificates(&read_pem_file(ca_path)?)? {
        roots.add(certificate).map_err(|err| {
            GatewayError::Configuration(format!(
                "invalid CA certificate in {}: {err}",
                ca_path.display()
            ))
        })?;
    }
    Ok(roots)
}

fn load_platform_roots() -> Result<Arc<RootCertStore>, GatewayError> {
    let native = rustls_native_certs::load_native_certs().map_err(|err| {
        GatewayError::Configuration(format!("failed to load platform roots: {err}"))
    })?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native);
    debug!(added, ignored, "loaded platform trust anchors");
    Ok(Arc::new(roots))
}

fn read_pem_file(path: &Path) -> Result<Vec<u8>, GatewayError> {
    if !path.exists() {
        return Err(GatewayError::Configuration(format!(
            "{} does not exist",
            path.display()
        )));
    }

    fs::read(path).map_err(|err| {
        GatewayError::Configuration(format!("failed to read {}: {err}", path.display()))
    })
}

fn parse_certificates(pem_bytes: &[u8]) -> Result<Vec<CertificateDer<'static>>, GatewayError> {
    rustls_pemfile::certs(&mut &pem_bytes[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| GatewayError::Configuration(format!("invalid certificate PEM: {err}")))
}
