//! Loading of the TLS trust anchor and macaroon that authenticate a
//! connection to tapd.

use std::path::Path;

use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::transport::{Certificate, ClientTlsConfig};
use tonic::{Request, Status};

use crate::error::CredentialError;
use crate::macaroon::Macaroon;

/// The metadata key tapd and lnd read macaroons from.
pub const MACAROON_METADATA_KEY: &str = "macaroon";

/// An unset path and an empty path both mean "not configured".
fn configured(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

fn read_credential_file(path: &Path) -> Result<Vec<u8>, CredentialError> {
    std::fs::read(path).map_err(|source| CredentialError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Build the client TLS settings.
///
/// Without a certificate path the system trust store is used. With one,
/// the file must hold at least one PEM certificate and becomes the only
/// trust anchor.
pub fn load_tls_config(path: Option<&Path>) -> Result<ClientTlsConfig, CredentialError> {
    let Some(path) = configured(path) else {
        tracing::debug!("no tls certificate configured, using native roots");
        return Ok(ClientTlsConfig::new().with_native_roots());
    };

    let pem = read_credential_file(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice()).map_err(|source| {
        CredentialError::Pem {
            path: path.to_path_buf(),
            source,
        }
    })?;
    if certs.is_empty() {
        return Err(CredentialError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    tracing::debug!(path = %path.display(), count = certs.len(), "loaded tls certificates");

    Ok(ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem)))
}

/// Read and decode a macaroon file. No path means no per-call credential.
pub fn load_macaroon(path: Option<&Path>) -> Result<Option<MacaroonCredential>, CredentialError> {
    let Some(path) = configured(path) else {
        return Ok(None);
    };

    let bytes = read_credential_file(path)?;
    let macaroon = Macaroon::from_binary(&bytes).map_err(|source| CredentialError::Macaroon {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), caveats = macaroon.caveats().len(), "loaded macaroon");

    MacaroonCredential::new(macaroon).map(Some)
}

/// A macaroon rendered into the header value sent with every call.
#[derive(Clone, Debug)]
pub struct MacaroonCredential {
    macaroon: Macaroon,
    header: MetadataValue<Ascii>,
}

impl MacaroonCredential {
    /// Wrap a macaroon. The header value is the hex of its binary encoding.
    pub fn new(macaroon: Macaroon) -> Result<Self, CredentialError> {
        let header = MetadataValue::try_from(hex::encode(macaroon.to_binary()))?;
        Ok(Self { macaroon, header })
    }

    /// The wrapped macaroon.
    pub fn macaroon(&self) -> &Macaroon {
        &self.macaroon
    }

    /// The value attached under [`MACAROON_METADATA_KEY`].
    pub fn header(&self) -> &MetadataValue<Ascii> {
        &self.header
    }
}

/// Attaches the macaroon, if any, to every outgoing request.
#[derive(Clone, Debug, Default)]
pub struct MacaroonInterceptor {
    header: Option<MetadataValue<Ascii>>,
}

impl MacaroonInterceptor {
    /// An interceptor for an optional credential.
    pub fn new(credential: Option<&MacaroonCredential>) -> Self {
        Self {
            header: credential.map(|c| c.header.clone()),
        }
    }
}

impl Interceptor for MacaroonInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(header) = &self.header {
            request
                .metadata_mut()
                .insert(MACAROON_METADATA_KEY, header.clone());
        }
        Ok(request)
    }
}
