//! Dialing tapd and owning the resulting channel.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Uri;
use tokio::sync::RwLock;
use tonic::body::BoxBody;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tower::{Service, ServiceExt};

use crate::credentials::{load_macaroon, load_tls_config, MacaroonCredential};
use crate::error::{ConnectionError, CredentialError};
use crate::MAX_GRPC_MSG_SIZE;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything needed to open a channel besides the address: transport
/// security, the inbound message limit, and the per-call credential.
#[derive(Clone, Debug)]
pub struct DialOptions {
    /// Trust settings for the TLS handshake.
    pub tls: ClientTlsConfig,
    /// Largest message accepted from the server.
    pub max_recv_msg_size: usize,
    /// Attached to every call when present.
    pub macaroon: Option<MacaroonCredential>,
}

impl DialOptions {
    /// Options with the default message limit and no macaroon.
    pub fn new(tls: ClientTlsConfig) -> Self {
        Self {
            tls,
            max_recv_msg_size: MAX_GRPC_MSG_SIZE,
            macaroon: None,
        }
    }

    /// Load the credential files, either of which may be unset.
    pub fn load(
        tls_path: Option<&Path>,
        mac_path: Option<&Path>,
    ) -> Result<Self, CredentialError> {
        let mut options = Self::new(load_tls_config(tls_path)?);
        if let Some(macaroon) = load_macaroon(mac_path)? {
            options = options.with_macaroon(macaroon);
        }
        Ok(options)
    }

    /// Attach a per-call credential.
    pub fn with_macaroon(mut self, macaroon: MacaroonCredential) -> Self {
        self.macaroon = Some(macaroon);
        self
    }

    /// Override the inbound message limit.
    pub fn with_max_recv_msg_size(mut self, max_recv_msg_size: usize) -> Self {
        self.max_recv_msg_size = max_recv_msg_size;
        self
    }
}

/// The connector, containing the URI to connect to.
#[derive(Clone, Debug)]
pub struct TapConnector {
    uri: Uri,
}

impl TapConnector {
    /// Compose `https://host:port`.
    pub fn new(host: &str, port: u16) -> Result<Self, ConnectionError> {
        let address = format!("{host}:{port}");
        let uri = format!("https://{address}")
            .parse::<Uri>()
            .map_err(|source| ConnectionError::InvalidAddress { address, source })?;
        Ok(Self { uri })
    }

    /// The URI to connect to
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Open one channel. There is no retry: the daemon is expected to be up.
    pub async fn dial(&self, options: &DialOptions) -> Result<TapChannel, ConnectionError> {
        let dial_error = |source| ConnectionError::Dial {
            uri: self.uri.clone(),
            source,
        };
        tracing::info!(uri = %self.uri, "dialing tapd");
        let channel = Endpoint::from(self.uri.clone())
            .tls_config(options.tls.clone())
            .map_err(dial_error)?
            .connect()
            .await
            .map_err(dial_error)?;
        Ok(TapChannel::new(channel))
    }
}

/// A tonic channel that can be closed exactly once.
///
/// Clones share the underlying connection. After [`TapChannel::close`] every
/// call fails with [`ConnectionError::Closed`] rather than reconnecting.
#[derive(Clone, Debug)]
pub struct TapChannel {
    inner: Arc<RwLock<Option<Channel>>>,
}

impl TapChannel {
    /// Take ownership of a connected channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(channel))),
        }
    }

    /// Release the connection. Closing twice is an error.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        match self.inner.write().await.take() {
            Some(_channel) => Ok(()),
            None => Err(ConnectionError::AlreadyClosed),
        }
    }

    /// Whether [`TapChannel::close`] has run.
    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.is_none()
    }
}

impl Service<http::Request<BoxBody>> for TapChannel {
    type Response = <Channel as Service<http::Request<BoxBody>>>::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // readiness is checked on the inner channel once a request is issued
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<BoxBody>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            let channel = inner.read().await.clone().ok_or(ConnectionError::Closed)?;
            Ok(channel.oneshot(request).await?)
        })
    }
}
