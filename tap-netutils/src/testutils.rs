//! An in-process tapd stand-in, served over TLS with the checked-in test
//! certificates, for exercising clients without a real daemon.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::StreamExt;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tonic::{Request, Response, Status};

use crate::assetwalletrpc::asset_wallet_server::{AssetWallet, AssetWalletServer};
use crate::assetwalletrpc::{NextInternalKeyRequest, NextInternalKeyResponse};
use crate::credentials::MACAROON_METADATA_KEY;
use crate::mintrpc::mint_server::{Mint, MintServer};
use crate::mintrpc::{ListBatchRequest, ListBatchResponse};
use crate::taprpc::taproot_assets_server::{TaprootAssets, TaprootAssetsServer};
use crate::taprpc::{
    GetInfoRequest, GetInfoResponse, KeyDescriptor, KeyLocator, ListAssetRequest,
    ListAssetResponse,
};
use crate::universerpc::universe_server::{Universe, UniverseServer};
use crate::universerpc::{InfoRequest, InfoResponse};
use crate::{DialOptions, TapTarget};

const LOCALHOST_CERT: &[u8] = include_bytes!("../test-data/localhost.pem");
const LOCALHOST_KEY: &[u8] = include_bytes!("../test-data/localhost.key");

/// Directory holding the test certificates.
pub fn test_data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test-data")
}

/// The CA that signed the mock server's certificate.
pub fn ca_cert_path() -> PathBuf {
    test_data_dir().join("ca.pem")
}

/// The mock server's certificate, issued for `localhost` and `127.0.0.1`.
pub fn localhost_cert_path() -> PathBuf {
    test_data_dir().join("localhost.pem")
}

/// The mock server's private key. Not a certificate.
pub fn localhost_key_path() -> PathBuf {
    test_data_dir().join("localhost.key")
}

/// Dial options that trust the mock server and carry no macaroon.
pub fn trusting_dial_options() -> DialOptions {
    DialOptions::load(Some(ca_cert_path().as_path()), None)
        .expect("checked-in test ca should load")
}

/// An ordered record of calls, shareable between several mock servers so
/// tests can assert on the interleaving across them.
#[derive(Clone, Debug, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    /// Append an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().expect("call log poisoned").push(entry.into());
    }

    /// Snapshot of the entries so far.
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("call log poisoned").clone()
    }

    /// How many entries equal `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.0
            .lock()
            .expect("call log poisoned")
            .iter()
            .filter(|e| *e == entry)
            .count()
    }
}

/// A fake tapd implementing every service a `TapClient` binds.
#[derive(Clone)]
pub struct MockTapd {
    name: String,
    log: CallLog,
    macaroons: Arc<Mutex<Vec<Option<String>>>>,
    get_info_failure: Option<String>,
    get_info_delay: Option<Duration>,
}

impl MockTapd {
    /// A healthy daemon whose calls are recorded as `"{name}:{Rpc}"` and
    /// whose accepted connections as `"{name}:connect"`.
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            log,
            macaroons: Arc::new(Mutex::new(Vec::new())),
            get_info_failure: None,
            get_info_delay: None,
        }
    }

    /// Make `GetInfo` fail with `UNAVAILABLE`.
    pub fn failing_get_info(mut self, message: impl Into<String>) -> Self {
        self.get_info_failure = Some(message.into());
        self
    }

    /// Make `GetInfo` wait `delay` before answering.
    pub fn stalling_get_info(mut self, delay: Duration) -> Self {
        self.get_info_delay = Some(delay);
        self
    }

    fn observe<T>(&self, rpc: &str, request: &Request<T>) {
        let macaroon = request
            .metadata()
            .get(MACAROON_METADATA_KEY)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.macaroons
            .lock()
            .expect("macaroon log poisoned")
            .push(macaroon);
        self.log.record(format!("{}:{rpc}", self.name));
    }

    /// Serve on an ephemeral localhost port until the handle is dropped.
    pub async fn spawn(self) -> std::io::Result<MockTapdHandle> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();
        let connections = Arc::new(AtomicUsize::new(0));
        let incoming = {
            let connections = connections.clone();
            let log = self.log.clone();
            let entry = format!("{}:connect", self.name);
            TcpListenerStream::new(listener).map(move |stream| {
                connections.fetch_add(1, Ordering::SeqCst);
                log.record(entry.clone());
                stream
            })
        };
        let (shutdown, signal) = oneshot::channel::<()>();
        let name = self.name.clone();
        let macaroons = self.macaroons.clone();

        let task = tokio::spawn(async move {
            Server::builder()
                .tls_config(
                    ServerTlsConfig::new().identity(Identity::from_pem(LOCALHOST_CERT, LOCALHOST_KEY)),
                )?
                .add_service(TaprootAssetsServer::new(self.clone()))
                .add_service(UniverseServer::new(self.clone()))
                .add_service(MintServer::new(self.clone()))
                .add_service(AssetWalletServer::new(self))
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = signal.await;
                })
                .await
        });

        Ok(MockTapdHandle {
            name,
            port,
            connections,
            macaroons,
            shutdown: Some(shutdown),
            task,
        })
    }
}

/// A running [`MockTapd`]. Dropping it stops the server.
pub struct MockTapdHandle {
    name: String,
    port: u16,
    connections: Arc<AtomicUsize>,
    macaroons: Arc<Mutex<Vec<Option<String>>>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl MockTapdHandle {
    /// The listening port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// A target naming the certificate's host.
    pub fn target(&self) -> TapTarget {
        TapTarget::new(self.name.clone(), "localhost", self.port)
    }

    /// Accepted TCP connections so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// The macaroon header of every call, in arrival order.
    pub fn macaroons(&self) -> Vec<Option<String>> {
        self.macaroons.lock().expect("macaroon log poisoned").clone()
    }
}

impl Drop for MockTapdHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.abort();
    }
}

#[tonic::async_trait]
impl TaprootAssets for MockTapd {
    async fn get_info(
        &self,
        request: Request<GetInfoRequest>,
    ) -> Result<Response<GetInfoResponse>, Status> {
        self.observe("GetInfo", &request);
        if let Some(delay) = self.get_info_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.get_info_failure {
            return Err(Status::unavailable(message.clone()));
        }
        Ok(Response::new(GetInfoResponse {
            version: "0.4.0-alpha commit=mock".to_string(),
            lnd_version: "0.18.0-beta".to_string(),
            network: "regtest".to_string(),
            lnd_identity_pubkey: "02".repeat(33),
            node_alias: self.name.clone(),
            block_height: 101,
            block_hash: "00".repeat(32),
            sync_to_chain: true,
        }))
    }

    async fn list_assets(
        &self,
        request: Request<ListAssetRequest>,
    ) -> Result<Response<ListAssetResponse>, Status> {
        self.observe("ListAssets", &request);
        Ok(Response::new(ListAssetResponse::default()))
    }
}

#[tonic::async_trait]
impl Universe for MockTapd {
    async fn info(&self, request: Request<InfoRequest>) -> Result<Response<InfoResponse>, Status> {
        self.observe("Info", &request);
        Ok(Response::new(InfoResponse { runtime_id: 42 }))
    }
}

#[tonic::async_trait]
impl Mint for MockTapd {
    async fn list_batches(
        &self,
        request: Request<ListBatchRequest>,
    ) -> Result<Response<ListBatchResponse>, Status> {
        self.observe("ListBatches", &request);
        Ok(Response::new(ListBatchResponse::default()))
    }
}

#[tonic::async_trait]
impl AssetWallet for MockTapd {
    async fn next_internal_key(
        &self,
        request: Request<NextInternalKeyRequest>,
    ) -> Result<Response<NextInternalKeyResponse>, Status> {
        let key_family = request.get_ref().key_family;
        self.observe("NextInternalKey", &request);
        Ok(Response::new(NextInternalKeyResponse {
            internal_key: Some(KeyDescriptor {
                raw_key_bytes: vec![2; 33],
                key_loc: Some(KeyLocator {
                    key_family: key_family as i32,
                    key_index: 0,
                }),
            }),
        }))
    }
}
