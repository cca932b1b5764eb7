//! Shared test doubles: a JSON-RPC chain backend on hyper, and helpers that
//! stand up a whole loadtest environment in process.
#![allow(dead_code)]

use std::convert::Infallible;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tap_netutils::testutils::{self, CallLog, MockTapd, MockTapdHandle};
use tap_testutils::{BitcoinConfig, LoadTestConfig, TapConfig, UserConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

pub const RPC_USER: &str = "lightning";
pub const RPC_PASSWORD: &str = "lightning";
pub const BITCOIND_VERSION: u64 = 270000;

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_ADDRESS_OR_KEY: i64 = -5;

#[derive(Debug, Default)]
struct Chain {
    blocks: Vec<Value>,
    mempool: Vec<String>,
    generate_calls: usize,
    addresses: u64,
}

impl Chain {
    fn with_genesis() -> Self {
        let mut chain = Self::default();
        chain.push_block(vec![]);
        chain
    }

    fn tip_hash(&self) -> Option<String> {
        self.blocks
            .last()
            .and_then(|b| b["hash"].as_str())
            .map(str::to_string)
    }

    fn push_block(&mut self, mut txs: Vec<String>) -> String {
        let height = self.blocks.len() as u64;
        let hash = format!("{height:064x}");
        txs.insert(0, format!("{:064x}", u64::MAX - height));
        let mut block = json!({
            "hash": hash,
            "confirmations": 1,
            "height": height,
            "tx": txs,
        });
        if let Some(previous) = self.tip_hash() {
            block["previousblockhash"] = json!(previous);
        }
        self.blocks.push(block);
        hash
    }

    fn mine(&mut self, count: u64, include_mempool: bool) -> Vec<String> {
        self.generate_calls += 1;
        (0..count)
            .map(|i| {
                let txs = if i == 0 && include_mempool {
                    std::mem::take(&mut self.mempool)
                } else {
                    vec![]
                };
                self.push_block(txs)
            })
            .collect()
    }

    fn block(&self, hash: &str) -> Option<Value> {
        self.blocks.iter().find(|b| b["hash"] == hash).cloned()
    }
}

/// A fake bitcoind (or btcd) speaking just enough JSON-RPC for the fixture.
#[derive(Clone)]
pub struct MockBitcoind {
    log: CallLog,
    chain: Arc<Mutex<Chain>>,
    btcd: bool,
    include_mempool: bool,
    tls: bool,
}

/// Serves the checked-in `localhost` certificate over HTTP/1.1.
fn tls_acceptor() -> TlsAcceptor {
    let cert_pem = std::fs::read(testutils::localhost_cert_path()).unwrap();
    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .unwrap()
        .into_iter()
        .map(CertificateDer::from)
        .collect();
    let key_pem = std::fs::read(testutils::localhost_key_path()).unwrap();
    let key = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_slice())
        .unwrap()
        .pop()
        .expect("empty vec of private keys");

    let mut config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)))
        .unwrap();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    TlsAcceptor::from(Arc::new(config))
}

impl MockBitcoind {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            chain: Arc::new(Mutex::new(Chain::with_genesis())),
            btcd: false,
            include_mempool: true,
            tls: false,
        }
    }

    /// Answer like btcd: no `getnetworkinfo`, no wallet, `generate` works.
    pub fn btcd(mut self) -> Self {
        self.btcd = true;
        self
    }

    /// Mine blocks that leave the mempool untouched.
    pub fn ignoring_mempool(mut self) -> Self {
        self.include_mempool = false;
        self
    }

    /// Serve RPC over TLS with the `localhost` test certificate.
    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }

    pub async fn spawn(self) -> std::io::Result<MockBitcoindHandle> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();
        let chain = self.chain.clone();
        let tls = self.tls;
        let acceptor = self.tls.then(tls_acceptor);

        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    continue;
                };
                let server = self.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => {
                            // plaintext clients fail the handshake and are dropped
                            if let Ok(stream) = acceptor.accept(stream).await {
                                server.serve(stream).await;
                            }
                        }
                        None => server.serve(stream).await,
                    }
                });
            }
        });

        Ok(MockBitcoindHandle {
            port,
            chain,
            tls,
            task,
        })
    }

    async fn serve<IO>(self, io: IO)
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let service = service_fn(move |request| self.clone().handle(request));
        let _ = http1::Builder::new()
            .serve_connection(TokioIo::new(io), service)
            .await;
    }

    async fn handle(self, request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let expected = format!(
            "Basic {}",
            base64::encode(format!("{RPC_USER}:{RPC_PASSWORD}"))
        );
        let authorized = request
            .headers()
            .get(AUTHORIZATION)
            .is_some_and(|value| value.as_bytes() == expected.as_bytes());
        if !authorized {
            return Ok(respond(StatusCode::UNAUTHORIZED, Bytes::new()));
        }

        let body = match request.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => return Ok(respond(StatusCode::BAD_REQUEST, Bytes::new())),
        };
        let Ok(call) = serde_json::from_slice::<Value>(&body) else {
            return Ok(respond(StatusCode::BAD_REQUEST, Bytes::from_static(b"not json")));
        };
        let method = call["method"].as_str().unwrap_or_default().to_string();
        let params = call["params"].as_array().cloned().unwrap_or_default();
        self.log.record(format!("bitcoind:{method}"));

        let (status, envelope) = match self.dispatch(&method, &params) {
            Ok(result) => (
                StatusCode::OK,
                json!({ "result": result, "error": null, "id": call["id"] }),
            ),
            Err((code, message)) => (
                if code == METHOD_NOT_FOUND {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                },
                json!({
                    "result": null,
                    "error": { "code": code, "message": message },
                    "id": call["id"],
                }),
            ),
        };
        Ok(respond(status, Bytes::from(envelope.to_string())))
    }

    fn dispatch(&self, method: &str, params: &[Value]) -> Result<Value, (i64, String)> {
        let not_found = || Err((METHOD_NOT_FOUND, "Method not found".to_string()));
        let mut chain = self.chain.lock().unwrap();
        match method {
            "getnetworkinfo" if !self.btcd => Ok(json!({ "version": BITCOIND_VERSION })),
            "getnewaddress" if !self.btcd => {
                chain.addresses += 1;
                Ok(json!(format!("bcrt1qmock{}", chain.addresses)))
            }
            "generatetoaddress" if !self.btcd => {
                let count = params.first().and_then(Value::as_u64).unwrap_or(0);
                Ok(json!(chain.mine(count, self.include_mempool)))
            }
            "generate" if self.btcd => {
                let count = params.first().and_then(Value::as_u64).unwrap_or(0);
                Ok(json!(chain.mine(count, self.include_mempool)))
            }
            "getblock" => {
                let hash = params.first().and_then(Value::as_str).unwrap_or_default();
                chain
                    .block(hash)
                    .ok_or((INVALID_ADDRESS_OR_KEY, "Block not found".to_string()))
            }
            "getrawmempool" => Ok(json!(chain.mempool)),
            "getblockcount" => Ok(json!(chain.blocks.len() - 1)),
            "getbestblockhash" => Ok(json!(chain.tip_hash())),
            _ => not_found(),
        }
    }
}

fn respond(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, "application/json".parse().unwrap());
    response
}

/// A running [`MockBitcoind`]. Dropping it stops accepting connections.
pub struct MockBitcoindHandle {
    port: u16,
    chain: Arc<Mutex<Chain>>,
    tls: bool,
    task: JoinHandle<()>,
}

impl MockBitcoindHandle {
    /// Connection settings, trusting the test CA when serving TLS.
    pub fn config(&self) -> BitcoinConfig {
        BitcoinConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            user: RPC_USER.to_string(),
            password: RPC_PASSWORD.to_string(),
            tls_path: self.tls.then(testutils::ca_cert_path),
        }
    }

    pub fn add_to_mempool(&self, txid: impl Into<String>) {
        self.chain.lock().unwrap().mempool.push(txid.into());
    }

    /// Block-producing RPCs served so far.
    pub fn generate_calls(&self) -> usize {
        self.chain.lock().unwrap().generate_calls
    }

    pub fn height(&self) -> u64 {
        self.chain.lock().unwrap().blocks.len() as u64 - 1
    }
}

impl Drop for MockBitcoindHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Accepts TCP connections and never answers on them.
pub struct SilentListener {
    port: u16,
    task: JoinHandle<()>,
}

impl SilentListener {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Self { port, task }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for SilentListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Point a participant's config at a running mock tapd, trusting its CA.
pub fn tap_config(server: &MockTapdHandle) -> TapConfig {
    TapConfig {
        host: "localhost".to_string(),
        port: server.port(),
        tls_path: Some(testutils::ca_cert_path()),
        mac_path: None,
    }
}

/// Two mock tapds and a mock bitcoind sharing one call log.
pub struct Environment {
    pub log: CallLog,
    pub alice: MockTapdHandle,
    pub bob: MockTapdHandle,
    pub bitcoind: MockBitcoindHandle,
}

impl Environment {
    pub async fn start() -> Self {
        let log = CallLog::default();
        Self::start_with(MockTapd::new("alice", log.clone()), log).await
    }

    /// Start with a custom alice.
    pub async fn start_with(alice: MockTapd, log: CallLog) -> Self {
        tap_testutils::init_logging();
        Self {
            alice: alice.spawn().await.unwrap(),
            bob: MockTapd::new("bob", log.clone()).spawn().await.unwrap(),
            bitcoind: MockBitcoind::new(log.clone()).spawn().await.unwrap(),
            log,
        }
    }

    pub fn config(&self) -> LoadTestConfig {
        LoadTestConfig {
            alice: UserConfig {
                tapd: tap_config(&self.alice),
            },
            bob: UserConfig {
                tapd: tap_config(&self.bob),
            },
            bitcoin: self.bitcoind.config(),
            test_timeout_secs: 10,
        }
    }
}
