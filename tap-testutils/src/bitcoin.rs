//! A minimal JSON-RPC client for the chain backend (bitcoind or btcd), over
//! HTTP POST with basic auth.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::BitcoinConfig;
use crate::error::BitcoinRpcError;

/// JSON-RPC "method not found". btcd answers `getnetworkinfo` with it.
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;

/// The verbose `getblock` fields the fixture relies on.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub hash: String,
    pub height: u64,
    /// Transaction ids, coinbase first.
    pub tx: Vec<String>,
    #[serde(default, rename = "previousblockhash")]
    pub previous_block_hash: Option<String>,
}

/// Which implementation is behind the RPC port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendVersion {
    /// bitcoind, with its numeric `getnetworkinfo` version.
    Bitcoind(u64),
    Btcd,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct NetworkInfo {
    version: u64,
}

/// One connection handle to the chain backend. Clones share the HTTP pool.
#[derive(Clone, Debug)]
pub struct BitcoinClient {
    url: String,
    user: String,
    password: String,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

fn trusted_certificates(path: &Path) -> Result<Vec<reqwest::Certificate>, BitcoinRpcError> {
    let certificate_error = |source| BitcoinRpcError::Certificate {
        path: path.to_path_buf(),
        source,
    };
    let pem = std::fs::read(path).map_err(certificate_error)?;
    let ders = rustls_pemfile::certs(&mut pem.as_slice()).map_err(certificate_error)?;
    if ders.is_empty() {
        return Err(BitcoinRpcError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    ders.iter()
        .map(|der| reqwest::Certificate::from_der(der).map_err(BitcoinRpcError::from))
        .collect()
}

impl BitcoinClient {
    /// Build the handle. Nothing is sent until the first call.
    ///
    /// Without a configured certificate the connection is plain HTTP.
    pub fn connect(config: &BitcoinConfig) -> Result<Self, BitcoinRpcError> {
        let mut builder = reqwest::Client::builder();
        let scheme = match config.tls_path() {
            None => "http",
            Some(path) => {
                for certificate in trusted_certificates(path)? {
                    builder = builder.add_root_certificate(certificate);
                }
                "https"
            }
        };
        let url = format!("{scheme}://{}:{}", config.host, config.port);
        tracing::info!(%url, user = %config.user, "connecting to chain backend");

        Ok(Self {
            url,
            user: config.user.clone(),
            password: config.password.clone(),
            http: builder.build()?,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one JSON-RPC 1.0 request and decode its `result`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, BitcoinRpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(method, id, "chain backend rpc");
        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({
                "jsonrpc": "1.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(BitcoinRpcError::Unauthorized {
                url: self.url.clone(),
            });
        }
        // bitcoind reports rpc errors with a non-2xx status and a normal envelope
        let body = response.text().await?;
        let envelope: RpcResponse = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) => {
                return Err(BitcoinRpcError::Malformed {
                    method: method.to_string(),
                    status: status.as_u16(),
                    body,
                })
            }
        };
        if let Some(error) = envelope.error {
            return Err(BitcoinRpcError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }
        serde_json::from_value(envelope.result).map_err(|source| BitcoinRpcError::Decode {
            method: method.to_string(),
            source,
        })
    }

    pub async fn get_block_count(&self) -> Result<u64, BitcoinRpcError> {
        self.call("getblockcount", vec![]).await
    }

    pub async fn get_best_block_hash(&self) -> Result<String, BitcoinRpcError> {
        self.call("getbestblockhash", vec![]).await
    }

    pub async fn get_block(&self, hash: &str) -> Result<Block, BitcoinRpcError> {
        self.call("getblock", vec![json!(hash)]).await
    }

    /// Txids currently in the mempool.
    pub async fn get_raw_mempool(&self) -> Result<Vec<String>, BitcoinRpcError> {
        self.call("getrawmempool", vec![]).await
    }

    pub async fn get_new_address(&self) -> Result<String, BitcoinRpcError> {
        self.call("getnewaddress", vec![]).await
    }

    /// bitcoind only.
    pub async fn generate_to_address(
        &self,
        num_blocks: u32,
        address: &str,
    ) -> Result<Vec<String>, BitcoinRpcError> {
        self.call("generatetoaddress", vec![json!(num_blocks), json!(address)])
            .await
    }

    /// btcd only.
    pub async fn generate(&self, num_blocks: u32) -> Result<Vec<String>, BitcoinRpcError> {
        self.call("generate", vec![json!(num_blocks)]).await
    }

    /// Tell bitcoind from btcd by whether `getnetworkinfo` exists.
    pub async fn backend_version(&self) -> Result<BackendVersion, BitcoinRpcError> {
        match self.call::<NetworkInfo>("getnetworkinfo", vec![]).await {
            Ok(info) => Ok(BackendVersion::Bitcoind(info.version)),
            Err(BitcoinRpcError::Rpc { code, .. }) if code == RPC_METHOD_NOT_FOUND => {
                Ok(BackendVersion::Btcd)
            }
            Err(e) => Err(e),
        }
    }
}
