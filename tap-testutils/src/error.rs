//! Top level error module for the crate

use std::path::PathBuf;
use std::time::Duration;

use tap_netutils::{ConnectionError, CredentialError};

/// The configuration file could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Failures talking to the chain backend.
#[derive(Debug, thiserror::Error)]
pub enum BitcoinRpcError {
    /// The RPC certificate could not be read.
    #[error("unable to read rpc certificate {}: {source}", path.display())]
    Certificate {
        /// The configured path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The RPC certificate file holds no certificates.
    #[error("no valid certificates in {}", path.display())]
    NoCertificates {
        /// The configured path.
        path: PathBuf,
    },
    /// Client construction or transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The backend rejected the credentials.
    #[error("rpc authentication rejected by {url}")]
    Unauthorized {
        /// The backend.
        url: String,
    },
    /// A response that is not a JSON-RPC envelope.
    #[error("malformed response from {method} (http {status}): {body}")]
    Malformed {
        /// The method called.
        method: String,
        /// HTTP status of the response.
        status: u16,
        /// The raw body.
        body: String,
    },
    /// The backend returned a JSON-RPC error.
    #[error("{method} failed with code {code}: {message}")]
    Rpc {
        /// The method called.
        method: String,
        /// JSON-RPC error code.
        code: i64,
        /// Error text from the backend.
        message: String,
    },
    /// The result did not have the expected shape.
    #[error("unable to decode {method} result: {source}")]
    Decode {
        /// The method called.
        method: String,
        /// The decode failure.
        source: serde_json::Error,
    },
}

/// Failures of the block mining helper.
#[derive(Debug, thiserror::Error)]
pub enum MiningError {
    #[error(transparent)]
    Rpc(#[from] BitcoinRpcError),
    /// The mempool never reached the expected size.
    #[error("wanted {wanted} transactions in mempool, found {found} after {timeout:?}")]
    MempoolTimeout {
        /// Expected mempool size.
        wanted: usize,
        /// Size at the last poll.
        found: usize,
        /// How long we waited.
        timeout: Duration,
    },
    /// The backend mined a different number of blocks than asked.
    #[error("asked for {wanted} blocks, backend mined {mined}")]
    BlockCount {
        /// Requested blocks.
        wanted: u32,
        /// Block hashes returned.
        mined: usize,
    },
    /// A mempool transaction is missing from the first mined block.
    #[error("transaction {txid} not found in block {block}")]
    TxNotMined {
        /// The missing transaction.
        txid: String,
        /// The first mined block.
        block: String,
    },
}

/// One cleanup action that failed.
#[derive(Debug)]
pub struct CleanupFailure {
    /// The action's label.
    pub label: String,
    /// What went wrong.
    pub error: Box<LoadTestError>,
}

fn describe_failures(failures: &[CleanupFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.label, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top level error enum for fixture setup and teardown.
///
/// Every variant is fatal to the test that hit it.
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// A credential file is unreadable or malformed.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),
    /// Dialing, or using a closed channel.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    /// The daemon accepted the connection but is not serving.
    #[error("{participant} failed liveness check: {status}")]
    Liveness {
        /// Which participant.
        participant: String,
        /// The liveness check's failure.
        status: tonic::Status,
    },
    /// A step did not finish within the test deadline.
    #[error("{participant} {step} timed out after {after:?}")]
    Timeout {
        /// Which participant.
        participant: String,
        /// Which step.
        step: &'static str,
        /// The deadline.
        after: Duration,
    },
    #[error("chain backend error: {0}")]
    Bitcoin(#[from] BitcoinRpcError),
    #[error("mining error: {0}")]
    Mining(#[from] MiningError),
    /// Teardown failures, in the order the actions ran.
    #[error("cleanup failed: {}", describe_failures(.0))]
    Cleanup(Vec<CleanupFailure>),
}
