//! Loadtest fixtures for Taproot Assets daemons.
//!
//! [`init_clients`] connects to two tapd participants and the chain backend
//! they share; [`with_clients`] wraps a scenario so its teardown always runs.

pub mod bitcoin;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod fixture;
pub mod mining;

pub use bitcoin::{BackendVersion, BitcoinClient, Block};
pub use cleanup::Cleanup;
pub use config::{BitcoinConfig, LoadTestConfig, TapConfig, UserConfig};
pub use error::{BitcoinRpcError, CleanupFailure, ConfigError, LoadTestError, MiningError};
pub use fixture::{get_bitcoin_conn, get_tap_client, init_clients, with_clients};
pub use mining::{mine_blocks, wait_for_mempool, MINER_MEMPOOL_TIMEOUT};

static LOG_INIT: std::sync::Once = std::sync::Once::new();

/// Install a `RUST_LOG`-filtered subscriber, defaulting to `info`. Only the
/// first call in a process has any effect.
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        // another subscriber may already be installed by the test harness
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
