//! Loadtest configuration: where the two tapd participants and the chain
//! backend listen, and which credential files authenticate them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tap_netutils::TapTarget;

use crate::error::ConfigError;

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV_VAR: &str = "LOADTEST_CONFIG";

/// Host of a tapd participant.
pub const DEFAULT_TAPD_HOST: &str = "localhost";
/// tapd's default gRPC port.
pub const DEFAULT_TAPD_PORT: u16 = 10029;
/// Host of the chain backend.
pub const DEFAULT_BITCOIN_HOST: &str = "localhost";
/// bitcoind's regtest RPC port.
pub const DEFAULT_BITCOIN_PORT: u16 = 18443;
/// RPC user of the regtest containers.
pub const DEFAULT_BITCOIN_USER: &str = "lightning";
/// RPC password of the regtest containers.
pub const DEFAULT_BITCOIN_PASSWORD: &str = "lightning";
/// Deadline for each dial, liveness check and mining step.
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 60;

/// An empty string in the config file means "not configured".
fn configured(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

/// One tapd gRPC endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TapConfig {
    /// Host name, also the TLS server name.
    pub host: String,
    /// gRPC port.
    pub port: u16,
    /// PEM certificate to trust instead of the system roots.
    pub tls_path: Option<PathBuf>,
    /// Binary macaroon sent with every call.
    pub mac_path: Option<PathBuf>,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_TAPD_HOST.to_string(),
            port: DEFAULT_TAPD_PORT,
            tls_path: None,
            mac_path: None,
        }
    }
}

impl TapConfig {
    pub fn tls_path(&self) -> Option<&Path> {
        configured(&self.tls_path)
    }

    pub fn mac_path(&self) -> Option<&Path> {
        configured(&self.mac_path)
    }

    /// The endpoint, labelled with the participant's name.
    pub fn target(&self, name: &str) -> TapTarget {
        TapTarget::new(name, self.host.clone(), self.port)
    }
}

/// A simulated network participant.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserConfig {
    pub tapd: TapConfig,
}

/// The chain backend's JSON-RPC endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BitcoinConfig {
    /// RPC host.
    pub host: String,
    /// RPC port.
    pub port: u16,
    /// Basic auth user.
    pub user: String,
    /// Basic auth password.
    pub password: String,
    /// Unset means plain HTTP.
    pub tls_path: Option<PathBuf>,
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BITCOIN_HOST.to_string(),
            port: DEFAULT_BITCOIN_PORT,
            user: DEFAULT_BITCOIN_USER.to_string(),
            password: DEFAULT_BITCOIN_PASSWORD.to_string(),
            tls_path: None,
        }
    }
}

impl BitcoinConfig {
    pub fn tls_path(&self) -> Option<&Path> {
        configured(&self.tls_path)
    }
}

/// Everything the fixture needs.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoadTestConfig {
    pub alice: UserConfig,
    pub bob: UserConfig,
    pub bitcoin: BitcoinConfig,
    /// Upper bound on each dial, liveness check and mining step.
    pub test_timeout_secs: u64,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            alice: UserConfig::default(),
            bob: UserConfig::default(),
            bitcoin: BitcoinConfig::default(),
            test_timeout_secs: DEFAULT_TEST_TIMEOUT_SECS,
        }
    }
}

impl LoadTestConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The file named by [`CONFIG_ENV_VAR`], or the defaults if unset.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::from_file(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
}
