//! Tap-Netutils
//!
//! This crate provides the `TapClient` bundle, used to talk to a tapd
//! instance over one authenticated gRPC channel, together with the
//! credential loading and channel construction it is built from.

#![warn(missing_docs)]

pub mod channel;
pub mod client;
pub mod credentials;
pub mod error;
pub mod macaroon;
#[cfg(any(test, feature = "test-features"))]
pub mod testutils;

pub use channel::{DialOptions, TapChannel, TapConnector};
pub use client::{TapClient, TapService, TapTarget};
pub use credentials::{load_macaroon, load_tls_config, MacaroonCredential, MacaroonInterceptor};
pub use error::{ConnectionError, CredentialError, MacaroonError};

/// The largest message a client will receive from tapd, 200 MiB.
pub const MAX_GRPC_MSG_SIZE: usize = 200 * 1024 * 1024;

/// Generated types for the `taprpc` package.
#[allow(missing_docs)]
pub mod taprpc {
    tonic::include_proto!("taprpc");
}

/// Generated types for the `universerpc` package.
#[allow(missing_docs)]
pub mod universerpc {
    tonic::include_proto!("universerpc");
}

/// Generated types for the `mintrpc` package.
#[allow(missing_docs)]
pub mod mintrpc {
    tonic::include_proto!("mintrpc");
}

/// Generated types for the `assetwalletrpc` package.
#[allow(missing_docs)]
pub mod assetwalletrpc {
    tonic::include_proto!("assetwalletrpc");
}
