//! The per-participant bundle of tapd service clients.

use std::fmt;

use tonic::codegen::InterceptedService;
use tonic::Status;

use crate::assetwalletrpc::asset_wallet_client::AssetWalletClient;
use crate::channel::{DialOptions, TapChannel, TapConnector};
use crate::credentials::MacaroonInterceptor;
use crate::error::ConnectionError;
use crate::mintrpc::mint_client::MintClient;
use crate::taprpc::taproot_assets_client::TaprootAssetsClient;
use crate::taprpc::{GetInfoRequest, GetInfoResponse};
use crate::universerpc::universe_client::UniverseClient;

/// The service every facet of a [`TapClient`] runs on.
pub type TapService = InterceptedService<TapChannel, MacaroonInterceptor>;

/// Where a participant's tapd lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TapTarget {
    /// Participant name, used in logs and errors.
    pub name: String,
    /// Hostname or IP of the gRPC listener.
    pub host: String,
    /// gRPC port.
    pub port: u16,
}

impl TapTarget {
    /// A named `host:port` target.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }
}

/// Everything one tapd exposes, over one channel.
///
/// Each facet is an independent generated client; cloning a facet or the
/// whole bundle shares the channel. The channel lives until
/// [`TapClient::close`].
#[derive(Clone)]
pub struct TapClient {
    target: TapTarget,
    channel: TapChannel,
    /// `taprpc.TaprootAssets`
    pub assets: TaprootAssetsClient<TapService>,
    /// `universerpc.Universe`
    pub universe: UniverseClient<TapService>,
    /// `mintrpc.Mint`
    pub mint: MintClient<TapService>,
    /// `assetwalletrpc.AssetWallet`
    pub asset_wallet: AssetWalletClient<TapService>,
}

impl TapClient {
    /// Bind the four service clients to an open channel.
    pub fn from_channel(target: TapTarget, channel: TapChannel, options: &DialOptions) -> Self {
        let service = || {
            InterceptedService::new(
                channel.clone(),
                MacaroonInterceptor::new(options.macaroon.as_ref()),
            )
        };
        let limit = options.max_recv_msg_size;

        Self {
            assets: TaprootAssetsClient::new(service()).max_decoding_message_size(limit),
            universe: UniverseClient::new(service()).max_decoding_message_size(limit),
            mint: MintClient::new(service()).max_decoding_message_size(limit),
            asset_wallet: AssetWalletClient::new(service()).max_decoding_message_size(limit),
            target,
            channel,
        }
    }

    /// Dial `target` and bind the service clients to the new channel.
    pub async fn connect(target: TapTarget, options: &DialOptions) -> Result<Self, ConnectionError> {
        let channel = TapConnector::new(&target.host, target.port)?
            .dial(options)
            .await?;
        Ok(Self::from_channel(target, channel, options))
    }

    /// The target this bundle was built for.
    pub fn target(&self) -> &TapTarget {
        &self.target
    }

    /// The shared channel.
    pub fn channel(&self) -> &TapChannel {
        &self.channel
    }

    /// Cheap informational call, used to check the daemon is serving.
    pub async fn get_info(&self) -> Result<GetInfoResponse, Status> {
        self.assets
            .clone()
            .get_info(GetInfoRequest {})
            .await
            .map(tonic::Response::into_inner)
    }

    /// Close the shared channel. Every facet stops working.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        tracing::debug!(participant = %self.target.name, "closing tapd channel");
        self.channel.close().await
    }
}

impl fmt::Debug for TapClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapClient")
            .field("target", &self.target)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
