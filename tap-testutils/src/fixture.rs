//! Client setup for loadtest scenarios: two tapd participants plus the chain
//! backend, with teardown that always runs.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tap_netutils::taprpc::GetInfoResponse;
use tap_netutils::{DialOptions, TapClient};
use tokio::time::timeout;

use crate::bitcoin::BitcoinClient;
use crate::cleanup::Cleanup;
use crate::config::{BitcoinConfig, LoadTestConfig, TapConfig};
use crate::error::LoadTestError;
use crate::mining::mine_blocks;

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
/// Participant label for chain backend errors.
pub const BITCOIN: &str = "bitcoin";

/// Dial one participant's tapd and check it is serving.
///
/// The channel close is registered with `cleanup` as soon as the dial
/// succeeds, so a failed liveness check still releases it.
pub async fn get_tap_client(
    name: &str,
    config: &TapConfig,
    deadline: Duration,
    cleanup: &mut Cleanup,
) -> Result<TapClient, LoadTestError> {
    let options = DialOptions::load(config.tls_path(), config.mac_path())?;
    tracing::debug!(
        participant = name,
        custom_trust = config.tls_path().is_some(),
        macaroon = options.macaroon.is_some(),
        max_recv_msg_size = options.max_recv_msg_size,
        "assembled dial options"
    );

    let client = timeout(deadline, TapClient::connect(config.target(name), &options))
        .await
        .map_err(|_| LoadTestError::Timeout {
            participant: name.to_string(),
            step: "dial",
            after: deadline,
        })??;

    let closer = client.clone();
    cleanup.register(format!("{name}: close channel"), move || async move {
        closer.close().await?;
        Ok(())
    });

    check_live(&client, deadline).await?;
    Ok(client)
}

async fn check_live(client: &TapClient, deadline: Duration) -> Result<GetInfoResponse, LoadTestError> {
    let participant = &client.target().name;
    let info = timeout(deadline, client.get_info())
        .await
        .map_err(|_| LoadTestError::Timeout {
            participant: participant.clone(),
            step: "liveness check",
            after: deadline,
        })?
        .map_err(|status| LoadTestError::Liveness {
            participant: participant.clone(),
            status,
        })?;
    tracing::info!(
        %participant,
        version = %info.version,
        network = %info.network,
        block_height = info.block_height,
        "tapd is live"
    );
    Ok(info)
}

pub fn get_bitcoin_conn(config: &BitcoinConfig) -> Result<BitcoinClient, LoadTestError> {
    Ok(BitcoinClient::connect(config)?)
}

/// Mine one empty-mempool block, giving up after `deadline`.
async fn mine_one(bitcoin: &BitcoinClient, deadline: Duration) -> Result<(), LoadTestError> {
    timeout(deadline, mine_blocks(bitcoin, 1, 0))
        .await
        .map_err(|_| LoadTestError::Timeout {
            participant: BITCOIN.to_string(),
            step: "mine",
            after: deadline,
        })??;
    Ok(())
}

/// Build alice, bob and the chain backend, strictly in that order.
///
/// Mines one block to check the backend and start from an empty mempool, and
/// registers another to flush whatever the test leaves behind. Every dial,
/// liveness check and mining step is bounded by the config's test timeout.
/// Any failure aborts; whatever was already acquired stays registered with
/// `cleanup`.
pub async fn init_clients(
    config: &LoadTestConfig,
    cleanup: &mut Cleanup,
) -> Result<(TapClient, TapClient, BitcoinClient), LoadTestError> {
    let deadline = config.test_timeout();
    let alice = get_tap_client(ALICE, &config.alice.tapd, deadline, cleanup).await?;
    let bob = get_tap_client(BOB, &config.bob.tapd, deadline, cleanup).await?;
    let bitcoin = get_bitcoin_conn(&config.bitcoin)?;

    tracing::info!("mining setup block");
    mine_one(&bitcoin, deadline).await?;

    let miner = bitcoin.clone();
    cleanup.register(format!("{BITCOIN}: mine flush block"), move || async move {
        tracing::info!("mining flush block");
        mine_one(&miner, deadline).await
    });

    Ok((alice, bob, bitcoin))
}

/// Run `body` against freshly built clients, then tear everything down.
///
/// Teardown runs on every path: failed setup, failed body, panicking body.
/// An error from setup or the body is returned in preference to a teardown
/// error, which is then only logged. A panic is resumed after teardown.
pub async fn with_clients<F, Fut, T, E>(config: &LoadTestConfig, body: F) -> Result<T, E>
where
    F: FnOnce(TapClient, TapClient, BitcoinClient) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<LoadTestError> + std::fmt::Display,
{
    let mut cleanup = Cleanup::new();
    let outcome = match init_clients(config, &mut cleanup).await {
        Ok((alice, bob, bitcoin)) => {
            AssertUnwindSafe(body(alice, bob, bitcoin))
                .catch_unwind()
                .await
        }
        Err(error) => {
            tracing::error!(%error, "client setup failed");
            Ok(Err(E::from(error)))
        }
    };
    let teardown = cleanup.run().await;

    match outcome {
        Ok(Ok(value)) => teardown.map(|()| value).map_err(E::from),
        Ok(Err(error)) => {
            if let Err(teardown_error) = teardown {
                tracing::error!(%error, %teardown_error, "teardown failed after test error");
            }
            Err(error)
        }
        Err(panic) => {
            if let Err(teardown_error) = teardown {
                tracing::error!(%teardown_error, "teardown failed after test panic");
            }
            std::panic::resume_unwind(panic)
        }
    }
}
