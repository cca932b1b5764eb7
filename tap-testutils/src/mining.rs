//! Block production against the chain backend.

use std::time::Duration;

use tokio::time::Instant;

use crate::bitcoin::{BackendVersion, BitcoinClient, Block};
use crate::error::MiningError;

/// How long [`mine_blocks`] waits for the expected transactions to show up.
pub const MINER_MEMPOOL_TIMEOUT: Duration = Duration::from_secs(30);

const MEMPOOL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Poll until the mempool holds exactly `num_txs` transactions and return
/// their ids.
pub async fn wait_for_mempool(
    client: &BitcoinClient,
    num_txs: usize,
    timeout: Duration,
) -> Result<Vec<String>, MiningError> {
    let deadline = Instant::now() + timeout;
    loop {
        let mempool = client.get_raw_mempool().await?;
        if mempool.len() == num_txs {
            return Ok(mempool);
        }
        if Instant::now() >= deadline {
            return Err(MiningError::MempoolTimeout {
                wanted: num_txs,
                found: mempool.len(),
                timeout,
            });
        }
        tokio::time::sleep(MEMPOOL_POLL_INTERVAL).await;
    }
}

/// Mine `num_blocks` blocks and return them in order.
///
/// When `num_txs` is non-zero, first waits for that many transactions to
/// reach the mempool, then checks they all confirmed in the first block.
pub async fn mine_blocks(
    client: &BitcoinClient,
    num_blocks: u32,
    num_txs: usize,
) -> Result<Vec<Block>, MiningError> {
    let txids = if num_txs > 0 {
        wait_for_mempool(client, num_txs, MINER_MEMPOOL_TIMEOUT).await?
    } else {
        Vec::new()
    };

    let hashes = match client.backend_version().await? {
        BackendVersion::Bitcoind(_) => {
            let address = client.get_new_address().await?;
            client.generate_to_address(num_blocks, &address).await?
        }
        BackendVersion::Btcd => client.generate(num_blocks).await?,
    };
    if hashes.len() != num_blocks as usize {
        return Err(MiningError::BlockCount {
            wanted: num_blocks,
            mined: hashes.len(),
        });
    }

    let mut blocks = Vec::with_capacity(hashes.len());
    for hash in &hashes {
        blocks.push(client.get_block(hash).await?);
    }
    if let Some(first) = blocks.first() {
        if let Some(missing) = txids.iter().find(|txid| !first.tx.contains(txid)) {
            return Err(MiningError::TxNotMined {
                txid: missing.clone(),
                block: first.hash.clone(),
            });
        }
    }

    tracing::info!(
        blocks = blocks.len(),
        tip = blocks.last().map(|b| b.height),
        confirmed = txids.len(),
        "mined blocks"
    );
    Ok(blocks)
}
