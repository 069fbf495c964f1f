//! Collect every input the engine needs before it runs.
//!
//! Reads are independent, so they run concurrently; every read is retried
//! on transient failure. Nothing is substituted for a read that never
//! succeeds.

use std::collections::BTreeSet;

use alloy_primitives::B256;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use lockdrop_core::event::{ParticipationEvent, SignalBalances, SnapshotInput};
use lockdrop_core::types::{Balance, BlockNumber, EthAddress, Timestamp};
use tracing::{debug, info, warn};

use crate::client::{EthRpcClient, RawLog};
use crate::contract::{decode_event, LOCKED_TOPIC, SIGNALED_TOPIC};
use crate::error::RpcError;
use crate::retry::{with_retry, RetryPolicy};

/// Block span of a single `eth_getLogs` request.
pub const LOG_QUERY_CHUNK_SIZE: u64 = 5000;

/// Attempts at the initial head lookup. An endpoint that never answers it
/// aborts the run instead of retrying forever.
pub const STARTUP_ATTEMPTS: u32 = 5;

/// The chain reads the snapshot depends on.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_number(&self) -> Result<BlockNumber, RpcError>;

    async fn lock_start_time(&self, contract: EthAddress, block: BlockNumber) -> Result<Timestamp, RpcError>;

    async fn logs(
        &self,
        contract: EthAddress,
        topic0: B256,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<RawLog>, RpcError>;

    async fn balance_at(&self, address: EthAddress, block: BlockNumber) -> Result<Balance, RpcError>;
}

#[async_trait]
impl ChainReader for EthRpcClient {
    async fn block_number(&self) -> Result<BlockNumber, RpcError> {
        EthRpcClient::block_number(self).await
    }

    async fn lock_start_time(&self, contract: EthAddress, block: BlockNumber) -> Result<Timestamp, RpcError> {
        EthRpcClient::lock_start_time(self, contract, block).await
    }

    async fn logs(
        &self,
        contract: EthAddress,
        topic0: B256,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<RawLog>, RpcError> {
        self.get_logs(contract, topic0, from, to).await
    }

    async fn balance_at(&self, address: EthAddress, block: BlockNumber) -> Result<Balance, RpcError> {
        self.get_balance(address, block).await
    }
}

#[derive(Clone, Debug)]
pub struct FetchOptions {
    /// First block scanned for lockdrop logs.
    pub from_block: BlockNumber,
    /// Maximum in-flight requests.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            from_block: 0,
            concurrency: 8,
            retry: RetryPolicy::default(),
        }
    }
}

/// Inclusive `[from, to]` split into `LOG_QUERY_CHUNK_SIZE` spans.
pub fn block_chunks(from: BlockNumber, to: BlockNumber) -> Vec<(BlockNumber, BlockNumber)> {
    let mut chunks = Vec::new();
    let mut current = from;
    while current <= to {
        let end = current.saturating_add(LOG_QUERY_CHUNK_SIZE - 1).min(to);
        chunks.push((current, end));
        if end == u64::MAX {
            break;
        }
        current = end + 1;
    }
    chunks
}

/// Lockdrop events of every contract up to `to`, in chain order.
pub async fn fetch_events<R: ChainReader + ?Sized>(
    reader: &R,
    contracts: &[EthAddress],
    to: BlockNumber,
    opts: &FetchOptions,
) -> Result<Vec<ParticipationEvent>, RpcError> {
    let mut queries = Vec::new();
    for &contract in contracts {
        for topic in [LOCKED_TOPIC, SIGNALED_TOPIC] {
            for (from, end) in block_chunks(opts.from_block, to) {
                queries.push((contract, topic, from, end));
            }
        }
    }
    debug!(queries = queries.len(), "fetching lockdrop logs");

    let batches: Vec<Vec<RawLog>> = stream::iter(queries)
        .map(|(contract, topic, from, end)| {
            let label = format!("eth_getLogs {contract} [{from}, {end}]");
            let retry = &opts.retry;
            async move { with_retry(retry, &label, || reader.logs(contract, topic, from, end)).await }
        })
        .buffered(opts.concurrency.max(1))
        .try_collect()
        .await?;

    let mut logs: Vec<RawLog> = batches.into_iter().flatten().filter(|l| !l.removed).collect();
    logs.sort_by_key(RawLog::position);

    let mut events = Vec::with_capacity(logs.len());
    for log in &logs {
        if let Some(event) = decode_event(log)? {
            events.push(event);
        }
    }
    Ok(events)
}

/// Snapshot balance of every distinct signaling contract.
pub async fn fetch_signal_balances<R: ChainReader + ?Sized>(
    reader: &R,
    events: &[ParticipationEvent],
    snapshot_block: BlockNumber,
    opts: &FetchOptions,
) -> Result<SignalBalances, RpcError> {
    let contracts: BTreeSet<EthAddress> = events
        .iter()
        .filter(|e| e.is_signal())
        .map(ParticipationEvent::signal_contract)
        .collect();
    debug!(contracts = contracts.len(), snapshot_block, "fetching signal balances");

    stream::iter(contracts)
        .map(|contract| {
            let label = format!("eth_getBalance {contract}@{snapshot_block}");
            let retry = &opts.retry;
            async move {
                let balance =
                    with_retry(retry, &label, || reader.balance_at(contract, snapshot_block)).await?;
                Ok::<_, RpcError>((contract, balance))
            }
        })
        .buffer_unordered(opts.concurrency.max(1))
        .try_collect()
        .await
}

/// Everything the engine consumes, read at `snapshot_block`.
pub async fn fetch_snapshot<R: ChainReader + ?Sized>(
    reader: &R,
    contracts: &[EthAddress],
    snapshot_block: BlockNumber,
    opts: &FetchOptions,
) -> Result<SnapshotInput, RpcError> {
    let first = *contracts.first().ok_or(RpcError::NoContracts)?;

    let startup = RetryPolicy {
        max_attempts: Some(STARTUP_ATTEMPTS),
        ..opts.retry.clone()
    };
    let head = with_retry(&startup, "eth_blockNumber", || reader.block_number()).await?;
    if snapshot_block > head {
        return Err(RpcError::SnapshotAhead {
            snapshot: snapshot_block,
            head,
        });
    }

    let schedule_start = with_retry(&opts.retry, "LOCK_START_TIME", || {
        reader.lock_start_time(first, snapshot_block)
    })
    .await?;
    let events = fetch_events(reader, contracts, snapshot_block, opts).await?;
    if events.is_empty() {
        warn!(contracts = contracts.len(), "no lockdrop events found");
    }
    let signal_balances = fetch_signal_balances(reader, &events, snapshot_block, opts).await?;

    info!(
        events = events.len(),
        signal_contracts = signal_balances.len(),
        schedule_start,
        snapshot_block,
        "snapshot inputs collected"
    );
    Ok(SnapshotInput {
        schedule_start,
        snapshot_block: Some(snapshot_block),
        events,
        signal_balances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::tests::{locked_log, raw, signaled_log};
    use alloy_primitives::{Address, U256};
    use lockdrop_core::event::Term;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory chain; each balance lookup fails `flaky_balances` times
    /// before answering.
    #[derive(Default)]
    struct MockChain {
        head: BlockNumber,
        unreachable: bool,
        start: Timestamp,
        logs: Vec<RawLog>,
        balances: HashMap<EthAddress, Balance>,
        flaky_balances: u32,
        balance_calls: AtomicU32,
        log_ranges: Mutex<Vec<(BlockNumber, BlockNumber)>>,
        start_time_blocks: Mutex<Vec<BlockNumber>>,
    }

    #[async_trait]
    impl ChainReader for MockChain {
        async fn block_number(&self) -> Result<BlockNumber, RpcError> {
            if self.unreachable {
                return Err(RpcError::Node {
                    code: -32603,
                    message: "connection refused".into(),
                });
            }
            Ok(self.head)
        }

        async fn lock_start_time(&self, _contract: EthAddress, block: BlockNumber) -> Result<Timestamp, RpcError> {
            self.start_time_blocks.lock().unwrap().push(block);
            Ok(self.start)
        }

        async fn logs(
            &self,
            contract: EthAddress,
            topic0: B256,
            from: BlockNumber,
            to: BlockNumber,
        ) -> Result<Vec<RawLog>, RpcError> {
            self.log_ranges.lock().unwrap().push((from, to));
            Ok(self
                .logs
                .iter()
                .filter(|l| l.address == contract && l.topics[0] == topic0)
                .filter(|l| (from..=to).contains(&l.position().0))
                .cloned()
                .collect())
        }

        async fn balance_at(&self, address: EthAddress, _block: BlockNumber) -> Result<Balance, RpcError> {
            let n = self.balance_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.flaky_balances {
                return Err(RpcError::Node {
                    code: -32000,
                    message: "timeout".into(),
                });
            }
            Ok(self.balances.get(&address).copied().unwrap_or_default())
        }
    }

    fn fast() -> FetchOptions {
        FetchOptions {
            from_block: 0,
            concurrency: 4,
            retry: RetryPolicy {
                initial_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                max_attempts: None,
            },
        }
    }

    fn chain() -> MockChain {
        let a = Address::repeat_byte(0xA1);
        let b = Address::repeat_byte(0xB2);
        MockChain {
            head: 20_000,
            start: 1_559_347_200,
            logs: vec![
                raw(b, locked_log(1, 0x11, &[1u8; 32], 100, 0, 10), 12_000, 4),
                raw(a, signaled_log(0x55, &[2u8; 32], 11), 9_000, 1),
                raw(a, locked_log(2, 0x12, &[3u8; 32], 200, 1, 12), 9_000, 0),
                raw(b, signaled_log(0x55, &[4u8; 32], 13), 15_000, 2),
                raw(a, locked_log(3, 0x13, &[5u8; 32], 300, 2, 14), 19_999, 0),
                raw(a, locked_log(4, 0x14, &[6u8; 32], 400, 2, 15), 20_000, 0),
            ],
            balances: HashMap::from([(Address::repeat_byte(0x55), U256::from(777u64))]),
            flaky_balances: 3,
            ..MockChain::default()
        }
    }

    #[test]
    fn chunks_cover_the_range_exactly() {
        assert_eq!(block_chunks(0, 4_999), vec![(0, 4_999)]);
        assert_eq!(
            block_chunks(100, 12_000),
            vec![(100, 5_099), (5_100, 10_099), (10_100, 12_000)]
        );
        assert!(block_chunks(10, 9).is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_in_chain_order_and_bounded_by_block() {
        let mock = chain();
        let contracts = [Address::repeat_byte(0xA1), Address::repeat_byte(0xB2)];
        let input = fetch_snapshot(&mock, &contracts, 19_999, &fast()).await.unwrap();

        assert_eq!(input.schedule_start, 1_559_347_200);
        assert_eq!(input.snapshot_block, Some(19_999));
        // The schedule start is pinned to the snapshot, not the head.
        assert_eq!(*mock.start_time_blocks.lock().unwrap(), vec![19_999]);
        let order: Vec<_> = input
            .events
            .iter()
            .map(|e| (e.block_number.unwrap(), e.log_index.unwrap()))
            .collect();
        assert_eq!(order, vec![(9_000, 0), (9_000, 1), (12_000, 4), (15_000, 2), (19_999, 0)]);
        assert_eq!(input.events[0].term, Term::MediumTerm);
        assert!(input.events[1].is_signal());
        assert_eq!(
            input.signal_balances.get(&Address::repeat_byte(0x55)),
            Some(&U256::from(777u64))
        );
        // Four chunks per contract and topic.
        assert_eq!(mock.log_ranges.lock().unwrap().len(), 2 * 2 * 4);
    }

    #[tokio::test]
    async fn balance_lookups_retry_until_answered() {
        let mock = chain();
        let input = fetch_snapshot(&mock, &[Address::repeat_byte(0xA1)], 20_000, &fast())
            .await
            .unwrap();
        assert_eq!(input.signal_balances.len(), 1);
        assert_eq!(mock.balance_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn startup_preconditions() {
        let mock = chain();
        assert!(matches!(
            fetch_snapshot(&mock, &[], 10, &fast()).await,
            Err(RpcError::NoContracts)
        ));
        assert!(matches!(
            fetch_snapshot(&mock, &[Address::repeat_byte(0xA1)], 20_001, &fast()).await,
            Err(RpcError::SnapshotAhead { snapshot: 20_001, head: 20_000 })
        ));

        let dead = MockChain {
            unreachable: true,
            ..chain()
        };
        assert!(matches!(
            fetch_snapshot(&dead, &[Address::repeat_byte(0xA1)], 10, &fast()).await,
            Err(RpcError::RetriesExhausted { attempts: STARTUP_ATTEMPTS, .. })
        ));
    }
}
