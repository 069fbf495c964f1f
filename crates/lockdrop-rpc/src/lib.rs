//! lockdrop-rpc
//!
//! The chain-facing side of a lockdrop snapshot: a JSON-RPC client for an
//! Ethereum node, decoding of the escrow contract's `Locked` / `Signaled`
//! logs, and concurrent collection of everything the engine needs at a
//! fixed snapshot block.

pub mod client;
pub mod contract;
pub mod error;
pub mod fetch;
pub mod retry;

pub use client::{EthRpcClient, RawLog};
pub use error::RpcError;
pub use fetch::{fetch_snapshot, ChainReader, FetchOptions};
pub use retry::{with_retry, RetryPolicy};
