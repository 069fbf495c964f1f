//! Lockdrop escrow contract ABI and log decoding.

use alloy_primitives::{Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall, SolEvent};
use lockdrop_core::event::{ParticipationEvent, Term};
use lockdrop_core::types::{DestinationKey, Timestamp};

use crate::client::RawLog;
use crate::error::RpcError;

sol! {
    event Locked(
        address indexed owner,
        uint256 eth,
        address lockAddr,
        uint8 term,
        bytes edgewareAddr,
        bool isValidator,
        uint256 time
    );

    event Signaled(address indexed contractAddr, bytes edgewareAddr, uint256 time);

    function LOCK_START_TIME() external view returns (uint256);
}

pub const LOCKED_TOPIC: B256 = Locked::SIGNATURE_HASH;
pub const SIGNALED_TOPIC: B256 = Signaled::SIGNATURE_HASH;

fn to_u64(value: U256, what: &'static str) -> Result<u64, RpcError> {
    u64::try_from(value).map_err(|_| RpcError::decode(what, format!("{value} does not fit in 64 bits")))
}

pub fn lock_start_time_calldata() -> Bytes {
    LOCK_START_TIMECall {}.abi_encode().into()
}

pub fn decode_lock_start_time(data: &[u8]) -> Result<Timestamp, RpcError> {
    let ret = LOCK_START_TIMECall::abi_decode_returns(data, true)
        .map_err(|e| RpcError::decode("LOCK_START_TIME return", e))?;
    to_u64(ret._0, "LOCK_START_TIME")
}

fn with_position(event: ParticipationEvent, log: &RawLog) -> ParticipationEvent {
    match (log.block_number, log.log_index) {
        (Some(block), Some(index)) => event.at(block.to::<u64>(), index.to::<u64>()),
        _ => event,
    }
}

pub fn decode_lock(log: &RawLog) -> Result<ParticipationEvent, RpcError> {
    let ev = Locked::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| RpcError::decode("Locked log", e))?;
    let event = ParticipationEvent::lock(
        ev.owner,
        ev.lockAddr,
        DestinationKey::new(ev.edgewareAddr.to_vec()),
        ev.eth,
        Term::from_lock_code(ev.term),
        to_u64(ev.time, "Locked.time")?,
        ev.isValidator,
    );
    Ok(with_position(event, log))
}

pub fn decode_signal(log: &RawLog) -> Result<ParticipationEvent, RpcError> {
    let ev = Signaled::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| RpcError::decode("Signaled log", e))?;
    let event = ParticipationEvent::signal(
        ev.contractAddr,
        DestinationKey::new(ev.edgewareAddr.to_vec()),
        Some(to_u64(ev.time, "Signaled.time")?),
    );
    Ok(with_position(event, log))
}

/// Decode a lockdrop log by its first topic. Unrelated logs yield `None`.
pub fn decode_event(log: &RawLog) -> Result<Option<ParticipationEvent>, RpcError> {
    match log.topics.first() {
        Some(&t) if t == LOCKED_TOPIC => decode_lock(log).map(Some),
        Some(&t) if t == SIGNALED_TOPIC => decode_signal(log).map(Some),
        _ => Ok(None),
    }
}
