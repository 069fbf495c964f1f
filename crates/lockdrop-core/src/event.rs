use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Balance, BlockNumber, DestinationKey, EthAddress, Timestamp};

/// Participation class of an event.
///
/// Lock terms come from the contract's `uint8 term` field; codes the engine
/// does not know survive decoding as `Unrecognized` and are valued at zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// 3 month lock.
    ShortTerm,
    /// 6 month lock.
    MediumTerm,
    /// 12 month lock.
    LongTerm,
    /// Balance declared without escrow.
    Signaled,
    Unrecognized(u8),
}

impl Term {
    /// Map the contract's on-chain term enum.
    pub fn from_lock_code(code: u8) -> Self {
        match code {
            0 => Term::ShortTerm,
            1 => Term::MediumTerm,
            2 => Term::LongTerm,
            other => Term::Unrecognized(other),
        }
    }

    pub fn is_lock(&self) -> bool {
        matches!(self, Term::ShortTerm | Term::MediumTerm | Term::LongTerm)
    }
}

/// One lock or signal as recorded by the escrow contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationEvent {
    /// Where the funds live: the lock contract for locks, the signaling
    /// address for signals.
    pub source_address: EthAddress,
    /// Account that sent the lock transaction. Absent for signals.
    #[serde(default)]
    pub owner: Option<EthAddress>,
    pub destination_key: DestinationKey,
    /// Locked wei for locks. For signals this is informational only; the
    /// allocated amount is the balance at the snapshot block.
    #[serde(with = "crate::serde_decimal")]
    pub amount: Balance,
    pub term: Term,
    /// Lock time. Present only for locks.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub is_validator_candidate: bool,
    /// Contract whose balance a signal declares.
    #[serde(default)]
    pub origin_contract_address: Option<EthAddress>,
    #[serde(default)]
    pub block_number: Option<BlockNumber>,
    #[serde(default)]
    pub log_index: Option<u64>,
}

impl ParticipationEvent {
    pub fn lock(
        owner: EthAddress,
        lock_address: EthAddress,
        destination_key: DestinationKey,
        amount: Balance,
        term: Term,
        timestamp: Timestamp,
        is_validator_candidate: bool,
    ) -> Self {
        Self {
            source_address: lock_address,
            owner: Some(owner),
            destination_key,
            amount,
            term,
            timestamp: Some(timestamp),
            is_validator_candidate,
            origin_contract_address: None,
            block_number: None,
            log_index: None,
        }
    }

    pub fn signal(contract: EthAddress, destination_key: DestinationKey, timestamp: Option<Timestamp>) -> Self {
        Self {
            source_address: contract,
            owner: None,
            destination_key,
            amount: Balance::ZERO,
            term: Term::Signaled,
            timestamp,
            is_validator_candidate: false,
            origin_contract_address: Some(contract),
            block_number: None,
            log_index: None,
        }
    }

    /// Attach the chain position the event was read from.
    pub fn at(mut self, block_number: BlockNumber, log_index: u64) -> Self {
        self.block_number = Some(block_number);
        self.log_index = Some(log_index);
        self
    }

    pub fn is_signal(&self) -> bool {
        self.term == Term::Signaled
    }

    /// Address whose snapshot balance a signal is valued at.
    pub fn signal_contract(&self) -> EthAddress {
        self.origin_contract_address.unwrap_or(self.source_address)
    }
}

/// Balance of each signaling contract at the snapshot block.
pub type SignalBalances = BTreeMap<EthAddress, Balance>;

/// Everything the allocation engine consumes, fully fetched up front.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInput {
    /// Lock period start read from the escrow contract.
    pub schedule_start: Timestamp,
    #[serde(default)]
    pub snapshot_block: Option<BlockNumber>,
    /// All locks and signals in chain order.
    pub events: Vec<ParticipationEvent>,
    #[serde(default, with = "crate::serde_decimal::map")]
    pub signal_balances: SignalBalances,
}
