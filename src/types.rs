use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One coin in base units; also the flat transaction fee reserved per send.
pub const COIN: i64 = 100_000_000;

/// Name of the ticket executor; doubles as the escrow account transfers are
/// addressed to and as the consensus mechanism name the scheduler requires.
pub const TICKET_EXEC_NAME: &str = "ticket";

/// Upper bound on tickets opened by a single open transaction. Excess
/// balance is picked up again on a later cycle.
pub const TICKETS_PER_OPEN_MAX: i64 = 1000;

/// Upper bound on ticket ids carried by a single close transaction.
pub const CLOSE_IDS_PER_TX_MAX: usize = 200;

/// Lifecycle states as encoded by the ticket executor. The engine only ever
/// queries `Frozen` and `Mining`; closed tickets stop being queryable once
/// their principal is swept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    Frozen,
    Mining,
    Closed,
}

impl TicketStatus {
    pub fn code(self) -> i32 {
        match self {
            TicketStatus::Frozen => 1,
            TicketStatus::Mining => 2,
            TicketStatus::Closed => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(TicketStatus::Frozen),
            2 => Some(TicketStatus::Mining),
            3 => Some(TicketStatus::Closed),
            _ => None,
        }
    }
}

/// A deposit record as reported by the ticket executor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub status: TicketStatus,
    /// Address allowed to use this ticket for mining.
    pub miner_address: String,
    /// Address that receives the principal when the ticket closes.
    pub return_address: String,
    /// Tickets seeded at chain creation are exempt from all lock windows.
    pub is_genesis: bool,
    /// Unix seconds when the ticket was opened.
    pub create_time: i64,
    /// Unix seconds when the ticket last produced a block.
    pub miner_time: i64,
    /// Escrowed principal, fixed at the ticket price of the open height.
    pub price: i64,
}

/// Opaque signing handle for a wallet-held key. The engine never signs
/// transactions itself; it hands the key to the wallet facade and only uses
/// the secret bytes to derive per-ticket commitments.
#[derive(Clone, PartialEq, Eq)]
pub struct WalletKey {
    pub address: String,
    pub secret: [u8; 32],
}

impl WalletKey {
    pub fn new(address: impl Into<String>, secret: [u8; 32]) -> Self {
        Self {
            address: address.into(),
            secret,
        }
    }
}

impl fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log secret material.
        f.debug_struct("WalletKey")
            .field("address", &self.address)
            .finish()
    }
}

/// Payload for an open-tickets transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketOpen {
    pub miner_address: String,
    pub return_address: String,
    pub count: i64,
    pub rand_seed: i64,
    /// Hash of each per-index secret; the secret itself stays in the wallet
    /// so mining eligibility cannot be pre-computed from chain data.
    pub pub_hashes: Vec<[u8; 32]>,
}

/// Payload for a close-tickets transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketClose {
    pub ticket_ids: Vec<String>,
}

/// Ticket executor actions the engine emits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TicketAction {
    Open(TicketOpen),
    Close(TicketClose),
}

/// Transaction hash returned by the wallet facade.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}
