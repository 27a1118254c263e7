//! Abstraction over the wallet and node services the policy engine drives.
//!
//! The engine never talks to the ledger directly: balances, ticket queries,
//! transfers and ticket actions all go through [`WalletOps`]. Production
//! wallets back this with their RPC plumbing; tests use [`StubWalletOps`].

use std::collections::{HashMap, HashSet};

use anyhow::Error as AnyError;
use parking_lot::Mutex;
use thiserror::Error;

use crate::types::{Ticket, TicketAction, TicketStatus, TxHash, WalletKey, TICKET_EXEC_NAME};

#[derive(Debug, Error)]
pub enum WalletOpsError {
    /// Networking failures, RPC timeouts and similar transport problems.
    #[error("transport error: {0}")]
    Transport(#[from] AnyError),
    /// The queried object does not exist. Callers treat this as an empty
    /// result, not a failure.
    #[error("not found")]
    NotFound,
    /// The node refused the request for application-level reasons.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl WalletOpsError {
    pub fn transport(error: impl Into<AnyError>) -> Self {
        Self::Transport(error.into())
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

pub type WalletOpsResult<T> = Result<T, WalletOpsError>;

/// Sub-ledger a balance query addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ledger {
    /// Freely spendable coins.
    Coins,
    /// Balance held by the ticket executor (not counting escrowed tickets).
    Ticket,
}

/// Contract surface of the external collaborators (wallet facade, ticket
/// store, chain queries). All ledger-mutating calls are synchronous from the
/// caller's perspective; ordering within a cycle is achieved by waiting.
pub trait WalletOps: Send + Sync {
    /// Tickets whose miner address is `address`, filtered by status.
    fn query_tickets(&self, address: &str, status: TicketStatus) -> WalletOpsResult<Vec<Ticket>>;

    /// Cold addresses bound to `miner_address` as delegated funding sources.
    fn query_cold_addresses(&self, miner_address: &str) -> WalletOpsResult<Vec<String>>;

    fn balance(&self, address: &str, ledger: Ledger) -> WalletOpsResult<i64>;

    /// Signed transfer between the coins and ticket sub-ledgers. A negative
    /// amount withdraws from the ticket ledger back to coins.
    fn send_transfer(
        &self,
        key: &WalletKey,
        to: &str,
        amount: i64,
        note: &str,
    ) -> WalletOpsResult<TxHash>;

    fn send_ticket_action(&self, key: &WalletKey, action: TicketAction) -> WalletOpsResult<TxHash>;

    /// Blocks until every listed transaction is included.
    fn wait_for_confirmations(&self, hashes: &[TxHash]) -> WalletOpsResult<()>;

    /// Tells the consensus collaborator that the wallet's ticket set
    /// changed and its caches must be flushed.
    fn notify_ticket_flush(&self);

    fn wallet_keys(&self) -> WalletOpsResult<Vec<WalletKey>>;

    fn is_caught_up(&self) -> bool;

    fn chain_height(&self) -> i64;
}

/// Transfer recorded by [`StubWalletOps`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StubTransfer {
    pub from: String,
    pub to: String,
    pub amount: i64,
    pub note: String,
    pub hash: TxHash,
}

/// Ticket action recorded by [`StubWalletOps`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StubAction {
    pub signer: String,
    pub action: TicketAction,
    pub hash: TxHash,
}

#[derive(Default)]
struct StubState {
    keys: Vec<WalletKey>,
    coins: HashMap<String, i64>,
    ticket_ledger: HashMap<String, i64>,
    tickets: Vec<Ticket>,
    cold_addresses: HashMap<String, Vec<String>>,
    transfers: Vec<StubTransfer>,
    actions: Vec<StubAction>,
    confirmation_waits: Vec<Vec<TxHash>>,
    flush_count: usize,
    failing_transfers: HashSet<String>,
    failing_queries: HashSet<String>,
    ticket_price: i64,
    height: i64,
    caught_up: bool,
    now: i64,
    ticket_seq: u64,
    hash_seq: u64,
}

/// In-memory collaborator used by tests and local development harnesses.
///
/// Balances behave like the real executor as far as the engine can observe:
/// a confirmed coins→ticket transfer moves value between sub-ledgers, an
/// open action escrows `count × ticket_price` out of the ticket ledger, and
/// a close action releases each ticket's principal back to its return
/// address.
pub struct StubWalletOps {
    state: Mutex<StubState>,
}

impl Default for StubWalletOps {
    fn default() -> Self {
        Self::new()
    }
}

impl StubWalletOps {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState {
                caught_up: true,
                height: 1,
                ..StubState::default()
            }),
        }
    }

    pub fn with_key(self, key: WalletKey) -> Self {
        self.state.lock().keys.push(key);
        self
    }

    pub fn with_coins(self, address: &str, amount: i64) -> Self {
        self.state.lock().coins.insert(address.to_string(), amount);
        self
    }

    pub fn with_ticket_balance(self, address: &str, amount: i64) -> Self {
        self.state
            .lock()
            .ticket_ledger
            .insert(address.to_string(), amount);
        self
    }

    pub fn with_ticket(self, ticket: Ticket) -> Self {
        self.state.lock().tickets.push(ticket);
        self
    }

    pub fn with_cold_addresses(self, miner: &str, addresses: Vec<String>) -> Self {
        self.state
            .lock()
            .cold_addresses
            .insert(miner.to_string(), addresses);
        self
    }

    pub fn with_ticket_price(self, price: i64) -> Self {
        self.state.lock().ticket_price = price;
        self
    }

    pub fn with_height(self, height: i64) -> Self {
        self.state.lock().height = height;
        self
    }

    pub fn with_caught_up(self, caught_up: bool) -> Self {
        self.state.lock().caught_up = caught_up;
        self
    }

    pub fn with_now(self, now: i64) -> Self {
        self.state.lock().now = now;
        self
    }

    /// All transfers from `address` fail with a rejection.
    pub fn with_failing_transfers(self, address: &str) -> Self {
        self.state
            .lock()
            .failing_transfers
            .insert(address.to_string());
        self
    }

    /// Ticket queries for `address` fail with a transport error.
    pub fn with_failing_queries(self, address: &str) -> Self {
        self.state
            .lock()
            .failing_queries
            .insert(address.to_string());
        self
    }

    pub fn set_height(&self, height: i64) {
        self.state.lock().height = height;
    }

    pub fn set_caught_up(&self, caught_up: bool) {
        self.state.lock().caught_up = caught_up;
    }

    pub fn coins_balance(&self, address: &str) -> i64 {
        self.state.lock().coins.get(address).copied().unwrap_or(0)
    }

    pub fn ticket_balance(&self, address: &str) -> i64 {
        self.state
            .lock()
            .ticket_ledger
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    pub fn tickets(&self) -> Vec<Ticket> {
        self.state.lock().tickets.clone()
    }

    pub fn transfers(&self) -> Vec<StubTransfer> {
        self.state.lock().transfers.clone()
    }

    pub fn actions(&self) -> Vec<StubAction> {
        self.state.lock().actions.clone()
    }

    pub fn confirmation_waits(&self) -> Vec<Vec<TxHash>> {
        self.state.lock().confirmation_waits.clone()
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flush_count
    }

    /// Coins plus ticket-ledger balance plus escrowed principal for one
    /// address; conservation checks compare this across a cycle.
    pub fn total_value(&self, address: &str) -> i64 {
        let state = self.state.lock();
        let coins = state.coins.get(address).copied().unwrap_or(0);
        let ledger = state.ticket_ledger.get(address).copied().unwrap_or(0);
        let escrow: i64 = state
            .tickets
            .iter()
            .filter(|ticket| ticket.return_address == address)
            .map(|ticket| ticket.price)
            .sum();
        coins + ledger + escrow
    }
}

fn next_hash(state: &mut StubState) -> TxHash {
    state.hash_seq += 1;
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&state.hash_seq.to_le_bytes());
    TxHash(bytes)
}

impl WalletOps for StubWalletOps {
    fn query_tickets(&self, address: &str, status: TicketStatus) -> WalletOpsResult<Vec<Ticket>> {
        let state = self.state.lock();
        if state.failing_queries.contains(address) {
            return Err(WalletOpsError::transport(anyhow::anyhow!(
                "query failed for {address}"
            )));
        }
        let matched: Vec<Ticket> = state
            .tickets
            .iter()
            .filter(|ticket| ticket.miner_address == address && ticket.status == status)
            .cloned()
            .collect();
        if matched.is_empty() {
            return Err(WalletOpsError::NotFound);
        }
        Ok(matched)
    }

    fn query_cold_addresses(&self, miner_address: &str) -> WalletOpsResult<Vec<String>> {
        self.state
            .lock()
            .cold_addresses
            .get(miner_address)
            .cloned()
            .ok_or(WalletOpsError::NotFound)
    }

    fn balance(&self, address: &str, ledger: Ledger) -> WalletOpsResult<i64> {
        let state = self.state.lock();
        let book = match ledger {
            Ledger::Coins => &state.coins,
            Ledger::Ticket => &state.ticket_ledger,
        };
        Ok(book.get(address).copied().unwrap_or(0))
    }

    fn send_transfer(
        &self,
        key: &WalletKey,
        to: &str,
        amount: i64,
        note: &str,
    ) -> WalletOpsResult<TxHash> {
        let mut state = self.state.lock();
        if state.failing_transfers.contains(&key.address) {
            return Err(WalletOpsError::rejected(format!(
                "transfer rejected for {}",
                key.address
            )));
        }
        if amount >= 0 {
            let coins = state.coins.entry(key.address.clone()).or_insert(0);
            if *coins < amount {
                return Err(WalletOpsError::rejected("insufficient coins balance"));
            }
            *coins -= amount;
            *state.ticket_ledger.entry(key.address.clone()).or_insert(0) += amount;
        } else {
            let withdrawn = -amount;
            let ledger = state.ticket_ledger.entry(key.address.clone()).or_insert(0);
            if *ledger < withdrawn {
                return Err(WalletOpsError::rejected("insufficient ticket balance"));
            }
            *ledger -= withdrawn;
            *state.coins.entry(key.address.clone()).or_insert(0) += withdrawn;
        }
        let hash = next_hash(&mut state);
        state.transfers.push(StubTransfer {
            from: key.address.clone(),
            to: to.to_string(),
            amount,
            note: note.to_string(),
            hash,
        });
        Ok(hash)
    }

    fn send_ticket_action(&self, key: &WalletKey, action: TicketAction) -> WalletOpsResult<TxHash> {
        let mut state = self.state.lock();
        match &action {
            TicketAction::Open(open) => {
                let price = state.ticket_price;
                let escrow = open
                    .count
                    .checked_mul(price)
                    .ok_or_else(|| WalletOpsError::rejected("escrow overflow"))?;
                let funding = state
                    .ticket_ledger
                    .entry(open.return_address.clone())
                    .or_insert(0);
                if *funding < escrow {
                    return Err(WalletOpsError::rejected("insufficient escrow balance"));
                }
                *funding -= escrow;
                let now = state.now;
                for _ in 0..open.count {
                    state.ticket_seq += 1;
                    let ticket_id = format!("{}:{:08}", open.miner_address, state.ticket_seq);
                    state.tickets.push(Ticket {
                        ticket_id,
                        status: TicketStatus::Frozen,
                        miner_address: open.miner_address.clone(),
                        return_address: open.return_address.clone(),
                        is_genesis: false,
                        create_time: now,
                        miner_time: 0,
                        price,
                    });
                }
            }
            TicketAction::Close(close) => {
                let mut released: Vec<(String, i64)> = Vec::new();
                state.tickets.retain(|ticket| {
                    if close.ticket_ids.contains(&ticket.ticket_id) {
                        released.push((ticket.return_address.clone(), ticket.price));
                        false
                    } else {
                        true
                    }
                });
                for (return_address, price) in released {
                    *state.ticket_ledger.entry(return_address).or_insert(0) += price;
                }
            }
        }
        let hash = next_hash(&mut state);
        state.actions.push(StubAction {
            signer: key.address.clone(),
            action,
            hash,
        });
        Ok(hash)
    }

    fn wait_for_confirmations(&self, hashes: &[TxHash]) -> WalletOpsResult<()> {
        self.state.lock().confirmation_waits.push(hashes.to_vec());
        Ok(())
    }

    fn notify_ticket_flush(&self) {
        self.state.lock().flush_count += 1;
    }

    fn wallet_keys(&self) -> WalletOpsResult<Vec<WalletKey>> {
        Ok(self.state.lock().keys.clone())
    }

    fn is_caught_up(&self) -> bool {
        self.state.lock().caught_up
    }

    fn chain_height(&self) -> i64 {
        self.state.lock().height
    }
}

/// Escrow account transfers into the ticket ledger are addressed to.
pub fn ticket_exec_address() -> &'static str {
    TICKET_EXEC_NAME
}
