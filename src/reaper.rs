//! Closes matured tickets in bounded batches.

use tracing::{debug, warn};

use crate::errors::PolicyResult;
use crate::params::MinerParams;
use crate::store;
use crate::types::{Ticket, TicketAction, TicketClose, TicketStatus, TxHash, WalletKey};
use crate::types::CLOSE_IDS_PER_TX_MAX;
use crate::wallet_ops::WalletOps;

/// Ids of the tickets whose lock windows have elapsed at `now`.
///
/// Genesis tickets are always closable. A zero wait time never gates
/// anything, which keeps this safe at genesis where no parameters apply.
pub fn eligible_for_close(tickets: &[Ticket], now: i64, params: &MinerParams) -> Vec<String> {
    tickets
        .iter()
        .filter(|ticket| {
            if ticket.is_genesis {
                return true;
            }
            match ticket.status {
                TicketStatus::Frozen => now - ticket.create_time >= params.ticket_withdraw_time,
                TicketStatus::Mining => {
                    now - ticket.create_time >= params.ticket_withdraw_time
                        && now - ticket.miner_time >= params.ticket_miner_wait_time
                }
                TicketStatus::Closed => false,
            }
        })
        .map(|ticket| ticket.ticket_id.clone())
        .collect()
}

/// Emits one close transaction for `ids`, truncated to the per-transaction
/// cap. Ids beyond the cap are simply dropped from this cycle; they are
/// re-derived from a fresh query on the next tick if still eligible.
pub(crate) fn send_close(
    ops: &dyn WalletOps,
    key: &WalletKey,
    mut ids: Vec<String>,
) -> PolicyResult<Option<TxHash>> {
    if ids.is_empty() {
        return Ok(None);
    }
    if ids.len() > CLOSE_IDS_PER_TX_MAX {
        debug!(
            address = %key.address,
            eligible = ids.len(),
            cap = CLOSE_IDS_PER_TX_MAX,
            "close batch truncated"
        );
        ids.truncate(CLOSE_IDS_PER_TX_MAX);
    }
    debug!(address = %key.address, count = ids.len(), "closing tickets");
    let hash = ops.send_ticket_action(key, TicketAction::Close(TicketClose { ticket_ids: ids }))?;
    Ok(Some(hash))
}

/// Closes every matured mining ticket across all wallet keys, one batched
/// transaction per account. Per-account failures are logged and skipped.
/// The caller is expected to wait for the returned hashes before issuing
/// new tickets, so released principal is never spent before it exists.
pub fn close_mature_tickets(
    ops: &dyn WalletOps,
    params: &MinerParams,
    now: i64,
) -> PolicyResult<Vec<TxHash>> {
    let keys = ops.wallet_keys()?;
    let mut hashes = Vec::new();
    for key in &keys {
        match close_for_key(ops, params, now, key) {
            Ok(Some(hash)) => hashes.push(hash),
            Ok(None) => {}
            Err(err) => {
                warn!(address = %key.address, %err, "ticket close failed");
            }
        }
    }
    Ok(hashes)
}

fn close_for_key(
    ops: &dyn WalletOps,
    params: &MinerParams,
    now: i64,
    key: &WalletKey,
) -> PolicyResult<Option<TxHash>> {
    let tickets = store::tickets_by_status(ops, &key.address, TicketStatus::Mining)?;
    let ids = eligible_for_close(&tickets, now, params);
    send_close(ops, key, ids)
}
