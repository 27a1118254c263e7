//! Administrative recovery path for locked ticket funds.
//!
//! Closing a ticket is authorized by its return address, never its miner
//! address. When a miner's operating key is lost or compromised, tickets
//! bound to it can still be recovered by whichever wallet holds the return
//! keys.

use std::collections::HashMap;

use tracing::warn;

use crate::errors::PolicyResult;
use crate::params::MinerParams;
use crate::reaper;
use crate::store;
use crate::types::{Ticket, TxHash, WalletKey};
use crate::wallet_ops::WalletOps;

/// Force-closes tickets at the maturity rules for `params`.
///
/// With a miner address, its frozen and mining tickets are grouped by
/// return address and each group is closed with the matching wallet key;
/// groups whose return key is not in the wallet are left untouched. Without
/// one, every wallet key force-closes its own ticket set. Per-group
/// failures are logged and skipped; all produced hashes are returned.
pub fn force_close(
    ops: &dyn WalletOps,
    params: &MinerParams,
    now: i64,
    miner_address: Option<&str>,
) -> PolicyResult<Vec<TxHash>> {
    match miner_address {
        Some(miner) => force_close_by_return_address(ops, params, now, miner),
        None => force_close_all(ops, params, now),
    }
}

fn force_close_by_return_address(
    ops: &dyn WalletOps,
    params: &MinerParams,
    now: i64,
    miner_address: &str,
) -> PolicyResult<Vec<TxHash>> {
    let tickets = store::tickets_for_force_close(ops, miner_address)?;
    let mut by_return: HashMap<String, Vec<Ticket>> = HashMap::new();
    for ticket in tickets {
        by_return
            .entry(ticket.return_address.clone())
            .or_default()
            .push(ticket);
    }

    let keys = ops.wallet_keys()?;
    let mut hashes = Vec::new();
    for key in &keys {
        let Some(group) = by_return.get(&key.address) else {
            continue;
        };
        match close_group(ops, params, now, key, group) {
            Ok(Some(hash)) => hashes.push(hash),
            Ok(None) => {}
            Err(err) => {
                warn!(
                    return_address = %key.address,
                    miner_address,
                    %err,
                    "force close failed"
                );
            }
        }
    }
    Ok(hashes)
}

fn force_close_all(
    ops: &dyn WalletOps,
    params: &MinerParams,
    now: i64,
) -> PolicyResult<Vec<TxHash>> {
    let keys = ops.wallet_keys()?;
    let mut hashes = Vec::new();
    for key in &keys {
        let tickets = match store::tickets_for_force_close(ops, &key.address) {
            Ok(tickets) => tickets,
            Err(err) => {
                warn!(address = %key.address, %err, "force close query failed");
                continue;
            }
        };
        match close_group(ops, params, now, key, &tickets) {
            Ok(Some(hash)) => hashes.push(hash),
            Ok(None) => {}
            Err(err) => {
                warn!(address = %key.address, %err, "force close failed");
            }
        }
    }
    Ok(hashes)
}

fn close_group(
    ops: &dyn WalletOps,
    params: &MinerParams,
    now: i64,
    key: &WalletKey,
    tickets: &[Ticket],
) -> PolicyResult<Option<TxHash>> {
    let ids = reaper::eligible_for_close(tickets, now, params);
    reaper::send_close(ops, key, ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TicketAction, TicketStatus};
    use crate::wallet_ops::StubWalletOps;

    fn key(address: &str) -> WalletKey {
        WalletKey::new(address, *blake3::hash(address.as_bytes()).as_bytes())
    }

    fn ticket(id: &str, miner: &str, return_address: &str, status: TicketStatus) -> Ticket {
        Ticket {
            ticket_id: id.to_string(),
            status,
            miner_address: miner.to_string(),
            return_address: return_address.to_string(),
            is_genesis: false,
            create_time: 0,
            miner_time: 0,
            price: 100,
        }
    }

    fn closed_ids(ops: &StubWalletOps) -> Vec<String> {
        ops.actions()
            .iter()
            .filter_map(|record| match &record.action {
                TicketAction::Close(close) => Some(close.ticket_ids.clone()),
                TicketAction::Open(_) => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn closes_only_groups_with_wallet_held_return_keys() {
        let ops = StubWalletOps::new()
            .with_key(key("held"))
            .with_ticket(ticket("t1", "miner", "held", TicketStatus::Frozen))
            .with_ticket(ticket("t2", "miner", "held", TicketStatus::Mining))
            .with_ticket(ticket("t3", "miner", "foreign", TicketStatus::Mining));
        let hashes = force_close(&ops, &MinerParams::default(), 1_000, Some("miner"))
            .expect("force close");
        assert_eq!(hashes.len(), 1);
        assert_eq!(closed_ids(&ops), vec!["t1", "t2"]);
        // The foreign group is untouched and still queryable.
        assert_eq!(ops.tickets().len(), 1);
        assert_eq!(ops.tickets()[0].ticket_id, "t3");
    }

    #[test]
    fn signs_with_the_return_key_not_the_miner_key() {
        let ops = StubWalletOps::new()
            .with_key(key("cold"))
            .with_ticket(ticket("t1", "miner", "cold", TicketStatus::Mining));
        force_close(&ops, &MinerParams::default(), 1_000, Some("miner")).expect("force close");
        assert_eq!(ops.actions()[0].signer, "cold");
    }

    #[test]
    fn without_miner_address_each_key_closes_its_own_set() {
        let ops = StubWalletOps::new()
            .with_key(key("a"))
            .with_key(key("b"))
            .with_ticket(ticket("ta", "a", "a", TicketStatus::Mining))
            .with_ticket(ticket("tb", "b", "b", TicketStatus::Frozen));
        let hashes =
            force_close(&ops, &MinerParams::default(), 1_000, None).expect("force close");
        assert_eq!(hashes.len(), 2);
        let mut ids = closed_ids(&ops);
        ids.sort();
        assert_eq!(ids, vec!["ta", "tb"]);
    }

    #[test]
    fn immature_tickets_survive_force_close() {
        let params = MinerParams {
            ticket_withdraw_time: 1_000,
            ..MinerParams::default()
        };
        let now = 500;
        let ops = StubWalletOps::new()
            .with_key(key("a"))
            .with_ticket(ticket("young", "a", "a", TicketStatus::Frozen));
        let hashes = force_close(&ops, &params, now, Some("a")).expect("force close");
        assert!(hashes.is_empty());
        assert_eq!(ops.tickets().len(), 1);
    }

    #[test]
    fn query_failure_for_one_key_skips_only_that_key() {
        let ops = StubWalletOps::new()
            .with_key(key("bad"))
            .with_key(key("a"))
            .with_failing_queries("bad")
            .with_ticket(ticket("ta", "a", "a", TicketStatus::Mining));
        let hashes =
            force_close(&ops, &MinerParams::default(), 1_000, None).expect("force close");
        assert_eq!(hashes.len(), 1);
        assert_eq!(closed_ids(&ops), vec!["ta"]);
    }
}
