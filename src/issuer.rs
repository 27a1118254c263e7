//! Converts spendable balance into new tickets.
//!
//! Direct issuance spends an account's own coins; delegated issuance opens
//! tickets against the ticket-ledger balance of a bound cold address, so a
//! hot key can mine with funds it never controls. Both paths publish only
//! the hash of each per-ticket secret: the secret stays in the wallet so a
//! third party cannot pre-compute mining eligibility from chain data.

use rand::RngCore;
use tracing::{debug, info, warn};

use crate::config::MinerWhitelist;
use crate::errors::PolicyResult;
use crate::params::MinerParams;
use crate::types::{TicketAction, TicketOpen, TxHash, WalletKey, COIN, TICKETS_PER_OPEN_MAX};
use crate::wallet_ops::{ticket_exec_address, Ledger, WalletOps, WalletOpsError};

/// Result of one issuance pass: emitted open transactions and how many
/// tickets they created.
#[derive(Debug, Default)]
pub struct IssueOutcome {
    pub hashes: Vec<TxHash>,
    pub tickets: i64,
}

/// Per-index secret commitments for an open action. Each secret is derived
/// from the owning key, the ticket index and a random seed; only the hash
/// of the secret goes on chain.
pub fn commitment_hashes(secret: &[u8; 32], count: i64, rand_seed: i64) -> Vec<[u8; 32]> {
    (0..count)
        .map(|index| {
            let mut hasher = blake3::Hasher::new();
            hasher.update(secret);
            hasher.update(&index.to_le_bytes());
            hasher.update(&rand_seed.to_le_bytes());
            let ticket_secret = hasher.finalize();
            *blake3::hash(ticket_secret.as_bytes()).as_bytes()
        })
        .collect()
}

/// Opens `requested` tickets mined by `miner_address` with principal
/// returned to `return_address`. The count is capped per transaction;
/// excess balance is picked up on a later cycle.
fn open_tickets(
    ops: &dyn WalletOps,
    key: &WalletKey,
    miner_address: &str,
    return_address: &str,
    requested: i64,
) -> PolicyResult<(TxHash, i64)> {
    let count = requested.min(TICKETS_PER_OPEN_MAX);
    if count < requested {
        info!(
            requested,
            cap = TICKETS_PER_OPEN_MAX,
            "open batch truncated, remainder deferred to a later cycle"
        );
    }
    let rand_seed = rand::rngs::OsRng.next_u64() as i64;
    let pub_hashes = commitment_hashes(&key.secret, count, rand_seed);
    info!(
        miner = %miner_address,
        return_address = %return_address,
        count,
        "opening tickets"
    );
    let hash = ops.send_ticket_action(
        key,
        TicketAction::Open(TicketOpen {
            miner_address: miner_address.to_string(),
            return_address: return_address.to_string(),
            count,
            rand_seed,
            pub_hashes,
        }),
    )?;
    Ok((hash, count))
}

/// Buys tickets from each wallet key's own spendable balance. Per-account
/// failures are logged and skipped.
pub fn buy_tickets(ops: &dyn WalletOps, params: &MinerParams) -> PolicyResult<IssueOutcome> {
    let keys = ops.wallet_keys()?;
    let mut outcome = IssueOutcome::default();
    debug!("direct issuance begin");
    for key in &keys {
        match buy_for_key(ops, params, key) {
            Ok(Some((hash, count))) => {
                outcome.hashes.push(hash);
                outcome.tickets += count;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(address = %key.address, %err, "ticket purchase failed");
            }
        }
    }
    debug!(tickets = outcome.tickets, "direct issuance end");
    Ok(outcome)
}

fn buy_for_key(
    ops: &dyn WalletOps,
    params: &MinerParams,
    key: &WalletKey,
) -> PolicyResult<Option<(TxHash, i64)>> {
    if params.ticket_price <= 0 {
        return Ok(None);
    }
    let coins = ops.balance(&key.address, Ledger::Coins)?;
    let ticket = ops.balance(&key.address, Ledger::Ticket)?;
    // Two fees stay behind: one for the escrow transfer, one so the account
    // can still move afterwards.
    let fee = COIN;
    if coins + ticket - 2 * fee < params.ticket_price {
        return Ok(None);
    }
    if (coins + ticket - 2 * fee) / params.ticket_price > ticket / params.ticket_price {
        let amount = coins - 2 * fee;
        if amount > 0 {
            info!(address = %key.address, amount, "escrowing coins for tickets");
            let hash = ops.send_transfer(key, ticket_exec_address(), amount, "coins->ticket")?;
            ops.wait_for_confirmations(&[hash])?;
        }
    }
    // Re-read after the confirmed transfer; the open must spend what is
    // actually there, not what the arithmetic above predicted.
    let balance = ops.balance(&key.address, Ledger::Ticket)?;
    let count = balance / params.ticket_price;
    if count > 0 {
        let (hash, opened) = open_tickets(ops, key, &key.address, &key.address, count)?;
        return Ok(Some((hash, opened)));
    }
    Ok(None)
}

/// Buys tickets funded by whitelisted cold addresses bound to each wallet
/// key. The opened tickets mine for the hot key but return their principal
/// to the cold address.
pub fn buy_bound_tickets(
    ops: &dyn WalletOps,
    params: &MinerParams,
    whitelist: &MinerWhitelist,
) -> PolicyResult<IssueOutcome> {
    let keys = ops.wallet_keys()?;
    let mut outcome = IssueOutcome::default();
    debug!("delegated issuance begin");
    for key in &keys {
        match buy_bound_for_key(ops, params, whitelist, key) {
            Ok((hashes, count)) => {
                outcome.hashes.extend(hashes);
                outcome.tickets += count;
            }
            Err(err) => {
                warn!(address = %key.address, %err, "delegated purchase failed");
            }
        }
    }
    debug!(tickets = outcome.tickets, "delegated issuance end");
    Ok(outcome)
}

fn buy_bound_for_key(
    ops: &dyn WalletOps,
    params: &MinerParams,
    whitelist: &MinerWhitelist,
    key: &WalletKey,
) -> PolicyResult<(Vec<TxHash>, i64)> {
    if params.ticket_price <= 0 {
        return Ok((Vec::new(), 0));
    }
    let cold_addresses = match ops.query_cold_addresses(&key.address) {
        Ok(addresses) => addresses,
        Err(WalletOpsError::NotFound) => return Ok((Vec::new(), 0)),
        Err(err) => return Err(err.into()),
    };
    let mut hashes = Vec::new();
    let mut total = 0;
    for cold in &cold_addresses {
        if !whitelist.allows(cold) {
            info!(address = %cold, "cold address not in miner whitelist");
            continue;
        }
        let balance = ops.balance(cold, Ledger::Ticket)?;
        let count = balance / params.ticket_price;
        if count > 0 {
            let (hash, opened) = open_tickets(ops, key, &key.address, cold, count)?;
            hashes.push(hash);
            total += opened;
        }
    }
    Ok((hashes, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet_ops::StubWalletOps;

    const PRICE: i64 = 10_000 * COIN;

    fn params() -> MinerParams {
        MinerParams {
            ticket_price: PRICE,
            ..MinerParams::default()
        }
    }

    fn key(address: &str) -> WalletKey {
        WalletKey::new(address, *blake3::hash(address.as_bytes()).as_bytes())
    }

    fn open_counts(ops: &StubWalletOps) -> Vec<i64> {
        ops.actions()
            .iter()
            .filter_map(|record| match &record.action {
                TicketAction::Open(open) => Some(open.count),
                TicketAction::Close(_) => None,
            })
            .collect()
    }

    #[test]
    fn buys_one_ticket_from_spendable_balance() {
        let ops = StubWalletOps::new()
            .with_key(key("a"))
            .with_ticket_price(PRICE)
            .with_coins("a", 12_000 * COIN);
        let outcome = buy_tickets(&ops, &params()).expect("buy pass");
        assert_eq!(outcome.tickets, 1);
        assert_eq!(outcome.hashes.len(), 1);

        let transfers = ops.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].amount, 11_998 * COIN);
        assert_eq!(transfers[0].note, "coins->ticket");
        // The escrow transfer is confirmed before the balance is re-read.
        assert_eq!(ops.confirmation_waits().len(), 1);

        assert_eq!(ops.coins_balance("a"), 2 * COIN);
        assert_eq!(ops.ticket_balance("a"), 1_998 * COIN);
        assert_eq!(ops.tickets().len(), 1);
    }

    #[test]
    fn insufficient_balance_buys_nothing() {
        let ops = StubWalletOps::new()
            .with_key(key("a"))
            .with_ticket_price(PRICE)
            .with_coins("a", PRICE); // 2-fee reserve pushes this under the bar
        let outcome = buy_tickets(&ops, &params()).expect("buy pass");
        assert_eq!(outcome.tickets, 0);
        assert!(ops.transfers().is_empty());
        assert!(ops.actions().is_empty());
    }

    #[test]
    fn existing_escrow_counts_toward_the_price() {
        let ops = StubWalletOps::new()
            .with_key(key("a"))
            .with_ticket_price(PRICE)
            .with_coins("a", 3_000 * COIN)
            .with_ticket_balance("a", 8_000 * COIN);
        let outcome = buy_tickets(&ops, &params()).expect("buy pass");
        assert_eq!(outcome.tickets, 1);
        // coins - 2 fees moved across, then one ticket opened from the
        // combined ledger balance.
        assert_eq!(ops.ticket_balance("a"), (8_000 + 2_998 - 10_000) * COIN);
    }

    #[test]
    fn open_caps_at_one_thousand_tickets() {
        let price = 10;
        let ops = StubWalletOps::new()
            .with_key(key("a"))
            .with_ticket_price(price)
            .with_ticket_balance("a", 1_500 * price)
            .with_coins("a", 3 * COIN);
        let outcome = buy_tickets(
            &ops,
            &MinerParams {
                ticket_price: price,
                ..MinerParams::default()
            },
        )
        .expect("buy pass");
        assert_eq!(outcome.tickets, TICKETS_PER_OPEN_MAX);
        assert_eq!(open_counts(&ops), vec![TICKETS_PER_OPEN_MAX]);
        assert_eq!(ops.tickets().len(), TICKETS_PER_OPEN_MAX as usize);
    }

    #[test]
    fn zero_price_params_disable_issuance() {
        let ops = StubWalletOps::new()
            .with_key(key("a"))
            .with_coins("a", 1_000_000 * COIN);
        let outcome = buy_tickets(&ops, &MinerParams::default()).expect("buy pass");
        assert_eq!(outcome.tickets, 0);
        assert!(ops.actions().is_empty());
    }

    #[test]
    fn commitments_hide_the_secret() {
        let secret = [7u8; 32];
        let hashes = commitment_hashes(&secret, 3, 99);
        assert_eq!(hashes.len(), 3);
        // Hashes are distinct per index and never equal to the raw secret.
        assert_ne!(hashes[0], hashes[1]);
        assert_ne!(hashes[1], hashes[2]);
        for hash in &hashes {
            assert_ne!(hash, &secret);
        }
        // Re-derivable by the owner with the same inputs.
        assert_eq!(hashes, commitment_hashes(&secret, 3, 99));
        assert_ne!(hashes, commitment_hashes(&secret, 3, 100));
    }

    #[test]
    fn delegated_purchase_uses_cold_funds() {
        let ops = StubWalletOps::new()
            .with_key(key("hot"))
            .with_ticket_price(PRICE)
            .with_cold_addresses("hot", vec!["cold".to_string()])
            .with_ticket_balance("cold", 2 * PRICE);
        let whitelist = MinerWhitelist::from_entries(&[]);
        let outcome = buy_bound_tickets(&ops, &params(), &whitelist).expect("delegated pass");
        assert_eq!(outcome.tickets, 2);

        let tickets = ops.tickets();
        assert_eq!(tickets.len(), 2);
        for ticket in &tickets {
            assert_eq!(ticket.miner_address, "hot");
            assert_eq!(ticket.return_address, "cold");
        }
        assert_eq!(ops.ticket_balance("cold"), 0);
    }

    #[test]
    fn delegated_purchase_skips_non_whitelisted_cold_addresses() {
        let ops = StubWalletOps::new()
            .with_key(key("hot"))
            .with_ticket_price(PRICE)
            .with_cold_addresses(
                "hot",
                vec!["listed".to_string(), "unlisted".to_string()],
            )
            .with_ticket_balance("listed", PRICE)
            .with_ticket_balance("unlisted", PRICE);
        let whitelist = MinerWhitelist::from_entries(&["listed".to_string()]);
        let outcome = buy_bound_tickets(&ops, &params(), &whitelist).expect("delegated pass");
        assert_eq!(outcome.tickets, 1);
        assert_eq!(ops.ticket_balance("listed"), 0);
        assert_eq!(ops.ticket_balance("unlisted"), PRICE);
    }

    #[test]
    fn unbound_keys_are_silently_skipped() {
        let ops = StubWalletOps::new()
            .with_key(key("hot"))
            .with_ticket_price(PRICE);
        let whitelist = MinerWhitelist::from_entries(&[]);
        let outcome = buy_bound_tickets(&ops, &params(), &whitelist).expect("delegated pass");
        assert_eq!(outcome.tickets, 0);
        assert!(outcome.hashes.is_empty());
    }
}
