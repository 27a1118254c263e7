//! Keeps every mining account solvent for transaction fees.

use tracing::{info, warn};

use crate::errors::PolicyResult;
use crate::types::{WalletKey, COIN};
use crate::wallet_ops::{ticket_exec_address, Ledger, WalletOps};

/// Tops up the spendable balance of every wallet key from its ticket-ledger
/// balance. A transfer of exactly one coin fires only when the spendable
/// balance has dropped below half a coin and the ticket ledger can afford
/// it, so no more than necessary ever leaves escrow.
///
/// Failures for one account do not stop the others; the last error is
/// surfaced after every account was attempted.
pub fn balance_fees(ops: &dyn WalletOps) -> PolicyResult<()> {
    let keys = ops.wallet_keys()?;
    let mut last_err = None;
    for key in &keys {
        if let Err(err) = balance_fee_for_key(ops, key) {
            warn!(address = %key.address, %err, "fee top-up failed");
            last_err = Some(err);
        }
    }
    match last_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn balance_fee_for_key(ops: &dyn WalletOps, key: &WalletKey) -> PolicyResult<()> {
    let coins = ops.balance(&key.address, Ledger::Coins)?;
    let ticket = ops.balance(&key.address, Ledger::Ticket)?;
    if coins < COIN / 2 && ticket > COIN {
        info!(address = %key.address, "topping up fee balance from ticket ledger");
        ops.send_transfer(key, ticket_exec_address(), -COIN, "ticket->coins")?;
    }
    Ok(())
}
