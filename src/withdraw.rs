//! Liquidates the ticket sub-ledger when mining is disabled.

use tracing::{info, warn};

use crate::errors::PolicyResult;
use crate::types::{TxHash, WalletKey};
use crate::wallet_ops::{ticket_exec_address, Ledger, WalletOps};

/// Moves every wallet key's full ticket-ledger balance back to spendable
/// coins. One transaction per account; failures are logged and do not block
/// other accounts.
pub fn withdraw_ticket_balances(ops: &dyn WalletOps) -> PolicyResult<Vec<TxHash>> {
    let keys = ops.wallet_keys()?;
    let mut hashes = Vec::new();
    for key in &keys {
        match withdraw_for_key(ops, key) {
            Ok(Some(hash)) => hashes.push(hash),
            Ok(None) => {}
            Err(err) => {
                warn!(address = %key.address, %err, "ticket withdrawal failed");
            }
        }
    }
    Ok(hashes)
}

fn withdraw_for_key(ops: &dyn WalletOps, key: &WalletKey) -> PolicyResult<Option<TxHash>> {
    let balance = ops.balance(&key.address, Ledger::Ticket)?;
    if balance <= 0 {
        return Ok(None);
    }
    info!(address = %key.address, balance, "withdrawing ticket balance");
    let hash = ops.send_transfer(key, ticket_exec_address(), -balance, "autominer->withdraw")?;
    Ok(Some(hash))
}
