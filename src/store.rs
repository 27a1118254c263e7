//! Read-only ticket store queries with not-found smoothing.

use tracing::warn;

use crate::errors::PolicyResult;
use crate::types::{Ticket, TicketStatus};
use crate::wallet_ops::{WalletOps, WalletOpsError};

/// Tickets mined by `address` in the given status. A missing entry is an
/// empty result, not an error; other failures are logged and propagated.
pub fn tickets_by_status(
    ops: &dyn WalletOps,
    address: &str,
    status: TicketStatus,
) -> PolicyResult<Vec<Ticket>> {
    match ops.query_tickets(address, status) {
        Ok(tickets) => Ok(tickets),
        Err(WalletOpsError::NotFound) => Ok(Vec::new()),
        Err(err) => {
            warn!(address, status = status.code(), %err, "ticket query failed");
            Err(err.into())
        }
    }
}

/// Frozen and mining tickets for `address`, as considered by the force-close
/// path. An empty address yields an empty list.
pub fn tickets_for_force_close(ops: &dyn WalletOps, address: &str) -> PolicyResult<Vec<Ticket>> {
    if address.is_empty() {
        return Ok(Vec::new());
    }
    let mut tickets = tickets_by_status(ops, address, TicketStatus::Frozen)?;
    tickets.extend(tickets_by_status(ops, address, TicketStatus::Mining)?);
    Ok(tickets)
}
