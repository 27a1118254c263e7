//! Periodic decision loop driving the ticket lifecycle.
//!
//! Exactly one background worker runs the loop. Every ledger-mutating call
//! it makes is confirmed before the next step, so within one tick the
//! ordering is strict: close, confirm, balance fees, buy, confirm. The
//! interval only re-arms after a cycle returns, so ticks never overlap.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::fees;
use crate::issuer::{self, IssueOutcome};
use crate::policy::TicketPolicy;
use crate::reaper;
use crate::types::unix_now;
use crate::withdraw;

/// What one cycle did; used for the flush decision and by tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Close transactions emitted.
    pub closed: usize,
    /// Tickets opened across direct and delegated issuance.
    pub bought: i64,
    /// Withdrawal transactions emitted (idle cycle only).
    pub withdrawn: usize,
}

impl TicketPolicy {
    /// Starts the mining loop. Exits immediately, and permanently, when the
    /// configured consensus mechanism is not the ticket mechanism.
    pub fn start(self: &Arc<Self>) {
        if !self.config.consensus_is_ticket() {
            info!(
                consensus = %self.config.consensus,
                "consensus is not ticket, auto mining loop not started"
            );
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(Arc::clone(self).run(shutdown_rx));
        let mut inner = self.inner.lock();
        inner.shutdown = Some(shutdown_tx);
        inner.worker = Some(worker);
    }

    /// Stops the loop and waits for the worker to drain. Idempotent.
    pub async fn shutdown(&self) {
        let (shutdown, worker) = {
            let mut inner = self.inner.lock();
            (inner.shutdown.take(), inner.worker.take())
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                debug!(?err, "ticket policy worker exited with error");
            }
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let wait = self.config.wait_interval();
        info!(wait_secs = wait.as_secs(), "ticket policy loop started");
        let mut ticker = time::interval(wait);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut low_water = 0i64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // The cycle drives the blocking collaborator surface
                    // (confirmation waits can take minutes), so it must not
                    // occupy a runtime worker thread. Awaiting the handle
                    // keeps ticks from overlapping.
                    let policy = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || policy.tick(low_water)).await {
                        Ok(mark) => low_water = mark,
                        Err(err) => warn!(?err, "ticket cycle panicked"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("ticket policy loop stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One scheduler tick. Returns the new low-water height mark.
    ///
    /// The cycle is skipped, with the loop kept alive, while mining is
    /// administratively disabled, the chain is not caught up (unless force
    /// mining is set), the height has not advanced past `low_water`, or
    /// ticket mining is locked. A locked tick does not advance the mark, so
    /// the skipped height is retried once the wallet unlocks.
    pub fn tick(&self, low_water: i64) -> i64 {
        if self.config.miner_disable {
            debug!("mining administratively disabled, skipping cycle");
            return low_water;
        }
        if !(self.ops.is_caught_up() || self.config.force_mining) {
            warn!("chain not caught up, skipping cycle");
            return low_water;
        }
        let height = self.ops.chain_height();
        if height <= low_water {
            debug!(height, low_water, "height has not advanced, skipping cycle");
            return low_water;
        }
        let now = unix_now();
        self.enforce_relock(now);
        if self.is_ticket_locked() {
            debug!(height, "ticket mining locked, skipping cycle");
            return low_water;
        }
        self.run_cycle(height + 1, now);
        height
    }

    /// Runs one full cycle at `height`: the mining cycle when automining is
    /// enabled, otherwise the idle cycle that liquidates the ticket ledger.
    /// Component failures are logged and never abort the cycle.
    pub fn run_cycle(&self, height: i64, now: i64) -> CycleSummary {
        let params = self.config.params.params_at(height);
        let ops = self.ops.as_ref();
        let mut summary = CycleSummary::default();
        info!(height, auto_mining = self.is_auto_mining(), "ticket cycle begin");

        let closed = match reaper::close_mature_tickets(ops, &params, now) {
            Ok(hashes) => hashes,
            Err(err) => {
                warn!(%err, "close pass failed");
                Vec::new()
            }
        };
        if !closed.is_empty() {
            // Released principal must be confirmed before it can fund buys.
            if let Err(err) = ops.wait_for_confirmations(&closed) {
                warn!(%err, "close confirmation failed");
            }
        }
        summary.closed = closed.len();

        if let Err(err) = fees::balance_fees(ops) {
            warn!(%err, "fee pass failed");
        }

        if self.is_auto_mining() {
            let direct = issuer::buy_tickets(ops, &params).unwrap_or_else(|err| {
                warn!(%err, "direct issuance failed");
                IssueOutcome::default()
            });
            let delegated =
                issuer::buy_bound_tickets(ops, &params, &self.whitelist).unwrap_or_else(|err| {
                    warn!(%err, "delegated issuance failed");
                    IssueOutcome::default()
                });
            let mut buys = direct.hashes;
            buys.extend(delegated.hashes);
            if !buys.is_empty() {
                if let Err(err) = ops.wait_for_confirmations(&buys) {
                    warn!(%err, "buy confirmation failed");
                }
            }
            summary.bought = direct.tickets + delegated.tickets;
            if summary.closed > 0 || summary.bought > 0 {
                self.flush_tickets();
            }
        } else {
            let withdrawals = withdraw::withdraw_ticket_balances(ops).unwrap_or_else(|err| {
                warn!(%err, "withdrawal pass failed");
                Vec::new()
            });
            if !withdrawals.is_empty() {
                if let Err(err) = ops.wait_for_confirmations(&withdrawals) {
                    warn!(%err, "withdrawal confirmation failed");
                }
            }
            summary.withdrawn = withdrawals.len();
            if summary.closed > 0 {
                self.flush_tickets();
            }
        }

        info!(
            height,
            closed = summary.closed,
            bought = summary.bought,
            withdrawn = summary.withdrawn,
            "ticket cycle end"
        );
        summary
    }
}
