//! Process-wide policy state: one instance per wallet.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{MinerWhitelist, PolicyConfig};
use crate::errors::PolicyResult;
use crate::force_close;
use crate::types::{unix_now, TxHash};
use crate::wallet_ops::WalletOps;

pub(crate) struct PolicyInner {
    /// Set by per-transaction block callbacks, consumed by the block-finish
    /// callbacks.
    pub(crate) needs_flush: bool,
    pub(crate) shutdown: Option<watch::Sender<bool>>,
    pub(crate) worker: Option<JoinHandle<()>>,
}

/// Lifecycle policy for one wallet. Constructed at wallet start-up, driven
/// by the scheduler loop (see [`crate::scheduler`]) and by the wallet's
/// event dispatcher, torn down through [`TicketPolicy::shutdown`].
///
/// The automining and lock flags live outside the mutex: they are flipped
/// from external-event callbacks (wallet lock/unlock, block add/delete) and
/// must not contend with the scheduler's lock on the hot path.
pub struct TicketPolicy {
    pub(crate) config: PolicyConfig,
    pub(crate) whitelist: MinerWhitelist,
    pub(crate) ops: Arc<dyn WalletOps>,
    auto_mining: AtomicBool,
    ticket_locked: AtomicBool,
    /// Unix deadline at which a temporary unlock grant expires; zero means
    /// no grant is pending. Checked on every scheduler tick rather than by
    /// a hidden timer callback, so the re-lock is deterministic.
    relock_at: AtomicI64,
    pub(crate) inner: Mutex<PolicyInner>,
}

impl TicketPolicy {
    /// Ticket mining starts locked; it opens up once the wallet reports an
    /// unlock event.
    pub fn new(config: PolicyConfig, ops: Arc<dyn WalletOps>) -> Self {
        let whitelist = MinerWhitelist::from_config(&config);
        let auto_mining = config.auto_mining;
        Self {
            config,
            whitelist,
            ops,
            auto_mining: AtomicBool::new(auto_mining),
            ticket_locked: AtomicBool::new(true),
            relock_at: AtomicI64::new(0),
            inner: Mutex::new(PolicyInner {
                needs_flush: false,
                shutdown: None,
                worker: None,
            }),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn is_auto_mining(&self) -> bool {
        self.auto_mining.load(Ordering::SeqCst)
    }

    pub fn set_auto_mining(&self, enabled: bool) {
        self.auto_mining.store(enabled, Ordering::SeqCst);
    }

    pub fn is_ticket_locked(&self) -> bool {
        self.ticket_locked.load(Ordering::SeqCst)
    }

    /// Wallet locked: ticket mining stops and consensus caches are flushed.
    pub fn on_wallet_locked(&self) {
        let _ = self
            .ticket_locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst);
        self.relock_at.store(0, Ordering::SeqCst);
        self.flush_tickets();
    }

    /// Wallet (or ticket-only) unlock. A non-zero timeout grants mining
    /// until the deadline, after which the next tick re-locks; a fresh
    /// unlock replaces any earlier grant rather than stacking on it.
    pub fn on_wallet_unlocked(&self, ticket_only: bool, timeout_secs: i64) {
        if ticket_only {
            let _ = self
                .ticket_locked
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst);
            let deadline = if timeout_secs != 0 {
                unix_now() + timeout_secs
            } else {
                0
            };
            self.relock_at.store(deadline, Ordering::SeqCst);
        }
        self.flush_tickets();
    }

    /// Re-locks ticket mining once a temporary unlock grant has expired.
    /// Invoked by the scheduler at the top of every tick.
    pub fn enforce_relock(&self, now: i64) {
        let deadline = self.relock_at.load(Ordering::SeqCst);
        if deadline == 0 || now < deadline {
            return;
        }
        self.relock_at.store(0, Ordering::SeqCst);
        if self
            .ticket_locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("unlock grant expired, ticket mining re-locked");
        }
    }

    /// A transaction touching a wallet address landed in a block; remember
    /// that the ticket set may have changed.
    pub fn on_block_tx(&self, from_wallet: bool) {
        if from_wallet {
            self.inner.lock().needs_flush = true;
        }
    }

    /// Block fully applied. Fresh tickets sit out their lock window anyway,
    /// so no flush is needed here; the pending marker is simply cleared.
    pub fn on_block_added(&self) {
        self.inner.lock().needs_flush = false;
    }

    /// Block rolled back. A reorg can resurrect or destroy tickets, so a
    /// pending marker forces a consensus flush.
    pub fn on_block_removed(&self) {
        let pending = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.needs_flush)
        };
        if pending {
            self.flush_tickets();
        }
    }

    /// An imported key may own tickets the consensus side has never seen.
    pub fn on_key_imported(&self) {
        self.flush_tickets();
    }

    pub(crate) fn flush_tickets(&self) {
        debug!("flushing consensus ticket caches");
        self.ops.notify_ticket_flush();
    }

    /// Administrative force close, outside the periodic loop. See
    /// [`force_close::force_close`] for the grouping rules.
    pub fn force_close(
        &self,
        height: i64,
        miner_address: Option<&str>,
    ) -> PolicyResult<Vec<TxHash>> {
        let params = self.config.params.params_at(height);
        force_close::force_close(self.ops.as_ref(), &params, unix_now(), miner_address)
    }

    /// Whether the scheduler worker is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.lock().worker.is_some()
    }
}
