//! Height-versioned consensus parameters for the ticket mechanism.
//!
//! Parameters are re-derived on every decision rather than cached across
//! heights, because the chain may change them at configured fork heights. A
//! zero value means the corresponding wait never gates anything; callers rely
//! on that to stay safe around genesis, where no schedule entry applies yet.

use serde::{Deserialize, Serialize};

use crate::types::COIN;

/// Snapshot of the ticket miner parameters in force at one height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerParams {
    /// Escrow required per ticket, in base units.
    pub ticket_price: i64,
    /// Seconds a fresh ticket stays frozen before it may mine.
    pub ticket_frozen_time: i64,
    /// Seconds from creation before a ticket may be closed.
    pub ticket_withdraw_time: i64,
    /// Seconds from the last block a ticket mined before it may be reused
    /// or closed.
    pub ticket_miner_wait_time: i64,
    /// Block reward paid to the miner, in base units.
    pub coin_reward: i64,
    /// Block reward share diverted to the development fund, in base units.
    pub coin_dev_fund: i64,
    /// Seconds a block timestamp may run ahead of wall clock.
    pub future_block_time: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub height: i64,
    pub params: MinerParams,
}

/// Ordered registry of parameter forks. Entries registered later override
/// earlier ones up to the queried height, matching the chain's own
/// height-versioned configuration lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSchedule {
    entries: Vec<ScheduleEntry>,
}

impl ParamSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, height: i64, params: MinerParams) {
        self.entries.push(ScheduleEntry { height, params });
    }

    /// Parameters in force at `height`. An empty schedule yields all-zero
    /// parameters; there is deliberately no error path here.
    pub fn params_at(&self, height: i64) -> MinerParams {
        let mut current = MinerParams::default();
        for entry in &self.entries {
            if entry.height <= height {
                current = entry.params;
            }
        }
        current
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Defaults matching the public chain deployment.
    pub fn mainnet() -> Self {
        let mut schedule = Self::new();
        schedule.register(
            0,
            MinerParams {
                ticket_price: 10_000 * COIN,
                ticket_frozen_time: 43_200,
                ticket_withdraw_time: 172_800,
                ticket_miner_wait_time: 7_200,
                coin_reward: 18 * COIN,
                coin_dev_fund: 12 * COIN,
                future_block_time: 16,
            },
        );
        schedule
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_price(price: i64) -> MinerParams {
        MinerParams {
            ticket_price: price,
            ..MinerParams::default()
        }
    }

    #[test]
    fn empty_schedule_yields_zero_params() {
        let schedule = ParamSchedule::new();
        assert_eq!(schedule.params_at(0), MinerParams::default());
        assert_eq!(schedule.params_at(1_000_000), MinerParams::default());
    }

    #[test]
    fn later_registration_overrides_up_to_height() {
        let mut schedule = ParamSchedule::new();
        schedule.register(0, params_with_price(100));
        schedule.register(500, params_with_price(250));

        assert_eq!(schedule.params_at(0).ticket_price, 100);
        assert_eq!(schedule.params_at(499).ticket_price, 100);
        assert_eq!(schedule.params_at(500).ticket_price, 250);
        assert_eq!(schedule.params_at(10_000).ticket_price, 250);
    }

    #[test]
    fn same_height_registration_prefers_latest() {
        let mut schedule = ParamSchedule::new();
        schedule.register(100, params_with_price(1));
        schedule.register(100, params_with_price(2));
        assert_eq!(schedule.params_at(100).ticket_price, 2);
    }

    #[test]
    fn future_fork_is_invisible_below_activation() {
        let mut schedule = ParamSchedule::new();
        schedule.register(1_000, params_with_price(42));
        assert_eq!(schedule.params_at(999).ticket_price, 0);
    }

    #[test]
    fn mainnet_defaults_are_populated() {
        let params = ParamSchedule::mainnet().params_at(1);
        assert_eq!(params.ticket_price, 10_000 * COIN);
        assert!(params.ticket_withdraw_time > params.ticket_miner_wait_time);
    }
}
