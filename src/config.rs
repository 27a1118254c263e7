use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{PolicyError, PolicyResult};
use crate::params::ParamSchedule;
use crate::types::TICKET_EXEC_NAME;

pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(120);

/// Static configuration for the ticket policy, loaded once at wallet
/// start-up. There is no package-level mutable state; a single instance is
/// passed by reference into the scheduler and all component functions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Consensus mechanism in effect. The policy loop exits permanently at
    /// start-up unless this names the ticket mechanism.
    pub consensus: String,
    /// Interval between scheduler ticks, e.g. `"30s"`, `"2m"`, `"1h"`.
    /// Unparseable values fall back to [`DEFAULT_WAIT_INTERVAL`].
    pub wait_interval: String,
    /// Run mining cycles even while the chain reports it is not caught up.
    pub force_mining: bool,
    /// Administratively disable all cycles while keeping the loop alive.
    pub miner_disable: bool,
    /// Whether ticket buying starts enabled. Toggled at runtime through
    /// [`crate::policy::TicketPolicy::set_auto_mining`].
    pub auto_mining: bool,
    /// Cold addresses permitted as delegated funding sources. Empty or
    /// `["*"]` allows every bound address.
    pub miner_whitelist: Vec<String>,
    /// Height-versioned ticket parameters.
    pub params: ParamSchedule,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            consensus: TICKET_EXEC_NAME.to_string(),
            wait_interval: "2m".to_string(),
            force_mining: false,
            miner_disable: false,
            auto_mining: false,
            miner_whitelist: Vec::new(),
            params: ParamSchedule::mainnet(),
        }
    }
}

impl PolicyConfig {
    pub fn load(path: &Path) -> PolicyResult<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| PolicyError::Config(format!("unable to parse config: {err}")))
    }

    pub fn save(&self, path: &Path) -> PolicyResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| PolicyError::Config(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    /// Tick interval with fallback on malformed duration strings.
    pub fn wait_interval(&self) -> Duration {
        match parse_interval(&self.wait_interval) {
            Some(duration) => duration,
            None => {
                warn!(
                    value = %self.wait_interval,
                    "invalid wait interval, using default"
                );
                DEFAULT_WAIT_INTERVAL
            }
        }
    }

    pub fn consensus_is_ticket(&self) -> bool {
        self.consensus.trim() == TICKET_EXEC_NAME
    }
}

fn parse_interval(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    let millis = match unit {
        "ms" => value,
        "" | "s" => value.checked_mul(1_000)?,
        "m" => value.checked_mul(60_000)?,
        "h" => value.checked_mul(3_600_000)?,
        _ => return None,
    };
    if millis == 0 {
        return None;
    }
    Some(Duration::from_millis(millis))
}

/// Addresses permitted to act as delegated (cold) funding sources. Built
/// once from configuration and read-only afterwards.
#[derive(Clone, Debug)]
pub struct MinerWhitelist {
    wildcard: bool,
    addresses: HashSet<String>,
}

impl MinerWhitelist {
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::from_entries(&config.miner_whitelist)
    }

    pub fn from_entries(entries: &[String]) -> Self {
        let wildcard = entries.is_empty() || (entries.len() == 1 && entries[0] == "*");
        let addresses = if wildcard {
            HashSet::new()
        } else {
            entries.iter().cloned().collect()
        };
        Self {
            wildcard,
            addresses,
        }
    }

    pub fn allows(&self, address: &str) -> bool {
        self.wildcard || self.addresses.contains(address)
    }
}
