//! Wallet-side lifecycle policy engine for ticket-based consensus deposits.
//!
//! A ticket is a fixed-denomination escrowed deposit that, once mature,
//! grants its miner address the right to participate in block production.
//! This crate automates the participant side of that mechanism: for every
//! key held by a wallet it buys tickets when spendable balance allows,
//! closes tickets once their lock windows elapse, keeps accounts solvent
//! for transaction fees, and liquidates the ticket ledger when mining is
//! disabled.
//!
//! The engine is purely an orchestration layer. Ledger validation, key
//! storage, transaction signing and the RPC transport are consumed through
//! the [`wallet_ops::WalletOps`] trait; [`wallet_ops::StubWalletOps`]
//! provides an in-memory implementation for tests and local harnesses.
//!
//! Applications construct a [`config::PolicyConfig`], wrap their node and
//! wallet services in a `WalletOps` implementation, and drive everything
//! through [`policy::TicketPolicy`], which owns the periodic decision loop
//! defined in [`scheduler`].

pub mod config;
pub mod errors;
pub mod fees;
pub mod force_close;
pub mod issuer;
pub mod params;
pub mod policy;
pub mod reaper;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod wallet_ops;
pub mod withdraw;

pub use config::{MinerWhitelist, PolicyConfig};
pub use errors::{PolicyError, PolicyResult};
pub use params::{MinerParams, ParamSchedule};
pub use policy::TicketPolicy;
pub use types::{Ticket, TicketStatus, TxHash, WalletKey};
pub use wallet_ops::{StubWalletOps, WalletOps};
