//! Foxya Ledger - wallet ledger and transfer engine
//!
//! Balance-conserving money movement for the rewards platform:
//!
//! - [`wallet`] - per-user, per-currency balances with atomic conditional
//!   debit/credit/lock/unlock primitives
//! - [`transfer`] - internal transfers, external withdrawals and their state
//!   machine, validation and orchestration
//! - [`outbox`] - Redis-backed event outbox: pub/sub notification, durable
//!   streams with consumer groups, delayed delivery
//! - [`gateway`] - axum HTTP API over the transfer service
//! - [`auth`] - JWT bearer authentication
//! - [`currency`] - chain-scoped currency registry

pub mod auth;
pub mod config;
pub mod currency;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod outbox;
pub mod transfer;
pub mod wallet;

pub use config::AppConfig;
pub use db::Database;
