//! Operators Hub: mobile top-up storefront backed by a prepaid credit
//! ledger, with an admin back office and Telegram approvals.

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod services;
pub mod workers;
