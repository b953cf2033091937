//! Business logic for the storefront and the admin back office

pub mod audit;
pub mod catalog;
pub mod dashboard;
pub mod ledger;
pub mod notification;
pub mod orders;
pub mod payment_requests;
pub mod settlement;
pub mod telegram_callback;
pub mod users;

pub use notification::{AdminNotifier, LogNotifier, TelegramNotifier};
pub use settlement::{SettlementOutcome, SettlementService};
