//! Dispatch CRM for an appliance-repair business.
//!
//! Service requests are taken by the call centre (or created automatically by
//! the telephony webhook), assigned to field technicians ("masters") and
//! settled when closed: net proceeds are derived from the amount charged and
//! the expenses, and a payout record is materialised for the technician.

pub mod api;
pub mod auth;
pub mod call_history;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod phone;
pub mod recordings;
pub mod settlement;
pub mod telephony;

pub use error::{Error, Result};
