//! Domain models for the dispatch CRM.
//!
//! # Core Concepts
//!
//! - [`ServiceRequest`]: a customer's repair request ("zayavka"). It carries
//!   the money fields that drive settlement: `total`, `expense`, and the
//!   derived `net` and `technician_share`.
//! - [`Master`]: a field technician assigned to requests.
//! - [`Payout`]: money owed to a technician for a closed request. At most one
//!   per request, created by the settlement rule rather than by clients.
//! - [`User`]: a back-office account (call centre, director, admin).
//!
//! Reference data ([`NamedEntry`] for cities, request types and transaction
//! types; [`AdChannel`]; [`CityPhone`]) is small and city-scoped where noted.

mod finance;
mod reference;
mod request;
mod user;

pub use finance::*;
pub use reference::*;
pub use request::*;
pub use user::*;
