//! Server-side sessions for users who completed an OAuth2 login
//!
//! The `SessionIssuer` owns every `AuthenticatedSession`. Session ids are
//! 256-bit random tokens; the id is the only thing handed to the browser.
//!
//! Session lifecycle:
//! 1. Callback handler exchanges the authorization code → `issue()`
//! 2. Every gated request carries the id → `validate()`
//! 3. Logout → `revoke()`
//! 4. TTL elapses → `validate()` reports `Expired` and drops the entry,
//!    or the background sweep evicts it first

pub mod error;
pub mod store;
pub mod sweep;

pub use error::{Error, Result};
pub use store::{AuthenticatedSession, ExpiryPolicy, SessionIssuer};
pub use sweep::{Sweep, spawn_sweep_task};
