//! OAuth token-refresh backend.
//!
//! Exchanges an API key/secret for tokens via the standard authorization
//! flow (run out-of-band on first setup), then transparently refreshes
//! the persisted token record as it nears expiry. A failed refresh lands
//! in `TokenExpired`, a different remediation path (re-run setup) than a
//! rejected password.

mod adapter;
mod api_types;
mod client;

pub use adapter::OAuthBroker;
pub use api_types::TokenRecord;
