//! Credential + device-verification backend.
//!
//! Authenticates with a username/password pair. The backend may demand
//! out-of-band device approval before minting a session token; the
//! adapter polls for that approval under a hard timeout. Sessions are
//! persisted to disk and restored across restarts.

mod adapter;
mod api_types;
mod client;

pub use adapter::CredentialSessionBroker;
pub use api_types::SessionBlob;
