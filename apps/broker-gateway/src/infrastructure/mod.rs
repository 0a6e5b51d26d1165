//! Backend adapter implementations.
//!
//! One module per supported authentication protocol: `credential` for
//! username/password backends with device verification, `oauth` for API
//! key/secret backends with refreshing tokens.

pub mod credential;
pub mod oauth;
