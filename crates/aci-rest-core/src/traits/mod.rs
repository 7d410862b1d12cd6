//! Core traits for the ACI REST engine
//!
//! - [`Transport`]: issue one REST request against the remote store

pub mod transport;

pub use transport::{Method, Transport};
