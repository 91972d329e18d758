//! Data models for the connection ledger
//!
//! These models are shared with the presentation layer as JSON.

pub mod connection;
pub mod filter;

pub use connection::*;
pub use filter::*;
