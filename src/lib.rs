//! feedgate library
//!
//! Exposes the gateway's modules so the binary and integration tests share
//! one router, one config layer and one set of upstream clients.

pub mod api;
pub mod cache;
pub mod cli;
pub mod data;
pub mod error;
pub mod fallback;
pub mod filter;
pub mod sanitize;
pub mod upstream;
