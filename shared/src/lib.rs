//! Types shared by every Tidewater crate: configuration, errors and the
//! upstream message model.

pub mod config;
pub mod error;
pub mod message;
