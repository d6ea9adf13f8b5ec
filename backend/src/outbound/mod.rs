//! Outbound adapters implementing the domain's driven ports.
//!
//! - [`persistence`]: PostgreSQL through diesel-async.
//! - [`memory`]: in-process store and channel for development and tests.
//! - [`mail`]: template files and mail delivery.
//! - [`crypto`]: password KDF.

pub mod crypto;
pub mod mail;
pub mod memory;
pub mod persistence;
