//! Core data model: message metadata, addresses and export records.

pub mod address;
pub mod message;
pub mod record;
