//! `mailstash` — incremental, resumable mailbox export.
//!
//! This crate pages through a remote message store, filters and dedups the
//! listing against what is already on disk, and writes each message as an
//! `.eml` file plus a JSON sidecar. The same on-disk layout is read back for
//! resuming, restore planning and verification.

pub mod backup;
pub mod cancel;
pub mod config;
pub mod error;
pub mod export;
pub mod filter;
pub mod model;
pub mod source;
