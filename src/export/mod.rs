//! The staged export pipeline.
//!
//! [`Exporter`] drives four stages over bounded queues: metadata (paginate,
//! dedup, filter), fetch, decrypt, and write. Collaborators are injected as
//! traits so stores and decryptors can be swapped for test doubles.

pub mod decrypt;
pub mod eml;
pub mod fetch;
pub mod metadata;
pub mod pipeline;
pub mod stage;
pub mod writer;

pub use decrypt::{
    DecryptOutcome, DecryptedAttachment, DecryptedMessage, Decryptor, PlaintextDecryptor, WriteJob,
};
pub use eml::assemble_eml;
pub use pipeline::{ExportOptions, ExportSummary, Exporter};
pub use stage::{ErrorReporter, NoProgress, ProgressReporter, StageContext};
pub use writer::write_message;
