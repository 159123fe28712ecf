//! On-disk backup layout: enumeration, dedup index, snapshots, restore
//! planning and integrity checks.
//!
//! A backup directory holds, per exported message:
//! - `<id>.metadata.json` sidecar (always, written last)
//! - `<id>.eml` when the message was fully assembled
//! - `<id>/` with salvaged parts when it was not

pub mod index;
pub mod restore;
pub mod snapshots;
pub mod verify;
pub mod walk;

pub use index::{AlwaysMissing, BackupIndex, DedupOracle};
pub use restore::{RestoreItem, RestorePlan, RestoreState};
pub use snapshots::{latest_snapshot, list_snapshots, snapshot_dir_name, SNAPSHOT_PREFIX};
pub use verify::{verify_backup, VerifyReport};
pub use walk::{walk_backup_dir, BackupEntry};
