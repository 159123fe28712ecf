//! End-to-end tests of the export pipeline, resume, restore and verification.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assert_fs::prelude::*;
use async_trait::async_trait;
use predicates::prelude::*;

use mailstash::backup::{
    list_snapshots, snapshot_dir_name, verify_backup, walk_backup_dir, BackupIndex, DedupOracle,
    RestorePlan, RestoreState,
};
use mailstash::cancel::CancelToken;
use mailstash::error::{ExportError, Result};
use mailstash::export::{
    DecryptOutcome, Decryptor, ExportOptions, Exporter, NoProgress, PlaintextDecryptor,
    ProgressReporter,
};
use mailstash::filter::{parse_filter_query, FilterSpec, ServerFilter};
use mailstash::model::message::{FullMessage, MessageMetadata};
use mailstash::model::record::{ExportRecord, WriterOutcome};
use mailstash::source::{DumpStore, MessageStore};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn mailbox() -> Arc<DumpStore> {
    Arc::new(DumpStore::load(&fixture("mailbox.json")).unwrap())
}

fn small_pages() -> ExportOptions {
    ExportOptions {
        page_size: 3,
        batch_size: 2,
        queue_capacity: 1,
    }
}

fn exporter(store: Arc<dyn MessageStore>, decryptor: Arc<dyn Decryptor>) -> Exporter {
    Exporter::new(store, decryptor, small_pages())
}

fn sidecar_ids(dir: &Path) -> Vec<String> {
    let mut ids = Vec::new();
    walk_backup_dir(dir, &CancelToken::new(), &mut |e| ids.push(e.id.clone())).unwrap();
    ids
}

#[derive(Default)]
struct CountingReporter {
    dropped: Mutex<Vec<usize>>,
    exported: AtomicUsize,
}

impl ProgressReporter for CountingReporter {
    fn on_progress(&self, count: usize) {
        self.dropped.lock().unwrap().push(count);
    }

    fn on_exported(&self, _outcome: WriterOutcome) {
        self.exported.fetch_add(1, Ordering::Relaxed);
    }
}

// ─── Full export and resume ─────────────────────────────────────────

#[tokio::test]
async fn test_full_export_writes_every_message() {
    let out = assert_fs::TempDir::new().unwrap();
    let progress = Arc::new(CountingReporter::default());

    let summary = exporter(mailbox(), Arc::new(PlaintextDecryptor))
        .run(&FilterSpec::default(), out.path(), progress.clone(), CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.complete, 8);
    assert_eq!(summary.skipped, 0);
    assert!(summary.bytes_written > 0);
    assert_eq!(progress.exported.load(Ordering::Relaxed), 8);
    assert!(progress.dropped.lock().unwrap().is_empty());

    for n in 1..=8 {
        out.child(format!("m0{n}.eml")).assert(predicate::path::is_file());
        out.child(format!("m0{n}.metadata.json"))
            .assert(predicate::str::contains("\"outcome\": \"assembled_complete\""));
    }
    out.child("m04.eml")
        .assert(predicate::str::contains("invoice-march.txt"));
    out.child("m08.eml")
        .assert(predicate::str::is_match("(?i)Subject: =\\?utf-8\\?b\\?").unwrap());
    out.child("m06.eml")
        .assert(predicate::str::contains("Content-Type: text/html; charset=utf-8"));
}

#[tokio::test]
async fn test_rerun_exports_nothing_new() {
    let out = assert_fs::TempDir::new().unwrap();
    let exporter = exporter(mailbox(), Arc::new(PlaintextDecryptor));
    exporter
        .run(&FilterSpec::default(), out.path(), Arc::new(NoProgress), CancelToken::new())
        .await
        .unwrap();
    let before = std::fs::read(out.child("m03.metadata.json").path()).unwrap();

    let progress = Arc::new(CountingReporter::default());
    let summary = exporter
        .run(&FilterSpec::default(), out.path(), progress.clone(), CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.exported(), 0);
    assert_eq!(summary.skipped, 8);
    // One report per page of three: 3 + 3 + 2
    assert_eq!(*progress.dropped.lock().unwrap(), vec![3, 3, 2]);
    let after = std::fs::read(out.child("m03.metadata.json").path()).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_resume_after_partial_export() {
    let out = assert_fs::TempDir::new().unwrap();
    let exporter = exporter(mailbox(), Arc::new(PlaintextDecryptor));

    let first = parse_filter_query("label:0").unwrap();
    let summary = exporter
        .run(&first, out.path(), Arc::new(NoProgress), CancelToken::new())
        .await
        .unwrap();
    assert_eq!(summary.complete, 5);

    let summary = exporter
        .run(&FilterSpec::default(), out.path(), Arc::new(NoProgress), CancelToken::new())
        .await
        .unwrap();
    assert_eq!(summary.complete, 3);
    assert_eq!(summary.skipped, 5);
    assert_eq!(sidecar_ids(out.path()).len(), 8);
}

// ─── Filtering ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_label_filter_exports_matching_only() {
    let out = assert_fs::TempDir::new().unwrap();
    let spec = FilterSpec {
        label_ids: vec!["2".into()],
        ..Default::default()
    };
    exporter(mailbox(), Arc::new(PlaintextDecryptor))
        .run(&spec, out.path(), Arc::new(NoProgress), CancelToken::new())
        .await
        .unwrap();
    assert_eq!(sidecar_ids(out.path()), vec!["m03", "m08"]);
}

#[tokio::test]
async fn test_domain_and_date_filters() {
    let out = assert_fs::TempDir::new().unwrap();
    let spec = parse_filter_query("domain:example.org before:2024-05-01").unwrap();
    let summary = exporter(mailbox(), Arc::new(PlaintextDecryptor))
        .run(&spec, out.path(), Arc::new(NoProgress), CancelToken::new())
        .await
        .unwrap();
    // m06 is from example.org but sits exactly on the exclusive bound
    assert_eq!(sidecar_ids(out.path()), vec!["m01", "m02", "m04"]);
    assert_eq!(summary.skipped, 5);
}

#[tokio::test]
async fn test_invalid_filter_rejected_before_start() {
    let out = assert_fs::TempDir::new().unwrap();
    let spec = FilterSpec {
        after: Some(200),
        before: Some(100),
        ..Default::default()
    };
    let err = exporter(mailbox(), Arc::new(PlaintextDecryptor))
        .run(&spec, out.path(), Arc::new(NoProgress), CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::InvalidFilter(_)));
    assert!(sidecar_ids(out.path()).is_empty());
}

// ─── Partial outcomes ───────────────────────────────────────────────

/// No key for some ids; one attachment of another id is undecryptable.
struct SelectiveDecryptor {
    no_key: HashSet<&'static str>,
    broken_attachment: &'static str,
    corrupt: &'static str,
}

impl Decryptor for SelectiveDecryptor {
    fn decrypt(&self, message: &FullMessage) -> DecryptOutcome {
        let id = message.metadata.id.as_str();
        if self.no_key.contains(id) {
            return DecryptOutcome::MissingKey;
        }
        if id == self.corrupt {
            return DecryptOutcome::Corrupt("bad packet".into());
        }
        match PlaintextDecryptor.decrypt(message) {
            DecryptOutcome::Decrypted(mut msg) if id == self.broken_attachment => {
                msg.attachments[0].data = None;
                DecryptOutcome::Decrypted(msg)
            }
            other => other,
        }
    }
}

#[tokio::test]
async fn test_partial_outcomes_are_not_errors() {
    let out = assert_fs::TempDir::new().unwrap();
    let decryptor = SelectiveDecryptor {
        no_key: ["m03"].into_iter().collect(),
        broken_attachment: "m05",
        corrupt: "m07",
    };
    let summary = exporter(mailbox(), Arc::new(decryptor))
        .run(&FilterSpec::default(), out.path(), Arc::new(NoProgress), CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.complete, 5);
    assert_eq!(summary.missing_key, 1);
    assert_eq!(summary.failed_to_assemble, 2);

    out.child("m03/body.pgp").assert(predicate::path::is_file());
    out.child("m03.eml").assert(predicate::path::missing());
    out.child("m03.metadata.json")
        .assert(predicate::str::contains("missing_decryption_key"));

    out.child("m05/body.txt").assert(predicate::path::is_file());
    out.child("m05/attachment_2_hills.png").assert(predicate::path::is_file());
    out.child("m05/attachment_1_beach.png").assert(predicate::path::missing());
    out.child("m05.metadata.json")
        .assert(predicate::str::contains("failed_to_assemble"));

    out.child("m07/body.pgp").assert(predicate::path::is_file());

    // Partial exports still count as exported on the next run
    let summary = exporter(mailbox(), Arc::new(PlaintextDecryptor))
        .run(&FilterSpec::default(), out.path(), Arc::new(NoProgress), CancelToken::new())
        .await
        .unwrap();
    assert_eq!(summary.exported(), 0);
}

// ─── Error policy ───────────────────────────────────────────────────

/// Serves the first page, then fails every later request.
struct FailsAfterFirstPage {
    inner: Arc<DumpStore>,
    calls: AtomicUsize,
}

#[async_trait]
impl MessageStore for FailsAfterFirstPage {
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
        filter: &ServerFilter,
    ) -> Result<Vec<MessageMetadata>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(ExportError::Transport("503 service unavailable".into()));
        }
        self.inner.fetch_page(cursor, page_size, filter).await
    }

    async fn fetch_message(&self, id: &str) -> Result<FullMessage> {
        self.inner.fetch_message(id).await
    }
}

#[tokio::test]
async fn test_transport_error_is_the_single_result() {
    let out = assert_fs::TempDir::new().unwrap();
    let store = Arc::new(FailsAfterFirstPage {
        inner: mailbox(),
        calls: AtomicUsize::new(0),
    });
    let cancel = CancelToken::new();
    let err = exporter(store.clone(), Arc::new(PlaintextDecryptor))
        .run(&FilterSpec::default(), out.path(), Arc::new(NoProgress), cancel.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::Transport(ref m) if m.contains("503")));
    assert!(cancel.is_cancelled());
    // The metadata stage stops at the failing page
    assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    assert!(sidecar_ids(out.path()).len() <= 3);
}

/// Fails the check for one id, knows nothing else.
struct FlakyIndex;

impl DedupOracle for FlakyIndex {
    fn has_message(&self, id: &str) -> Result<bool> {
        if id == "m02" {
            return Err(ExportError::DedupCheck {
                id: id.into(),
                reason: "permission denied".into(),
            });
        }
        Ok(false)
    }
}

#[tokio::test]
async fn test_dedup_error_does_not_abort() {
    let out = assert_fs::TempDir::new().unwrap();
    let summary = exporter(mailbox(), Arc::new(PlaintextDecryptor))
        .run_with_oracle(
            &FilterSpec::default(),
            out.path(),
            Arc::new(FlakyIndex),
            Arc::new(NoProgress),
            CancelToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.complete, 7);
    assert_eq!(summary.check_errors, 1);
    out.child("m02.metadata.json").assert(predicate::path::missing());
}

/// Lists `m03` under an id that climbs out of the backup directory.
struct TraversingIds {
    inner: Arc<DumpStore>,
}

const HOSTILE_ID: &str = "../m03";

#[async_trait]
impl MessageStore for TraversingIds {
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
        filter: &ServerFilter,
    ) -> Result<Vec<MessageMetadata>> {
        let cursor = cursor.map(|c| if c == HOSTILE_ID { "m03" } else { c });
        let mut page = self.inner.fetch_page(cursor, page_size, filter).await?;
        for meta in &mut page {
            if meta.id == "m03" {
                meta.id = HOSTILE_ID.into();
            }
        }
        Ok(page)
    }

    async fn fetch_message(&self, id: &str) -> Result<FullMessage> {
        let real = if id == HOSTILE_ID { "m03" } else { id };
        let mut msg = self.inner.fetch_message(real).await?;
        msg.metadata.id = id.into();
        Ok(msg)
    }
}

#[tokio::test]
async fn test_traversing_id_skipped_without_escaping() {
    let root = assert_fs::TempDir::new().unwrap();
    let out = root.child("backup");
    let summary = exporter(
        Arc::new(TraversingIds { inner: mailbox() }),
        Arc::new(PlaintextDecryptor),
    )
    .run(&FilterSpec::default(), out.path(), Arc::new(NoProgress), CancelToken::new())
    .await
    .unwrap();

    assert_eq!(summary.complete, 7);
    assert_eq!(summary.check_errors, 1);
    root.child("m03.eml").assert(predicate::path::missing());
    root.child("m03.metadata.json").assert(predicate::path::missing());
    root.child("m03").assert(predicate::path::missing());
    out.child("m03.metadata.json").assert(predicate::path::missing());
}

#[test]
fn test_dump_with_repeated_id_rejected() {
    let dump = br#"{"messages":[
        {"id":"x","time":3,"sender":"a@example.com"},
        {"id":"y","time":2,"sender":"a@example.com"},
        {"id":"x","time":1,"sender":"a@example.com"}
    ]}"#;
    let err = DumpStore::from_json(dump).unwrap_err();
    assert!(matches!(err, ExportError::InvalidRecord { .. }));
}

#[tokio::test]
async fn test_cancelled_run_reports_cancellation() {
    let out = assert_fs::TempDir::new().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = exporter(mailbox(), Arc::new(PlaintextDecryptor))
        .run(&FilterSpec::default(), out.path(), Arc::new(NoProgress), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Cancelled));
}

// ─── Walker, snapshots, restore, verify ─────────────────────────────

#[test]
fn test_walker_synthesizes_content_path_for_partial() {
    let root = assert_fs::TempDir::new().unwrap();
    let complete = ExportRecord::new(
        MessageMetadata {
            id: "done".into(),
            ..Default::default()
        },
        WriterOutcome::AssembledComplete,
        None,
    );
    complete.write(root.path()).unwrap();
    root.child("done.eml").write_str("message").unwrap();

    let partial = ExportRecord::new(
        MessageMetadata {
            id: "broken".into(),
            ..Default::default()
        },
        WriterOutcome::FailedToAssemble,
        None,
    );
    partial.write(root.path()).unwrap();
    root.child("broken/body.txt").write_str("body").unwrap();

    let walk = || {
        let mut seen = Vec::new();
        walk_backup_dir(root.path(), &CancelToken::new(), &mut |e| {
            seen.push((e.id.clone(), e.content_path.clone()))
        })
        .unwrap();
        seen
    };
    let first = walk();
    assert_eq!(
        first,
        vec![
            ("broken".to_string(), root.path().join("broken.eml")),
            ("done".to_string(), root.path().join("done.eml")),
        ]
    );
    assert!(!first[0].1.exists());
    assert_eq!(first, walk());
}

#[tokio::test]
async fn test_snapshot_runs_and_restore_plan() {
    let root = assert_fs::TempDir::new().unwrap();
    let exporter = exporter(mailbox(), Arc::new(PlaintextDecryptor));

    // First run straight into the root
    let first = parse_filter_query("label:5").unwrap();
    exporter
        .run(&first, root.path(), Arc::new(NoProgress), CancelToken::new())
        .await
        .unwrap();

    // Second run into a snapshot, deduped against the whole tree
    let cancel = CancelToken::new();
    let index = BackupIndex::build_tree(root.path(), &cancel).unwrap();
    assert_eq!(index.len(), 2);
    let snapshot = root.path().join(snapshot_dir_name(chrono::Utc::now()));
    let summary = exporter
        .run_with_oracle(
            &FilterSpec::default(),
            &snapshot,
            Arc::new(index),
            Arc::new(NoProgress),
            cancel.clone(),
        )
        .await
        .unwrap();
    assert_eq!(summary.complete, 6);
    assert_eq!(list_snapshots(root.path(), &cancel).unwrap(), vec![snapshot.clone()]);

    let plan = RestorePlan::build(root.path(), &cancel).unwrap();
    assert_eq!(plan.items.len(), 8);
    assert_eq!(plan.count(RestoreState::Complete), 8);
    let m02 = plan
        .items
        .iter()
        .find(|i| i.record.message.id == "m02")
        .unwrap();
    assert_eq!(m02.source_dir, root.path());
}

#[tokio::test]
async fn test_verify_flags_tampered_message() {
    let out = assert_fs::TempDir::new().unwrap();
    exporter(mailbox(), Arc::new(PlaintextDecryptor))
        .run(&FilterSpec::default(), out.path(), Arc::new(NoProgress), CancelToken::new())
        .await
        .unwrap();

    let report = verify_backup(out.path(), &CancelToken::new()).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.ok, 8);

    out.child("m04.eml").write_str("tampered").unwrap();
    std::fs::remove_file(out.child("m07.eml").path()).unwrap();

    let report = verify_backup(out.path(), &CancelToken::new()).unwrap();
    assert_eq!(report.mismatched, vec!["m04"]);
    assert_eq!(report.missing_content, vec!["m07"]);
    assert!(!report.is_clean());
}
