use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::path::Path;

use mailstash::filter::{matching_indices, parse_filter_query};
use mailstash::model::address::EmailAddress;
use mailstash::model::message::MessageMetadata;
use mailstash::source::DumpStore;

fn synthetic_mailbox(n: usize) -> Vec<MessageMetadata> {
    (0..n)
        .map(|i| MessageMetadata {
            id: format!("msg{i:06}"),
            time: 1_700_000_000 + (i as i64) * 3_600,
            label_ids: vec![(i % 7).to_string()],
            sender: Some(EmailAddress::new(format!("user{}@domain{}.com", i % 50, i % 5))),
            to: vec![EmailAddress::new("archive@example.org")],
            subject: format!("Report {} for week {}", i % 13, i % 52),
            ..Default::default()
        })
        .collect()
}

fn bench_filter_synthetic(c: &mut Criterion) {
    let messages = synthetic_mailbox(10_000);
    let spec = parse_filter_query("label:0,3 domain:domain2.com after:2023-12-01 report").unwrap();

    c.bench_function("filter_10k_messages", |b| {
        b.iter(|| matching_indices(black_box(&messages), black_box(&spec)))
    });
}

fn bench_filter_fixture(c: &mut Criterion) {
    let fixture_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("mailbox.json");
    let messages = DumpStore::load(&fixture_path).unwrap().metadata();
    let spec = parse_filter_query("from:@example.org before:2024-06-01").unwrap();

    c.bench_function("filter_fixture_mailbox", |b| {
        b.iter(|| matching_indices(black_box(&messages), black_box(&spec)))
    });
}

fn bench_parse_query(c: &mut Criterion) {
    c.bench_function("parse_filter_query", |b| {
        b.iter(|| {
            parse_filter_query(black_box(
                "label:0,5 from:@example.com to:bob@example.org after:2024-01-01 subject:\"q3 report\"",
            ))
            .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_filter_synthetic,
    bench_filter_fixture,
    bench_parse_query
);
criterion_main!(benches);
