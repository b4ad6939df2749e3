//! Lookup throughput benchmarks: a single exact-match rule, a large
//! flat rule set, and a prefix-trie-accelerated rule set.

use classifier_core::{Classifier, ClassifierConfig, FieldId, Flow, Mask, MiniMatch, Rule};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

fn port_rule(priority: i64, port: u64) -> Rule {
    let mask = Mask::new().with_exact(FieldId::InPort);
    Rule::new(priority, MiniMatch::new(mask).with_value(FieldId::InPort, port))
}

fn bench_single_rule_lookup(c: &mut Criterion) {
    let classifier = Classifier::new(&ClassifierConfig::default()).unwrap();
    classifier.insert(port_rule(10, 1), 1).unwrap();
    let flow = Flow::new().set(FieldId::InPort, 1);

    c.bench_function("lookup_single_rule", |b| {
        b.iter(|| classifier.lookup(1, &flow));
    });
}

fn bench_lookup_among_many_subtables(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_many_subtables");
    for &size in &[100u64, 1_000, 10_000] {
        let classifier = Classifier::new(&ClassifierConfig::default()).unwrap();
        for port in 0..size {
            classifier.insert(port_rule(10, port), port + 1).unwrap();
        }
        let flow = Flow::new().set(FieldId::InPort, size / 2);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| classifier.lookup(size, &flow));
        });
    }
    group.finish();
}

fn subnet_classifier(prefix_fields: Vec<FieldId>) -> Classifier {
    let config = ClassifierConfig { prefix_fields, ..ClassifierConfig::default() };
    let classifier = Classifier::new(&config).unwrap();
    for subnet in 0u64..256 {
        let mask = Mask::new().with_prefix(FieldId::NwDst, 24);
        let matc = MiniMatch::new(mask).with_value(FieldId::NwDst, subnet << 8);
        classifier.insert(Rule::new(10, matc), subnet + 1).unwrap();
    }
    classifier
}

/// A miss is the case where trie pruning actually saves work: every
/// subtable gets probed unless the trie proves none of them can match.
fn bench_trie_pruning_on_a_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_miss_with_vs_without_trie");
    let flow = Flow::new().set(FieldId::NwDst, 0xff00_0000);

    let with_trie = subnet_classifier(vec![FieldId::NwDst]);
    group.bench_function("with_trie", |b| b.iter(|| with_trie.lookup(256, &flow)));

    let without_trie = subnet_classifier(Vec::new());
    group.bench_function("without_trie", |b| b.iter(|| without_trie.lookup(256, &flow)));
    group.finish();
}

/// Same shape, but gated on the metadata partition index instead of
/// the trie: every rule here names a metadata value the flow lacks.
fn bench_partition_skip_on_a_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_miss_with_vs_without_partition_hit");
    let with_metadata = Classifier::new(&ClassifierConfig::default()).unwrap();
    for tag in 0u64..256 {
        let mask = Mask::new().with_exact(FieldId::Metadata).with_exact(FieldId::InPort);
        let matc = MiniMatch::new(mask).with_value(FieldId::Metadata, tag).with_value(FieldId::InPort, 1);
        with_metadata.insert(Rule::new(10, matc), tag + 1).unwrap();
    }
    let flow_unknown_metadata = Flow::new().set(FieldId::Metadata, 99_999).set(FieldId::InPort, 1);
    group.bench_function("partition_pruned", |b| b.iter(|| with_metadata.lookup(256, &flow_unknown_metadata)));

    let universal = Classifier::new(&ClassifierConfig::default()).unwrap();
    for port in 0u64..256 {
        let mask = Mask::new().with_exact(FieldId::InPort);
        universal.insert(Rule::new(10, MiniMatch::new(mask).with_value(FieldId::InPort, port + 1000)), port + 1).unwrap();
    }
    group.bench_function("universal_tag_always_consulted", |b| b.iter(|| universal.lookup(256, &flow_unknown_metadata)));
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3));
    targets = bench_single_rule_lookup, bench_lookup_among_many_subtables,
        bench_trie_pruning_on_a_miss, bench_partition_skip_on_a_miss
}
criterion_main!(benches);
