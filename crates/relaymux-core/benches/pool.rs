//! Benchmarks for relaymux-core hot paths.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relaymux_core::provenance::Provenance;
use relaymux_core::{normalize, Event, Listeners};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn bench_normalize(c: &mut Criterion) {
    let inputs = [
        ("plain", "wss://relay.example"),
        ("default_port", "WSS://Relay.Example:443//nostr/"),
        ("query", "wss://relay.example/v1?z=1&a=2&m=3#frag"),
    ];

    let mut group = c.benchmark_group("normalize");
    for (name, raw) in inputs {
        group.bench_with_input(BenchmarkId::from_parameter(name), raw, |b, raw| {
            b.iter(|| normalize(black_box(raw)))
        });
    }
    group.finish();
}

fn bench_provenance(c: &mut Criterion) {
    let relays: Vec<_> = (0..8)
        .map(|n| normalize(&format!("wss://relay{n}.example")).unwrap())
        .collect();
    let ids: Vec<String> = (0..1000).map(|n| format!("{n:064x}")).collect();

    let mut group = c.benchmark_group("provenance");
    group.throughput(Throughput::Elements((ids.len() * relays.len()) as u64));
    group.bench_function("record_1000x8", |b| {
        b.iter(|| {
            let provenance = Provenance::new();
            for relay in &relays {
                for id in &ids {
                    provenance.record(black_box(id), relay);
                }
            }
            provenance.len()
        })
    });
    group.finish();
}

fn bench_listeners(c: &mut Criterion) {
    let event = Event {
        id: "0".repeat(64),
        pubkey: "f".repeat(64),
        created_at: 1_700_000_000,
        kind: 1,
        tags: vec![],
        content: "hello".to_string(),
        sig: String::new(),
    };

    let mut group = c.benchmark_group("listeners");
    for count in [1usize, 8, 64] {
        let registry: Listeners<dyn Fn(&Event) + Send + Sync> = Listeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..count {
            let hits = Arc::clone(&hits);
            registry.add(Arc::new(move |e: &Event| {
                hits.fetch_add(e.content.len(), Ordering::Relaxed);
            }));
        }
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("for_each", count), &registry, |b, registry| {
            b.iter(|| registry.for_each(|listener| listener(black_box(&event))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_normalize, bench_provenance, bench_listeners);
criterion_main!(benches);
