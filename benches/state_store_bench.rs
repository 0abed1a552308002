//! Benchmark for state store replace/snapshot throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pulse::state::{GuestInfo, NodeInfo, StateStore};

fn nodes(n: usize) -> Vec<NodeInfo> {
    (0..n)
        .map(|i| NodeInfo {
            instance: "dc1".into(),
            name: format!("node-{i}"),
            status: "online".into(),
            cpu_usage: 0.42,
            memory_usage: 0.63,
        })
        .collect()
}

fn guests(n: usize) -> Vec<GuestInfo> {
    (0..n)
        .map(|i| GuestInfo {
            instance: "dc1".into(),
            vmid: 100 + i as u64,
            name: format!("guest-{i}"),
            node: format!("node-{}", i % 8),
            guest_type: "qemu".into(),
            status: "running".into(),
        })
        .collect()
}

fn bench_replace_nodes(c: &mut Criterion) {
    let store = StateStore::new();
    let data = nodes(64);

    c.bench_function("state_store_replace_nodes_for_instance", |b| {
        b.iter(|| {
            store.replace_nodes_for_instance("dc1", black_box(data.clone()));
        });
    });
}

fn bench_replace_guests(c: &mut Criterion) {
    let store = StateStore::new();
    let data = guests(256);

    c.bench_function("state_store_replace_guests_for_instance", |b| {
        b.iter(|| {
            store.replace_guests_for_instance("dc1", black_box(data.clone()));
        });
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let store = StateStore::new();
    store.replace_nodes_for_instance("dc1", nodes(64));
    store.replace_guests_for_instance("dc1", guests(256));

    c.bench_function("state_store_snapshot", |b| {
        b.iter(|| black_box(store.snapshot()));
    });
}

criterion_group!(benches, bench_replace_nodes, bench_replace_guests, bench_snapshot);
criterion_main!(benches);
