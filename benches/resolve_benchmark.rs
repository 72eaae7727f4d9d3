//! Benchmarks for setecs resolution and reload performance.
//!
//! Run with: cargo bench
//!
//! This benchmark suite measures:
//! - Resolve throughput for hits and misses
//! - Scalability with table and binding sizes
//! - Reload cost of a changed client list
//! - ECS rewriting of a query

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hickory_proto::op::Message;
use parking_lot::Mutex;
use setecs::{ContentFetcher, EcsResolver, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

const TABLE_URL: &str = "http://bench.example/table";
const CLIENTS_URL: &str = "http://bench.example/clients";

#[derive(Default)]
struct MemoryFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFetcher {
    fn serve(&self, url: &str, body: String) {
        self.bodies.lock().insert(url.to_string(), body.into_bytes());
    }
}

impl ContentFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.bodies.lock().get(url).cloned().ok_or_else(|| Error::HttpStatus {
            status: 404,
            url: url.to_string(),
        })
    }
}

fn client(i: usize) -> String {
    format!("10.{}.{}.5", (i >> 8) & 0xff, i & 0xff)
}

/// Table body with `count` entries.
fn table_body(count: usize) -> String {
    (0..count).map(|i| format!("{}:203.0.113.9\n", client(i))).collect()
}

/// Client list with `count` disjoint /24 ranges.
fn clients_body(count: usize, salt: usize) -> String {
    (0..count)
        .map(|i| format!("10.{}.{}.0/24 # {}\n", (i >> 8) & 0xff, i & 0xff, salt))
        .collect()
}

fn build_resolver(table_size: usize, binding_size: usize) -> (Arc<MemoryFetcher>, EcsResolver) {
    let fetcher = Arc::new(MemoryFetcher::default());
    fetcher.serve(TABLE_URL, table_body(table_size));
    fetcher.serve(CLIENTS_URL, clients_body(binding_size, 0));

    let resolver = EcsResolver::new(fetcher.clone());
    resolver.register_table_items(&[TABLE_URL]);
    resolver.register_binding_items("203.0.113.9".parse().unwrap(), &[CLIENTS_URL]);
    (fetcher, resolver)
}

/// Benchmark resolve throughput for a mix of hits and misses.
fn bench_resolve_mixed(c: &mut Criterion) {
    let (_fetcher, resolver) = build_resolver(10_000, 1_000);

    let queries: Vec<String> = (0..1000)
        .map(|i| if i % 5 == 0 { format!("192.0.2.{}", i % 250) } else { client(i) })
        .collect();

    let mut group = c.benchmark_group("resolve");
    group.throughput(Throughput::Elements(queries.len() as u64));

    group.bench_function("mixed_queries", |b| {
        b.iter(|| {
            for query in &queries {
                black_box(resolver.resolve(query));
            }
        })
    });

    // Table miss short-circuits the binding scan.
    group.bench_function("table_miss", |b| {
        b.iter(|| {
            for query in &queries {
                black_box(resolver.resolve(&query.replace("10.", "11.")));
            }
        })
    });

    group.finish();
}

/// Benchmark scalability with binding size (linear range scan).
fn bench_scalability(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalability");

    for size in [100, 1_000, 10_000].iter() {
        let (_fetcher, resolver) = build_resolver(*size, *size);

        group.throughput(Throughput::Elements(100));
        group.bench_with_input(BenchmarkId::new("ranges", size), size, |b, size| {
            let queries: Vec<_> = (0..100).map(|i| client((i * 37) % size)).collect();
            b.iter(|| {
                for query in &queries {
                    black_box(resolver.resolve(query));
                }
            })
        });
    }

    group.finish();
}

/// Benchmark reload of a changed client list.
fn bench_reload(c: &mut Criterion) {
    let (fetcher, resolver) = build_resolver(1_000, 10_000);

    let mut group = c.benchmark_group("reload");
    let mut salt = 0;

    group.bench_function("reload_10k_ranges", |b| {
        b.iter_batched(
            || {
                salt += 1;
                fetcher.serve(CLIENTS_URL, clients_body(10_000, salt));
            },
            |_| resolver.reload_all(),
            criterion::BatchSize::SmallInput,
        )
    });

    // Unchanged sources only pay for the fetch and hash.
    group.bench_function("reload_unchanged", |b| b.iter(|| resolver.reload_all()));

    group.finish();
}

/// Benchmark ECS rewriting of a query.
fn bench_rewrite(c: &mut Criterion) {
    let ecs_ip = "203.0.113.9".parse().ok();

    let mut group = c.benchmark_group("rewrite");
    group.bench_function("add_ecs", |b| {
        b.iter_batched(
            Message::new,
            |mut msg| black_box(setecs::rewrite::rewrite_query(&mut msg, ecs_ip)),
            criterion::BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_resolve_mixed, bench_scalability, bench_reload, bench_rewrite);

criterion_main!(benches);
