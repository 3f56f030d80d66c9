#![forbid(unsafe_code)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pagelists::storage::{
    AdjLists, FixedWidth, NodeIdCodec, NodeIdCompression, PropertyLists, StorageManager,
    StorageOptions,
};
use pagelists::types::NodeId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

const NODE_COUNT: u64 = 16_384;
const EDGE_COUNT: usize = 262_144;

fn random_edges(seed: u64) -> Vec<(u64, NodeId)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..EDGE_COUNT)
        .map(|_| {
            // Skew sources so some lists become large.
            let src = if rng.gen_ratio(1, 8) {
                rng.gen_range(0..16)
            } else {
                rng.gen_range(0..NODE_COUNT)
            };
            (src, NodeId::new(0, rng.gen_range(0..NODE_COUNT)))
        })
        .collect()
}

fn adjacency_codec() -> NodeIdCodec {
    NodeIdCodec::new(NodeIdCompression::for_tables(&[0]))
}

fn micro_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/lists_build");
    group.sample_size(10);
    group.throughput(Throughput::Elements(EDGE_COUNT as u64));
    let edges = random_edges(1);
    for threads in [1usize, 4] {
        group.bench_with_input(BenchmarkId::new("adjacency", threads), &threads, |b, &threads| {
            b.iter(|| {
                let dir = tempfile::tempdir().expect("tmpdir");
                let storage =
                    StorageManager::open(dir.path(), StorageOptions::bulk_load()).expect("storage");
                let (_, summary) = storage
                    .lists_builder("fwd", adjacency_codec(), NODE_COUNT)
                    .threads(threads)
                    .build(&edges)
                    .expect("build");
                black_box(summary)
            });
        });
    }
    group.finish();
}

struct ListsHarness {
    _tmpdir: TempDir,
    storage: StorageManager,
    adj: AdjLists,
    props: PropertyLists<i64>,
    cursor: u64,
}

impl ListsHarness {
    fn new() -> Self {
        let tmpdir = tempfile::tempdir().expect("tmpdir");
        let storage =
            StorageManager::open(tmpdir.path(), StorageOptions::bulk_load()).expect("storage");
        let edges = random_edges(2);
        let (adj, _) = storage
            .lists_builder("fwd", adjacency_codec(), NODE_COUNT)
            .build(&edges)
            .expect("adjacency build");
        let weights: Vec<(u64, i64)> = edges
            .iter()
            .map(|(src, dst)| (*src, dst.offset as i64))
            .collect();
        let (props, _) = storage
            .lists_builder("weight", FixedWidth::<i64>::new(), NODE_COUNT)
            .build(&weights)
            .expect("property build");
        Self {
            _tmpdir: tmpdir,
            storage,
            adj,
            props,
            cursor: 0,
        }
    }

    fn next_node(&mut self) -> u64 {
        self.cursor = (self.cursor + 7_919) % NODE_COUNT;
        self.cursor
    }
}

fn micro_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/lists_scan");
    group.sample_size(40);
    group.throughput(Throughput::Elements(1));
    let mut harness = ListsHarness::new();
    let txn = harness.storage.begin_read_only();

    group.bench_function("neighbors_small", |b| {
        b.iter(|| {
            let node = harness.next_node().max(16);
            black_box(harness.adj.neighbors(&txn, node).expect("neighbors"))
        });
    });
    group.bench_function("neighbors_large", |b| {
        b.iter(|| {
            let node = harness.next_node() % 16;
            black_box(harness.adj.neighbors(&txn, node).expect("neighbors"))
        });
    });
    group.bench_function("property_sum", |b| {
        b.iter(|| {
            let node = harness.next_node();
            let sum: i64 = harness
                .props
                .scan_list(&txn, node)
                .expect("scan")
                .filter_map(|item| item.ok().flatten())
                .sum();
            black_box(sum)
        });
    });
    group.finish();
}

fn micro_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/lists_append");
    group.sample_size(20);
    group.throughput(Throughput::Elements(64));
    let mut harness = ListsHarness::new();
    group.bench_function("append_commit_64", |b| {
        b.iter(|| {
            let node = harness.next_node();
            let txn = harness.storage.begin_write().expect("write");
            for k in 0..64 {
                harness
                    .props
                    .append_to_list(&txn, node, Some(&k))
                    .expect("append");
            }
            harness
                .storage
                .commit(&txn, &[&harness.props])
                .expect("commit");
        });
    });
    group.finish();
}

criterion_group!(benches, micro_build, micro_scan, micro_append);
criterion_main!(benches);
