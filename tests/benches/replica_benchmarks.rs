//! # PBFT Replica Benchmarks
//!
//! | Area | Operation |
//! |------|-----------|
//! | Quorum | matching-value tally over 4 and 100 votes |
//! | Ticket | prepared / committed-local predicates on a full slot |
//! | Codec | bincode encode + decode of a PRE-PREPARE |
//! | Cluster | one request end to end through four replicas |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pbft_replica::adapters::{decode_message, BincodeEncoder, Sha256Digester};
use pbft_replica::{Commit, Digester, Encoder, PhaseMessage, PrePrepare, Prepare, Ticket};
use pbft_tests::harness::{Add, Cluster};
use pbft_types::{matching_value, Request};
use rand::Rng;
use std::time::Duration;

// ============================================================================
// Quorum tally
// ============================================================================

fn bench_matching_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("quorum");

    for size in [4usize, 100] {
        let mut rng = rand::thread_rng();
        let values: Vec<u8> = (0..size).map(|_| rng.gen_range(0..3)).collect();
        let threshold = size / 3 + 1;

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("matching_value", size), &values, |b, v| {
            b.iter(|| black_box(matching_value(v.iter(), threshold)))
        });
    }

    group.finish();
}

// ============================================================================
// Ticket predicates
// ============================================================================

fn full_ticket() -> Ticket<Add, i64> {
    let request = Request::new((5, 7), 0, "bench");
    let digest = Sha256Digester.digest(&request);
    let ticket = Ticket::new(0, 1);
    ticket.append(PhaseMessage::PrePrepare(PrePrepare {
        view: 0,
        seq: 1,
        digest: digest.clone(),
        request,
    }));
    for replica_id in 1..4 {
        ticket.append(PhaseMessage::Prepare(Prepare {
            view: 0,
            seq: 1,
            digest: digest.clone(),
            replica_id,
        }));
    }
    for replica_id in 0..4 {
        ticket.append(PhaseMessage::Commit(Commit {
            view: 0,
            seq: 1,
            digest: digest.clone(),
            replica_id,
        }));
    }
    ticket
}

fn bench_ticket_predicates(c: &mut Criterion) {
    let mut group = c.benchmark_group("ticket");
    let ticket = full_ticket();

    group.bench_function("is_prepared", |b| b.iter(|| black_box(ticket.is_prepared(1))));
    group.bench_function("is_committed_local", |b| {
        b.iter(|| black_box(ticket.is_committed_local(1)))
    });

    group.finish();
}

// ============================================================================
// Wire codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let encoder = BincodeEncoder::<Add, i64>::new();
    let request = Request::new((5, 7), 0, "bench");
    let pre_prepare = PrePrepare {
        view: 0,
        seq: 1,
        digest: Sha256Digester.digest(&request),
        request,
    };

    group.bench_function("encode_pre_prepare", |b| {
        b.iter(|| black_box(encoder.encode_pre_prepare(&pre_prepare)))
    });

    let data = encoder
        .encode_pre_prepare(&pre_prepare)
        .expect("encodable");
    group.bench_function("decode_message", |b| {
        b.iter(|| black_box(decode_message::<Add>(&data)))
    });

    group.finish();
}

// ============================================================================
// Cluster round trip
// ============================================================================

fn bench_cluster_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("commit_one_request", |b| {
        b.iter_batched(
            || Cluster::new().expect("cluster"),
            |cluster| {
                let ticket = cluster.submit(5, 7).expect("submit");
                cluster.deliver_all().expect("deliver");
                black_box(ticket.result())
            },
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_matching_value,
    bench_ticket_predicates,
    bench_codec,
    bench_cluster_commit,
);

criterion_main!(benches);
