use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use reconcile::{
    BackendAdapter, Batch, CacheConfig, DispatcherConfig, InMemoryBackend, Query, QueryDispatcher,
    Record, TypeRef,
};

const RECORDS: usize = 2_000;
const BATCH: usize = 50;

fn make_backend() -> Arc<InMemoryBackend> {
    // Synthetic names so similarity scoring does real work over every record.
    let records = (0..RECORDS).map(|i| {
        Record::new(i.to_string(), format!("Entity number {i}"))
            .alias(format!("E{i}"))
            .typed(TypeRef::new("Thing"))
    });
    Arc::new(InMemoryBackend::new("bench").with_records(records))
}

fn make_batch(offset: usize) -> Batch {
    Batch::from_pairs((0..BATCH).map(|i| {
        let n = offset + i;
        (format!("q{i}"), Query::text(format!("entity number {n}")))
    }))
    .expect("valid batch")
}

fn make_dispatcher(cache_enabled: bool) -> QueryDispatcher {
    let config = DispatcherConfig {
        cache: CacheConfig {
            enabled: cache_enabled,
            ..CacheConfig::default()
        },
        ..DispatcherConfig::default()
    };
    QueryDispatcher::new(make_backend() as Arc<dyn BackendAdapter>, config).expect("dispatcher")
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(BATCH as u64));

    let cached = make_dispatcher(true);
    cached.dispatch(make_batch(0)).expect("warm cache");
    group.bench_function("cached_batch", |b| {
        b.iter_batched(
            || make_batch(0),
            |batch| cached.dispatch(batch).expect("dispatch"),
            BatchSize::SmallInput,
        );
    });

    let uncached = make_dispatcher(false);
    group.bench_function("uncached_batch", |b| {
        b.iter_batched(
            || make_batch(0),
            |batch| uncached.dispatch(batch).expect("dispatch"),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let query = Query::builder()
        .text("Entity number 1234")
        .requested_type(TypeRef::new("Thing"))
        .limit(10)
        .build()
        .expect("valid query");
    c.bench_function("query_fingerprint", |b| b.iter(|| query.fingerprint()));
}

criterion_group!(benches, bench_dispatch, bench_fingerprint);
criterion_main!(benches);
