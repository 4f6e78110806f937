use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use tokio::runtime::Runtime;

use bunkhouse_accommodations::{
    AccommodationCommand, AccommodationType, CreateAccommodation, SleepingAccommodation, SleepingAccommodationId,
    UpdateAccommodationDetails,
};
use bunkhouse_core::{AggregateId, AggregateRoot, EventSourced, ExpectedVersion};
use bunkhouse_infra::dispatcher::{EventDispatcher, HandlerRegistry};
use bunkhouse_infra::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use bunkhouse_infra::projections::{ProjectionService, SleepingAccommodationReadModel};
use bunkhouse_infra::read_model::InMemoryReadModelRepository;
use bunkhouse_infra::repository::EventSourcedRepository;

type Repo = EventSourcedRepository<SleepingAccommodation, Arc<InMemoryEventStore>>;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread().build().unwrap()
}

fn create(name: &str) -> AccommodationCommand {
    AccommodationCommand::Create(CreateAccommodation {
        name: name.to_string(),
        accommodation_type: AccommodationType::Room,
        max_capacity: 4,
        occurred_at: Utc::now(),
    })
}

fn rename(n: u64) -> AccommodationCommand {
    AccommodationCommand::UpdateDetails(UpdateAccommodationDetails {
        name: format!("Room {n}"),
        accommodation_type: AccommodationType::Room,
        max_capacity: 4,
        occurred_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(n as i64),
    })
}

fn repo(store: Arc<InMemoryEventStore>) -> Repo {
    EventSourcedRepository::new(store, Arc::new(EventDispatcher::inline(HandlerRegistry::new())))
}

/// Encoded events for a stream of `count` events: one create, then renames.
fn stream(id: SleepingAccommodationId, count: u64) -> Vec<UncommittedEvent> {
    let mut agg = EventSourced::<SleepingAccommodation>::new(id);
    agg.execute(&create("Room 0")).unwrap();
    for n in 1..count {
        agg.execute(&rename(n)).unwrap();
    }
    agg.uncommitted()
        .iter()
        .map(|e| UncommittedEvent::from_typed(e).unwrap())
        .collect()
}

fn seeded_store(rt: &Runtime, count: u64) -> (Arc<InMemoryEventStore>, SleepingAccommodationId) {
    let store = Arc::new(InMemoryEventStore::new());
    let id = SleepingAccommodationId::new(AggregateId::new());
    rt.block_on(store.save_events(id.into(), SleepingAccommodation::AGGREGATE_TYPE, stream(id, count), ExpectedVersion::NoStream))
        .unwrap();
    (store, id)
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("command_execution_latency");

    group.bench_function("create_fresh", |b| {
        let repo = repo(Arc::new(InMemoryEventStore::new()));
        b.iter(|| {
            let id = SleepingAccommodationId::new(AggregateId::new());
            rt.block_on(repo.execute(id, &create(black_box("Loft")))).unwrap();
        });
    });

    group.bench_function("update_with_history", |b| {
        let (store, id) = seeded_store(&rt, 10);
        let repo = repo(store);
        let mut n = 10;
        b.iter(|| {
            n += 1;
            rt.block_on(repo.execute(id, &rename(black_box(n)))).unwrap();
        });
    });

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1u64, 10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size));
        group.bench_with_input(BenchmarkId::new("batch_append", batch_size), &batch_size, |b, &size| {
            let store = InMemoryEventStore::new();
            b.iter(|| {
                let id = SleepingAccommodationId::new(AggregateId::new());
                let events = stream(id, size);
                black_box(
                    rt.block_on(store.save_events(
                        id.into(),
                        SleepingAccommodation::AGGREGATE_TYPE,
                        events,
                        ExpectedVersion::NoStream,
                    ))
                    .unwrap(),
                );
            });
        });
    }

    group.finish();
}

fn bench_aggregate_replay(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("aggregate_replay");

    for count in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("get_by_id", count), &count, |b, &count| {
            let (store, id) = seeded_store(&rt, count);
            let repo = repo(store);
            b.iter(|| black_box(rt.block_on(repo.get_by_id(id)).unwrap()));
        });
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for count in [10u64, 100, 1000, 10000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("rebuild_from_events", count), &count, |b, &count| {
            let (store, id) = seeded_store(&rt, count);
            let projection: ProjectionService<SleepingAccommodationReadModel, _, _> =
                ProjectionService::new(store, InMemoryReadModelRepository::new());
            b.iter(|| black_box(rt.block_on(projection.rebuild(id.into())).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_event_append_throughput,
    bench_aggregate_replay,
    bench_projection_rebuild_speed
);
criterion_main!(benches);
