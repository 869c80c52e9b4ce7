//! End-to-end tests: provider, dispatcher, processors and repositories.

mod common;

use common::{memory_config, per_processor_factory, FailingWriter, TestEnvelopeBuilder};
use persister_lib::core::{ConfigBuilder, Definition, Measurement, StorageBackendKind};
use persister_lib::monitoring::MetricsRegistry;
use persister_lib::provider::DispatcherProvider;
use persister_lib::repository::{BatchRepository, MemoryStore, MetricRepository, RepositoryFactory};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn timestamps(store: &MemoryStore) -> Vec<i64> {
    store
        .series()
        .into_iter()
        .flat_map(|s| s.measurements)
        .map(|m| m.timestamp)
        .collect()
}

fn cpu_idle() -> Definition {
    Definition::new("cpu.idle".to_string(), "T1".to_string(), "R1".to_string()).unwrap()
}

#[test]
fn test_partitions_receive_own_sequences_in_order() {
    let registry = Arc::new(MetricsRegistry::new());
    let stores = vec![MemoryStore::new(), MemoryStore::new()];
    let provider = DispatcherProvider::new(
        memory_config(2, 100),
        per_processor_factory(stores.clone(), Arc::clone(&registry)),
        registry,
    );
    let dispatcher = provider.get().unwrap();

    for sequence in 0..6 {
        let envelope = TestEnvelopeBuilder::new(sequence, sequence as f64).build();
        assert_eq!(dispatcher.publish(vec![envelope]).unwrap(), sequence as u64);
    }
    provider.shutdown();

    assert_eq!(timestamps(&stores[0]), vec![0, 2, 4]);
    assert_eq!(timestamps(&stores[1]), vec![1, 3, 5]);
}

#[test]
fn test_same_series_grouped_in_arrival_order() {
    let registry = Arc::new(MetricsRegistry::new());
    let store = MemoryStore::new();
    let provider =
        DispatcherProvider::from_config(memory_config(1, 2), Arc::clone(&registry), store.clone());
    let dispatcher = provider.get().unwrap();

    dispatcher
        .publish(vec![
            TestEnvelopeBuilder::new(1, 10.0).dimension("host", "a").build(),
            TestEnvelopeBuilder::new(2, 20.0).dimension("host", "a").build(),
        ])
        .unwrap();
    provider.shutdown();

    let written = store.series_for(&cpu_idle());
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].dimensions.get("host"), Some("a"));
    assert_eq!(
        written[0].measurements,
        vec![Measurement::new(1, 10.0), Measurement::new(2, 20.0)]
    );
    assert_eq!(store.write_count(), 1);
}

#[test]
fn test_distinct_series_stay_separate() {
    let registry = Arc::new(MetricsRegistry::new());
    let store = MemoryStore::new();
    let provider =
        DispatcherProvider::from_config(memory_config(1, 100), Arc::clone(&registry), store.clone());
    let dispatcher = provider.get().unwrap();

    dispatcher
        .publish(vec![
            TestEnvelopeBuilder::new(1, 1.0).dimension("host", "a").build(),
            TestEnvelopeBuilder::new(1, 2.0).dimension("host", "b").build(),
            TestEnvelopeBuilder::new(1, 3.0).tenant("T2").dimension("host", "a").build(),
        ])
        .unwrap();
    provider.shutdown();

    assert_eq!(store.series().len(), 3);
    assert_eq!(store.series_for(&cpu_idle()).len(), 2);
    assert_eq!(store.measurement_count(), 3);
}

#[test]
fn test_failed_writes_are_contained() {
    let registry = Arc::new(MetricsRegistry::new());
    let writer = FailingWriter::default();
    let attempts = Arc::clone(&writer.attempts);
    let factory_registry = Arc::clone(&registry);
    let factory: RepositoryFactory = Arc::new(move |ordinal| {
        let repository: Box<dyn MetricRepository> =
            Box::new(BatchRepository::new(writer.clone(), ordinal, &factory_registry));
        Ok(repository)
    });
    let provider = DispatcherProvider::new(memory_config(1, 1), factory, Arc::clone(&registry));
    let dispatcher = provider.get().unwrap();

    for sequence in 0..3 {
        dispatcher
            .publish(vec![TestEnvelopeBuilder::new(sequence, 1.0).build()])
            .unwrap();
    }
    provider.shutdown();

    assert_eq!(*attempts.lock(), 3);
    let snapshot = registry.snapshot();
    assert_eq!(snapshot.count("repository[0].flush-failure-counter"), Some(3));
    assert_eq!(snapshot.count("processor[0].metrics-added-to-batch-counter"), Some(3));
}

#[test]
fn test_malformed_envelope_does_not_drop_array() {
    let registry = Arc::new(MetricsRegistry::new());
    let store = MemoryStore::new();
    let provider =
        DispatcherProvider::from_config(memory_config(1, 100), Arc::clone(&registry), store.clone());
    let dispatcher = provider.get().unwrap();

    let mut bad = TestEnvelopeBuilder::new(2, 2.0).build();
    bad.meta.remove("region");
    dispatcher
        .publish(vec![
            TestEnvelopeBuilder::new(1, 1.0).build(),
            bad,
            TestEnvelopeBuilder::new(3, 3.0).build(),
        ])
        .unwrap();
    provider.shutdown();

    assert_eq!(timestamps(&store), vec![1, 3]);
    assert_eq!(
        registry.snapshot().count("processor[0].malformed-envelope-counter"),
        Some(1)
    );
}

#[test]
fn test_interval_flush_without_new_events() {
    let registry = Arc::new(MetricsRegistry::new());
    let store = MemoryStore::new();
    let config = ConfigBuilder::new()
        .ring_buffer_size(16)
        .num_processors(1)
        .batch_size(1000)
        .flush_interval(Some(Duration::from_millis(20)))
        .backend(StorageBackendKind::Memory)
        .build()
        .unwrap();
    let provider = DispatcherProvider::from_config(config, Arc::clone(&registry), store.clone());
    let dispatcher = provider.get().unwrap();

    dispatcher
        .publish(vec![TestEnvelopeBuilder::new(1, 1.0).build()])
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while store.measurement_count() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(store.measurement_count(), 1);
    provider.shutdown();
    assert_eq!(store.write_count(), 1);
}

#[test]
fn test_concurrent_get_constructs_once() {
    let registry = Arc::new(MetricsRegistry::new());
    let provider = Arc::new(DispatcherProvider::from_config(
        memory_config(2, 10),
        registry,
        MemoryStore::new(),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let provider = Arc::clone(&provider);
            std::thread::spawn(move || provider.get().unwrap())
        })
        .collect();
    let dispatchers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for dispatcher in &dispatchers[1..] {
        assert!(Arc::ptr_eq(&dispatchers[0], dispatcher));
    }
    assert_eq!(provider.constructions(), 1);
    provider.shutdown();
}

#[test]
fn test_shutdown_during_publish_persists_every_accepted_array() {
    for _ in 0..100 {
        let store = MemoryStore::new();
        let provider = Arc::new(DispatcherProvider::from_config(
            memory_config(2, 4),
            Arc::new(MetricsRegistry::new()),
            store.clone(),
        ));
        let dispatcher = provider.get().unwrap();

        let producer = std::thread::spawn(move || {
            let mut accepted = 0usize;
            while dispatcher
                .publish(vec![TestEnvelopeBuilder::new(accepted as i64, 1.0).build()])
                .is_ok()
            {
                accepted += 1;
            }
            accepted
        });

        std::thread::sleep(Duration::from_micros(200));
        provider.shutdown();
        let accepted = producer.join().unwrap();

        assert_eq!(store.measurement_count(), accepted);
    }
}
