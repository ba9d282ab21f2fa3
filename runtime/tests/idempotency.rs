//! Idempotency properties of the change subscriber under redelivery and
//! concurrent processing.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use baggage_tracker_core::Baggage;
use baggage_tracker_core::environment::Clock;
use baggage_tracker_core::event::BaggageStateChangeEvent;
use baggage_tracker_core::event_bus::{BusRecord, EventBus};
use baggage_tracker_core::status::BaggageStatus;
use baggage_tracker_core::types::{BaggageId, EventId, PassengerId};
use baggage_tracker_runtime::passenger::PassengerService;
use baggage_tracker_runtime::retry::RetryPolicy;
use baggage_tracker_runtime::subscriber::{ChangeSubscriber, PartitionState, ProcessingOutcome};
use baggage_tracker_testing::{
    InMemoryDeadLetterSink, InMemoryEventBus, InMemoryNotificationStore, test_clock,
};
use futures::StreamExt;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "baggage-state-change";
const GROUP: &str = "passenger-service";

fn subscriber(store: &InMemoryNotificationStore) -> Arc<ChangeSubscriber> {
    let clock = Arc::new(test_clock());
    let passengers = Arc::new(PassengerService::new(Arc::new(store.clone()), clock.clone()));
    Arc::new(
        ChangeSubscriber::new(passengers, Arc::new(InMemoryDeadLetterSink::default()), clock)
            .with_retry_policy(
                RetryPolicy::builder()
                    .initial_delay(Duration::from_millis(1))
                    .build(),
            ),
    )
}

fn event(baggage_id: i64, from: BaggageStatus, to: BaggageStatus) -> BaggageStateChangeEvent {
    let bag = Baggage {
        id: BaggageId::new(baggage_id),
        passenger_id: PassengerId::new(1),
        weight: 20,
        status: from,
    };
    BaggageStateChangeEvent::from_change(EventId::generate(), &bag.apply(to).unwrap(), test_clock().now())
}

/// Publish `payload` `copies` times and read every copy back.
async fn deliver_copies(bus: &InMemoryEventBus, payload: &[u8], copies: usize) -> Vec<BusRecord> {
    for _ in 0..copies {
        bus.publish(TOPIC, "1", payload).await.unwrap();
    }
    let mut stream = bus.subscribe(&[TOPIC], GROUP).await.unwrap();
    let mut records = Vec::with_capacity(copies);
    for _ in 0..copies {
        records.push(stream.next().await.unwrap().unwrap());
    }
    records
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_create_one_notification() {
    let bus = InMemoryEventBus::with_partitions(1);
    let store = InMemoryNotificationStore::new();
    let subscriber = subscriber(&store);
    let payload = event(1, BaggageStatus::Registered, BaggageStatus::Claimed).encode().unwrap();

    let records = deliver_copies(&bus, &payload, 8).await;
    let tasks: Vec<_> = records
        .into_iter()
        .map(|record| {
            let subscriber = Arc::clone(&subscriber);
            tokio::spawn(async move {
                // Separate workers: no shared in-memory state
                let mut state = PartitionState::default();
                let mut delivery = subscriber.receive();
                subscriber.process(&record, &mut state, &mut delivery).await.unwrap()
            })
        })
        .collect();

    let mut applied = 0;
    for task in tasks {
        match task.await.unwrap() {
            ProcessingOutcome::Applied => applied += 1,
            ProcessingOutcome::Duplicate => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(store.len(), 1);
    assert_eq!(bus.lag(GROUP, TOPIC), 0);
}

#[tokio::test]
async fn redelivery_after_lost_ack_is_a_duplicate() {
    let bus = InMemoryEventBus::with_partitions(1);
    let store = InMemoryNotificationStore::new();
    let subscriber = subscriber(&store);
    let payload = event(1, BaggageStatus::Loaded, BaggageStatus::Lost).encode().unwrap();
    let record = deliver_copies(&bus, &payload, 1).await.remove(0);
    let mut state = PartitionState::default();

    let mut delivery = subscriber.receive();
    subscriber.process(&record, &mut state, &mut delivery).await.unwrap();

    // Ack lost: the bus hands the same record out again
    let mut delivery = subscriber.receive();
    let outcome = subscriber.process(&record, &mut state, &mut delivery).await.unwrap();

    assert_eq!(outcome, ProcessingOutcome::Duplicate);
    assert_eq!(store.len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_number_of_deliveries_yields_one_notification(copies in 1_usize..12) {
        let (applied, stored) = tokio_test::block_on(async {
            let bus = InMemoryEventBus::with_partitions(1);
            let store = InMemoryNotificationStore::new();
            let subscriber = subscriber(&store);
            let payload = event(3, BaggageStatus::CheckedIn, BaggageStatus::Loaded).encode().unwrap();
            let mut state = PartitionState::default();

            let mut applied = 0;
            for record in deliver_copies(&bus, &payload, copies).await {
                let mut delivery = subscriber.receive();
                if subscriber.process(&record, &mut state, &mut delivery).await.unwrap()
                    == ProcessingOutcome::Applied
                {
                    applied += 1;
                }
            }
            (applied, store.len())
        });

        prop_assert_eq!(applied, 1);
        prop_assert_eq!(stored, 1);
    }

    #[test]
    fn in_order_lifecycle_is_never_dead_lettered(skip in proptest::collection::vec(any::<bool>(), 5)) {
        // Walk the main path, optionally skipping stages, ending in CLAIMED
        let path = [
            BaggageStatus::CheckedIn,
            BaggageStatus::Loaded,
            BaggageStatus::InTransit,
            BaggageStatus::Arrived,
            BaggageStatus::Claimed,
        ];
        let steps: Vec<BaggageStatus> = path
            .iter()
            .zip(&skip)
            .filter(|(status, skipped)| **status == BaggageStatus::Claimed || !**skipped)
            .map(|(status, _)| *status)
            .collect();

        let outcomes = tokio_test::block_on(async {
            let bus = InMemoryEventBus::with_partitions(1);
            let store = InMemoryNotificationStore::new();
            let subscriber = subscriber(&store);
            let mut state = PartitionState::default();
            let mut current = BaggageStatus::Registered;
            let mut outcomes = Vec::new();

            for next in &steps {
                let payload = event(9, current, *next).encode().unwrap();
                let record = deliver_copies(&bus, &payload, 1).await.remove(0);
                let mut delivery = subscriber.receive();
                outcomes.push(subscriber.process(&record, &mut state, &mut delivery).await.unwrap());
                current = *next;
            }
            outcomes
        });

        prop_assert!(outcomes.iter().all(|o| *o == ProcessingOutcome::Applied));
    }
}
