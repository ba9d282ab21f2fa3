//! The services as the binaries assemble them, on in-memory collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use baggage_tracker::bootstrap::{BaggageNode, passenger_pool};
use baggage_tracker::config::Config;
use baggage_tracker_core::environment::Clock;
use baggage_tracker_core::event::BaggageStateChangeEvent;
use baggage_tracker_core::event_bus::{EventBus, EventBusError};
use baggage_tracker_core::status::BaggageStatus;
use baggage_tracker_core::{DeadLetter, NewBaggage, PassengerId};
use baggage_tracker_runtime::baggage::BaggageServiceError;
use baggage_tracker_testing::{
    InMemoryBaggageRepository, InMemoryDeadLetterSink, InMemoryEventBus,
    InMemoryNotificationStore, SteppingClock, init_tracing, test_clock,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

fn config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("MAX_RETRY_ATTEMPTS", "2"),
        ("BACKOFF_BASE_MS", "1"),
        ("BACKOFF_CAP_MS", "5"),
        ("SUBSCRIBER_WORKERS", "2"),
        ("OUTBOX_POLL_INTERVAL_MS", "10"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in overrides {
        vars.insert((*k).to_string(), (*v).to_string());
    }
    let config = Config::from_lookup(|var| vars.get(var).cloned()).unwrap();
    config.validate().unwrap();
    config
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct Deployment {
    config: Config,
    bus: InMemoryEventBus,
    repo: InMemoryBaggageRepository,
    notifications: InMemoryNotificationStore,
    dead_letters: InMemoryDeadLetterSink,
    node: BaggageNode,
}

impl Deployment {
    fn new(config: Config) -> Self {
        init_tracing();
        let bus = InMemoryEventBus::new();
        let repo = InMemoryBaggageRepository::new();
        let node = BaggageNode::assemble(
            &config,
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(bus.clone()),
            Arc::new(test_clock()),
        );
        Self {
            config,
            bus,
            repo,
            notifications: InMemoryNotificationStore::new(),
            dead_letters: InMemoryDeadLetterSink::default(),
            node,
        }
    }

    fn start_passengers(&self, shutdown: &broadcast::Sender<()>) -> tokio::task::JoinHandle<()> {
        let pool = passenger_pool(
            &self.config,
            Arc::new(self.notifications.clone()),
            Arc::new(self.dead_letters.clone()),
            Arc::new(self.bus.clone()),
            Arc::new(SteppingClock::new(test_clock().now())),
        );
        let rx = shutdown.subscribe();
        tokio::spawn(async move { pool.run(rx).await.unwrap() })
    }
}

#[tokio::test]
async fn claim_reaches_the_passenger_once() {
    let deployment = Deployment::new(config(&[]));
    let (shutdown, _) = broadcast::channel(1);
    let passengers = deployment.start_passengers(&shutdown);

    let bag = deployment
        .node
        .service
        .create_baggage(NewBaggage::new(PassengerId::new(100), 20))
        .await
        .unwrap();
    deployment.node.service.claim_baggage(bag.id).await.unwrap();

    eventually("notification", || deployment.notifications.len() == 1).await;
    let notification = &deployment.notifications.all()[0];
    assert_eq!(notification.passenger_id, PassengerId::new(100));
    assert_eq!(notification.message, "Your baggage has been claimed.");
    assert!(deployment.dead_letters.is_empty());

    shutdown.send(()).unwrap();
    passengers.await.unwrap();
}

#[tokio::test]
async fn configured_topic_and_group_are_used() {
    let deployment = Deployment::new(config(&[
        ("CHANNEL_BAGGAGE_STATE_CHANGE", "bags-v2"),
        ("CONSUMER_GROUP", "notifier"),
    ]));
    let (shutdown, _) = broadcast::channel(1);
    let passengers = deployment.start_passengers(&shutdown);

    let bag = deployment
        .node
        .service
        .create_baggage(NewBaggage::new(PassengerId::new(3), 8))
        .await
        .unwrap();
    deployment.node.service.check_in(bag.id).await.unwrap();

    assert!(deployment.bus.published("baggage-state-change").is_empty());
    assert_eq!(deployment.bus.published("bags-v2").len(), 1);
    eventually("group caught up", || deployment.bus.lag("notifier", "bags-v2") == 0).await;
    assert_eq!(deployment.notifications.len(), 1);

    shutdown.send(()).unwrap();
    passengers.await.unwrap();
}

#[tokio::test]
async fn reconciliation_publishes_what_the_outage_left_behind() {
    let deployment = Deployment::new(config(&[]));
    let bag = deployment
        .node
        .service
        .create_baggage(NewBaggage::new(PassengerId::new(9), 12))
        .await
        .unwrap();

    deployment.bus.fail_next_publishes(
        (0..2).map(|_| EventBusError::Timeout("baggage-state-change".into())),
    );
    let err = deployment.node.service.check_in(bag.id).await.unwrap_err();
    match err {
        BaggageServiceError::NotYetAnnounced { baggage, .. } => {
            assert_eq!(baggage.status, BaggageStatus::CheckedIn);
        }
        other => panic!("expected NotYetAnnounced, got {other:?}"),
    }
    assert!(deployment.bus.published("baggage-state-change").is_empty());
    assert_eq!(deployment.repo.outbox_entries().len(), 1);

    let report = deployment.node.dispatcher.dispatch_pending().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert!(deployment.repo.outbox_entries().is_empty());

    let published = deployment.bus.published("baggage-state-change");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, bag.id.to_string());
    let event = BaggageStateChangeEvent::decode(&published[0].payload).unwrap();
    assert_eq!(event.previous_status, Some(BaggageStatus::Registered));
    assert_eq!(event.new_status, BaggageStatus::CheckedIn);
}

#[tokio::test]
async fn malformed_record_is_dead_lettered_and_the_next_one_still_lands() {
    let deployment = Deployment::new(config(&[]));
    let (shutdown, _) = broadcast::channel(1);
    let passengers = deployment.start_passengers(&shutdown);

    deployment
        .bus
        .publish(
            "baggage-state-change",
            "100",
            br#"{"eventId":"6f1c2a52-2d0b-4c53-9b8e-3f1e6d1f0a11","baggageId":100,"passengerId":100}"#,
        )
        .await
        .unwrap();
    let bag = deployment
        .node
        .service
        .create_baggage(NewBaggage::new(PassengerId::new(100), 20))
        .await
        .unwrap();
    deployment.node.service.report_lost(bag.id).await.unwrap();

    eventually("dead letter", || deployment.dead_letters.len() == 1).await;
    eventually("notification", || deployment.notifications.len() == 1).await;

    let letters: Vec<DeadLetter> = deployment.dead_letters.letters();
    assert_eq!(letters[0].source_topic, "baggage-state-change");
    assert_eq!(letters[0].attempts, 1);
    assert!(letters[0].reason.contains("newStatus"), "reason: {}", letters[0].reason);

    shutdown.send(()).unwrap();
    passengers.await.unwrap();
}
