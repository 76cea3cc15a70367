use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use redrive::broker::{attribute, Attributes, BrokerClient, Tags};
use redrive::{naming, InMemoryBroker, OutboundMessage, QueueService};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

// Property-based test: repeated FIFO sends are never collapsed
proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_fifo_sends_get_fresh_dedup_ids(
        body in "[a-zA-Z0-9 ]{1,200}",
        repeats in 1..10usize
    ) {
        runtime().block_on(async {
            let broker = Arc::new(InMemoryBroker::new());
            let mut attributes = Attributes::new();
            attributes.insert(attribute::FIFO_QUEUE.to_string(), "true".to_string());
            let url = broker
                .create_queue("Orders.fifo", &attributes, &Tags::new())
                .await
                .unwrap();
            let service = QueueService::new(broker.clone());

            let mut ids = HashSet::new();
            for _ in 0..repeats {
                let id = service
                    .send(OutboundMessage::new(&url, body.as_str()).unwrap())
                    .await
                    .unwrap();
                ids.insert(id);
            }

            prop_assert_eq!(ids.len(), repeats, "every send should be a new message");
            prop_assert_eq!(broker.queued_bodies("Orders.fifo").len(), repeats);

            Ok(())
        })?;
    }
}

// Property-based test: prefix collisions never resolve to the wrong queue
proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_resolution_is_exact(
        name in "[a-zA-Z][a-zA-Z0-9_]{0,30}",
        suffixes in prop::collection::hash_set("[a-zA-Z0-9_-]{1,10}", 0..5usize)
    ) {
        runtime().block_on(async {
            let broker = Arc::new(InMemoryBroker::new());
            for suffix in &suffixes {
                let longer = format!("{name}{suffix}");
                broker
                    .create_queue(&longer, &Attributes::new(), &Tags::new())
                    .await
                    .unwrap();
            }
            let service = QueueService::new(broker.clone());

            prop_assert_eq!(service.resolve_queue_url(&name).await.unwrap(), None);

            broker
                .create_queue(&name, &Attributes::new(), &Tags::new())
                .await
                .unwrap();
            let first = service.resolve_queue_url(&name).await.unwrap();
            let second = service.resolve_queue_url(&name).await.unwrap();

            prop_assert_eq!(first.as_deref().map(naming::queue_name_from_url), Some(name.as_str()));
            prop_assert_eq!(first, second);

            Ok(())
        })?;
    }
}

// Property-based test: dead letter queue names follow the primary name
proptest! {
    #[test]
    fn prop_dead_letter_name_follows_queue_name(
        name in "[a-zA-Z0-9_-]{1,70}",
        fifo in any::<bool>()
    ) {
        let queue = naming::queue_name(&name, fifo);
        let dlq = naming::dead_letter_queue_name(&name, fifo);

        let expected_prefix = format!("{name}-dlq");
        prop_assert!(dlq.starts_with(&expected_prefix));
        prop_assert_eq!(naming::is_fifo(&queue), fifo);
        prop_assert_eq!(naming::is_fifo(&dlq), fifo);
        prop_assert_eq!(naming::queue_kind(&dlq), naming::QueueKind::DeadLetter);
    }
}
