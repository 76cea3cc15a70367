mod common;

use aws_sdk_sqs::types::QueueAttributeName;
use common::{local_service, localstack};
use redrive::{OutboundMessage, QueueKind, QueueSpec, TopicSpec};

#[tokio::test]
async fn provisions_fifo_queue_with_dead_letter_queue() {
    let (endpoint, container) = localstack().await.unwrap();
    let (broker, service) = local_service(&endpoint).await;

    let queue = service
        .create_queue(
            &QueueSpec::new("Orders")
                .unwrap()
                .fifo(true)
                .unwrap()
                .retention_days(4)
                .unwrap()
                .tag("team", "payments"),
        )
        .await
        .unwrap();

    assert!(queue.queue_url.ends_with("/Orders.fifo"));
    assert!(queue.dead_letter_queue_url.ends_with("/Orders-dlq.fifo"));

    let attributes = broker
        .sqs
        .get_queue_attributes()
        .queue_url(&queue.queue_url)
        .attribute_names(QueueAttributeName::All)
        .send()
        .await
        .unwrap()
        .attributes
        .unwrap_or_default();

    assert_eq!(
        attributes.get(&QueueAttributeName::FifoQueue).map(String::as_str),
        Some("true")
    );
    assert_eq!(
        attributes
            .get(&QueueAttributeName::MessageRetentionPeriod)
            .map(String::as_str),
        Some("345600")
    );
    let redrive: serde_json::Value = serde_json::from_str(
        attributes
            .get(&QueueAttributeName::RedrivePolicy)
            .expect("redrive policy"),
    )
    .unwrap();
    assert_eq!(redrive["deadLetterTargetArn"], queue.dead_letter_queue_arn);
    assert_eq!(redrive["maxReceiveCount"].to_string(), "10");

    // running again adopts what already exists
    let again = service
        .create_queue(
            &QueueSpec::new("Orders")
                .unwrap()
                .fifo(true)
                .unwrap()
                .tag("team", "payments"),
        )
        .await
        .unwrap();
    assert_eq!(again, queue);

    container.stop().await.unwrap();
}

#[tokio::test]
async fn resolves_exact_names_only() {
    let (endpoint, container) = localstack().await.unwrap();
    let (_, service) = local_service(&endpoint).await;

    service
        .create_queue(&QueueSpec::new("FooBar").unwrap())
        .await
        .unwrap();
    assert_eq!(service.resolve_queue_url("Foo").await.unwrap(), None);

    service
        .create_queue(&QueueSpec::new("Foo").unwrap())
        .await
        .unwrap();
    let url = service.resolve_queue_url("Foo").await.unwrap().unwrap();
    assert!(url.ends_with("/Foo"));

    let dlq = service
        .resolve_queue_url_of_kind("Foo-", QueueKind::DeadLetter)
        .await
        .unwrap()
        .unwrap();
    assert!(dlq.ends_with("/Foo-dlq"));

    assert!(service
        .resolve_queue_arn("Missing")
        .await
        .unwrap_err()
        .is_not_found());

    container.stop().await.unwrap();
}

#[tokio::test]
async fn identical_fifo_sends_are_both_delivered() {
    let (endpoint, container) = localstack().await.unwrap();
    let (broker, service) = local_service(&endpoint).await;

    let queue = service
        .create_queue(&QueueSpec::new("Invoices").unwrap().fifo(true).unwrap())
        .await
        .unwrap();

    for _ in 0..2 {
        service
            .send(OutboundMessage::new(&queue.queue_url, "same body").unwrap())
            .await
            .unwrap();
    }

    let attributes = broker
        .sqs
        .get_queue_attributes()
        .queue_url(&queue.queue_url)
        .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
        .send()
        .await
        .unwrap()
        .attributes
        .unwrap_or_default();
    assert_eq!(
        attributes
            .get(&QueueAttributeName::ApproximateNumberOfMessages)
            .map(String::as_str),
        Some("2")
    );

    container.stop().await.unwrap();
}

#[tokio::test]
async fn subscribes_queue_to_topic() {
    let (endpoint, container) = localstack().await.unwrap();
    let (broker, service) = local_service(&endpoint).await;

    let topic_arn = service
        .create_topic(&TopicSpec::new("events").unwrap())
        .await
        .unwrap();
    let queue = service
        .create_queue(&QueueSpec::new("audit").unwrap())
        .await
        .unwrap();

    assert_eq!(service.resolve_topic_arn("events").await.unwrap(), topic_arn);

    let subscription_arn = service.subscribe("events", "audit").await.unwrap();
    assert!(subscription_arn.starts_with(&topic_arn));

    let subscriptions = broker
        .sns
        .list_subscriptions_by_topic()
        .topic_arn(&topic_arn)
        .send()
        .await
        .unwrap()
        .subscriptions
        .unwrap_or_default();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].protocol(), Some("sqs"));
    assert_eq!(subscriptions[0].endpoint(), Some(queue.queue_arn.as_str()));

    container.stop().await.unwrap();
}
