//! Creates queues paired with dead letter queues, topics, and topic subscriptions.

use serde::Serialize;

use crate::broker::{attribute, Attributes, SharedBroker, Tags, QUEUE_PROTOCOL};
use crate::error::{Error, Result};
use crate::naming;
use crate::resolver::Resolver;

/// Deliveries allowed before the broker moves a message to the dead letter queue.
pub const MAX_RECEIVE_COUNT: u32 = 10;

/// Delay applied to every new message on provisioned queues.
pub const QUEUE_DELAY_SECONDS: u32 = 60;

pub const DEFAULT_RETENTION_DAYS: u32 = 4;

/// Broker limits for `MessageRetentionPeriod`.
pub const MIN_RETENTION_SECONDS: u32 = 1;
pub const MAX_RETENTION_SECONDS: u32 = 1_209_600;

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// A queue to provision. Validated when built, so provisioning never sees a bad name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSpec {
    name: String,
    fifo: bool,
    tags: Tags,
    retention_seconds: u32,
}

impl QueueSpec {
    /// A non-FIFO queue with no tags and the default retention.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        naming::validate_queue_name(&name, false)?;
        Ok(Self {
            name,
            fifo: false,
            tags: Tags::new(),
            retention_seconds: DEFAULT_RETENTION_DAYS * SECONDS_PER_DAY,
        })
    }

    /// Makes both queues FIFO, adding the `.fifo` suffix to their names.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] when `<name>-dlq.fifo` no longer fits the
    /// broker's name limit.
    pub fn fifo(mut self, fifo: bool) -> Result<Self> {
        naming::validate_queue_name(&self.name, fifo)?;
        self.fifo = fifo;
        Ok(self)
    }

    /// Adds a tag applied to both queues. A repeated key keeps the last value.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Sets how long the broker keeps messages on both queues.
    pub fn retention_days(self, days: u32) -> Result<Self> {
        let seconds = days.checked_mul(SECONDS_PER_DAY).ok_or_else(|| {
            Error::validation("retention", format!("{days} days is out of range"))
        })?;
        self.retention_seconds(seconds)
    }

    /// # Errors
    /// Returns [`Error::Validation`] outside the broker's
    /// [`MIN_RETENTION_SECONDS`] to [`MAX_RETENTION_SECONDS`] range.
    pub fn retention_seconds(mut self, seconds: u32) -> Result<Self> {
        if !(MIN_RETENTION_SECONDS..=MAX_RETENTION_SECONDS).contains(&seconds) {
            return Err(Error::validation(
                "retention",
                format!(
                    "{seconds} seconds is outside {MIN_RETENTION_SECONDS}..={MAX_RETENTION_SECONDS}"
                ),
            ));
        }
        self.retention_seconds = seconds;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_fifo(&self) -> bool {
        self.fifo
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn retention(&self) -> u32 {
        self.retention_seconds
    }

    pub fn queue_name(&self) -> String {
        naming::queue_name(&self.name, self.fifo)
    }

    pub fn dead_letter_queue_name(&self) -> String {
        naming::dead_letter_queue_name(&self.name, self.fifo)
    }

    fn base_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(
            attribute::DELAY_SECONDS.to_string(),
            QUEUE_DELAY_SECONDS.to_string(),
        );
        attributes.insert(
            attribute::MESSAGE_RETENTION_PERIOD.to_string(),
            self.retention_seconds.to_string(),
        );
        if self.fifo {
            attributes.insert(attribute::FIFO_QUEUE.to_string(), "true".to_string());
        }
        attributes
    }
}

/// A topic to provision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSpec {
    name: String,
    fifo: bool,
    tags: Tags,
}

impl TopicSpec {
    /// A standard topic with no tags.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] for an empty name or one with characters
    /// other than ASCII letters, digits, `-` and `_`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        naming::validate_topic_name(&name, false)?;
        Ok(Self {
            name,
            fifo: false,
            tags: Tags::new(),
        })
    }

    /// Sets `FifoTopic` and the `.fifo` name suffix.
    pub fn fifo(mut self, fifo: bool) -> Result<Self> {
        naming::validate_topic_name(&self.name, fifo)?;
        self.fifo = fifo;
        Ok(self)
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// The full topic name sent to the broker.
    pub fn topic_name(&self) -> String {
        naming::topic_name(&self.name, self.fifo)
    }
}

/// The redrive policy bound to every provisioned queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: String,
    pub max_receive_count: u32,
}

impl RedrivePolicy {
    pub fn new(dead_letter_target_arn: impl Into<String>) -> Self {
        Self {
            dead_letter_target_arn: dead_letter_target_arn.into(),
            max_receive_count: MAX_RECEIVE_COUNT,
        }
    }

    /// The JSON document the broker expects in the `RedrivePolicy` attribute.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "deadLetterTargetArn": self.dead_letter_target_arn,
            "maxReceiveCount": self.max_receive_count,
        })
        .to_string()
    }
}

/// URLs and ARNs of a provisioned queue and its dead letter queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProvisionedQueue {
    pub queue_url: String,
    pub queue_arn: String,
    pub dead_letter_queue_url: String,
    pub dead_letter_queue_arn: String,
}

/// Creates broker resources. Owns their creation only; the broker owns them afterwards.
#[derive(Clone)]
pub struct Provisioner {
    broker: SharedBroker,
    resolver: Resolver,
}

impl Provisioner {
    pub fn new(broker: SharedBroker) -> Self {
        let resolver = Resolver::new(broker.clone());
        Self { broker, resolver }
    }

    /// Creates the dead letter queue, then the queue that redrives into it.
    ///
    /// The broker calls run strictly in order: the redrive policy needs the
    /// dead letter queue's ARN, which only exists once that queue does. An
    /// existing dead letter queue is reused, so re-running after a failed main
    /// queue creation adopts the queue the failed run left behind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provisioning`] naming the failed step. Nothing is rolled back.
    pub async fn create_queue(&self, spec: &QueueSpec) -> Result<ProvisionedQueue> {
        let dlq_name = spec.dead_letter_queue_name();
        let queue_name = spec.queue_name();

        let existing = self
            .resolver
            .resolve_queue_url(&dlq_name)
            .await
            .map_err(|e| match e {
                Error::Lookup { source, .. } => Error::Provisioning {
                    operation: "look up dead letter queue",
                    resource: dlq_name.clone(),
                    source,
                },
                other => other,
            })?;

        let dead_letter_queue_url = match existing {
            Some(url) => {
                log::info!("reusing existing dead letter queue {url}");
                url
            }
            None => {
                let url = self
                    .broker
                    .create_queue(&dlq_name, &spec.base_attributes(), spec.tags())
                    .await
                    .map_err(|source| Error::Provisioning {
                        operation: "create dead letter queue",
                        resource: dlq_name.clone(),
                        source,
                    })?;
                log::info!("created dead letter queue {url}");
                url
            }
        };

        let dead_letter_queue_arn = self
            .broker
            .queue_arn(&dead_letter_queue_url)
            .await
            .map_err(|source| Error::Provisioning {
                operation: "get ARN of dead letter queue",
                resource: dlq_name.clone(),
                source,
            })?;
        log::debug!("dead letter queue {dlq_name} has ARN {dead_letter_queue_arn}");

        let mut attributes = spec.base_attributes();
        attributes.insert(
            attribute::REDRIVE_POLICY.to_string(),
            RedrivePolicy::new(&dead_letter_queue_arn).to_json(),
        );

        let queue_url = self
            .broker
            .create_queue(&queue_name, &attributes, spec.tags())
            .await
            .map_err(|source| Error::Provisioning {
                operation: "create queue",
                resource: queue_name.clone(),
                source,
            })?;
        log::info!("created queue {queue_url} redriving to {dlq_name}");

        let queue_arn = self
            .broker
            .queue_arn(&queue_url)
            .await
            .map_err(|source| Error::Provisioning {
                operation: "get ARN of queue",
                resource: queue_name.clone(),
                source,
            })?;

        Ok(ProvisionedQueue {
            queue_url,
            queue_arn,
            dead_letter_queue_url,
            dead_letter_queue_arn,
        })
    }

    /// Creates a topic and returns its ARN.
    pub async fn create_topic(&self, spec: &TopicSpec) -> Result<String> {
        let name = spec.topic_name();
        let mut attributes = Attributes::new();
        attributes.insert(attribute::FIFO_TOPIC.to_string(), spec.fifo.to_string());

        let arn = self
            .broker
            .create_topic(&name, &attributes, &spec.tags)
            .await
            .map_err(|source| Error::Provisioning {
                operation: "create topic",
                resource: name.clone(),
                source,
            })?;
        log::info!("created topic {arn}");
        Ok(arn)
    }

    /// Subscribes a queue to a topic, both given by full name.
    ///
    /// Subscriptions are not deduplicated here; every call creates one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when either resource does not exist.
    pub async fn subscribe(&self, topic_name: &str, queue_name: &str) -> Result<String> {
        if topic_name.is_empty() {
            return Err(Error::validation("topic name", "cannot be empty"));
        }
        if queue_name.is_empty() {
            return Err(Error::validation("queue name", "cannot be empty"));
        }

        let topic_arn = self.resolver.resolve_topic_arn(topic_name).await?;
        let queue_arn = self.resolver.resolve_queue_arn(queue_name).await?;

        let subscription_arn = self
            .broker
            .subscribe(&topic_arn, QUEUE_PROTOCOL, &queue_arn)
            .await
            .map_err(|source| Error::Provisioning {
                operation: "subscribe queue to topic",
                resource: format!("{queue_name} -> {topic_name}"),
                source,
            })?;
        log::info!("subscribed {queue_arn} to {topic_arn} as {subscription_arn}");
        Ok(subscription_arn)
    }

    /// Lists every queue URL whose name starts with `prefix`.
    pub async fn list_queues(&self, prefix: &str) -> Result<Vec<String>> {
        self.broker
            .list_queues(prefix)
            .await
            .map_err(|source| Error::Lookup {
                operation: "list queues for",
                resource: prefix.to_string(),
                source,
            })
    }

    /// Lists every topic ARN.
    pub async fn list_topics(&self) -> Result<Vec<String>> {
        self.broker
            .list_topics()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|source| Error::Lookup {
                operation: "list topics",
                resource: "*".to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerClient;
    use crate::memory::{BrokerCall, InMemoryBroker};
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryBroker>, Provisioner) {
        let broker = Arc::new(InMemoryBroker::new());
        let provisioner = Provisioner::new(broker.clone());
        (broker, provisioner)
    }

    fn created_queue_names(broker: &InMemoryBroker) -> Vec<String> {
        broker
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::CreateQueue { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn spec_validates_once_at_construction() {
        assert!(QueueSpec::new("").unwrap_err().is_validation());
        assert!(QueueSpec::new("Orders").unwrap().retention_days(15).is_err());
        assert!(QueueSpec::new("Orders").unwrap().retention_days(0).is_err());
        assert!(QueueSpec::new("Orders").unwrap().retention_days(14).is_ok());
        assert!(QueueSpec::new("Orders")
            .unwrap()
            .retention_seconds(1)
            .is_ok());
        assert!(TopicSpec::new("").is_err());

        let spec = QueueSpec::new("Orders").unwrap();
        assert_eq!(spec.retention(), 4 * 86_400);
    }

    #[test]
    fn redrive_policy_json_matches_broker_format() {
        let json = RedrivePolicy::new("arn:aws:sqs:us-east-1:000000000000:Orders-dlq").to_json();
        assert_eq!(
            json,
            r#"{"deadLetterTargetArn":"arn:aws:sqs:us-east-1:000000000000:Orders-dlq","maxReceiveCount":10}"#
        );
    }

    #[tokio::test]
    async fn creates_dead_letter_queue_before_main_queue() {
        let (broker, provisioner) = setup();
        let spec = QueueSpec::new("Orders").unwrap().tag("team", "billing");

        let queue = provisioner.create_queue(&spec).await.unwrap();

        let operations: Vec<&str> = broker
            .calls()
            .iter()
            .map(BrokerCall::operation)
            .collect();
        assert_eq!(
            operations,
            vec![
                "ListQueues",
                "CreateQueue",
                "GetQueueAttributes",
                "CreateQueue",
                "GetQueueAttributes"
            ]
        );
        assert_eq!(created_queue_names(&broker), vec!["Orders-dlq", "Orders"]);

        let dlq_attributes = broker.queue_attributes("Orders-dlq").unwrap();
        assert_eq!(dlq_attributes[attribute::DELAY_SECONDS], "60");
        assert_eq!(dlq_attributes[attribute::MESSAGE_RETENTION_PERIOD], "345600");
        assert!(!dlq_attributes.contains_key(attribute::REDRIVE_POLICY));
        assert!(!dlq_attributes.contains_key(attribute::FIFO_QUEUE));

        let attributes = broker.queue_attributes("Orders").unwrap();
        let policy: serde_json::Value =
            serde_json::from_str(&attributes[attribute::REDRIVE_POLICY]).unwrap();
        assert_eq!(policy["deadLetterTargetArn"], queue.dead_letter_queue_arn.as_str());
        assert_eq!(policy["maxReceiveCount"], 10);

        assert_eq!(broker.queue_tags("Orders").unwrap()["team"], "billing");
        assert_eq!(broker.queue_tags("Orders-dlq").unwrap()["team"], "billing");
        assert!(queue.queue_url.ends_with("/Orders"));
        assert_eq!(queue.queue_arn, "arn:aws:sqs:us-east-1:000000000000:Orders");
    }

    #[tokio::test]
    async fn fifo_queue_pair_carries_suffix_and_attribute() {
        let (broker, provisioner) = setup();
        let spec = QueueSpec::new("Orders")
            .unwrap()
            .fifo(true)
            .unwrap()
            .retention_days(4)
            .unwrap();

        let queue = provisioner.create_queue(&spec).await.unwrap();

        assert_eq!(
            created_queue_names(&broker),
            vec!["Orders-dlq.fifo", "Orders.fifo"]
        );
        for name in ["Orders-dlq.fifo", "Orders.fifo"] {
            assert_eq!(
                broker.queue_attributes(name).unwrap()[attribute::FIFO_QUEUE],
                "true"
            );
        }

        let redrive = &broker.queue_attributes("Orders.fifo").unwrap()[attribute::REDRIVE_POLICY];
        assert!(redrive.contains(&queue.dead_letter_queue_arn));
        assert!(redrive.contains(r#""maxReceiveCount":10"#));
    }

    #[tokio::test]
    async fn main_queue_failure_leaves_dead_letter_queue_behind() {
        let (broker, provisioner) = setup();
        // an existing queue with other attributes makes the main queue creation fail
        broker
            .create_queue("Orders", &Attributes::new(), &Tags::new())
            .await
            .unwrap();

        let err = provisioner
            .create_queue(&QueueSpec::new("Orders").unwrap())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "failed to create queue `Orders`");
        let Error::Provisioning { source, .. } = err else {
            panic!("expected a provisioning error");
        };
        assert!(source.message.starts_with("QueueAlreadyExists"));
        assert!(broker.queue_attributes("Orders-dlq").is_some());
    }

    #[tokio::test]
    async fn rerun_adopts_dead_letter_queue_left_by_failed_run() {
        let (broker, provisioner) = setup();
        let spec = QueueSpec::new("Orders").unwrap();

        broker.fail_next("GetQueueAttributes", "throttled");
        let err = provisioner.create_queue(&spec).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provisioning {
                operation: "get ARN of dead letter queue",
                ..
            }
        ));
        assert!(broker.queue_attributes("Orders-dlq").is_some());
        assert!(broker.queue_attributes("Orders").is_none());

        broker.clear_calls();
        let queue = provisioner.create_queue(&spec).await.unwrap();
        assert_eq!(created_queue_names(&broker), vec!["Orders"]);
        assert!(queue.dead_letter_queue_url.ends_with("/Orders-dlq"));
    }

    #[tokio::test]
    async fn provisioning_twice_returns_same_resources() {
        let (_broker, provisioner) = setup();
        let spec = QueueSpec::new("Orders").unwrap().fifo(true).unwrap();

        let first = provisioner.create_queue(&spec).await.unwrap();
        let second = provisioner.create_queue(&spec).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn dead_letter_queue_failure_is_reported_with_step() {
        let (broker, provisioner) = setup();
        broker.fail_next("CreateQueue", "AccessDenied");

        let err = provisioner
            .create_queue(&QueueSpec::new("Orders").unwrap())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to create dead letter queue `Orders-dlq`"
        );
        assert!(broker.queue_attributes("Orders-dlq").is_none());
    }

    #[tokio::test]
    async fn dead_letter_queue_lookup_failure_is_a_provisioning_error() {
        let (broker, provisioner) = setup();
        broker.fail_next("ListQueues", "throttled");

        let err = provisioner
            .create_queue(&QueueSpec::new("Orders").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Provisioning { operation, ref resource, .. }
                if operation == "look up dead letter queue" && resource == "Orders-dlq"
        ));
        assert_eq!(
            err.to_string(),
            "failed to look up dead letter queue `Orders-dlq`"
        );
        assert!(broker.queue_attributes("Orders-dlq").is_none());
    }

    #[tokio::test]
    async fn creates_fifo_topic() {
        let (broker, provisioner) = setup();
        let spec = TopicSpec::new("events")
            .unwrap()
            .fifo(true)
            .unwrap()
            .tag("env", "dev");

        let arn = provisioner.create_topic(&spec).await.unwrap();
        assert_eq!(arn, "arn:aws:sns:us-east-1:000000000000:events.fifo");
        assert_eq!(
            broker.topic_attributes("events.fifo").unwrap()[attribute::FIFO_TOPIC],
            "true"
        );
        assert_eq!(broker.topic_tags("events.fifo").unwrap()["env"], "dev");

        provisioner
            .create_topic(&TopicSpec::new("plain").unwrap())
            .await
            .unwrap();
        assert_eq!(
            broker.topic_attributes("plain").unwrap()[attribute::FIFO_TOPIC],
            "false"
        );
    }

    #[tokio::test]
    async fn subscribes_queue_to_topic() {
        let (broker, provisioner) = setup();
        let queue = provisioner
            .create_queue(&QueueSpec::new("Orders").unwrap())
            .await
            .unwrap();
        let topic_arn = provisioner
            .create_topic(&TopicSpec::new("events").unwrap())
            .await
            .unwrap();

        let subscription = provisioner.subscribe("events", "Orders").await.unwrap();

        let subscriptions = broker.subscriptions();
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].subscription_arn, subscription);
        assert_eq!(subscriptions[0].topic_arn, topic_arn);
        assert_eq!(subscriptions[0].endpoint_arn, queue.queue_arn);
        assert_eq!(subscriptions[0].protocol, "sqs");

        // repeated calls are not deduplicated
        provisioner.subscribe("events", "Orders").await.unwrap();
        assert_eq!(broker.subscriptions().len(), 2);
    }

    #[tokio::test]
    async fn subscribe_reports_missing_resources() {
        let (_broker, provisioner) = setup();
        provisioner
            .create_topic(&TopicSpec::new("events").unwrap())
            .await
            .unwrap();

        let err = provisioner.subscribe("events", "Orders").await.unwrap_err();
        assert_eq!(err.to_string(), "queue `Orders` was not found");

        let err = provisioner.subscribe("missing", "Orders").await.unwrap_err();
        assert_eq!(err.to_string(), "topic `missing` was not found");

        assert!(provisioner.subscribe("", "Orders").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn lists_queues_and_topics() {
        let (_broker, provisioner) = setup();
        provisioner
            .create_queue(&QueueSpec::new("Orders").unwrap())
            .await
            .unwrap();
        provisioner
            .create_topic(&TopicSpec::new("events").unwrap())
            .await
            .unwrap();

        let queues = provisioner.list_queues("Orders").await.unwrap();
        assert_eq!(queues.len(), 2);
        assert!(provisioner.list_queues("Missing").await.unwrap().is_empty());
        assert_eq!(provisioner.list_topics().await.unwrap().len(), 1);
    }
}
