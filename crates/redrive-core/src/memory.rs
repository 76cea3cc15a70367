//! In-process broker for tests and local development.
//!
//! Models the broker-side behaviour the rest of the crate leans on:
//! - idempotent `CreateQueue` with attribute conflict detection
//! - queue delay, per-message delay, visibility timeouts and message retention
//! - receive counting and `RedrivePolicy` routing into the dead letter queue
//! - FIFO group ids, deduplication ids and per-group ordering
//! - long polling, driven by `tokio::time` so tests can pause the clock
//!
//! Every call is journaled, and failures can be injected per operation.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::broker::{
    attribute, Attributes, BrokerClient, BrokerError, BrokerResult, Message, ReceiveOptions,
    SendMessageRequest, Tags, QUEUE_PROTOCOL,
};
use crate::naming;

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETENTION: Duration = Duration::from_secs(4 * 24 * 60 * 60);
const DEDUPLICATION_WINDOW: Duration = Duration::from_secs(5 * 60);

/// A call made against the [`InMemoryBroker`], in the order it was made.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerCall {
    CreateQueue {
        name: String,
        attributes: Attributes,
        tags: Tags,
    },
    GetQueueArn {
        queue_url: String,
    },
    ListQueues {
        prefix: String,
    },
    SendMessage(SendMessageRequest),
    ReceiveMessages {
        queue_url: String,
    },
    DeleteMessage {
        queue_url: String,
        receipt_handle: String,
    },
    CreateTopic {
        name: String,
        attributes: Attributes,
        tags: Tags,
    },
    ListTopics,
    Subscribe {
        topic_arn: String,
        protocol: String,
        endpoint_arn: String,
    },
}

impl BrokerCall {
    /// The broker operation name, matching [`BrokerError::operation`].
    pub fn operation(&self) -> &'static str {
        match self {
            BrokerCall::CreateQueue { .. } => "CreateQueue",
            BrokerCall::GetQueueArn { .. } => "GetQueueAttributes",
            BrokerCall::ListQueues { .. } => "ListQueues",
            BrokerCall::SendMessage(_) => "SendMessage",
            BrokerCall::ReceiveMessages { .. } => "ReceiveMessage",
            BrokerCall::DeleteMessage { .. } => "DeleteMessage",
            BrokerCall::CreateTopic { .. } => "CreateTopic",
            BrokerCall::ListTopics => "ListTopics",
            BrokerCall::Subscribe { .. } => "Subscribe",
        }
    }
}

/// A subscription recorded by [`InMemoryBroker::subscribe`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub subscription_arn: String,
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint_arn: String,
}

/// In-process implementation of [`BrokerClient`].
pub struct InMemoryBroker {
    region: String,
    account: String,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    queues: BTreeMap<String, MemoryQueue>,
    topics: BTreeMap<String, MemoryTopic>,
    subscriptions: Vec<Subscription>,
    journal: Vec<BrokerCall>,
    failures: Vec<(&'static str, String)>,
    sequence: u64,
}

struct MemoryQueue {
    url: String,
    arn: String,
    attributes: Attributes,
    tags: Tags,
    messages: VecDeque<StoredMessage>,
    deduplication: HashMap<String, (String, Instant)>,
}

struct StoredMessage {
    message_id: String,
    body: String,
    group_id: Option<String>,
    sent_at: Instant,
    visible_at: Instant,
    receive_count: u32,
    receipt_handle: Option<String>,
}

struct MemoryTopic {
    arn: String,
    attributes: Attributes,
    tags: Tags,
}

struct RedrivePolicy {
    target_arn: String,
    max_receive_count: u32,
}

impl MemoryQueue {
    fn is_fifo(&self) -> bool {
        self.attributes
            .get(attribute::FIFO_QUEUE)
            .is_some_and(|v| v == "true")
    }

    fn seconds_attribute(&self, name: &str) -> Option<Duration> {
        self.attributes
            .get(name)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    fn redrive_policy(&self) -> Option<RedrivePolicy> {
        let raw = self.attributes.get(attribute::REDRIVE_POLICY)?;
        parse_redrive_policy(raw)
    }
}

fn parse_redrive_policy(raw: &str) -> Option<RedrivePolicy> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let target_arn = value.get("deadLetterTargetArn")?.as_str()?.to_string();
    let max_receive_count = match value.get("maxReceiveCount")? {
        serde_json::Value::Number(n) => u32::try_from(n.as_u64()?).ok()?,
        serde_json::Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    Some(RedrivePolicy {
        target_arn,
        max_receive_count,
    })
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn take_failure(&mut self, operation: &'static str) -> BrokerResult<()> {
        match self.failures.iter().position(|(op, _)| *op == operation) {
            Some(index) => {
                let (operation, message) = self.failures.remove(index);
                Err(BrokerError::rejected(operation, message))
            }
            None => Ok(()),
        }
    }

    fn queue_by_url(
        &mut self,
        operation: &'static str,
        url: &str,
    ) -> BrokerResult<&mut MemoryQueue> {
        self.queues
            .get_mut(naming::queue_name_from_url(url))
            .filter(|q| q.url == url)
            .ok_or_else(|| {
                BrokerError::rejected(
                    operation,
                    format!("NonExistentQueue: the specified queue does not exist: {url}"),
                )
            })
    }

    fn queue_by_arn(&mut self, arn: &str) -> Option<&mut MemoryQueue> {
        self.queues.values_mut().find(|q| q.arn == arn)
    }

    /// Picks visible messages, applying retention and redrive first.
    /// Returns the deliveries and the next instant something becomes visible.
    fn deliver(
        &mut self,
        queue_url: &str,
        options: &ReceiveOptions,
        now: Instant,
    ) -> BrokerResult<(Vec<Message>, Option<Instant>)> {
        let handle_seed = self.next_id();
        let queue = self.queue_by_url("ReceiveMessage", queue_url)?;

        let retention = queue
            .seconds_attribute(attribute::MESSAGE_RETENTION_PERIOD)
            .unwrap_or(DEFAULT_RETENTION);
        queue.messages.retain(|m| m.sent_at + retention > now);

        let visibility = options.visibility_timeout.unwrap_or_else(|| {
            queue
                .seconds_attribute(attribute::VISIBILITY_TIMEOUT)
                .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT)
        });
        let max_messages = options.max_messages.clamp(1, 10) as usize;
        let redrive = queue.redrive_policy();
        let fifo = queue.is_fifo();

        // a FIFO group is blocked while one of its messages is in flight
        let mut blocked_groups: HashSet<String> = HashSet::new();
        if fifo {
            for m in queue.messages.iter() {
                if m.receive_count > 0 && m.visible_at > now {
                    if let Some(group) = &m.group_id {
                        blocked_groups.insert(group.clone());
                    }
                }
            }
        }

        let mut delivered = Vec::new();
        let mut redriven = Vec::new();
        let mut next_visible: Option<Instant> = None;
        let mut index = 0;
        while index < queue.messages.len() {
            let message = &mut queue.messages[index];

            if message.visible_at > now {
                next_visible = Some(
                    next_visible.map_or(message.visible_at, |t| t.min(message.visible_at)),
                );
                index += 1;
                continue;
            }

            if let Some(policy) = &redrive {
                if message.receive_count >= policy.max_receive_count {
                    if let Some(moved) = queue.messages.remove(index) {
                        redriven.push(moved);
                    }
                    continue;
                }
            }

            if delivered.len() >= max_messages {
                index += 1;
                continue;
            }

            if let Some(group) = &message.group_id {
                if blocked_groups.contains(group) {
                    index += 1;
                    continue;
                }
            }

            message.receive_count += 1;
            message.visible_at = now + visibility;
            let receipt_handle = format!(
                "{}#{}#{}",
                message.message_id, message.receive_count, handle_seed
            );
            message.receipt_handle = Some(receipt_handle.clone());

            let mut attributes = Attributes::new();
            attributes.insert(
                attribute::APPROXIMATE_RECEIVE_COUNT.to_string(),
                message.receive_count.to_string(),
            );
            if let Some(group) = &message.group_id {
                attributes.insert("MessageGroupId".to_string(), group.clone());
            }

            delivered.push(Message {
                message_id: message.message_id.clone(),
                receipt_handle,
                body: message.body.clone(),
                attributes,
            });
            index += 1;
        }

        if let Some(policy) = redrive {
            if !redriven.is_empty() {
                match self.queue_by_arn(&policy.target_arn) {
                    Some(target) => {
                        for mut message in redriven {
                            message.receive_count = 0;
                            message.receipt_handle = None;
                            message.visible_at = now;
                            target.messages.push_back(message);
                        }
                    }
                    None => log::warn!(
                        "dropping {} messages: dead letter target {} does not exist",
                        redriven.len(),
                        policy.target_arn
                    ),
                }
            }
        }

        Ok((delivered, next_visible))
    }
}

impl InMemoryBroker {
    /// Creates an empty broker for the `us-east-1` region and a zeroed account id.
    pub fn new() -> Self {
        Self::with_identity("us-east-1", "000000000000")
    }

    pub fn with_identity(region: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account: account.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn queue_url(&self, name: &str) -> String {
        format!(
            "https://sqs.{}.amazonaws.com/{}/{}",
            self.region, self.account, name
        )
    }

    fn arn(&self, service: &str, name: &str) -> String {
        format!("arn:aws:{}:{}:{}:{}", service, self.region, self.account, name)
    }

    /// Makes the next call to `operation` fail with `message`.
    pub fn fail_next(&self, operation: &'static str, message: impl Into<String>) {
        self.lock().failures.push((operation, message.into()));
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.lock().journal.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().journal.clear();
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.lock().subscriptions.clone()
    }

    pub fn queue_attributes(&self, name: &str) -> Option<Attributes> {
        self.lock().queues.get(name).map(|q| q.attributes.clone())
    }

    pub fn queue_tags(&self, name: &str) -> Option<Tags> {
        self.lock().queues.get(name).map(|q| q.tags.clone())
    }

    pub fn topic_attributes(&self, name: &str) -> Option<Attributes> {
        self.lock().topics.get(name).map(|t| t.attributes.clone())
    }

    pub fn topic_tags(&self, name: &str) -> Option<Tags> {
        self.lock().topics.get(name).map(|t| t.tags.clone())
    }

    /// Bodies of every message held by a queue, in flight or not.
    pub fn queued_bodies(&self, name: &str) -> Vec<String> {
        self.lock()
            .queues
            .get(name)
            .map(|q| q.messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn check_fifo_naming(
    operation: &'static str,
    name: &str,
    attributes: &Attributes,
    fifo_attribute: &str,
) -> BrokerResult<()> {
    let flagged = attributes.get(fifo_attribute).is_some_and(|v| v == "true");
    let suffixed = naming::is_fifo(name);
    if flagged != suffixed {
        return Err(BrokerError::rejected(
            operation,
            format!(
                "InvalidParameterValue: `{name}` must end with {} exactly when {fifo_attribute} is true",
                naming::FIFO_SUFFIX
            ),
        ));
    }
    Ok(())
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn create_queue(
        &self,
        name: &str,
        attributes: &Attributes,
        tags: &Tags,
    ) -> BrokerResult<String> {
        const OP: &str = "CreateQueue";
        let mut state = self.lock();
        state.journal.push(BrokerCall::CreateQueue {
            name: name.to_string(),
            attributes: attributes.clone(),
            tags: tags.clone(),
        });
        state.take_failure(OP)?;

        check_fifo_naming(OP, name, attributes, attribute::FIFO_QUEUE)?;

        if let Some(existing) = state.queues.get(name) {
            if existing.attributes != *attributes {
                return Err(BrokerError::rejected(
                    OP,
                    format!("QueueAlreadyExists: `{name}` exists with different attributes"),
                ));
            }
            return Ok(existing.url.clone());
        }

        if let Some(raw) = attributes.get(attribute::REDRIVE_POLICY) {
            let policy = parse_redrive_policy(raw).ok_or_else(|| {
                BrokerError::rejected(OP, format!("InvalidParameterValue: RedrivePolicy `{raw}`"))
            })?;
            let fifo = naming::is_fifo(name);
            let target_matches = state
                .queues
                .values()
                .any(|q| q.arn == policy.target_arn && q.is_fifo() == fifo);
            if !target_matches {
                return Err(BrokerError::rejected(
                    OP,
                    format!(
                        "InvalidParameterValue: dead letter target {} does not exist or differs in type",
                        policy.target_arn
                    ),
                ));
            }
        }

        let url = self.queue_url(name);
        state.queues.insert(
            name.to_string(),
            MemoryQueue {
                url: url.clone(),
                arn: self.arn("sqs", name),
                attributes: attributes.clone(),
                tags: tags.clone(),
                messages: VecDeque::new(),
                deduplication: HashMap::new(),
            },
        );
        Ok(url)
    }

    async fn queue_arn(&self, queue_url: &str) -> BrokerResult<String> {
        const OP: &str = "GetQueueAttributes";
        let mut state = self.lock();
        state.journal.push(BrokerCall::GetQueueArn {
            queue_url: queue_url.to_string(),
        });
        state.take_failure(OP)?;
        Ok(state.queue_by_url(OP, queue_url)?.arn.clone())
    }

    async fn list_queues(&self, prefix: &str) -> BrokerResult<Vec<String>> {
        let mut state = self.lock();
        state.journal.push(BrokerCall::ListQueues {
            prefix: prefix.to_string(),
        });
        state.take_failure("ListQueues")?;
        Ok(state
            .queues
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(_, q)| q.url.clone())
            .collect())
    }

    async fn send_message(&self, request: SendMessageRequest) -> BrokerResult<String> {
        const OP: &str = "SendMessage";
        let mut state = self.lock();
        state.journal.push(BrokerCall::SendMessage(request.clone()));
        state.take_failure(OP)?;

        let message_id = format!("msg-{:08}", state.next_id());
        let now = Instant::now();
        let queue = state.queue_by_url(OP, &request.queue_url)?;

        let group_id = if queue.is_fifo() {
            let group = request.message_group_id.clone().ok_or_else(|| {
                BrokerError::rejected(
                    OP,
                    "MissingParameter: MessageGroupId is required for FIFO queues",
                )
            })?;
            if request.delay_seconds.is_some_and(|d| d > 0) {
                return Err(BrokerError::rejected(
                    OP,
                    "InvalidParameterValue: FIFO queues do not support per-message delays",
                ));
            }
            let dedup = request.message_deduplication_id.clone().ok_or_else(|| {
                BrokerError::rejected(
                    OP,
                    "InvalidParameterValue: MessageDeduplicationId is required without content based deduplication",
                )
            })?;
            queue
                .deduplication
                .retain(|_, (_, seen)| *seen + DEDUPLICATION_WINDOW > now);
            if let Some((original, _)) = queue.deduplication.get(&dedup) {
                return Ok(original.clone());
            }
            queue.deduplication.insert(dedup, (message_id.clone(), now));
            Some(group)
        } else {
            if request.message_group_id.is_some() {
                return Err(BrokerError::rejected(
                    OP,
                    "InvalidParameterValue: MessageGroupId is only valid for FIFO queues",
                ));
            }
            None
        };

        let delay = request
            .delay_seconds
            .map(|d| Duration::from_secs(u64::from(d)))
            .or_else(|| queue.seconds_attribute(attribute::DELAY_SECONDS))
            .unwrap_or_default();

        queue.messages.push_back(StoredMessage {
            message_id: message_id.clone(),
            body: request.body,
            group_id,
            sent_at: now,
            visible_at: now + delay,
            receive_count: 0,
            receipt_handle: None,
        });
        Ok(message_id)
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        options: &ReceiveOptions,
    ) -> BrokerResult<Vec<Message>> {
        {
            let mut state = self.lock();
            state.journal.push(BrokerCall::ReceiveMessages {
                queue_url: queue_url.to_string(),
            });
            state.take_failure("ReceiveMessage")?;
        }

        let deadline = Instant::now() + options.wait_time;
        loop {
            let now = Instant::now();
            let (messages, next_visible) = self.lock().deliver(queue_url, options, now)?;
            if !messages.is_empty() || now >= deadline {
                return Ok(messages);
            }
            let wake = next_visible.map_or(deadline, |t| t.min(deadline));
            tokio::time::sleep_until(wake).await;
        }
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> BrokerResult<()> {
        const OP: &str = "DeleteMessage";
        let mut state = self.lock();
        state.journal.push(BrokerCall::DeleteMessage {
            queue_url: queue_url.to_string(),
            receipt_handle: receipt_handle.to_string(),
        });
        state.take_failure(OP)?;

        let queue = state.queue_by_url(OP, queue_url)?;
        // stale handles are accepted and ignored
        queue
            .messages
            .retain(|m| m.receipt_handle.as_deref() != Some(receipt_handle));
        Ok(())
    }

    async fn create_topic(
        &self,
        name: &str,
        attributes: &Attributes,
        tags: &Tags,
    ) -> BrokerResult<String> {
        const OP: &str = "CreateTopic";
        let mut state = self.lock();
        state.journal.push(BrokerCall::CreateTopic {
            name: name.to_string(),
            attributes: attributes.clone(),
            tags: tags.clone(),
        });
        state.take_failure(OP)?;

        check_fifo_naming(OP, name, attributes, attribute::FIFO_TOPIC)?;

        let arn = self.arn("sns", name);
        let topic = state
            .topics
            .entry(name.to_string())
            .or_insert_with(|| MemoryTopic {
                arn,
                attributes: attributes.clone(),
                tags: Tags::new(),
            });
        topic.tags.extend(tags.clone());
        Ok(topic.arn.clone())
    }

    async fn list_topics(&self) -> BrokerResult<Option<Vec<String>>> {
        let mut state = self.lock();
        state.journal.push(BrokerCall::ListTopics);
        state.take_failure("ListTopics")?;
        Ok(Some(state.topics.values().map(|t| t.arn.clone()).collect()))
    }

    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint_arn: &str,
    ) -> BrokerResult<String> {
        const OP: &str = "Subscribe";
        let mut state = self.lock();
        state.journal.push(BrokerCall::Subscribe {
            topic_arn: topic_arn.to_string(),
            protocol: protocol.to_string(),
            endpoint_arn: endpoint_arn.to_string(),
        });
        state.take_failure(OP)?;

        if !state.topics.values().any(|t| t.arn == topic_arn) {
            return Err(BrokerError::rejected(
                OP,
                format!("NotFound: topic {topic_arn} does not exist"),
            ));
        }
        if protocol != QUEUE_PROTOCOL || state.queue_by_arn(endpoint_arn).is_none() {
            return Err(BrokerError::rejected(
                OP,
                format!("InvalidParameter: unsupported endpoint {protocol}:{endpoint_arn}"),
            ));
        }

        let subscription_arn = format!("{topic_arn}:{:08}", state.next_id());
        state.subscriptions.push(Subscription {
            subscription_arn: subscription_arn.clone(),
            topic_arn: topic_arn.to_string(),
            protocol: protocol.to_string(),
            endpoint_arn: endpoint_arn.to_string(),
        });
        Ok(subscription_arn)
    }
}
