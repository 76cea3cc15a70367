//! [`BrokerClient`] backed by AWS SQS and SNS.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sns as sns;
use aws_sdk_sqs as sqs;
use sqs::error::DisplayErrorContext;
use sqs::types::{MessageSystemAttributeName, QueueAttributeName};

use crate::broker::{
    Attributes, BrokerClient, BrokerError, BrokerResult, Message, ReceiveOptions,
    SendMessageRequest, Tags,
};

/// Client for the SQS and SNS APIs.
///
/// # Example
///
/// ```no_run
/// use redrive::AwsBroker;
///
/// # async fn example() {
/// let config = aws_config::from_env().load().await;
/// let broker = AwsBroker::from_config(config);
/// # }
/// ```
#[derive(Clone)]
pub struct AwsBroker {
    /// The AWS SDK configuration both clients were built from
    pub config: SdkConfig,
    pub sqs: sqs::Client,
    pub sns: sns::Client,
}

impl AwsBroker {
    /// Creates the SQS and SNS clients from a pre-built AWS SDK config.
    ///
    /// The caller decides credentials and endpoints, e.g. a LocalStack endpoint
    /// when running with `--local`.
    pub fn from_config(config: SdkConfig) -> Self {
        let sqs = sqs::Client::new(&config);
        let sns = sns::Client::new(&config);
        Self { config, sqs, sns }
    }
}

fn sdk_error<E>(operation: &'static str, err: E) -> BrokerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    BrokerError::sdk(operation, message, err)
}

fn missing(operation: &'static str, field: &str) -> BrokerError {
    BrokerError::rejected(operation, format!("response is missing {field}"))
}

fn to_i32(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Converts an SDK message, skipping deliveries that lack the fields needed to ack them.
///
/// # See Also
///
/// - [AWS SQS Message API Reference](https://docs.aws.amazon.com/AWSSimpleQueueService/latest/APIReference/API_Message.html)
fn from_aws_message(message: sqs::types::Message) -> Option<Message> {
    let (Some(message_id), Some(receipt_handle)) = (message.message_id, message.receipt_handle)
    else {
        log::error!("skipping delivery without message id or receipt handle");
        return None;
    };

    let attributes = message
        .attributes
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| (name.as_str().to_string(), value))
        .collect();

    Some(Message {
        message_id,
        receipt_handle,
        body: message.body.unwrap_or_default(),
        attributes,
    })
}

#[async_trait]
impl BrokerClient for AwsBroker {
    async fn create_queue(
        &self,
        name: &str,
        attributes: &Attributes,
        tags: &Tags,
    ) -> BrokerResult<String> {
        const OP: &str = "CreateQueue";
        let attributes: HashMap<QueueAttributeName, String> = attributes
            .iter()
            .map(|(k, v)| (QueueAttributeName::from(k.as_str()), v.clone()))
            .collect();
        let tags: Option<HashMap<String, String>> =
            (!tags.is_empty()).then(|| tags.clone().into_iter().collect());

        let output = self
            .sqs
            .create_queue()
            .queue_name(name)
            .set_attributes(Some(attributes))
            .set_tags(tags)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        output.queue_url.ok_or_else(|| missing(OP, "QueueUrl"))
    }

    async fn queue_arn(&self, queue_url: &str) -> BrokerResult<String> {
        const OP: &str = "GetQueueAttributes";
        let output = self
            .sqs
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        output
            .attributes
            .and_then(|mut attributes| attributes.remove(&QueueAttributeName::QueueArn))
            .ok_or_else(|| missing(OP, "QueueArn"))
    }

    /// Handles pagination, returning every queue under the prefix regardless of count.
    async fn list_queues(&self, prefix: &str) -> BrokerResult<Vec<String>> {
        const OP: &str = "ListQueues";
        let prefix = (!prefix.is_empty()).then(|| prefix.to_string());
        let mut queues = Vec::new();
        let mut next_token = None;

        loop {
            let output = self
                .sqs
                .list_queues()
                .set_queue_name_prefix(prefix.clone())
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| sdk_error(OP, e))?;

            if let Some(mut list) = output.queue_urls {
                queues.append(&mut list);
            }

            let Some(token) = output.next_token else {
                break;
            };
            next_token = Some(token);
        }

        Ok(queues)
    }

    async fn send_message(&self, request: SendMessageRequest) -> BrokerResult<String> {
        const OP: &str = "SendMessage";
        let output = self
            .sqs
            .send_message()
            .queue_url(request.queue_url)
            .message_body(request.body)
            .set_delay_seconds(request.delay_seconds.map(|d| to_i32(u64::from(d))))
            .set_message_group_id(request.message_group_id)
            .set_message_deduplication_id(request.message_deduplication_id)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        output.message_id.ok_or_else(|| missing(OP, "MessageId"))
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        options: &ReceiveOptions,
    ) -> BrokerResult<Vec<Message>> {
        let output = self
            .sqs
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(to_i32(u64::from(options.max_messages.clamp(1, 10))))
            .wait_time_seconds(to_i32(options.wait_time.as_secs()))
            .set_visibility_timeout(options.visibility_timeout.map(|t| to_i32(t.as_secs())))
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| sdk_error("ReceiveMessage", e))?;

        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(from_aws_message)
            .collect())
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> BrokerResult<()> {
        self.sqs
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteMessage", e))?;
        Ok(())
    }

    async fn create_topic(
        &self,
        name: &str,
        attributes: &Attributes,
        tags: &Tags,
    ) -> BrokerResult<String> {
        const OP: &str = "CreateTopic";
        let tags = tags
            .iter()
            .map(|(key, value)| {
                sns::types::Tag::builder()
                    .key(key)
                    .value(value)
                    .build()
                    .map_err(|e| BrokerError::sdk(OP, format!("invalid tag `{key}`"), e))
            })
            .collect::<BrokerResult<Vec<_>>>()?;

        let output = self
            .sns
            .create_topic()
            .name(name)
            .set_attributes(Some(attributes.clone().into_iter().collect()))
            .set_tags((!tags.is_empty()).then_some(tags))
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        output.topic_arn.ok_or_else(|| missing(OP, "TopicArn"))
    }

    async fn list_topics(&self) -> BrokerResult<Option<Vec<String>>> {
        let mut topics: Option<Vec<String>> = None;
        let mut next_token = None;

        loop {
            let output = self
                .sns
                .list_topics()
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| sdk_error("ListTopics", e))?;

            if let Some(page) = output.topics {
                topics
                    .get_or_insert_with(Vec::new)
                    .extend(page.into_iter().filter_map(|t| t.topic_arn));
            }

            let Some(token) = output.next_token else {
                break;
            };
            next_token = Some(token);
        }

        Ok(topics)
    }

    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint_arn: &str,
    ) -> BrokerResult<String> {
        const OP: &str = "Subscribe";
        let output = self
            .sns
            .subscribe()
            .topic_arn(topic_arn)
            .protocol(protocol)
            .endpoint(endpoint_arn)
            .return_subscription_arn(true)
            .send()
            .await
            .map_err(|e| sdk_error(OP, e))?;

        output
            .subscription_arn
            .ok_or_else(|| missing(OP, "SubscriptionArn"))
    }
}
