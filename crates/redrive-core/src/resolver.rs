//! Maps full queue and topic names to the URLs and ARNs the broker needs.

use crate::broker::SharedBroker;
use crate::error::{Error, ResourceKind, Result};
use crate::naming::{self, QueueKind};

/// Resolves names by prefix search, keeping only exact matches.
#[derive(Clone)]
pub struct Resolver {
    broker: SharedBroker,
}

impl Resolver {
    /// # Arguments
    /// * `broker` - The client whose `ListQueues`/`ListTopics` results are searched
    pub fn new(broker: SharedBroker) -> Self {
        Self { broker }
    }

    /// Returns the URL of the queue named exactly `full_queue_name`.
    ///
    /// The broker lists queues by prefix, so `Foo` also returns `FooBar`; only
    /// the URL whose final segment equals the name is kept. `None` means there
    /// is no such queue, which is not an error.
    pub async fn resolve_queue_url(&self, full_queue_name: &str) -> Result<Option<String>> {
        if full_queue_name.is_empty() {
            return Ok(None);
        }

        let urls = self
            .broker
            .list_queues(full_queue_name)
            .await
            .map_err(|source| Error::Lookup {
                operation: "list queues for",
                resource: full_queue_name.to_string(),
                source,
            })?;

        Ok(urls
            .into_iter()
            .find(|url| naming::queue_name_from_url(url) == full_queue_name))
    }

    /// Returns the first queue under `prefix` that is (or is not) a dead letter queue.
    pub async fn resolve_queue_url_of_kind(
        &self,
        prefix: &str,
        kind: QueueKind,
    ) -> Result<Option<String>> {
        let urls = self
            .broker
            .list_queues(prefix)
            .await
            .map_err(|source| Error::Lookup {
                operation: "list queues for",
                resource: prefix.to_string(),
                source,
            })?;

        Ok(urls
            .into_iter()
            .find(|url| naming::queue_kind(naming::queue_name_from_url(url)) == kind))
    }

    /// Returns the ARN of the queue named exactly `full_queue_name`.
    pub async fn resolve_queue_arn(&self, full_queue_name: &str) -> Result<String> {
        let url = self
            .resolve_queue_url(full_queue_name)
            .await?
            .ok_or_else(|| Error::not_found(ResourceKind::Queue, full_queue_name))?;

        let arn = self
            .broker
            .queue_arn(&url)
            .await
            .map_err(|source| Error::Lookup {
                operation: "get queue ARN of",
                resource: full_queue_name.to_string(),
                source,
            })?;
        log::debug!("resolved queue {full_queue_name} to {arn}");
        Ok(arn)
    }

    /// Returns the ARN of the topic named exactly `full_topic_name`.
    pub async fn resolve_topic_arn(&self, full_topic_name: &str) -> Result<String> {
        let topics = self
            .broker
            .list_topics()
            .await
            .map_err(|source| Error::Lookup {
                operation: "list topics for",
                resource: full_topic_name.to_string(),
                source,
            })?
            .ok_or_else(|| Error::not_found(ResourceKind::Topic, full_topic_name))?;

        let arn = topics
            .into_iter()
            .find(|arn| naming::name_from_arn(arn) == full_topic_name)
            .ok_or_else(|| Error::not_found(ResourceKind::Topic, full_topic_name))?;
        log::debug!("resolved topic {full_topic_name} to {arn}");
        Ok(arn)
    }
}
