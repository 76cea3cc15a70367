//! Sends outbound messages, attaching FIFO metadata when the target needs it.

use crate::broker::{SendMessageRequest, SharedBroker};
use crate::error::{Error, Result};
use crate::naming;

/// Message group used for FIFO sends that do not name one.
pub const DEFAULT_MESSAGE_GROUP: &str = "default";

/// Broker limit for a per-message delay.
pub const MAX_DELAY_SECONDS: u32 = 900;

/// A message ready to send. Validated when built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    queue_url: String,
    body: String,
    delay_seconds: Option<u32>,
    fifo: Option<bool>,
    group_id: Option<String>,
}

impl OutboundMessage {
    pub fn new(queue_url: impl Into<String>, body: impl Into<String>) -> Result<Self> {
        let queue_url = queue_url.into();
        let body = body.into();
        if queue_url.is_empty() {
            return Err(Error::validation("queue url", "cannot be empty"));
        }
        if body.is_empty() {
            return Err(Error::validation("message body", "cannot be empty"));
        }
        Ok(Self {
            queue_url,
            body,
            delay_seconds: None,
            fifo: None,
            group_id: None,
        })
    }

    /// Overrides the queue's delivery delay for this message.
    pub fn delay_seconds(mut self, seconds: u32) -> Result<Self> {
        if seconds > MAX_DELAY_SECONDS {
            return Err(Error::validation(
                "delay",
                format!("{seconds} seconds exceeds {MAX_DELAY_SECONDS}"),
            ));
        }
        self.delay_seconds = Some(seconds);
        Ok(self)
    }

    /// Forces FIFO handling on or off instead of detecting it from the URL.
    pub fn fifo(mut self, fifo: bool) -> Self {
        self.fifo = Some(fifo);
        self
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Result<Self> {
        let group_id = group_id.into();
        if group_id.is_empty() {
            return Err(Error::validation("message group id", "cannot be empty"));
        }
        self.group_id = Some(group_id);
        Ok(self)
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn is_fifo(&self) -> bool {
        self.fifo
            .unwrap_or_else(|| naming::is_fifo(naming::queue_name_from_url(&self.queue_url)))
    }
}

/// Sends messages through the shared broker.
#[derive(Clone)]
pub struct Dispatcher {
    broker: SharedBroker,
}

impl Dispatcher {
    pub fn new(broker: SharedBroker) -> Self {
        Self { broker }
    }

    /// Sends a message and returns the broker's message id.
    ///
    /// FIFO sends get a fresh deduplication id on every call. The broker only
    /// collapses its own network retries of this one call; a caller sending the
    /// same body again produces a second message.
    pub async fn send(&self, message: OutboundMessage) -> Result<String> {
        let request = build_request(message)?;
        let queue_url = request.queue_url.clone();
        log::debug!(
            "sending message to {queue_url} (dedup id {:?})",
            request.message_deduplication_id
        );

        self.broker
            .send_message(request)
            .await
            .map_err(|source| Error::Send { queue_url, source })
    }
}

fn build_request(message: OutboundMessage) -> Result<SendMessageRequest> {
    let fifo = message.is_fifo();
    let OutboundMessage {
        queue_url,
        body,
        delay_seconds,
        group_id,
        ..
    } = message;

    if !fifo {
        if group_id.is_some() {
            return Err(Error::validation(
                "message group id",
                "only FIFO queues take a message group id",
            ));
        }
        return Ok(SendMessageRequest {
            queue_url,
            body,
            delay_seconds,
            message_group_id: None,
            message_deduplication_id: None,
        });
    }

    if delay_seconds.is_some_and(|d| d > 0) {
        return Err(Error::validation(
            "delay",
            "FIFO queues do not support per-message delays",
        ));
    }

    Ok(SendMessageRequest {
        queue_url,
        body,
        delay_seconds: None,
        message_group_id: Some(group_id.unwrap_or_else(|| DEFAULT_MESSAGE_GROUP.to_string())),
        message_deduplication_id: Some(uuid::Uuid::new_v4().to_string()),
    })
}
