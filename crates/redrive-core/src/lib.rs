//! # redrive
//!
//! Core library for provisioning and using message queues that come paired
//! with a dead letter queue.
//!
//! Every queue created here gets a `<name>-dlq` sibling and a redrive policy
//! pointing at it, so a message that keeps failing ends up parked instead of
//! looping forever. The broker does the redelivery counting; this crate only
//! wires it up and stays out of its way.
//!
//! ## Features
//!
//! - **Provisioning**: Create queue + dead letter queue pairs, topics, and topic subscriptions
//! - **Lookup**: Resolve exact queue and topic names to URLs and ARNs
//! - **Sending**: Send messages, with FIFO group and deduplication ids filled in
//! - **Consuming**: Poll a queue and delete each message only after its handler succeeds
//! - **Brokers**: An AWS SQS/SNS client and an in-memory broker for tests
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use redrive::{AwsBroker, BrokerSettings, OutboundMessage, QueueService, QueueSpec};
//!
//! # async fn example() -> redrive::Result<()> {
//! let config = BrokerSettings::default().load().await?;
//! let service = QueueService::new(Arc::new(AwsBroker::from_config(config)));
//!
//! let queue = service
//!     .create_queue(&QueueSpec::new("Orders")?.fifo(true)?.retention_days(4)?)
//!     .await?;
//! println!("created {} -> {}", queue.queue_url, queue.dead_letter_queue_url);
//!
//! service
//!     .send(OutboundMessage::new(&queue.queue_url, r#"{"order":1}"#)?)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod aws;
pub mod broker;
mod config;
mod consumer;
mod dispatcher;
mod error;
pub mod memory;
pub mod naming;
mod provisioner;
mod resolver;
mod service;

pub use aws::AwsBroker;
pub use broker::{BrokerClient, BrokerError, Message, SharedBroker};
pub use config::{BrokerSettings, LOCALSTACK_ENDPOINT};
pub use consumer::{
    handler_fn, Consumer, ConsumerConfig, ConsumerEvent, ConsumerHandle, ConsumerState,
    HandlerFn, MessageHandler,
};
pub use dispatcher::{Dispatcher, OutboundMessage, DEFAULT_MESSAGE_GROUP, MAX_DELAY_SECONDS};
pub use error::{Error, ResourceKind, Result};
pub use memory::InMemoryBroker;
pub use naming::QueueKind;
pub use provisioner::{
    ProvisionedQueue, Provisioner, QueueSpec, RedrivePolicy, TopicSpec, DEFAULT_RETENTION_DAYS,
    MAX_RECEIVE_COUNT, QUEUE_DELAY_SECONDS,
};
pub use resolver::Resolver;
pub use service::QueueService;
