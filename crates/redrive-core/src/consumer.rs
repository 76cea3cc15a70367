//! Long-lived consumer loop: receive, process, acknowledge.
//!
//! A message is deleted only after its handler succeeds. Failed, panicked, or
//! timed-out handlers leave the message in place; the broker makes it visible
//! again once its visibility timeout lapses and moves it to the dead letter
//! queue after `maxReceiveCount` deliveries. This loop keeps no retry counter
//! of its own, so a broker without redrive support would need one added here.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerError, Message, ReceiveOptions, SharedBroker};
use crate::error::{Error, Result};

/// Processes one delivered message. Returning an error leaves the message on the queue.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message) -> anyhow::Result<()>;
}

/// A [`MessageHandler`] built from an async closure, see [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Wraps an async closure as a [`MessageHandler`].
///
/// ```
/// use redrive::{handler_fn, Message};
///
/// let handler = handler_fn(|message: Message| async move {
///     println!("{}", message.body);
///     anyhow::Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        (self.0)(message).await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
    /// Built but never started; every [`Consumer`] is in this state.
    Created,
    Started,
    Running,
    Stopped,
}

/// Something that went wrong in the loop. None of these stop it.
#[derive(Debug)]
pub enum ConsumerEvent {
    /// A receive or delete call failed.
    Transport {
        queue_url: String,
        error: BrokerError,
    },
    /// The handler returned an error or panicked; the message was not deleted.
    Processing {
        message_id: String,
        error: anyhow::Error,
    },
    /// The handler outran its time limit; the message was not deleted.
    /// The handler itself keeps running.
    Timeout {
        message_id: String,
        timeout: Duration,
    },
}

impl ConsumerEvent {
    fn log(&self) {
        match self {
            ConsumerEvent::Transport { queue_url, error } => {
                log::error!("consumer on {queue_url}: {error}")
            }
            ConsumerEvent::Processing { message_id, error } => {
                log::error!("processing message {message_id} failed: {error:#}")
            }
            ConsumerEvent::Timeout {
                message_id,
                timeout,
            } => log::warn!("processing message {message_id} exceeded {timeout:?}"),
        }
    }
}

/// Polling parameters. Cadence and redelivery belong to the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Messages per receive call (1 to 10)
    pub max_messages: u32,
    /// Long-poll wait on an empty queue
    pub wait_time: Duration,
    /// Overrides the queue's visibility timeout
    pub visibility_timeout: Option<Duration>,
    /// Reports a [`ConsumerEvent::Timeout`] when a handler runs longer
    pub handler_timeout: Option<Duration>,
    /// Pause after a failed receive
    pub error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(20),
            visibility_timeout: None,
            handler_timeout: None,
            error_backoff: Duration::from_secs(10),
        }
    }
}

impl ConsumerConfig {
    pub fn max_messages(mut self, count: u32) -> Self {
        self.max_messages = count.clamp(1, 10);
        self
    }

    pub fn wait_time(mut self, wait: Duration) -> Self {
        self.wait_time = wait;
        self
    }

    pub fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

/// A consumer bound to one queue URL and one handler, not yet polling.
pub struct Consumer {
    broker: SharedBroker,
    queue_url: String,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
    events: Option<mpsc::UnboundedSender<ConsumerEvent>>,
}

impl Consumer {
    /// Binds a handler to a resolved queue URL.
    ///
    /// Deletes go to this same URL; passing a stale URL is a caller bug.
    pub fn create(
        broker: SharedBroker,
        queue_url: impl Into<String>,
        handler: impl MessageHandler,
    ) -> Result<Self> {
        let queue_url = queue_url.into();
        if queue_url.is_empty() {
            return Err(Error::validation("queue url", "cannot be empty"));
        }
        Ok(Self {
            broker,
            queue_url,
            handler: Arc::new(handler),
            config: ConsumerConfig::default(),
            events: None,
        })
    }

    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Events are always logged; this also delivers them to the returned channel.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ConsumerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Spawns the polling task.
    pub fn start(self) -> ConsumerHandle {
        let shutdown = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConsumerState::Started);
        let queue_url = self.queue_url.clone();

        let worker = Worker {
            broker: self.broker,
            queue_url: self.queue_url,
            handler: self.handler,
            config: self.config,
            events: self.events,
            state: state_tx,
        };
        let task = tokio::spawn(worker.run(shutdown.clone()));

        ConsumerHandle {
            queue_url,
            shutdown,
            state: state_rx,
            task,
        }
    }
}

/// Controls a started consumer.
pub struct ConsumerHandle {
    queue_url: String,
    shutdown: CancellationToken,
    state: watch::Receiver<ConsumerState>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Stops polling and waits for the loop to exit.
    ///
    /// Messages still being handled are not settled here; they are either
    /// deleted by a handler that already finished or redelivered after their
    /// visibility timeout.
    pub async fn stop(self) -> ConsumerState {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            log::error!("consumer task for {} ended abnormally: {e}", self.queue_url);
        }
        *self.state.borrow()
    }
}

struct Worker {
    broker: SharedBroker,
    queue_url: String,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
    events: Option<mpsc::UnboundedSender<ConsumerEvent>>,
    state: watch::Sender<ConsumerState>,
}

impl Worker {
    async fn run(self, shutdown: CancellationToken) {
        self.state.send_replace(ConsumerState::Running);
        log::info!("consumer started on {}", self.queue_url);

        let options = ReceiveOptions {
            max_messages: self.config.max_messages,
            wait_time: self.config.wait_time,
            visibility_timeout: self.config.visibility_timeout,
        };

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.broker.receive_messages(&self.queue_url, &options) => received,
            };

            match received {
                Ok(messages) => {
                    let batch = futures::future::join_all(
                        messages.into_iter().map(|message| self.process(message)),
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = batch => {}
                    }
                }
                Err(error) => {
                    self.emit(ConsumerEvent::Transport {
                        queue_url: self.queue_url.clone(),
                        error,
                    });
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        self.state.send_replace(ConsumerState::Stopped);
        log::info!("consumer stopped on {}", self.queue_url);
    }

    async fn process(&self, message: Message) {
        let message_id = message.message_id.clone();
        let receipt_handle = message.receipt_handle.clone();
        let handler = Arc::clone(&self.handler);

        // spawned so a timeout only stops waiting, it never cancels the handler
        let mut task = tokio::spawn(async move { handler.handle(message).await });

        let joined = match self.config.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    self.emit(ConsumerEvent::Timeout {
                        message_id,
                        timeout: limit,
                    });
                    return;
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(())) => self.acknowledge(&message_id, &receipt_handle).await,
            Ok(Err(error)) => self.emit(ConsumerEvent::Processing { message_id, error }),
            Err(join_error) => self.emit(ConsumerEvent::Processing {
                message_id,
                error: anyhow::anyhow!("handler panicked: {join_error}"),
            }),
        }
    }

    async fn acknowledge(&self, message_id: &str, receipt_handle: &str) {
        match self
            .broker
            .delete_message(&self.queue_url, receipt_handle)
            .await
        {
            Ok(()) => log::debug!("deleted message {message_id} from {}", self.queue_url),
            Err(error) => self.emit(ConsumerEvent::Transport {
                queue_url: self.queue_url.clone(),
                error,
            }),
        }
    }

    fn emit(&self, event: ConsumerEvent) {
        event.log();
        if let Some(events) = &self.events {
            // nobody listening is fine
            let _ = events.send(event);
        }
    }
}
