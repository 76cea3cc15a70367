mod reader;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use redrive::{
    handler_fn, AwsBroker, BrokerSettings, ConsumerConfig, Message, OutboundMessage, QueueKind,
    QueueService, QueueSpec, ResourceKind, TopicSpec, DEFAULT_RETENTION_DAYS,
};

#[tokio::main]
pub async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = Cli::parse().run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[derive(Debug, Parser)]
#[command(name = "redrive")]
#[command(
    about = "provision and consume AWS queues that come with a dead letter queue",
    long_about = None
)]
pub struct Cli {
    /// Use static test credentials against LocalStack
    #[arg(long, global = true)]
    local: bool,

    /// Service endpoint, e.g. a LocalStack URL
    #[arg(long, global = true, env = "AWS_ENDPOINT_URL")]
    endpoint: Option<String>,

    #[arg(long, global = true)]
    region: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a queue together with its dead letter queue
    CreateQueue {
        name: String,
        #[arg(long)]
        fifo: bool,
        /// `key` or `key=value`; repeatable
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
        #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
        retention_days: u32,
    },
    /// Create a topic
    CreateTopic {
        name: String,
        #[arg(long)]
        fifo: bool,
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },
    /// List queue URLs
    List {
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// List topic ARNs
    Topics,
    /// Print the URL of the first queue under a prefix
    Url {
        name: String,
        /// Look for the dead letter queue instead
        #[arg(long)]
        dlq: bool,
    },
    /// Print the ARN of a queue
    Arn { name: String },
    /// Print the ARN of a topic
    TopicArn { name: String },
    /// Subscribe a queue to a topic
    Subscribe { topic: String, queue: String },
    /// Send a message, or one message per stdin line when no body is given
    Send {
        queue: String,
        body: Option<String>,
        #[arg(long)]
        delay: Option<u32>,
        /// Message group for FIFO queues
        #[arg(long)]
        group: Option<String>,
    },
    /// Print each received message as JSON until interrupted
    Consume {
        queue: String,
        /// Seconds a message may take before a timeout is reported
        #[arg(long)]
        timeout: Option<u64>,
    },
}

impl Cli {
    fn settings(&self) -> BrokerSettings {
        if self.local {
            BrokerSettings {
                region: self.region.clone(),
                ..BrokerSettings::local(self.endpoint.as_deref())
            }
        } else {
            BrokerSettings {
                region: self.region.clone(),
                endpoint_url: self.endpoint.clone(),
                local: false,
            }
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.settings().load().await?;
        let service = QueueService::new(Arc::new(AwsBroker::from_config(config)));

        match self.command {
            Commands::CreateQueue {
                name,
                fifo,
                tags,
                retention_days,
            } => {
                let spec = tags.into_iter().fold(
                    QueueSpec::new(name)?.fifo(fifo)?.retention_days(retention_days)?,
                    |spec, (key, value)| spec.tag(key, value),
                );
                let queue = service.create_queue(&spec).await?;
                println!("{}", serde_json::to_string_pretty(&queue)?);
            }
            Commands::CreateTopic { name, fifo, tags } => {
                let spec = tags
                    .into_iter()
                    .fold(TopicSpec::new(name)?.fifo(fifo)?, |spec, (key, value)| {
                        spec.tag(key, value)
                    });
                println!("{}", service.create_topic(&spec).await?);
            }
            Commands::List { prefix } => {
                for url in service.list_queues(&prefix).await? {
                    println!("{url}");
                }
            }
            Commands::Topics => {
                for arn in service.list_topics().await? {
                    println!("{arn}");
                }
            }
            Commands::Url { name, dlq } => {
                let kind = if dlq {
                    QueueKind::DeadLetter
                } else {
                    QueueKind::Primary
                };
                let url = service
                    .resolve_queue_url_of_kind(&name, kind)
                    .await?
                    .ok_or_else(|| queue_not_found(&name))?;
                println!("{url}");
            }
            Commands::Arn { name } => println!("{}", service.resolve_queue_arn(&name).await?),
            Commands::TopicArn { name } => println!("{}", service.resolve_topic_arn(&name).await?),
            Commands::Subscribe { topic, queue } => {
                println!("{}", service.subscribe(&topic, &queue).await?)
            }
            Commands::Send {
                queue,
                body,
                delay,
                group,
            } => {
                let queue_url = service
                    .resolve_queue_url(&queue)
                    .await?
                    .ok_or_else(|| queue_not_found(&queue))?;

                let outbound = |body: String| -> redrive::Result<OutboundMessage> {
                    let mut message = OutboundMessage::new(&queue_url, body)?;
                    if let Some(seconds) = delay {
                        message = message.delay_seconds(seconds)?;
                    }
                    if let Some(group) = &group {
                        message = message.group_id(group)?;
                    }
                    Ok(message)
                };

                match body {
                    Some(body) => println!("{}", service.send(outbound(body)?).await?),
                    None => {
                        let (reader, mut lines) = reader::message_lines(tokio::io::stdin(), 100);
                        let mut sent = 0usize;
                        while let Some(line) = lines.recv().await {
                            println!("{}", service.send(outbound(line)?).await?);
                            sent += 1;
                        }
                        reader.await?;
                        log::info!("sent {sent} message(s) to {queue_url}");
                    }
                }
            }
            Commands::Consume { queue, timeout } => {
                let mut config = ConsumerConfig::default();
                if let Some(seconds) = timeout {
                    config = config.handler_timeout(Duration::from_secs(seconds));
                }

                let handler = handler_fn(|message: Message| async move {
                    println!("{}", serde_json::to_string(&message)?);
                    anyhow::Ok(())
                });
                let consumer = service.start_consumer(&queue, handler, config).await?;

                tokio::signal::ctrl_c().await?;
                log::info!("interrupted, stopping consumer");
                consumer.stop().await;
            }
        }

        Ok(())
    }
}

fn queue_not_found(name: &str) -> redrive::Error {
    redrive::Error::NotFound {
        kind: ResourceKind::Queue,
        name: name.to_string(),
    }
}

/// Parses `key=value`, or a bare `key` which is also used as the value.
fn parse_tag(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').unwrap_or((raw, raw));
    if key.is_empty() {
        return Err(format!("tag `{raw}` has an empty key"));
    }
    Ok((key.to_string(), value.to_string()))
}
