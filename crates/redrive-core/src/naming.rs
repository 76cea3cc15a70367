//! Naming rules for queues, dead letter queues, and topics.

use crate::error::{Error, Result};

/// Appended to the logical name of every dead letter queue.
pub const DEAD_LETTER_SUFFIX: &str = "-dlq";

/// Carried by every FIFO queue and topic name.
pub const FIFO_SUFFIX: &str = ".fifo";

/// Broker limit for a queue name, suffixes included.
pub const MAX_QUEUE_NAME_LEN: usize = 80;

/// Broker limit for a topic name, suffixes included.
pub const MAX_TOPIC_NAME_LEN: usize = 256;

/// Whether a queue is a primary queue or the dead letter queue paired with one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueKind {
    Primary,
    DeadLetter,
}

/// Full name of the primary queue for a logical name.
pub fn queue_name(name: &str, fifo: bool) -> String {
    with_fifo_suffix(name.to_string(), fifo)
}

/// Full name of the dead letter queue paired with a logical name.
pub fn dead_letter_queue_name(name: &str, fifo: bool) -> String {
    with_fifo_suffix(format!("{name}{DEAD_LETTER_SUFFIX}"), fifo)
}

/// Full name of a topic for a logical name.
pub fn topic_name(name: &str, fifo: bool) -> String {
    with_fifo_suffix(name.to_string(), fifo)
}

fn with_fifo_suffix(mut name: String, fifo: bool) -> String {
    if fifo {
        name.push_str(FIFO_SUFFIX);
    }
    name
}

/// The final path segment of a queue URL, which is the queue's full name.
pub fn queue_name_from_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// The final `:` segment of an ARN, which is the resource's full name.
pub fn name_from_arn(arn: &str) -> &str {
    arn.rsplit(':').next().unwrap_or(arn)
}

/// FIFO queues and topics are recognised by their name suffix.
pub fn is_fifo(name_or_url: &str) -> bool {
    name_or_url.ends_with(FIFO_SUFFIX)
}

/// Classifies a full queue name as primary or dead letter.
pub fn queue_kind(full_name: &str) -> QueueKind {
    let base = full_name.strip_suffix(FIFO_SUFFIX).unwrap_or(full_name);
    if base.ends_with(DEAD_LETTER_SUFFIX) {
        QueueKind::DeadLetter
    } else {
        QueueKind::Primary
    }
}

/// Validates a logical queue name, making sure the longest derived name
/// (`<name>-dlq.fifo`) still fits the broker's limit.
pub fn validate_queue_name(name: &str, fifo: bool) -> Result<()> {
    validate_characters("queue name", name)?;

    let longest = dead_letter_queue_name(name, fifo);
    if longest.len() > MAX_QUEUE_NAME_LEN {
        return Err(Error::validation(
            "queue name",
            format!(
                "`{longest}` exceeds maximum length: {} > {MAX_QUEUE_NAME_LEN} characters",
                longest.len()
            ),
        ));
    }

    Ok(())
}

/// Validates a logical topic name.
pub fn validate_topic_name(name: &str, fifo: bool) -> Result<()> {
    validate_characters("topic name", name)?;

    let full = topic_name(name, fifo);
    if full.len() > MAX_TOPIC_NAME_LEN {
        return Err(Error::validation(
            "topic name",
            format!(
                "`{full}` exceeds maximum length: {} > {MAX_TOPIC_NAME_LEN} characters",
                full.len()
            ),
        ));
    }

    Ok(())
}

fn validate_characters(field: &'static str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation(field, "cannot be empty"));
    }
    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
            return Err(Error::validation(
                field,
                format!("invalid character '{c}' in `{name}`. Allowed: alphanumeric, '-', '_'"),
            ));
        }
    }
    Ok(())
}
