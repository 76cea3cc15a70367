/// Reads lines from `reader` on a background task and hands them over a
/// bounded channel, so sending can start before input is exhausted.
///
/// Lines are trimmed and blank lines skipped, since an empty message body is
/// rejected anyway. The task stops at EOF, on the first I/O error (logged),
/// or when the receiver is dropped.
///
/// # Example
/// ```ignore
/// let (handle, mut lines) = message_lines(tokio::io::stdin(), 100);
/// while let Some(body) = lines.recv().await {
///     println!("{body}");
/// }
/// handle.await?;
/// ```
pub fn message_lines<R: tokio::io::AsyncRead + Unpin + Send + 'static>(
    reader: R,
    channel_capacity: usize,
) -> (
    tokio::task::JoinHandle<()>,
    tokio::sync::mpsc::Receiver<String>,
) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let (tx, rx) = tokio::sync::mpsc::channel::<String>(channel_capacity);
    let buffer = BufReader::new(reader);

    let task = tokio::spawn(async move {
        let mut lines = buffer.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let body = line.trim();
                    if body.is_empty() {
                        continue;
                    }
                    if tx.send(body.to_string()).await.is_err() {
                        log::debug!("line receiver dropped, stopping reader");
                        break;
                    }
                }
                Ok(None) => {
                    log::trace!("reached end of input");
                    break;
                }
                Err(e) => {
                    log::error!("failed to read input: {e}");
                    break;
                }
            }
        }
    });

    (task, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn collect(mut rx: tokio::sync::mpsc::Receiver<String>) -> Vec<String> {
        let mut received = vec![];
        while let Some(line) = rx.recv().await {
            received.push(line);
        }
        received
    }

    #[tokio::test]
    async fn skips_blank_lines() {
        let input = b"{\"order\":1}\n\n   \n  {\"order\":2}  \n".to_vec();
        let (handle, rx) = message_lines(Cursor::new(input), 10);

        assert_eq!(collect(rx).await, vec![r#"{"order":1}"#, r#"{"order":2}"#]);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn last_line_without_newline_is_kept() {
        let (handle, rx) = message_lines(Cursor::new(b"first\nsecond".to_vec()), 1);
        assert_eq!(collect(rx).await, vec!["first", "second"]);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_at_io_error() {
        let mock_reader = tokio_test::io::Builder::new()
            .read(b"first line\n".as_ref())
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "mock error"))
            .build();

        let (handle, rx) = message_lines(mock_reader, 1);

        assert_eq!(collect(rx).await, vec!["first line"]);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_receiver_is_dropped() {
        let (handle, rx) = message_lines(Cursor::new(b"line1\nline2\n".to_vec()), 1);
        drop(rx);

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap();
        assert!(result.is_ok());
    }
}
